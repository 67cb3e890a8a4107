use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::series::SeriesParams;

/// One full reading reported by the device snapshot endpoint. Field renames
/// track the gateway's JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    /// Raw stamp as sent by the firmware; resolved through
    /// [`crate::timestamp::normalize_timestamp`].
    pub timestamp: String,
    pub temperature: f64,
    pub humidity: f64,
    pub smoke_ppm: f64,
    pub methane_ppm: f64,
    #[serde(rename = "carbonMonoxide_ppm")]
    pub carbon_monoxide_ppm: f64,
    /// Flame indicator, 0 or 1.
    pub flame: f64,
    #[serde(default)]
    pub gps_lat: Option<f64>,
    #[serde(default)]
    pub gps_lon: Option<f64>,
    #[serde(rename = "sensorsReady")]
    pub sensors_ready: bool,
    pub state: DeviceState,
}

impl DeviceSnapshot {
    /// GPS fix, present only when both coordinates are finite numbers.
    pub fn gps(&self) -> Option<(f64, f64)> {
        match (self.gps_lat, self.gps_lon) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }

    /// Whether the flame indicator is raised. The firmware reports exactly
    /// 0 or 1.
    pub fn flame_triggered(&self) -> bool {
        self.flame == 1.0
    }
}

/// Discrete condition classification reported by the device firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Normal,
    Warning,
    Critical,
    Danger,
    /// Unrecognized firmware states carry no alert weight.
    #[serde(other)]
    Unknown,
}

/// Envelope returned by the device timeseries endpoint. Points arrive as
/// loose JSON objects and go through [`crate::series::normalize_points`].
#[derive(Debug, Clone, Deserialize)]
pub struct TimeseriesResponse {
    #[serde(rename = "deviceId", default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub points: Vec<serde_json::Value>,
}

/// HTTP client for the device gateway's REST endpoints.
#[derive(Clone)]
pub struct DeviceClient {
    http: reqwest::Client,
    api_root: String,
    device_id: String,
}

impl DeviceClient {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let timeout = Duration::from_millis(config.timeouts.request_timeout_ms);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build device HTTP client")?;

        Ok(Self {
            http,
            api_root: config.device.api_root.trim_end_matches('/').to_string(),
            device_id: config.device.id.clone(),
        })
    }

    fn device_url(&self) -> String {
        format!("{}/device/{}", self.api_root, self.device_id)
    }

    /// Fetch the current snapshot document.
    pub async fn fetch_snapshot(&self) -> Result<DeviceSnapshot> {
        let response = self
            .http
            .get(self.device_url())
            .send()
            .await
            .context("device snapshot request failed")?;

        if !response.status().is_success() {
            bail!("device snapshot request returned {}", response.status());
        }

        response
            .json::<DeviceSnapshot>()
            .await
            .context("device snapshot body was not valid JSON")
    }

    /// Fetch recent history for one metric.
    pub async fn fetch_timeseries(&self, params: &SeriesParams) -> Result<TimeseriesResponse> {
        let url = format!("{}/timeseries", self.device_url());
        let response = self
            .http
            .get(url)
            .query(&[
                ("limit", params.limit.to_string()),
                ("metric", params.metric.clone()),
            ])
            .send()
            .await
            .context("device timeseries request failed")?;

        if !response.status().is_success() {
            bail!("device timeseries request returned {}", response.status());
        }

        response
            .json::<TimeseriesResponse>()
            .await
            .context("device timeseries body was not valid JSON")
    }
}
