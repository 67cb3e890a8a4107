use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result, bail};
use chrono::FixedOffset;
use serde::Deserialize;
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "/config/sensemon.yaml";

/// Top-level configuration for the sensemon agent.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub sample_intervals: SampleIntervals,
    #[serde(default)]
    pub staleness: StalenessConfig,
    #[serde(default)]
    pub series: SeriesConfig,
    #[serde(default)]
    pub notifiers: Notifiers,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub timeouts: RequestTimeouts,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            device: DeviceConfig::default(),
            sample_intervals: SampleIntervals::default(),
            staleness: StalenessConfig::default(),
            series: SeriesConfig::default(),
            notifiers: Notifiers::default(),
            http: HttpConfig::default(),
            timeouts: RequestTimeouts::default(),
        }
    }
}

/// The monitored device and how to reach it.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    /// Base URL of the device REST API, e.g. `http://gateway.local:3000/api`.
    #[serde(default)]
    pub api_root: String,
    #[serde(default = "DeviceConfig::default_id")]
    pub id: String,
    /// Wall-clock zone the device firmware runs in, as `+HH:MM` / `-HH:MM`.
    #[serde(default = "DeviceConfig::default_utc_offset")]
    pub utc_offset: String,
}

impl DeviceConfig {
    fn default_id() -> String {
        "ESP32-01".to_string()
    }

    fn default_utc_offset() -> String {
        "+05:30".to_string()
    }

    pub fn parsed_offset(&self) -> Result<FixedOffset> {
        parse_utc_offset(&self.utc_offset)
            .with_context(|| format!("invalid device.utc_offset {:?}", self.utc_offset))
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            api_root: String::new(),
            id: Self::default_id(),
            utc_offset: Self::default_utc_offset(),
        }
    }
}

/// Loop schedule configuration (with friendly duration parsing).
#[derive(Debug, Clone, Deserialize)]
pub struct SampleIntervals {
    /// Snapshot loop (current reading, alert derivation).
    #[serde(
        default = "SampleIntervals::default_snapshot",
        with = "humantime_serde"
    )]
    pub snapshot: Duration,
}

impl SampleIntervals {
    const fn default_snapshot() -> Duration {
        Duration::from_secs(5)
    }
}

impl Default for SampleIntervals {
    fn default() -> Self {
        Self {
            snapshot: Self::default_snapshot(),
        }
    }
}

/// When a reading stops counting as live.
#[derive(Debug, Clone, Deserialize)]
pub struct StalenessConfig {
    /// A reading older than this marks the device offline.
    #[serde(
        default = "StalenessConfig::default_threshold",
        with = "humantime_serde"
    )]
    pub threshold: Duration,
}

impl StalenessConfig {
    const fn default_threshold() -> Duration {
        Duration::from_secs(15)
    }
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            threshold: Self::default_threshold(),
        }
    }
}

/// Initial history chart selection, before any API caller changes it.
#[derive(Debug, Clone, Deserialize)]
pub struct SeriesConfig {
    #[serde(default = "SeriesConfig::default_metric")]
    pub default_metric: String,
    #[serde(default = "SeriesConfig::default_limit")]
    pub default_limit: usize,
}

impl SeriesConfig {
    fn default_metric() -> String {
        "temperature".to_string()
    }

    const fn default_limit() -> usize {
        20
    }
}

impl Default for SeriesConfig {
    fn default() -> Self {
        Self {
            default_metric: Self::default_metric(),
            default_limit: Self::default_limit(),
        }
    }
}

/// Optional notifier configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Notifiers {
    /// Webhook receiving severity-shift notices as JSON.
    #[serde(default)]
    pub webhook: Option<String>,
}

impl Default for Notifiers {
    fn default() -> Self {
        Self { webhook: None }
    }
}

/// HTTP listener configuration (bind address).
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "HttpConfig::default_bind")]
    pub bind: String,
    #[serde(default = "HttpConfig::default_static_dir")]
    pub static_dir: String,
}

impl HttpConfig {
    fn default_bind() -> String {
        "0.0.0.0:8484".to_string()
    }

    fn default_static_dir() -> String {
        "frontend/dist".to_string()
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: Self::default_bind(),
            static_dir: Self::default_static_dir(),
        }
    }
}

/// Device request deadlines.
#[derive(Debug, Clone, Deserialize)]
pub struct RequestTimeouts {
    /// Keep below the snapshot interval so a hung request cannot stack onto
    /// the next tick.
    #[serde(default = "RequestTimeouts::default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl RequestTimeouts {
    const fn default_request_timeout_ms() -> u64 {
        4_000
    }
}

impl Default for RequestTimeouts {
    fn default() -> Self {
        Self {
            request_timeout_ms: Self::default_request_timeout_ms(),
        }
    }
}

/// Load configuration from YAML disk file, falling back to defaults + env overrides.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let target_path = if let Some(path) = path {
        path.to_path_buf()
    } else if let Ok(env_path) = env::var("SENSEMON_CONFIG") {
        PathBuf::from(env_path)
    } else {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    };

    let mut config = match try_parse_file(&target_path)? {
        Some(cfg) => {
            info!(path = %target_path.display(), "loaded configuration");
            cfg
        }
        None => {
            warn!(path = %target_path.display(), "config file not found; using built-in defaults");
            AppConfig::default()
        }
    };

    apply_env_overrides(&mut config)?;
    ensure_required_settings(&config)?;
    Ok(config)
}

fn try_parse_file(path: &Path) -> Result<Option<AppConfig>> {
    match fs::read_to_string(path) {
        Ok(raw) => {
            let cfg = serde_yaml::from_str(&raw)
                .with_context(|| format!("failed to parse YAML config at {}", path.display()))?;
            Ok(Some(cfg))
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => {
            Err(err).with_context(|| format!("failed to read config file at {}", path.display()))
        }
    }
}

fn apply_env_overrides(config: &mut AppConfig) -> Result<()> {
    if let Ok(id) = env::var("SENSEMON_DEVICE_ID") {
        if !id.is_empty() {
            config.device.id = id;
        }
    }

    match env::var("SENSEMON_API_ROOT") {
        Ok(api_root) => {
            if api_root.trim().is_empty() {
                bail!(
                    "Environment variable SENSEMON_API_ROOT is set but empty; populate it in your .env file."
                );
            }
            config.device.api_root = api_root;
        }
        Err(env::VarError::NotPresent) => {}
        Err(err) => return Err(err.into()),
    };

    if let Ok(webhook) = env::var("SENSEMON_WEBHOOK") {
        if !webhook.is_empty() {
            config.notifiers.webhook = Some(webhook);
        }
    }

    Ok(())
}

fn ensure_required_settings(config: &AppConfig) -> Result<()> {
    if config.device.api_root.trim().is_empty() {
        bail!(
            "Missing device API root. Set device.api_root in the YAML config or the SENSEMON_API_ROOT environment variable."
        );
    }
    config.device.parsed_offset()?;
    Ok(())
}

fn parse_utc_offset(raw: &str) -> Option<FixedOffset> {
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours = i32::from(hours.parse::<u8>().ok()?);
    let minutes = i32::from(minutes.parse::<u8>().ok()?);
    if hours > 23 || minutes > 59 {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
