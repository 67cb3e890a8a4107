use anyhow::{Context, Result, bail};
use serde_json::json;
use tracing::{error, info, warn};

use crate::alerts::AlertSeverity;
use crate::config::AppConfig;
use crate::state::SeverityShift;

/// Human-facing summary of a severity shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Notice {
    pub severity: Option<AlertSeverity>,
    pub title: &'static str,
    pub body: &'static str,
}

/// Map a severity shift onto the notice shown to operators. Only the level
/// being entered matters; where the shift came from does not.
pub fn notice_for_shift(shift: &SeverityShift) -> Notice {
    match shift.current {
        Some(severity) if severity.is_blocking() => Notice {
            severity: Some(severity),
            title: "Critical Alert",
            body: "One or more critical conditions detected",
        },
        Some(severity) => Notice {
            severity: Some(severity),
            title: "Warning",
            body: "Warning conditions detected",
        },
        None => Notice {
            severity: None,
            title: "All clear",
            body: "No alert conditions remain",
        },
    }
}

/// Delivers severity-shift notices to the log and an optional webhook.
#[derive(Clone)]
pub struct Notifier {
    device_id: String,
    webhook: Option<String>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_millis(
                config.timeouts.request_timeout_ms,
            ))
            .build()
            .context("failed to build webhook HTTP client")?;

        Ok(Self {
            device_id: config.device.id.clone(),
            webhook: config.notifiers.webhook.clone(),
            http,
        })
    }

    /// Emit a notice. Webhook failures are logged and never bubble into the
    /// poll cycle.
    pub async fn dispatch(&self, notice: Notice) {
        match notice.severity {
            Some(severity) if severity.is_blocking() => {
                error!(device = %self.device_id, title = notice.title, "{}", notice.body);
            }
            Some(_) => {
                warn!(device = %self.device_id, title = notice.title, "{}", notice.body);
            }
            None => {
                info!(device = %self.device_id, title = notice.title, "{}", notice.body);
                return;
            }
        }

        if let Some(url) = &self.webhook {
            if let Err(err) = self.post_webhook(url, &notice).await {
                warn!(device = %self.device_id, error = ?err, "failed to deliver webhook notice");
            }
        }
    }

    async fn post_webhook(&self, url: &str, notice: &Notice) -> Result<()> {
        let payload = json!({
            "device": self.device_id,
            "severity": notice.severity.map(AlertSeverity::as_str),
            "title": notice.title,
            "body": notice.body,
        });

        let response = self
            .http
            .post(url)
            .json(&payload)
            .send()
            .await
            .context("webhook request failed")?;

        if !response.status().is_success() {
            bail!("webhook returned {}", response.status());
        }
        Ok(())
    }
}
