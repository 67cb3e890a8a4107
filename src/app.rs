use std::sync::Arc;

use chrono::FixedOffset;
use tokio::sync::watch;

use crate::config::AppConfig;
use crate::device::DeviceClient;
use crate::metrics::AppMetrics;
use crate::notify::Notifier;
use crate::series::SeriesParams;
use crate::state::SharedState;

/// Shared application context passed to HTTP handlers and pollers.
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub client: DeviceClient,
    pub metrics: AppMetrics,
    pub state: SharedState,
    pub notifier: Notifier,
    /// Changing the value triggers a series refetch.
    pub series_tx: Arc<watch::Sender<SeriesParams>>,
    pub device_offset: FixedOffset,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        client: DeviceClient,
        metrics: AppMetrics,
        state: SharedState,
        notifier: Notifier,
        series_tx: watch::Sender<SeriesParams>,
        device_offset: FixedOffset,
    ) -> Self {
        Self {
            config: Arc::new(config),
            client,
            metrics,
            state,
            notifier,
            series_tx: Arc::new(series_tx),
            device_offset,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.config.device.id
    }
}
