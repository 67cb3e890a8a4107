use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::debug;

use crate::alerts::{self, Alert, AlertSeverity};
use crate::device::DeviceSnapshot;
use crate::series::{SeriesParams, SeriesPoint};
use crate::timestamp;

/// Everything the dashboard shows for the device, advanced one [`Event`] at
/// a time. Transitions are pure so tests can drive them with pinned clocks.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardState {
    pub device: Option<DeviceSnapshot>,
    pub online: bool,
    pub snapshot_loading: bool,
    pub last_error: Option<String>,
    /// Newest first, capped at [`alerts::ALERT_LOG_CAP`].
    pub alerts: Vec<Alert>,
    /// Highest severity of the previous derivation cycle.
    pub last_severity: Option<AlertSeverity>,
    pub series: SeriesState,
    #[serde(skip)]
    staleness: chrono::Duration,
    #[serde(skip)]
    device_offset: FixedOffset,
}

/// Chart slice of the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesState {
    pub params: SeriesParams,
    pub points: Vec<SeriesPoint>,
    pub loading: bool,
    pub error: Option<String>,
    #[serde(skip)]
    issued_seq: u64,
}

/// State machine inputs. Pollers and the HTTP layer only ever mutate the
/// dashboard by applying one of these.
#[derive(Debug, Clone)]
pub enum Event {
    SnapshotRequested,
    SnapshotReceived {
        snapshot: DeviceSnapshot,
        now: DateTime<Utc>,
    },
    SnapshotFailed {
        error: String,
    },
    SeriesRequested {
        params: SeriesParams,
        seq: u64,
    },
    SeriesReceived {
        seq: u64,
        points: Vec<SeriesPoint>,
    },
    SeriesFailed {
        seq: u64,
        error: String,
    },
}

/// What a transition produced, for the caller to log, count, and notify on.
#[derive(Debug, Clone, Default)]
pub struct CycleOutcome {
    pub new_alerts: Vec<Alert>,
    /// Present only when the cycle's highest severity changed.
    pub shift: Option<SeverityShift>,
    pub online: bool,
    pub snapshot_age_seconds: Option<f64>,
}

/// A change in the cycle's highest severity relative to the previous cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeverityShift {
    pub previous: Option<AlertSeverity>,
    pub current: Option<AlertSeverity>,
}

impl DashboardState {
    pub fn new(params: SeriesParams, staleness: Duration, device_offset: FixedOffset) -> Self {
        Self {
            device: None,
            online: false,
            snapshot_loading: false,
            last_error: None,
            alerts: Vec::new(),
            last_severity: None,
            series: SeriesState {
                params,
                points: Vec::new(),
                loading: false,
                error: None,
                issued_seq: 0,
            },
            staleness: chrono::Duration::from_std(staleness)
                .unwrap_or_else(|_| chrono::Duration::seconds(15)),
            device_offset,
        }
    }

    /// Advance the state by one event.
    pub fn apply(&mut self, event: Event) -> CycleOutcome {
        match event {
            Event::SnapshotRequested => {
                self.snapshot_loading = true;
                self.last_error = None;
                CycleOutcome::default()
            }
            Event::SnapshotReceived { snapshot, now } => self.receive_snapshot(snapshot, now),
            Event::SnapshotFailed { error } => {
                self.snapshot_loading = false;
                self.online = false;
                self.last_error = Some(error);
                CycleOutcome::default()
            }
            Event::SeriesRequested { params, seq } => {
                self.series.params = params;
                self.series.loading = true;
                self.series.error = None;
                self.series.issued_seq = seq;
                CycleOutcome::default()
            }
            Event::SeriesReceived { seq, points } => {
                if seq != self.series.issued_seq {
                    debug!(
                        seq,
                        current = self.series.issued_seq,
                        "dropping series response that lost the race"
                    );
                    return CycleOutcome::default();
                }
                self.series.points = points;
                self.series.loading = false;
                self.series.error = None;
                CycleOutcome::default()
            }
            Event::SeriesFailed { seq, error } => {
                if seq != self.series.issued_seq {
                    debug!(
                        seq,
                        current = self.series.issued_seq,
                        "dropping series failure that lost the race"
                    );
                    return CycleOutcome::default();
                }
                self.series.points = Vec::new();
                self.series.loading = false;
                self.series.error = Some(error);
                CycleOutcome::default()
            }
        }
    }

    fn receive_snapshot(&mut self, snapshot: DeviceSnapshot, now: DateTime<Utc>) -> CycleOutcome {
        let reading_at =
            timestamp::normalize_timestamp(&snapshot.timestamp, now, self.device_offset);

        // Only staleness marks the device offline; a reading stamped in the
        // future counts as fresh.
        let online = reading_at
            .map(|at| now.signed_duration_since(at) <= self.staleness)
            .unwrap_or(false);
        let snapshot_age_seconds = reading_at
            .map(|at| now.signed_duration_since(at).num_milliseconds() as f64 / 1000.0);

        let new_alerts = alerts::derive_alerts(&snapshot, now);
        let current = alerts::highest_severity(&new_alerts);
        let shift = alerts::severity_changed(self.last_severity, current).then_some(
            SeverityShift {
                previous: self.last_severity,
                current,
            },
        );

        // Severity memory updates every derivation cycle, including quiet
        // ones. Failed polls never reach this point and leave it alone.
        self.last_severity = current;
        alerts::rotate_log(&mut self.alerts, new_alerts.clone());

        self.device = Some(snapshot);
        self.online = online;
        self.snapshot_loading = false;
        self.last_error = None;

        CycleOutcome {
            new_alerts,
            shift,
            online,
            snapshot_age_seconds,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LoopHealth {
    pub name: String,
    #[serde(with = "chrono::serde::ts_seconds_option")]
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub last_error: Option<String>,
}

impl LoopHealth {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            last_success_at: None,
            consecutive_failures: 0,
            last_error: None,
        }
    }
}

struct SharedStateInner {
    dashboard: RwLock<DashboardState>,
    loop_health: RwLock<HashMap<String, LoopHealth>>,
}

/// Shared state container for the HTTP layer and poller tasks.
#[derive(Clone)]
pub struct SharedState {
    inner: Arc<SharedStateInner>,
}

impl SharedState {
    pub fn new(params: SeriesParams, staleness: Duration, device_offset: FixedOffset) -> Self {
        Self {
            inner: Arc::new(SharedStateInner {
                dashboard: RwLock::new(DashboardState::new(params, staleness, device_offset)),
                loop_health: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub async fn dashboard(&self) -> DashboardState {
        self.inner.dashboard.read().await.clone()
    }

    pub async fn apply(&self, event: Event) -> CycleOutcome {
        let mut guard = self.inner.dashboard.write().await;
        guard.apply(event)
    }

    /// Reserve the next fetch sequence and mark the chart as loading. The
    /// sequence returned here must accompany the eventual result event, so
    /// overlapping fetches resolve in favor of the newest request.
    pub async fn begin_series_fetch(&self, params: SeriesParams) -> u64 {
        let mut guard = self.inner.dashboard.write().await;
        let seq = guard.series.issued_seq + 1;
        guard.apply(Event::SeriesRequested { params, seq });
        seq
    }

    pub async fn series_params(&self) -> SeriesParams {
        self.inner.dashboard.read().await.series.params.clone()
    }

    pub async fn record_loop_success(&self, loop_name: &str) {
        let mut guard = self.inner.loop_health.write().await;
        let entry = guard
            .entry(loop_name.to_string())
            .or_insert_with(|| LoopHealth::new(loop_name));
        entry.last_success_at = Some(Utc::now());
        entry.consecutive_failures = 0;
        entry.last_error = None;
    }

    pub async fn record_loop_failure(&self, loop_name: &str, error: String) {
        let mut guard = self.inner.loop_health.write().await;
        let entry = guard
            .entry(loop_name.to_string())
            .or_insert_with(|| LoopHealth::new(loop_name));
        entry.consecutive_failures = entry.consecutive_failures.saturating_add(1);
        entry.last_error = Some(error);
    }

    pub async fn loop_health(&self) -> Vec<LoopHealth> {
        self.inner
            .loop_health
            .read()
            .await
            .values()
            .cloned()
            .collect()
    }

    pub async fn is_ready(&self, loop_names: &[&str], max_staleness: Duration) -> bool {
        let health = self.inner.loop_health.read().await;
        let now = Utc::now();
        let staleness = chrono::Duration::from_std(max_staleness)
            .unwrap_or_else(|_| chrono::Duration::seconds(300));

        loop_names.iter().all(|name| {
            if let Some(entry) = health.get(*name) {
                if entry.consecutive_failures > 0 {
                    return false;
                }
                if let Some(last) = entry.last_success_at {
                    return now.signed_duration_since(last) <= staleness;
                }
                false
            } else {
                false
            }
        })
    }
}
