use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::device::{DeviceSnapshot, DeviceState};

/// Newest-first alert log length.
pub const ALERT_LOG_CAP: usize = 10;

/// Humidity band (percent) outside which an advisory is raised.
pub const HUMIDITY_LOW_PCT: f64 = 30.0;
pub const HUMIDITY_HIGH_PCT: f64 = 70.0;

/// Severity ladder for derived alerts. Variants are declared in ascending
/// urgency so [`highest_severity`] is a plain max.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warning,
    Critical,
    Danger,
}

impl AlertSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Danger => "danger",
        }
    }

    /// True when the severity should interrupt an operator immediately.
    pub fn is_blocking(self) -> bool {
        matches!(self, AlertSeverity::Critical | AlertSeverity::Danger)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlertKind {
    StateCritical,
    StateWarning,
    FlameUnverified,
    HumidityAdvisory,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::StateCritical => "state-critical",
            AlertKind::StateWarning => "state-warning",
            AlertKind::FlameUnverified => "flame-unverified",
            AlertKind::HumidityAdvisory => "humidity-advisory",
        }
    }
}

/// A single derived alert. The id embeds the derivation instant so repeated
/// conditions produce distinct log entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Alert {
    fn new(
        kind: AlertKind,
        severity: AlertSeverity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: format!(
                "{}-{}",
                kind.as_str(),
                now.to_rfc3339_opts(SecondsFormat::Millis, true)
            ),
            kind,
            severity,
            message: message.into(),
            timestamp: now,
        }
    }
}

/// Evaluate the alert rules against one snapshot.
///
/// Rules, most severe first:
/// - device state `critical` raises a critical alert, `warning` a warning
///   alert; other states raise nothing themselves
/// - a flame indication during sensor warmup raises an unverified warning,
///   unless the state is already critical (once warmed up, flame feeds the
///   device-side state instead)
/// - humidity outside the advisory band raises a warning
pub fn derive_alerts(snapshot: &DeviceSnapshot, now: DateTime<Utc>) -> Vec<Alert> {
    let mut alerts = Vec::new();

    match snapshot.state {
        DeviceState::Critical => {
            alerts.push(Alert::new(
                AlertKind::StateCritical,
                AlertSeverity::Critical,
                "CRITICAL condition reported by device",
                now,
            ));
        }
        DeviceState::Warning => {
            alerts.push(Alert::new(
                AlertKind::StateWarning,
                AlertSeverity::Warning,
                "WARNING condition reported by device",
                now,
            ));
        }
        DeviceState::Normal | DeviceState::Danger | DeviceState::Unknown => {}
    }

    if !snapshot.sensors_ready
        && snapshot.flame_triggered()
        && snapshot.state != DeviceState::Critical
    {
        alerts.push(Alert::new(
            AlertKind::FlameUnverified,
            AlertSeverity::Warning,
            "Flame sensor triggered (unverified during warmup)",
            now,
        ));
    }

    if snapshot.humidity < HUMIDITY_LOW_PCT || snapshot.humidity > HUMIDITY_HIGH_PCT {
        alerts.push(Alert::new(
            AlertKind::HumidityAdvisory,
            AlertSeverity::Warning,
            format!("Humidity advisory: {}%", snapshot.humidity),
            now,
        ));
    }

    alerts
}

/// The most urgent severity among freshly derived alerts.
pub fn highest_severity(alerts: &[Alert]) -> Option<AlertSeverity> {
    alerts.iter().map(|alert| alert.severity).max()
}

/// Whether the cycle's highest severity crossed a notification boundary.
/// Repeats of the same severity stay silent; any change, including a return
/// to quiet, notifies once.
pub fn severity_changed(previous: Option<AlertSeverity>, current: Option<AlertSeverity>) -> bool {
    previous != current
}

/// Prepend a cycle's alerts and drop the oldest entries beyond the cap.
/// Cycles without new alerts leave the log untouched.
pub fn rotate_log(log: &mut Vec<Alert>, new_alerts: Vec<Alert>) {
    if new_alerts.is_empty() {
        return;
    }
    let mut combined = new_alerts;
    combined.extend(log.drain(..));
    *log = combined;
    log.truncate(ALERT_LOG_CAP);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn snapshot(
        state: DeviceState,
        humidity: f64,
        flame: f64,
        sensors_ready: bool,
    ) -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: "ESP32-01".into(),
            timestamp: "2024-06-01T12:00:00+00:00".into(),
            temperature: 24.0,
            humidity,
            smoke_ppm: 120.0,
            methane_ppm: 80.0,
            carbon_monoxide_ppm: 9.0,
            flame,
            gps_lat: Some(12.9716),
            gps_lon: Some(77.5946),
            sensors_ready,
            state,
        }
    }

    #[test]
    fn quiet_snapshot_derives_nothing() {
        let alerts = derive_alerts(&snapshot(DeviceState::Normal, 50.0, 0.0, true), fixed_now());
        assert!(alerts.is_empty());
    }

    #[test]
    fn critical_state_raises_the_critical_alert() {
        let alerts = derive_alerts(&snapshot(DeviceState::Critical, 50.0, 0.0, true), fixed_now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);
        assert_eq!(alerts[0].message, "CRITICAL condition reported by device");
        assert!(alerts[0].id.starts_with("state-critical-"));
    }

    #[test]
    fn only_critical_and_warning_states_carry_alert_weight() {
        for state in [DeviceState::Danger, DeviceState::Unknown] {
            let alerts = derive_alerts(&snapshot(state, 50.0, 0.0, true), fixed_now());
            assert!(alerts.is_empty(), "{state:?} should not raise a state alert");
        }
    }

    #[test]
    fn warning_state_raises_a_warning() {
        let alerts = derive_alerts(&snapshot(DeviceState::Warning, 50.0, 0.0, true), fixed_now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
        assert_eq!(alerts[0].message, "WARNING condition reported by device");
        assert!(alerts[0].id.starts_with("state-warning-"));
    }

    #[test]
    fn flame_alert_only_fires_during_warmup() {
        let warming = snapshot(DeviceState::Normal, 50.0, 1.0, false);
        let alerts = derive_alerts(&warming, fixed_now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(
            alerts[0].message,
            "Flame sensor triggered (unverified during warmup)"
        );
        assert!(alerts[0].id.starts_with("flame-unverified-"));

        // Once sensors are ready, flame is the firmware's problem to classify.
        let warmed = snapshot(DeviceState::Normal, 50.0, 1.0, true);
        assert!(derive_alerts(&warmed, fixed_now()).is_empty());

        let no_flame = snapshot(DeviceState::Normal, 50.0, 0.0, false);
        assert!(derive_alerts(&no_flame, fixed_now()).is_empty());
    }

    #[test]
    fn critical_state_suppresses_the_flame_advisory() {
        let alerts = derive_alerts(&snapshot(DeviceState::Critical, 50.0, 1.0, false), fixed_now());
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StateCritical);
    }

    #[test]
    fn humidity_band_is_inclusive() {
        let fired = |humidity: f64| {
            !derive_alerts(
                &snapshot(DeviceState::Normal, humidity, 0.0, true),
                fixed_now(),
            )
            .is_empty()
        };

        assert!(fired(29.0));
        assert!(!fired(30.0));
        assert!(!fired(70.0));
        assert!(fired(71.0));
    }

    #[test]
    fn humidity_message_carries_the_reading() {
        let alerts = derive_alerts(&snapshot(DeviceState::Normal, 80.0, 0.0, true), fixed_now());
        assert_eq!(alerts[0].message, "Humidity advisory: 80%");
        assert!(alerts[0].id.starts_with("humidity-advisory-"));
    }

    #[test]
    fn alert_id_embeds_the_derivation_instant() {
        let alerts = derive_alerts(&snapshot(DeviceState::Warning, 50.0, 0.0, true), fixed_now());
        assert_eq!(alerts[0].id, "state-warning-2024-06-01T12:00:00.000Z");
    }

    #[test]
    fn rules_stack_most_severe_first() {
        let busy = snapshot(DeviceState::Warning, 80.0, 1.0, false);
        let alerts = derive_alerts(&busy, fixed_now());
        assert_eq!(alerts.len(), 3);
        assert_eq!(alerts[0].kind, AlertKind::StateWarning);
        assert_eq!(alerts[1].kind, AlertKind::FlameUnverified);
        assert_eq!(alerts[2].kind, AlertKind::HumidityAdvisory);
        assert_eq!(highest_severity(&alerts), Some(AlertSeverity::Warning));

        let critical = snapshot(DeviceState::Critical, 80.0, 0.0, true);
        let alerts = derive_alerts(&critical, fixed_now());
        assert_eq!(alerts.len(), 2);
        assert_eq!(highest_severity(&alerts), Some(AlertSeverity::Critical));
    }

    #[test]
    fn highest_severity_of_nothing_is_none() {
        assert_eq!(highest_severity(&[]), None);
    }

    #[test]
    fn severity_change_matrix() {
        let warning = Some(AlertSeverity::Warning);
        let critical = Some(AlertSeverity::Critical);

        assert!(severity_changed(None, warning));
        assert!(severity_changed(warning, critical));
        assert!(severity_changed(critical, None));
        assert!(!severity_changed(warning, warning));
        assert!(!severity_changed(None, None));
    }

    #[test]
    fn log_rotation_keeps_newest_first_up_to_cap() {
        let mut log = Vec::new();

        for minute in 0..6 {
            let now = fixed_now() + chrono::Duration::minutes(minute);
            let cycle = derive_alerts(&snapshot(DeviceState::Critical, 80.0, 0.0, true), now);
            assert_eq!(cycle.len(), 2);
            rotate_log(&mut log, cycle);
        }

        assert_eq!(log.len(), ALERT_LOG_CAP);
        // Front of the log is the latest cycle, in derivation order.
        assert_eq!(log[0].kind, AlertKind::StateCritical);
        assert_eq!(log[1].kind, AlertKind::HumidityAdvisory);
        assert_eq!(log[0].timestamp, fixed_now() + chrono::Duration::minutes(5));

        let before = log.clone();
        rotate_log(&mut log, Vec::new());
        assert_eq!(log.len(), before.len());
        assert_eq!(log[0].id, before[0].id);
    }
}
