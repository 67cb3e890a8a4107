use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use prometheus::{
    Encoder, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::alerts::{AlertKind, AlertSeverity};
use crate::device::DeviceSnapshot;

/// Metrics registry for the agent scraped by Prometheus.
#[derive(Clone)]
pub struct AppMetrics {
    registry: Arc<Registry>,
    loops: LoopMetrics,
    device: DeviceMetrics,
    series: SeriesMetrics,
    alert_counters: AlertCounters,
}

impl AppMetrics {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new_custom(Some("sensemon".into()), None)?);

        let loops = LoopMetrics::register(&registry)?;
        let device = DeviceMetrics::register(&registry)?;
        let series = SeriesMetrics::register(&registry)?;
        let alert_counters = AlertCounters::register(&registry)?;

        Ok(Self {
            registry,
            loops,
            device,
            series,
            alert_counters,
        })
    }

    /// Observe the execution duration for a loop.
    pub fn observe_duration(&self, loop_name: &str, duration: Duration) {
        let seconds = duration.as_secs_f64();
        self.loops
            .scrape_duration
            .with_label_values(&[loop_name])
            .observe(seconds);
    }

    /// Record a success flag for a loop iteration (1=success, 0=failed).
    pub fn record_success(&self, loop_name: &str, success: bool) {
        self.loops
            .last_success
            .with_label_values(&[loop_name])
            .set(if success { 1 } else { 0 });
    }

    /// Increment the error counter for a loop.
    pub fn inc_error(&self, loop_name: &str) {
        self.loops
            .errors_total
            .with_label_values(&[loop_name])
            .inc();
    }

    /// Record the headline gauges from the latest snapshot.
    pub fn set_snapshot_metrics(
        &self,
        device_id: &str,
        snapshot: &DeviceSnapshot,
        online: bool,
        snapshot_age_seconds: Option<f64>,
    ) {
        let device = sanitize_label(device_id);
        let device_label = &[device.as_str()];

        self.device
            .online
            .with_label_values(device_label)
            .set(if online { 1 } else { 0 });
        self.device
            .sensors_ready
            .with_label_values(device_label)
            .set(if snapshot.sensors_ready { 1 } else { 0 });

        let readings = [
            ("temperature", snapshot.temperature),
            ("humidity", snapshot.humidity),
            ("smoke_ppm", snapshot.smoke_ppm),
            ("methane_ppm", snapshot.methane_ppm),
            ("carbonMonoxide_ppm", snapshot.carbon_monoxide_ppm),
            ("flame", snapshot.flame),
        ];
        for (metric, value) in readings {
            self.device
                .reading
                .with_label_values(&[device.as_str(), metric])
                .set(value);
        }

        set_optional_gauge(
            &self.device.snapshot_age_seconds,
            device.as_str(),
            snapshot_age_seconds,
        );
    }

    /// Zero the online gauge after a failed poll.
    pub fn set_offline(&self, device_id: &str) {
        let device = sanitize_label(device_id);
        self.device.online.with_label_values(&[device.as_str()]).set(0);
    }

    /// Record the outcome of a history fetch: points kept, raw points dropped.
    pub fn set_series_metrics(&self, device_id: &str, metric: &str, kept: usize, dropped: usize) {
        let device = sanitize_label(device_id);
        let metric = sanitize_label(metric);
        let labels = [device.as_str(), metric.as_str()];

        self.series
            .points
            .with_label_values(&labels)
            .set(kept as i64);
        if dropped > 0 {
            self.series
                .points_dropped_total
                .with_label_values(&labels)
                .inc_by(dropped as u64);
        }
    }

    pub fn inc_alert(&self, device_id: &str, kind: AlertKind, severity: AlertSeverity) {
        let device = sanitize_label(device_id);
        self.alert_counters
            .alerts_total
            .with_label_values(&[device.as_str(), kind.as_str(), severity.as_str()])
            .inc();
    }

    /// Encode metrics into Prometheus exposition format.
    pub fn encode(&self) -> Result<String> {
        let families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[derive(Clone)]
struct LoopMetrics {
    scrape_duration: HistogramVec,
    last_success: IntGaugeVec,
    errors_total: IntCounterVec,
}

impl LoopMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let scrape_duration = HistogramVec::new(
            HistogramOpts::new("scrape_duration_seconds", "Loop execution duration"),
            &["loop"],
        )?;
        registry.register(Box::new(scrape_duration.clone()))?;

        let last_success = IntGaugeVec::new(
            Opts::new(
                "last_scrape_success",
                "Loop success flag (1=success, 0=failure)",
            ),
            &["loop"],
        )?;
        registry.register(Box::new(last_success.clone()))?;

        let errors_total =
            IntCounterVec::new(Opts::new("errors_total", "Total loop errors"), &["loop"])?;
        registry.register(Box::new(errors_total.clone()))?;

        Ok(Self {
            scrape_duration,
            last_success,
            errors_total,
        })
    }
}

#[derive(Clone)]
struct DeviceMetrics {
    online: IntGaugeVec,
    sensors_ready: IntGaugeVec,
    reading: GaugeVec,
    snapshot_age_seconds: GaugeVec,
}

impl DeviceMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let online = IntGaugeVec::new(
            Opts::new(
                "device_online",
                "Whether the latest reading is fresh (1=online)",
            ),
            &["device"],
        )?;
        registry.register(Box::new(online.clone()))?;

        let sensors_ready = IntGaugeVec::new(
            Opts::new(
                "device_sensors_ready",
                "Whether the sensor array finished warmup",
            ),
            &["device"],
        )?;
        registry.register(Box::new(sensors_ready.clone()))?;

        let reading = GaugeVec::new(
            Opts::new("device_reading", "Latest raw reading per metric"),
            &["device", "metric"],
        )?;
        registry.register(Box::new(reading.clone()))?;

        let snapshot_age_seconds = GaugeVec::new(
            Opts::new(
                "device_snapshot_age_seconds",
                "Age of the latest reading at poll time",
            ),
            &["device"],
        )?;
        registry.register(Box::new(snapshot_age_seconds.clone()))?;

        Ok(Self {
            online,
            sensors_ready,
            reading,
            snapshot_age_seconds,
        })
    }
}

#[derive(Clone)]
struct SeriesMetrics {
    points: IntGaugeVec,
    points_dropped_total: IntCounterVec,
}

impl SeriesMetrics {
    fn register(registry: &Registry) -> Result<Self> {
        let points = IntGaugeVec::new(
            Opts::new("series_points", "Chart points that survived validation"),
            &["device", "metric"],
        )?;
        registry.register(Box::new(points.clone()))?;

        let points_dropped_total = IntCounterVec::new(
            Opts::new(
                "series_points_dropped_total",
                "Raw history points dropped during validation",
            ),
            &["device", "metric"],
        )?;
        registry.register(Box::new(points_dropped_total.clone()))?;

        Ok(Self {
            points,
            points_dropped_total,
        })
    }
}

#[derive(Clone)]
struct AlertCounters {
    alerts_total: IntCounterVec,
}

impl AlertCounters {
    fn register(registry: &Registry) -> Result<Self> {
        let alerts_total = IntCounterVec::new(
            Opts::new(
                "alerts_total",
                "Total emitted alerts grouped by kind and severity",
            ),
            &["device", "kind", "severity"],
        )?;
        registry.register(Box::new(alerts_total.clone()))?;
        Ok(Self { alerts_total })
    }
}

fn set_optional_gauge(vec: &GaugeVec, device: &str, value: Option<f64>) {
    let gauge = vec.with_label_values(&[device]);
    gauge.set(value.unwrap_or(0.0));
}

fn sanitize_label(value: &str) -> String {
    value
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '_' || ch == ':' {
                ch
            } else {
                '_'
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceState;

    fn snapshot() -> DeviceSnapshot {
        DeviceSnapshot {
            device_id: "ESP32-01".into(),
            timestamp: "2024-06-01T12:00:00Z".into(),
            temperature: 24.0,
            humidity: 50.0,
            smoke_ppm: 120.0,
            methane_ppm: 80.0,
            carbon_monoxide_ppm: 9.0,
            flame: 0.0,
            gps_lat: None,
            gps_lon: None,
            sensors_ready: true,
            state: DeviceState::Normal,
        }
    }

    #[test]
    fn snapshot_metrics_sanitize_device_and_export_readings() {
        let metrics = AppMetrics::new().expect("metrics");
        metrics.set_snapshot_metrics("ESP32-01", &snapshot(), true, Some(3.0));

        let output = metrics.encode().expect("encode");
        assert!(
            output.contains("sensemon_device_online{device=\"ESP32_01\"} 1"),
            "online gauge missing: {output}"
        );
        assert!(
            output.contains("sensemon_device_sensors_ready{device=\"ESP32_01\"} 1"),
            "sensors_ready gauge missing: {output}"
        );
        assert!(
            output.contains(
                "sensemon_device_reading{device=\"ESP32_01\",metric=\"temperature\"} 24"
            ),
            "temperature reading missing: {output}"
        );
        assert!(
            output.contains(
                "sensemon_device_reading{device=\"ESP32_01\",metric=\"carbonMonoxide_ppm\"} 9"
            ),
            "CO reading missing: {output}"
        );
        assert!(
            output.contains("sensemon_device_snapshot_age_seconds{device=\"ESP32_01\"} 3"),
            "age gauge missing: {output}"
        );
    }

    #[test]
    fn failed_poll_zeroes_the_online_gauge() {
        let metrics = AppMetrics::new().expect("metrics");
        metrics.set_snapshot_metrics("ESP32-01", &snapshot(), true, Some(1.0));
        metrics.set_offline("ESP32-01");

        let output = metrics.encode().expect("encode");
        assert!(
            output.contains("sensemon_device_online{device=\"ESP32_01\"} 0"),
            "offline gauge missing: {output}"
        );
    }

    #[test]
    fn series_metrics_track_kept_and_dropped_points() {
        let metrics = AppMetrics::new().expect("metrics");
        metrics.set_series_metrics("ESP32-01", "temperature", 18, 2);
        metrics.set_series_metrics("ESP32-01", "temperature", 20, 0);

        let output = metrics.encode().expect("encode");
        assert!(
            output.contains(
                "sensemon_series_points{device=\"ESP32_01\",metric=\"temperature\"} 20"
            ),
            "points gauge missing: {output}"
        );
        assert!(
            output.contains(
                "sensemon_series_points_dropped_total{device=\"ESP32_01\",metric=\"temperature\"} 2"
            ),
            "dropped counter missing: {output}"
        );
    }

    #[test]
    fn alert_counter_records_severities() {
        let metrics = AppMetrics::new().expect("metrics");
        metrics.inc_alert("ESP32-01", AlertKind::HumidityAdvisory, AlertSeverity::Warning);
        metrics.inc_alert("ESP32-01", AlertKind::HumidityAdvisory, AlertSeverity::Warning);
        metrics.inc_alert("ESP32-01", AlertKind::StateCritical, AlertSeverity::Critical);

        let output = metrics.encode().expect("encode");
        let warn_line = output.lines().find(|line| {
            line.starts_with("sensemon_alerts_total")
                && line.contains("kind=\"humidity-advisory\"")
                && line.contains("severity=\"warning\"")
                && line.trim_end().ends_with(" 2")
        });
        let crit_line = output.lines().find(|line| {
            line.starts_with("sensemon_alerts_total")
                && line.contains("kind=\"state-critical\"")
                && line.contains("severity=\"critical\"")
                && line.trim_end().ends_with(" 1")
        });
        assert!(warn_line.is_some(), "alerts warning missing: {output}");
        assert!(crit_line.is_some(), "alerts critical missing: {output}");
    }
}
