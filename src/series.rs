use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::timestamp;

/// Inclusive bounds for the requested history depth.
pub const SERIES_LIMIT_MIN: usize = 1;
pub const SERIES_LIMIT_MAX: usize = 500;

/// Inputs of a timeseries fetch: which metric and how many recent points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeriesParams {
    pub metric: String,
    pub limit: usize,
}

impl SeriesParams {
    /// Build params with the limit clamped into the supported range.
    pub fn new(metric: impl Into<String>, limit: usize) -> Self {
        Self {
            metric: metric.into(),
            limit: limit.clamp(SERIES_LIMIT_MIN, SERIES_LIMIT_MAX),
        }
    }
}

/// One charted point. The timestamp stays in the device's raw form; ordering
/// and display go through the normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: String,
    pub value: f64,
}

/// Validate and order raw history points for charting.
///
/// A point survives when it carries a numeric reading (under `value`, or
/// under the metric's own key) and a string timestamp; everything else is
/// dropped. Survivors sort oldest first. Stamps the normalizer rejects keep
/// their point but sort to the epoch.
pub fn normalize_points(
    raw: &[Value],
    metric: &str,
    now: DateTime<Utc>,
    device_offset: FixedOffset,
) -> Vec<SeriesPoint> {
    let mut keyed: Vec<(i64, SeriesPoint)> = raw
        .iter()
        .filter_map(|point| {
            let fields = point.as_object()?;
            let value = fields
                .get("value")
                .and_then(Value::as_f64)
                .or_else(|| fields.get(metric).and_then(Value::as_f64))?;
            let raw_timestamp = fields.get("timestamp").and_then(Value::as_str)?;
            Some((
                timestamp::sort_key_millis(raw_timestamp, now, device_offset),
                SeriesPoint {
                    timestamp: raw_timestamp.to_string(),
                    value,
                },
            ))
        })
        .collect();

    keyed.sort_by_key(|(key, _)| *key);
    keyed.into_iter().map(|(_, point)| point).collect()
}
