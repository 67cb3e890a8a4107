use std::time::Duration;

use chrono::{FixedOffset, TimeZone, Utc};
use sensemon::series::normalize_points;
use sensemon::{Event, SeriesParams, SeriesPoint, SharedState};
use serde_json::json;

fn shared_state() -> SharedState {
    SharedState::new(
        SeriesParams::new("temperature", 20),
        Duration::from_secs(15),
        FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap(),
    )
}

fn point(timestamp: &str, value: f64) -> SeriesPoint {
    SeriesPoint {
        timestamp: timestamp.to_string(),
        value,
    }
}

#[tokio::test]
async fn stale_series_responses_are_discarded() {
    let state = shared_state();

    // Two fetches issued back to back; the first response arrives last-but-one.
    let seq1 = state
        .begin_series_fetch(SeriesParams::new("temperature", 20))
        .await;
    let seq2 = state
        .begin_series_fetch(SeriesParams::new("humidity", 50))
        .await;
    assert!(seq2 > seq1);

    state
        .apply(Event::SeriesReceived {
            seq: seq1,
            points: vec![point("2024-06-01T09:00:00+05:30", 20.0)],
        })
        .await;

    let series = state.dashboard().await.series;
    assert!(series.points.is_empty(), "stale response must not land");
    assert!(series.loading, "newest fetch is still pending");

    state
        .apply(Event::SeriesReceived {
            seq: seq2,
            points: vec![point("2024-06-01T10:00:00+05:30", 55.0)],
        })
        .await;

    let series = state.dashboard().await.series;
    assert_eq!(series.points.len(), 1);
    assert_eq!(series.params.metric, "humidity");
    assert!(!series.loading);
    assert!(series.error.is_none());
}

#[tokio::test]
async fn failed_fetch_replaces_points_with_an_error() {
    let state = shared_state();

    let seq = state
        .begin_series_fetch(SeriesParams::new("temperature", 20))
        .await;
    state
        .apply(Event::SeriesReceived {
            seq,
            points: vec![point("2024-06-01T09:00:00+05:30", 20.0)],
        })
        .await;

    let seq = state
        .begin_series_fetch(SeriesParams::new("temperature", 100))
        .await;
    state
        .apply(Event::SeriesFailed {
            seq,
            error: "device timeseries request returned 500".into(),
        })
        .await;

    let series = state.dashboard().await.series;
    assert!(series.points.is_empty(), "failed fetch clears the chart");
    assert!(!series.loading);
    assert_eq!(
        series.error.as_deref(),
        Some("device timeseries request returned 500")
    );
}

#[tokio::test]
async fn stale_failure_does_not_clobber_a_newer_request() {
    let state = shared_state();

    let seq1 = state
        .begin_series_fetch(SeriesParams::new("temperature", 20))
        .await;
    state
        .apply(Event::SeriesReceived {
            seq: seq1,
            points: vec![point("2024-06-01T09:00:00+05:30", 20.0)],
        })
        .await;

    let seq2 = state
        .begin_series_fetch(SeriesParams::new("smoke_ppm", 20))
        .await;

    // The superseded fetch errors out after the new one was issued.
    state
        .apply(Event::SeriesFailed {
            seq: seq1,
            error: "device timeseries request failed".into(),
        })
        .await;

    let series = state.dashboard().await.series;
    assert_eq!(series.points.len(), 1, "old points survive a stale failure");
    assert!(series.loading);
    assert!(series.error.is_none());

    state
        .apply(Event::SeriesReceived {
            seq: seq2,
            points: vec![point("2024-06-01T10:00:00+05:30", 140.0)],
        })
        .await;
    assert_eq!(state.dashboard().await.series.points[0].value, 140.0);
}

#[tokio::test]
async fn raw_gateway_points_survive_validation_in_order() {
    let state = shared_state();
    let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
    let device_offset = FixedOffset::east_opt(5 * 3600 + 30 * 60).unwrap();

    // Device-local stamps without a zone, newest first, with two bad entries.
    let body: sensemon::device::TimeseriesResponse = serde_json::from_value(json!({
        "deviceId": "ESP32-01",
        "metric": "temperature",
        "count": 4,
        "points": [
            {"timestamp": "2024-06-01 10:00:00", "value": 22.5},
            {"timestamp": "2024-06-01 09:00:00", "temperature": 21.0},
            {"timestamp": "2024-06-01 11:00:00", "value": "oops"},
            {"note": "no timestamp", "value": 3.0}
        ]
    }))
    .expect("gateway body");

    let points = normalize_points(&body.points, "temperature", now, device_offset);
    assert_eq!(points.len(), 2, "malformed entries are dropped");
    assert_eq!(points[0].value, 21.0, "oldest first after sorting");
    assert_eq!(points[1].value, 22.5);

    let seq = state
        .begin_series_fetch(SeriesParams::new("temperature", 20))
        .await;
    state
        .apply(Event::SeriesReceived {
            seq,
            points: points.clone(),
        })
        .await;

    let series = state.dashboard().await.series;
    assert_eq!(series.points.len(), 2);
    assert!(series.error.is_none(), "drops alone are not an error");
}
