use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, get_service};
use chrono::Utc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::app::AppContext;
use crate::poller::SNAPSHOT_LOOP;
use crate::series::{SERIES_LIMIT_MIN, SeriesParams};
use crate::timestamp;

// The series loop only runs on parameter changes, so its last success can be
// arbitrarily old; readiness tracks the snapshot loop alone.
const LOOP_NAMES: &[&str] = &[SNAPSHOT_LOOP];

pub fn create_router(ctx: AppContext) -> Router {
    let static_dir = ctx.config.http.static_dir.clone();

    let asset_service = get_service(ServeDir::new(static_dir));

    let api = Router::new()
        .route("/snapshot", get(get_snapshot))
        .route("/alerts", get(get_alerts))
        .route("/series", get(get_series))
        .route("/dashboard", get(get_dashboard));

    Router::new()
        .route("/healthz", get(get_healthz))
        .route("/metrics", get(get_metrics))
        .nest("/api/v1", api)
        .fallback_service(asset_service)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn get_healthz(State(ctx): State<AppContext>) -> StatusCode {
    // Allow a few missed polls before reporting unready.
    let max_staleness = ctx.config.sample_intervals.snapshot * 4;
    let is_ready = ctx.state.is_ready(LOOP_NAMES, max_staleness).await;

    if is_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn get_metrics(State(ctx): State<AppContext>) -> Response {
    match ctx.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(err) => {
            warn!(error = ?err, "failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[derive(serde::Serialize)]
struct SnapshotDocument {
    device: Option<crate::device::DeviceSnapshot>,
    online: bool,
    loading: bool,
    error: Option<String>,
    /// Reading time rendered in the device's wall clock, or `"invalid"`.
    last_reading_local: Option<String>,
}

async fn get_snapshot(State(ctx): State<AppContext>) -> Json<SnapshotDocument> {
    let dashboard = ctx.state.dashboard().await;
    let last_reading_local = dashboard.device.as_ref().map(|device| {
        timestamp::format_device_time(&device.timestamp, Utc::now(), ctx.device_offset)
    });

    Json(SnapshotDocument {
        device: dashboard.device,
        online: dashboard.online,
        loading: dashboard.snapshot_loading,
        error: dashboard.last_error,
        last_reading_local,
    })
}

async fn get_alerts(State(ctx): State<AppContext>) -> Json<Vec<crate::alerts::Alert>> {
    let dashboard = ctx.state.dashboard().await;
    Json(dashboard.alerts)
}

/// Returns the history chart slice for the selected metric.
/// Query params:
///   ?metric=temperature | humidity | smoke_ppm | methane_ppm | carbonMonoxide_ppm
///   ?limit=20 (clamped to 1..=500)
///
/// A changed parameter triggers a background refetch; the returned document
/// reflects the state at request time.
async fn get_series(
    State(ctx): State<AppContext>,
    axum::extract::Query(params): axum::extract::Query<std::collections::HashMap<String, String>>,
) -> Json<crate::state::SeriesState> {
    let dashboard = ctx.state.dashboard().await;
    let current = &dashboard.series.params;

    let metric = params
        .get("metric")
        .filter(|metric| !metric.is_empty())
        .cloned()
        .unwrap_or_else(|| current.metric.clone());
    let limit = params
        .get("limit")
        .map(|value| value.parse().unwrap_or(SERIES_LIMIT_MIN))
        .unwrap_or(current.limit);

    let requested = SeriesParams::new(metric, limit);
    if requested != *current {
        // send_replace never fails; the receiver lives for the whole process.
        ctx.series_tx.send_replace(requested);
    }

    Json(dashboard.series)
}

async fn get_dashboard(State(ctx): State<AppContext>) -> Json<crate::state::DashboardState> {
    Json(ctx.state.dashboard().await)
}
