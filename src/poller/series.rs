use anyhow::Result;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

use crate::app::AppContext;
use crate::series::{self, SeriesParams};
use crate::state::Event;

use super::{SERIES_BUDGET, SERIES_LOOP};

/// Spawn the series fetch loop. It refetches whenever the watched parameters
/// change; every fetch carries a fresh sequence number, and responses that
/// lose the race against a newer request are discarded by the state machine.
pub(super) fn spawn(
    ctx: AppContext,
    mut params_rx: watch::Receiver<SeriesParams>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(loop_name = SERIES_LOOP, "starting series fetch loop");

        loop {
            let params = params_rx.borrow_and_update().clone();
            let seq = ctx.state.begin_series_fetch(params.clone()).await;

            // Fetches run detached so a slow response never delays picking up
            // the next parameter change.
            let fetch_ctx = ctx.clone();
            tokio::spawn(async move {
                if let Err(err) = super::poll_once(
                    &fetch_ctx,
                    SERIES_LOOP,
                    SERIES_BUDGET,
                    fetch_once(&fetch_ctx, params, seq),
                )
                .await
                {
                    error!(loop_name = SERIES_LOOP, error = ?err, "series fetch failed");
                }
            });

            if params_rx.changed().await.is_err() {
                info!(
                    loop_name = SERIES_LOOP,
                    "series parameter channel closed; stopping"
                );
                break;
            }
        }
    })
}

#[instrument(skip_all, fields(metric = %params.metric, limit = params.limit, seq))]
async fn fetch_once(ctx: &AppContext, params: SeriesParams, seq: u64) -> Result<()> {
    let response = match ctx.client.fetch_timeseries(&params).await {
        Ok(response) => response,
        Err(err) => {
            ctx.state
                .apply(Event::SeriesFailed {
                    seq,
                    error: format!("{err:#}"),
                })
                .await;
            return Err(err);
        }
    };

    let raw_count = response.points.len();
    let points =
        series::normalize_points(&response.points, &params.metric, Utc::now(), ctx.device_offset);
    let dropped = raw_count - points.len();

    ctx.metrics
        .set_series_metrics(ctx.device_id(), &params.metric, points.len(), dropped);
    ctx.state
        .apply(Event::SeriesReceived { seq, points })
        .await;

    Ok(())
}
