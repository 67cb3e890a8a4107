use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::AppContext;
use crate::series::SeriesParams;

mod series;
mod snapshot;

pub const SNAPSHOT_LOOP: &str = "snapshot";
pub const SERIES_LOOP: &str = "series";

const SNAPSHOT_BUDGET: Duration = Duration::from_secs(3);
const SERIES_BUDGET: Duration = Duration::from_secs(5);

/// Spawn the snapshot loop and the series fetch loop, returning their join
/// handles.
pub fn spawn_all(
    ctx: AppContext,
    series_rx: watch::Receiver<SeriesParams>,
) -> Vec<JoinHandle<()>> {
    vec![
        spawn_snapshot_loop(ctx.clone()),
        series::spawn(ctx, series_rx),
    ]
}

fn spawn_snapshot_loop(ctx: AppContext) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = ctx.config.sample_intervals.snapshot;
        info!(
            loop_name = SNAPSHOT_LOOP,
            interval = ?interval,
            budget = ?SNAPSHOT_BUDGET,
            "starting poller loop"
        );

        // tokio::time::interval() completes the first tick immediately,
        // ensuring a reading lands on startup before waiting for the interval
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(err) =
                poll_once(&ctx, SNAPSHOT_LOOP, SNAPSHOT_BUDGET, snapshot::run(&ctx)).await
            {
                error!(loop_name = SNAPSHOT_LOOP, error = ?err, "poller loop iteration failed");
            }
        }
    })
}

async fn poll_once<F>(
    ctx: &AppContext,
    loop_name: &'static str,
    budget: Duration,
    work: F,
) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    let start = Instant::now();
    match work.await {
        Ok(_) => {
            let elapsed = start.elapsed();
            ctx.metrics.observe_duration(loop_name, elapsed);
            if elapsed > budget {
                warn!(
                    loop_name,
                    elapsed = ?elapsed,
                    budget = ?budget,
                    "loop exceeded budget"
                );
            } else {
                info!(
                    loop_name,
                    elapsed = ?elapsed,
                    "loop completed successfully"
                );
            }
            ctx.metrics.record_success(loop_name, true);
            ctx.state.record_loop_success(loop_name).await;
            Ok(())
        }
        Err(err) => {
            ctx.metrics.record_success(loop_name, false);
            ctx.metrics.inc_error(loop_name);
            ctx.state
                .record_loop_failure(loop_name, err.to_string())
                .await;
            Err(err)
        }
    }
}
