use anyhow::Result;
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::app::AppContext;
use crate::notify;
use crate::state::Event;

#[instrument(skip_all)]
pub async fn run(ctx: &AppContext) -> Result<()> {
    ctx.state.apply(Event::SnapshotRequested).await;

    let snapshot = match ctx.client.fetch_snapshot().await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            ctx.state
                .apply(Event::SnapshotFailed {
                    error: format!("{err:#}"),
                })
                .await;
            ctx.metrics.set_offline(ctx.device_id());
            return Err(err);
        }
    };

    let now = Utc::now();
    let outcome = ctx
        .state
        .apply(Event::SnapshotReceived {
            snapshot: snapshot.clone(),
            now,
        })
        .await;

    ctx.metrics.set_snapshot_metrics(
        ctx.device_id(),
        &snapshot,
        outcome.online,
        outcome.snapshot_age_seconds,
    );

    for alert in &outcome.new_alerts {
        warn!(
            device = %ctx.device_id(),
            id = %alert.id,
            severity = alert.severity.as_str(),
            "{}",
            alert.message
        );
        ctx.metrics
            .inc_alert(ctx.device_id(), alert.kind, alert.severity);
    }

    if let Some(shift) = outcome.shift {
        info!(
            device = %ctx.device_id(),
            previous = ?shift.previous,
            current = ?shift.current,
            "alert severity changed"
        );
        ctx.notifier
            .dispatch(notify::notice_for_shift(&shift))
            .await;
    }

    Ok(())
}
