use anyhow::Result;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::SyncError;
use crate::frame::Frame;

/// Run the optional startup sync, then sync every configured interval.
/// Failures are kept as the frame's last sync error.
#[instrument(skip_all)]
pub async fn run(frame: Frame, force_startup: bool, cancel: CancellationToken) -> Result<()> {
    let Some(config) = frame.sync_config().cloned() else {
        if force_startup {
            warn!("startup sync requested but no sync target is configured");
        }
        debug!("sync not configured; scheduler idle");
        return Ok(());
    };

    if force_startup || config.on_startup {
        attempt(&frame, &cancel, "startup").await;
    }

    let Some(period) = config.interval else {
        return Ok(());
    };
    info!(every = %humantime::format_duration(period), "periodic sync scheduled");
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("cancel received; stopping sync scheduler");
                break;
            }
            _ = ticker.tick() => attempt(&frame, &cancel, "periodic").await,
        }
    }
    Ok(())
}

async fn attempt(frame: &Frame, cancel: &CancellationToken, trigger: &'static str) {
    match frame.sync_now(cancel).await {
        Ok(report) => info!(
            trigger,
            deleted = report.deleted,
            downloaded = report.downloaded,
            skipped = report.skipped,
            "sync finished"
        ),
        Err(SyncError::AlreadyRunning) => debug!(trigger, "sync already running; skipped"),
        Err(err) => warn!(trigger, error = %err, "sync failed"),
    }
}
