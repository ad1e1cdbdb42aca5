//! Headless display driver: walks the display sequence and reports what a
//! renderer would show.

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::time::{Duration, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::events::SlideEvent;
use crate::frame::Frame;

/// Upper bound between quiet-hours checks while asleep or idle.
const QUIET_POLL: Duration = Duration::from_secs(60);

#[instrument(skip_all, fields(photo_duration = ?frame.display_config().photo_duration))]
pub async fn run(frame: Frame, to_display: Sender<SlideEvent>, cancel: CancellationToken) -> Result<()> {
    let photo_duration = frame.display_config().photo_duration;
    let mut sequence_rx = frame.subscribe_sequence();
    let mut asleep = false;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let quiet = frame.is_quiet_now();
        if quiet != asleep {
            asleep = quiet;
            let event = if quiet {
                SlideEvent::Sleep
            } else {
                SlideEvent::Wake
            };
            info!(?event, "quiet hours transition");
            if to_display.send(event).await.is_err() {
                break;
            }
        }
        if asleep {
            select! {
                _ = cancel.cancelled() => break,
                _ = sleep(QUIET_POLL) => continue,
            }
        }

        let Some(photo) = frame.next_photo().await else {
            debug!("nothing to show; waiting for the library to change");
            sequence_rx.mark_unchanged();
            select! {
                _ = cancel.cancelled() => break,
                changed = sequence_rx.changed() => if changed.is_err() { break },
                _ = sleep(QUIET_POLL) => {}
            }
            continue;
        };

        let details = frame.describe(&photo.name).await;
        frame.on_photo_shown(&photo.name).await;
        debug!(
            name = %details.name,
            location = ?details.location,
            year = ?details.capture_year,
            "showing photo"
        );
        let event = SlideEvent::Show {
            name: details.name,
            location: details.location,
            capture_year: details.capture_year,
        };
        if to_display.send(event).await.is_err() {
            break;
        }

        select! {
            _ = cancel.cancelled() => break,
            _ = sleep(photo_duration) => {}
        }
    }
    info!("slideshow stopped");
    Ok(())
}
