use std::time::Duration;

use anyhow::Result;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::events::Advance;

/// Emits [`Advance`] every `dwell` until cancelled or the receiver is gone.
pub async fn run(dwell: Duration, to_viewer: Sender<Advance>, cancel: CancellationToken) -> Result<()> {
    let mut ticks = time::interval_at(time::Instant::now() + dwell, dwell);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        select! {
            _ = cancel.cancelled() => {
                info!("cancel received; exiting slideshow task");
                break;
            }
            _ = ticks.tick() => {
                debug!(dwell = ?dwell, "advance");
                if to_viewer.send(Advance).await.is_err() {
                    debug!("viewer gone; exiting slideshow task");
                    break;
                }
            }
        }
    }
    Ok(())
}
