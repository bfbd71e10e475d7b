//! Keepalive scheduler
//!
//! Emits one tick per period while a connection epoch is open. The connection
//! turns each tick into a ping record; dropping the [`Keepalive`] stops the
//! timer task.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::trace;

pub struct Keepalive {
    ticks: mpsc::Receiver<()>,
    cancel: CancellationToken,
}

impl Keepalive {
    /// Spawn the timer; the first tick fires one full period from now
    pub fn start(period: Duration) -> Self {
        let (tick_tx, ticks) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        trace!("keepalive cancelled");
                        break;
                    }
                    _ = interval.tick() => {
                        // A tick still queued means the previous ping is pending; skip this one
                        if let Err(mpsc::error::TrySendError::Closed(())) = tick_tx.try_send(()) {
                            break;
                        }
                    }
                }
            }
        });

        Self { ticks, cancel }
    }

    /// Next tick, or `None` once the timer is gone
    pub async fn tick(&mut self) -> Option<()> {
        self.ticks.recv().await
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Keepalive {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
