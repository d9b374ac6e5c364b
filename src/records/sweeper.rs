//! Background expiry sweeping.
//!
//! One cooperative task wakes on a fixed tick and runs the lifecycle sweep.
//! Sweeping is best-effort maintenance: failures are logged and the next
//! tick tries again. On shutdown the task finishes the tick it is in and
//! exits.

use crate::clock::SharedClock;
use crate::records::lifecycle::Lifecycle;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct Sweeper {
    lifecycle: Arc<Lifecycle>,
    clock: SharedClock,
    interval: Duration,
    shutdown: watch::Receiver<bool>,
}

impl Sweeper {
    pub fn new(
        lifecycle: Arc<Lifecycle>,
        clock: SharedClock,
        interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Sweeper {
            lifecycle,
            clock,
            interval,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; skip it so startup is not a
        // surprise sweep.
        tick.tick().await;
        loop {
            tokio::select! {
                _ = tick.tick() => {
                    debug!("running expiry sweep");
                    if let Err(err) = self.lifecycle.sweep(self.clock.now_nanos()).await {
                        warn!(%err, "expiry sweep failed");
                    }
                }
                _ = self.shutdown.changed() => {
                    debug!("sweeper shutting down");
                    return;
                }
            }
        }
    }
}
