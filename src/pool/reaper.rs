//! Periodic stuck-request reaper and idle evictor.
//!
//! Runs every `idle_timeout / 4`. A new period arriving on the watch channel
//! restarts the schedule without touching in-flight work. The task holds only
//! a weak reference to the pool and exits once the pool is gone.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::pool::PoolInner;

/// Smallest period the reaper accepts.
pub const MIN_REAPER_PERIOD: Duration = Duration::from_millis(10);

pub(crate) fn spawn(pool: Weak<PoolInner>, mut period: watch::Receiver<Duration>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let every = (*period.borrow_and_update()).max(MIN_REAPER_PERIOD);
            tracing::info!(period = ?every, "Reaper scheduled");

            let mut ticker = time::interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let Some(pool) = pool.upgrade() else {
                            return;
                        };
                        pool.reap(std::time::Instant::now());
                    }
                    changed = period.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        break;
                    }
                }
            }
        }
    })
}
