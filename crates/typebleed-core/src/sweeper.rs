use crate::session::{unix_millis, SessionStore};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};

/// Background eviction loop bounding session state by retention.
///
/// ## Control Plane Isolation
/// The sweep runs on its own task and calls `evict_expired`, which removes
/// sessions one at a time. Capture and snapshot calls on live sessions are
/// never blocked for the duration of a sweep.
pub struct EvictionSweeper {
    store: Arc<SessionStore>,
    period: Duration,
}

impl EvictionSweeper {
    pub fn new(store: Arc<SessionStore>, period: Duration) -> Self {
        Self { store, period }
    }

    /// Runs until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut timer = interval(self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!("EvictionSweeper: sweeping every {:?}", self.period);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.store.evict_expired(unix_millis());
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("EvictionSweeper: stopped");
    }

    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
