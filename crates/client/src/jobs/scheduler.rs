//! Cancellable polling loops.
//!
//! Each loop runs a [`PollJob`] on an interval until its
//! [`PollHandle`] is stopped. The interval can be retuned while the loop
//! runs; the new period starts with an immediate tick.

use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Work performed on every tick of a polling loop.
#[async_trait::async_trait]
pub trait PollJob: Send + 'static {
    /// The name of this job (used for logging).
    fn name(&self) -> &'static str;

    /// One poll. Failures are handled inside the job; the loop keeps going.
    async fn run(&mut self);
}

/// Owner of one running polling loop.
#[derive(Debug)]
pub struct PollHandle {
    name: &'static str,
    cancel: CancellationToken,
    interval_tx: watch::Sender<Duration>,
    handle: JoinHandle<()>,
}

impl PollHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn interval(&self) -> Duration {
        *self.interval_tx.borrow()
    }

    /// Changes the period. No-op when unchanged.
    pub fn set_interval(&self, period: Duration) {
        let changed = self.interval_tx.send_if_modified(|current| {
            if *current == period {
                false
            } else {
                *current = period;
                true
            }
        });
        if changed {
            debug!(job = self.name, period_ms = period.as_millis() as u64, "Poll interval changed");
        }
    }

    /// Stops the loop. A poll in flight is abandoned.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop and waits for its task to exit.
    pub async fn shutdown(self, timeout: Duration) {
        self.stop();
        match tokio::time::timeout(timeout, self.handle).await {
            Ok(Ok(())) => debug!(job = self.name, "Poll loop exited"),
            Ok(Err(e)) => warn!(job = self.name, "Poll task panicked: {}", e),
            Err(_) => warn!(job = self.name, "Poll loop shutdown timed out after {:?}", timeout),
        }
    }
}

/// Spawns `job` on `period`, cancelled together with `parent`.
pub fn spawn_poll_loop<J: PollJob>(
    mut job: J,
    period: Duration,
    parent: &CancellationToken,
) -> PollHandle {
    let name = job.name();
    let cancel = parent.child_token();
    let (interval_tx, mut interval_rx) = watch::channel(period);
    let loop_cancel = cancel.clone();

    let handle = tokio::spawn(async move {
        let mut interval = new_interval(*interval_rx.borrow_and_update());
        info!(job = name, period_ms = period.as_millis() as u64, "Poll loop started");

        loop {
            tokio::select! {
                biased;
                _ = loop_cancel.cancelled() => {
                    info!(job = name, "Poll loop shutting down");
                    break;
                }
                changed = interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    interval = new_interval(*interval_rx.borrow_and_update());
                }
                _ = interval.tick() => {
                    let start = std::time::Instant::now();
                    tokio::select! {
                        biased;
                        _ = loop_cancel.cancelled() => {
                            debug!(job = name, "Poll abandoned on shutdown");
                            break;
                        }
                        _ = job.run() => {
                            debug!(
                                job = name,
                                elapsed_ms = start.elapsed().as_millis() as u64,
                                "Poll completed"
                            );
                        }
                    }
                }
            }
        }
    });

    PollHandle {
        name,
        cancel,
        interval_tx,
        handle,
    }
}

fn new_interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
