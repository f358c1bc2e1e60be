//! Alert listing polling job.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::services::AlertService;
use crate::telemetry;
use crate::tracker::{SequenceClock, TaskResult};

use super::scheduler::PollJob;

pub(crate) struct AlertPollJob {
    service: AlertService,
    clock: Arc<SequenceClock>,
    generation: u64,
    results: mpsc::UnboundedSender<TaskResult>,
}

impl AlertPollJob {
    pub(crate) fn new(
        service: AlertService,
        clock: Arc<SequenceClock>,
        generation: u64,
        results: mpsc::UnboundedSender<TaskResult>,
    ) -> Self {
        Self {
            service,
            clock,
            generation,
            results,
        }
    }
}

#[async_trait::async_trait]
impl PollJob for AlertPollJob {
    fn name(&self) -> &'static str {
        "alert_listing"
    }

    async fn run(&mut self) {
        fetch_alerts(&self.service, &self.clock, self.generation, &self.results).await;
    }
}

/// Fetches the alert listing stamped with a sequence number taken before
/// the request goes out.
pub(crate) async fn fetch_alerts(
    service: &AlertService,
    clock: &SequenceClock,
    generation: u64,
    results: &mpsc::UnboundedSender<TaskResult>,
) {
    let seq = clock.next();
    let result = service.fetch().await;
    telemetry::record_poll("alerts", result.is_ok());

    let message = TaskResult::AlertsFetched {
        generation,
        seq,
        result,
    };
    if results.send(message).is_err() {
        debug!(generation, seq, "Tracker gone, dropping alert listing");
    }
}
