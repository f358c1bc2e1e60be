//! Geofence listing polling job.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::services::GeofenceService;
use crate::telemetry;
use crate::tracker::{SequenceClock, TaskResult};

use super::scheduler::PollJob;

/// Keeps the local geofence set in step with the backend. A failed
/// listing is simply retried on the next tick.
pub(crate) struct GeofencePollJob {
    service: GeofenceService,
    clock: Arc<SequenceClock>,
    generation: u64,
    results: mpsc::UnboundedSender<TaskResult>,
}

impl GeofencePollJob {
    pub(crate) fn new(
        service: GeofenceService,
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
impl PollJob for GeofencePollJob {
    fn name(&self) -> &'static str {
        "geofence_listing"
    }

    async fn run(&mut self) {
        let seq = self.clock.next();
        let result = self.service.list().await;
        telemetry::record_poll("geofences", result.is_ok());

        let message = TaskResult::GeofencesLoaded {
            generation: self.generation,
            seq,
            result,
        };
        if self.results.send(message).is_err() {
            debug!(
                generation = self.generation,
                seq,
                "Tracker gone, dropping geofence listing"
            );
        }
    }
}
