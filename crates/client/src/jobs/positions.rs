//! Position feed polling job.

use tokio::sync::mpsc;
use tracing::debug;

use crate::feed::PositionFeed;
use crate::tracker::TaskResult;

use super::scheduler::PollJob;

/// Polls the position feed and hands each result to the tracker loop.
pub(crate) struct PositionPollJob {
    feed: PositionFeed,
    generation: u64,
    results: mpsc::UnboundedSender<TaskResult>,
}

impl PositionPollJob {
    pub(crate) fn new(
        feed: PositionFeed,
        generation: u64,
        results: mpsc::UnboundedSender<TaskResult>,
    ) -> Self {
        Self {
            feed,
            generation,
            results,
        }
    }
}

#[async_trait::async_trait]
impl PollJob for PositionPollJob {
    fn name(&self) -> &'static str {
        "position_feed"
    }

    async fn run(&mut self) {
        let result = self.feed.poll(None).await;
        let message = TaskResult::Feed {
            generation: self.generation,
            result,
        };
        if self.results.send(message).is_err() {
            debug!(generation = self.generation, "Tracker gone, dropping feed result");
        }
    }
}
