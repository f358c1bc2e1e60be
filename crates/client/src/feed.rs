//! Position feed.
//!
//! One `poll` fetches the overview listing and turns it into the device
//! roster plus validated `(device_id, Position)` pairs in arrival order.

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use domain::models::{DeviceSummary, Position, PositionSample};

use crate::api::FarmTrackApi;
use crate::error::ClientError;
use crate::telemetry;

/// Result of one successful poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedCycle {
    /// Every asset with a tracker, used to reconcile the known-device set.
    pub roster: Vec<DeviceSummary>,
    pub positions: Vec<(String, Position)>,
    /// Samples dropped for failing validation.
    pub rejected: usize,
}

#[derive(Debug, Clone)]
pub struct PositionFeed {
    api: FarmTrackApi,
    degraded_after: u32,
    consecutive_failures: u32,
}

impl PositionFeed {
    pub fn new(api: FarmTrackApi, degraded_after: u32) -> Self {
        Self {
            api,
            degraded_after: degraded_after.max(1),
            consecutive_failures: 0,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn is_degraded(&self) -> bool {
        self.consecutive_failures >= self.degraded_after
    }

    /// Fetches the latest positions, restricted to `device_ids` when given.
    ///
    /// A failed poll changes nothing but the failure count. The failure that
    /// reaches the degraded threshold is reported as
    /// `ClientError::ConnectivityDegraded`; `SessionExpired` is passed
    /// through uncounted.
    pub async fn poll(&mut self, device_ids: Option<&[String]>) -> Result<FeedCycle, ClientError> {
        let entries = match self.api.overview().await {
            Ok(entries) => entries,
            Err(ClientError::SessionExpired) => return Err(ClientError::SessionExpired),
            Err(e) => {
                telemetry::record_poll("positions", false);
                self.consecutive_failures += 1;
                warn!(
                    failures = self.consecutive_failures,
                    error = %e,
                    "Position poll failed"
                );
                if self.consecutive_failures == self.degraded_after {
                    return Err(ClientError::ConnectivityDegraded {
                        failures: self.consecutive_failures,
                    });
                }
                return Err(e);
            }
        };
        telemetry::record_poll("positions", true);
        self.consecutive_failures = 0;

        let mut cycle = FeedCycle::default();
        for entry in &entries {
            let Some(summary) = entry.summary() else {
                continue;
            };
            let wanted = device_ids.map_or(true, |ids| ids.iter().any(|id| *id == summary.device_id));

            if wanted {
                if let Some(sample) = &entry.latest {
                    match validate_sample(&summary.device_id, sample) {
                        Some(position) => cycle.positions.push((summary.device_id.clone(), position)),
                        None => cycle.rejected += 1,
                    }
                }
            }
            cycle.roster.push(summary);
        }

        if cycle.rejected > 0 {
            telemetry::record_rejected_samples(cycle.rejected);
        }
        debug!(
            devices = cycle.roster.len(),
            positions = cycle.positions.len(),
            rejected = cycle.rejected,
            "Position poll completed"
        );
        Ok(cycle)
    }

    /// Validated positions of one device between `from` and `to`, oldest first.
    pub async fn history(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Position>, ClientError> {
        shared::validation::validate_time_window(from, to)?;

        let samples = self.api.history(device_id, from, to).await?;
        let total = samples.len();
        let mut positions: Vec<Position> = samples
            .iter()
            .filter_map(|sample| validate_sample(device_id, sample))
            .collect();
        positions.sort_by_key(Position::timestamp);

        let rejected = total - positions.len();
        if rejected > 0 {
            telemetry::record_rejected_samples(rejected);
        }
        Ok(positions)
    }
}

fn validate_sample(device_id: &str, sample: &PositionSample) -> Option<Position> {
    match Position::try_from(sample) {
        Ok(position) => Some(position),
        Err(e) => {
            warn!(device_id = %device_id, error = %e, "Dropping invalid position sample");
            None
        }
    }
}
