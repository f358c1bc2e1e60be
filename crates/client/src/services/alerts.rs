//! Alert lifecycle calls.
//!
//! Alerts raised locally carry a pending id and have no server record, so
//! acknowledging or resolving them needs no request.

use tokio::task::JoinSet;
use tracing::{info, warn};

use domain::models::{Alert, AlertId};

use crate::api::FarmTrackApi;
use crate::error::ClientError;

/// Per-alert outcome of a clear-all fan-out.
///
/// The fan-out is not atomic: some alerts may be resolved while others
/// failed. The caller re-fetches to learn the final state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearAllReport {
    pub results: Vec<(AlertId, Result<(), ClientError>)>,
}

impl ClearAllReport {
    pub fn resolved(&self) -> Vec<AlertId> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn failed(&self) -> Vec<(AlertId, ClientError)> {
        self.results
            .iter()
            .filter_map(|(id, r)| r.as_ref().err().map(|e| (*id, e.clone())))
            .collect()
    }

    pub fn is_complete(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }

    pub fn session_expired(&self) -> bool {
        self.results
            .iter()
            .any(|(_, r)| matches!(r, Err(ClientError::SessionExpired)))
    }
}

#[derive(Debug, Clone)]
pub struct AlertService {
    api: FarmTrackApi,
}

impl AlertService {
    pub fn new(api: FarmTrackApi) -> Self {
        Self { api }
    }

    pub async fn fetch(&self) -> Result<Vec<Alert>, ClientError> {
        self.api.alerts().await
    }

    pub async fn acknowledge(&self, id: AlertId) -> Result<(), ClientError> {
        match id {
            AlertId::Remote(remote) => self.api.acknowledge_alert(remote).await,
            AlertId::Pending(_) => Ok(()),
        }
    }

    pub async fn resolve(&self, id: AlertId) -> Result<(), ClientError> {
        match id {
            AlertId::Remote(remote) => {
                self.api.resolve_alert(remote).await?;
                info!(alert_id = remote, "Alert resolved");
                Ok(())
            }
            AlertId::Pending(_) => Ok(()),
        }
    }

    pub async fn delete(&self, id: AlertId) -> Result<(), ClientError> {
        match id {
            AlertId::Remote(remote) => {
                self.api.delete_alert(remote).await?;
                info!(alert_id = remote, "Alert deleted");
                Ok(())
            }
            AlertId::Pending(_) => Ok(()),
        }
    }

    /// Resolves every alert in `ids` with independent concurrent calls.
    pub async fn clear_all(&self, ids: &[AlertId]) -> ClearAllReport {
        let mut tasks = JoinSet::new();
        for (index, id) in ids.iter().copied().enumerate() {
            let service = self.clone();
            tasks.spawn(async move { (index, id, service.resolve(id).await) });
        }

        let mut results: Vec<(usize, AlertId, Result<(), ClientError>)> =
            Vec::with_capacity(ids.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => results.push(outcome),
                Err(e) => warn!(error = %e, "Resolve task failed to complete"),
            }
        }

        // Tasks that never completed count as failed.
        for (index, id) in ids.iter().copied().enumerate() {
            if !results.iter().any(|(i, _, _)| *i == index) {
                results.push((
                    index,
                    id,
                    Err(ClientError::Network("resolve task aborted".to_string())),
                ));
            }
        }
        results.sort_by_key(|(index, _, _)| *index);

        let report = ClearAllReport {
            results: results.into_iter().map(|(_, id, r)| (id, r)).collect(),
        };
        let failed = report.failed().len();
        if failed > 0 {
            warn!(
                total = ids.len(),
                failed,
                "Clear all finished with failures"
            );
        } else {
            info!(total = ids.len(), "All alerts cleared");
        }
        report
    }
}
