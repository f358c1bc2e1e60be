//! Domain error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("Invalid position: {0}")]
    InvalidPosition(String),

    #[error("Invalid geofence: {0}")]
    InvalidGeofence(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    #[error("Device {0} has no known position")]
    NoPosition(String),
}

impl DomainError {
    pub(crate) fn from_validation(
        kind: fn(String) -> DomainError,
        err: validator::ValidationError,
    ) -> Self {
        let message = err
            .message
            .map(|m| m.to_string())
            .unwrap_or_else(|| err.code.to_string());
        kind(message)
    }
}
