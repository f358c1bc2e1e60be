//! Alert domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an alert.
///
/// Alerts raised locally carry a placeholder until the backend's copy of
/// the same alert arrives with its own id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertId {
    Remote(i64),
    Pending(Uuid),
}

impl AlertId {
    pub fn pending() -> Self {
        AlertId::Pending(Uuid::new_v4())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, AlertId::Pending(_))
    }

    /// Server id, if assigned.
    pub fn remote(&self) -> Option<i64> {
        match self {
            AlertId::Remote(id) => Some(*id),
            AlertId::Pending(_) => None,
        }
    }
}

impl std::fmt::Display for AlertId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertId::Remote(id) => write!(f, "{}", id),
            AlertId::Pending(uuid) => write!(f, "pending-{}", uuid),
        }
    }
}

/// Kind of alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlertType {
    /// Device left every geofence. The backend calls this `geofence`.
    #[serde(rename = "geofence-exit", alias = "geofence")]
    GeofenceExit,
    #[serde(rename = "device-inactive", alias = "inactive")]
    DeviceInactive,
    #[serde(rename = "speed")]
    Speed,
    #[serde(rename = "other", other)]
    Other,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::GeofenceExit => "geofence-exit",
            AlertType::DeviceInactive => "device-inactive",
            AlertType::Speed => "speed",
            AlertType::Other => "other",
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification about a device.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: AlertId,
    pub device_id: String,
    pub alert_type: AlertType,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
    pub acknowledged: bool,
}

impl Alert {
    /// A freshly raised, locally held alert.
    pub fn raised(
        device_id: impl Into<String>,
        alert_type: AlertType,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: AlertId::pending(),
            device_id: device_id.into(),
            alert_type,
            message: message.into(),
            created_at,
            resolved: false,
            acknowledged: false,
        }
    }

    pub fn key(&self) -> (&str, AlertType) {
        (&self.device_id, self.alert_type)
    }
}

/// Alert as returned by `GET /alerts/`.
#[derive(Debug, Clone, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    #[serde(default)]
    pub device_id: Option<String>,
    pub alert_type: AlertType,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "is_resolved")]
    pub resolved: bool,
    #[serde(default, alias = "is_acknowledged")]
    pub acknowledged: bool,
}

impl TryFrom<AlertRecord> for Alert {
    type Error = DomainError;

    fn try_from(record: AlertRecord) -> Result<Self, Self::Error> {
        let device_id = record
            .device_id
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| DomainError::MalformedRecord(format!("alert {} has no device_id", record.id)))?;
        let created_at = record
            .created_at
            .ok_or_else(|| DomainError::MalformedRecord(format!("alert {} has no created_at", record.id)))?;

        Ok(Alert {
            id: AlertId::Remote(record.id),
            device_id,
            alert_type: record.alert_type,
            message: record.message.unwrap_or_default(),
            created_at,
            resolved: record.resolved,
            acknowledged: record.acknowledged,
        })
    }
}
