//! Device domain model.

use serde::{Deserialize, Serialize};

use super::position::{Position, PositionSample};

/// What a tracker is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Employee,
    Equipment,
    Livestock,
}

impl DeviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceKind::Employee => "employee",
            DeviceKind::Equipment => "equipment",
            DeviceKind::Livestock => "livestock",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "employee" => Some(DeviceKind::Employee),
            "equipment" => Some(DeviceKind::Equipment),
            "livestock" => Some(DeviceKind::Livestock),
            _ => None,
        }
    }
}

/// Geofence membership of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Inside,
    Outside,
    #[default]
    Unknown,
}

impl std::fmt::Display for Membership {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Membership::Inside => write!(f, "inside"),
            Membership::Outside => write!(f, "outside"),
            Membership::Unknown => write!(f, "unknown"),
        }
    }
}

/// A tracked entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub device_id: String,
    pub kind: DeviceKind,
    pub name: String,
    pub last_position: Option<Position>,
    pub membership: Membership,
    /// Present in the latest successful roster fetch.
    pub listed: bool,
}

impl Device {
    pub fn new(device_id: impl Into<String>, kind: DeviceKind, name: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            kind,
            name: name.into(),
            last_position: None,
            membership: Membership::Unknown,
            listed: true,
        }
    }

    /// Name for messages, falling back to the device id.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.device_id
        } else {
            &self.name
        }
    }
}

/// Identity part of a roster entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSummary {
    pub device_id: String,
    pub kind: DeviceKind,
    pub name: String,
}

/// One entry of `GET /status/overview/`.
#[derive(Debug, Clone, Deserialize)]
pub struct OverviewEntry {
    pub kind: DeviceKind,
    /// Asset record id (equipment/employee/livestock row), not the tracker id.
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub latest: Option<PositionSample>,
    /// Server-side (legacy, radius based) membership flag. Informational only.
    #[serde(default)]
    pub inside_geofence: Option<bool>,
}

impl OverviewEntry {
    /// Roster identity, or `None` when the asset has no tracker assigned.
    pub fn summary(&self) -> Option<DeviceSummary> {
        let device_id = self.device_id.as_deref().map(str::trim)?;
        if device_id.is_empty() {
            return None;
        }
        Some(DeviceSummary {
            device_id: device_id.to_string(),
            kind: self.kind,
            name: self.name.clone().unwrap_or_default(),
        })
    }
}
