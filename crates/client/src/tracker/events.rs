//! Messages into and out of the tracker loop.

use serde::Serialize;
use tokio::sync::oneshot;

use domain::models::{
    Alert, AlertId, Coordinate, Device, Geofence, MapViewport, Membership, PollCadence,
    TrackingViewState,
};

use crate::error::ClientError;

/// Severity of a user-facing notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Error,
}

/// A dismissable message for the UI, e.g. a mutation the backend rejected.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Output of the tracker loop, in the order changes were applied.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    ViewportChanged(MapViewport),
    CadenceChanged(PollCadence),
    DevicesUpdated(Vec<Device>),
    MembershipChanged {
        device_id: String,
        old: Membership,
        new: Membership,
    },
    AlertRaised(Alert),
    AlertsChanged(Vec<Alert>),
    GeofencesChanged(Vec<Geofence>),
    ConnectivityDegraded { failures: u32 },
    ConnectivityRestored,
    Notification(Notification),
    /// Refresh failed; the tracker has stopped and the user must log in.
    SessionExpired,
    Unmounted,
}

/// Read-only copy of the tracker's working sets.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackerSnapshot {
    pub generation: u64,
    pub mounted: bool,
    pub devices: Vec<Device>,
    pub geofences: Vec<Geofence>,
    pub alerts: Vec<Alert>,
    pub view: TrackingViewState,
}

pub(crate) type Reply<T> = oneshot::Sender<Result<T, ClientError>>;

/// User intents handled by the tracker loop.
#[derive(Debug)]
pub(crate) enum TrackerCommand {
    Mount {
        deep_link: Option<String>,
        reply: Reply<u64>,
    },
    Unmount {
        reply: Reply<()>,
    },
    Select {
        device_id: String,
        reply: Reply<()>,
    },
    ShowAll,
    StopTracking,
    CreateGeofence {
        name: String,
        description: String,
        vertices: Vec<Coordinate>,
    },
    UpdateGeofence {
        id: i64,
        name: String,
        description: String,
        vertices: Vec<Coordinate>,
    },
    DeleteGeofence(i64),
    AcknowledgeAlert(AlertId),
    ResolveAlert(AlertId),
    DeleteAlert(AlertId),
    ClearAllAlerts,
    RefreshAlerts,
    Snapshot {
        reply: oneshot::Sender<TrackerSnapshot>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}
