//! Domain models for FarmTrack.

pub mod alert;
pub mod device;
pub mod geofence;
pub mod position;
pub mod tracking;

pub use alert::{Alert, AlertId, AlertRecord, AlertType};
pub use device::{Device, DeviceKind, DeviceSummary, Membership, OverviewEntry};
pub use geofence::{
    Geofence, GeofenceDraft, GeofencePayload, GeofenceRecord, GeofenceRing, LocationCheckResponse,
};
pub use position::{Coordinate, Position, PositionSample};
pub use tracking::{MapViewport, PollCadence, TrackingViewState, ViewMode};
