//! Domain services for FarmTrack.
//!
//! Services are pure state holders: they never perform I/O and are driven
//! by the client runtime.

pub mod alert_reconciler;
pub mod device_registry;
pub mod geofence_engine;
pub mod tracking_view;

pub use alert_reconciler::{AlertReconciler, MergeSummary};
pub use device_registry::{ApplyOutcome, DeviceRegistry, RosterChange};
pub use geofence_engine::{evaluate, GeofenceEngine};
pub use tracking_view::{fit_viewport, TrackingView, ViewCommand, ViewSettings};
