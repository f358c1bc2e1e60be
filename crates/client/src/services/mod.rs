//! Backend-confirmed mutations.
//!
//! Services validate input, call the backend and return what the backend
//! confirmed. They never touch local working sets; the tracker applies
//! confirmed results.

pub mod alerts;
pub mod geofences;

pub use alerts::{AlertService, ClearAllReport};
pub use geofences::GeofenceService;
