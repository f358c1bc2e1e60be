//! Polling loops and the jobs they run.

mod alerts;
mod geofences;
mod positions;
mod scheduler;

pub(crate) use alerts::{fetch_alerts, AlertPollJob};
pub(crate) use geofences::GeofencePollJob;
pub(crate) use positions::PositionPollJob;
pub use scheduler::{spawn_poll_loop, PollHandle, PollJob};
