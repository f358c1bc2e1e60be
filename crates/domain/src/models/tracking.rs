//! Tracking view state model.

use serde::Serialize;

use super::position::Coordinate;

/// Which devices the map is following.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "mode", content = "deviceId")]
pub enum ViewMode {
    /// All known devices, viewport fit to their bounding box.
    Overview,
    /// The map follows one device.
    Focused(String),
}

/// Map center and zoom level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MapViewport {
    pub center: Coordinate,
    pub zoom: u8,
}

/// Ephemeral UI state of the live tracking map. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingViewState {
    pub mode: ViewMode,
    pub viewport: MapViewport,
}

impl TrackingViewState {
    pub fn focused_device_id(&self) -> Option<&str> {
        match &self.mode {
            ViewMode::Focused(device_id) => Some(device_id),
            ViewMode::Overview => None,
        }
    }

    pub fn is_focused(&self) -> bool {
        matches!(self.mode, ViewMode::Focused(_))
    }
}

/// Polling cadence requested by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PollCadence {
    /// Tight interval while a device is focused.
    Focused,
    /// Loose interval in overview.
    Overview,
}
