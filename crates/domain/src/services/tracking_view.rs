//! Tracking view state machine.
//!
//! Owns map focus: `overview` shows every known device, `focused` follows
//! one. Every transition returns the commands the map and the position
//! feed have to carry out.

use geo::{BoundingRect, MultiPoint, Point};
use tracing::{debug, info};

use crate::error::DomainError;
use crate::models::{
    Coordinate, MapViewport, PollCadence, Position, TrackingViewState, ViewMode,
};
use crate::services::device_registry::DeviceRegistry;

const MIN_FIT_ZOOM: u8 = 2;
const MAX_FIT_ZOOM: u8 = 18;

/// Side effect requested by a view transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ViewCommand {
    SetViewport(MapViewport),
    SetCadence(PollCadence),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ViewSettings {
    pub focus_zoom: u8,
    pub default_center: Coordinate,
    pub default_zoom: u8,
    /// Feed cycles to wait for a deep-linked device before giving up.
    pub deep_link_max_cycles: u32,
}

impl Default for ViewSettings {
    fn default() -> Self {
        Self {
            focus_zoom: 16,
            default_center: (-15.4167, 28.2833),
            default_zoom: 10,
            deep_link_max_cycles: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct DeepLink {
    device_id: String,
    cycles_left: u32,
}

#[derive(Debug, Clone)]
pub struct TrackingView {
    settings: ViewSettings,
    state: TrackingViewState,
    deep_link: Option<DeepLink>,
    /// Whether the overview viewport has been fit to real positions yet.
    fitted: bool,
}

impl TrackingView {
    pub fn new(settings: ViewSettings) -> Self {
        let state = TrackingViewState {
            mode: ViewMode::Overview,
            viewport: MapViewport {
                center: settings.default_center,
                zoom: settings.default_zoom,
            },
        };
        Self {
            settings,
            state,
            deep_link: None,
            fitted: false,
        }
    }

    /// Starts in overview and focuses `device_id` once a feed cycle shows
    /// it with a position.
    pub fn with_deep_link(settings: ViewSettings, device_id: impl Into<String>) -> Self {
        let cycles_left = settings.deep_link_max_cycles;
        let mut view = Self::new(settings);
        view.deep_link = Some(DeepLink {
            device_id: device_id.into(),
            cycles_left,
        });
        view
    }

    pub fn state(&self) -> &TrackingViewState {
        &self.state
    }

    pub fn settings(&self) -> &ViewSettings {
        &self.settings
    }

    pub fn pending_deep_link(&self) -> Option<&str> {
        self.deep_link.as_ref().map(|l| l.device_id.as_str())
    }

    pub fn cadence(&self) -> PollCadence {
        if self.state.is_focused() {
            PollCadence::Focused
        } else {
            PollCadence::Overview
        }
    }

    /// Focuses a device chosen by the user (marker, list entry or an
    /// alert's track action).
    pub fn select(
        &mut self,
        device_id: &str,
        registry: &DeviceRegistry,
    ) -> Result<Vec<ViewCommand>, DomainError> {
        if !registry.is_known(device_id) {
            return Err(DomainError::UnknownDevice(device_id.to_string()));
        }
        let position = registry
            .get(device_id)
            .and_then(|d| d.last_position)
            .ok_or_else(|| DomainError::NoPosition(device_id.to_string()))?;

        self.deep_link = None;
        Ok(self.focus(device_id, &position))
    }

    /// Returns to overview from any state.
    pub fn show_all(&mut self, registry: &DeviceRegistry) -> Vec<ViewCommand> {
        self.deep_link = None;
        self.enter_overview(registry)
    }

    /// Stops following the focused device. No-op in overview.
    pub fn stop_tracking(&mut self, registry: &DeviceRegistry) -> Vec<ViewCommand> {
        if !self.state.is_focused() {
            return Vec::new();
        }
        self.enter_overview(registry)
    }

    /// Re-centers on a new position of the focused device.
    pub fn on_position(&mut self, device_id: &str, position: &Position) -> Vec<ViewCommand> {
        if self.state.focused_device_id() != Some(device_id) {
            return Vec::new();
        }
        self.state.viewport.center = position.coordinate();
        vec![ViewCommand::SetViewport(self.state.viewport)]
    }

    /// Runs after every applied feed cycle.
    ///
    /// Leaves focus when the focused device is no longer known, resolves or
    /// counts down a pending deep link, and fits the first overview to the
    /// positions that arrived.
    pub fn on_feed_cycle(&mut self, registry: &DeviceRegistry) -> Vec<ViewCommand> {
        if let Some(focused) = self.state.focused_device_id() {
            if !registry.is_known(focused) {
                info!(device_id = %focused, "Focused device disappeared, returning to overview");
                return self.enter_overview(registry);
            }
            return Vec::new();
        }

        if let Some(mut link) = self.deep_link.take() {
            let position = registry
                .get(&link.device_id)
                .filter(|d| d.listed)
                .and_then(|d| d.last_position);
            if let Some(position) = position {
                info!(device_id = %link.device_id, "Deep link resolved");
                return self.focus(&link.device_id, &position);
            }

            link.cycles_left = link.cycles_left.saturating_sub(1);
            if link.cycles_left == 0 {
                info!(device_id = %link.device_id, "Deep-linked device not found, staying in overview");
                return self.enter_overview(registry);
            }
            debug!(
                device_id = %link.device_id,
                cycles_left = link.cycles_left,
                "Waiting for deep-linked device"
            );
            self.deep_link = Some(link);
        }

        if !self.fitted && !registry.known_coordinates().is_empty() {
            self.state.viewport = self.fit(registry);
            self.fitted = true;
            return vec![ViewCommand::SetViewport(self.state.viewport)];
        }

        Vec::new()
    }

    /// Back to the initial overview; used on unmount.
    pub fn reset(&mut self) {
        let settings = self.settings.clone();
        *self = Self::new(settings);
    }

    fn focus(&mut self, device_id: &str, position: &Position) -> Vec<ViewCommand> {
        let was_focused = self.state.is_focused();
        self.state.mode = ViewMode::Focused(device_id.to_string());
        self.state.viewport = MapViewport {
            center: position.coordinate(),
            zoom: self.settings.focus_zoom,
        };
        info!(device_id = %device_id, "Tracking device");

        let mut commands = vec![ViewCommand::SetViewport(self.state.viewport)];
        if !was_focused {
            commands.push(ViewCommand::SetCadence(PollCadence::Focused));
        }
        commands
    }

    fn enter_overview(&mut self, registry: &DeviceRegistry) -> Vec<ViewCommand> {
        let was_focused = self.state.is_focused();
        self.state.mode = ViewMode::Overview;
        self.state.viewport = self.fit(registry);
        self.fitted = !registry.known_coordinates().is_empty();

        let mut commands = vec![ViewCommand::SetViewport(self.state.viewport)];
        if was_focused {
            commands.push(ViewCommand::SetCadence(PollCadence::Overview));
        }
        commands
    }

    /// Viewport enclosing every known position, or the default one.
    fn fit(&self, registry: &DeviceRegistry) -> MapViewport {
        fit_viewport(&registry.known_coordinates(), &self.settings)
    }
}

/// Center and zoom for the bounding box of `coordinates`.
pub fn fit_viewport(coordinates: &[Coordinate], settings: &ViewSettings) -> MapViewport {
    let points: MultiPoint<f64> = coordinates
        .iter()
        .map(|&(lat, lng)| Point::new(lng, lat))
        .collect::<Vec<_>>()
        .into();

    let Some(rect) = points.bounding_rect() else {
        return MapViewport {
            center: settings.default_center,
            zoom: settings.default_zoom,
        };
    };

    let center = rect.center();
    let span = rect.width().max(rect.height());
    let zoom = if span <= f64::EPSILON {
        settings.focus_zoom
    } else {
        (360.0 / span)
            .log2()
            .floor()
            .clamp(MIN_FIT_ZOOM as f64, MAX_FIT_ZOOM as f64) as u8
    };

    MapViewport {
        center: (center.y, center.x),
        zoom,
    }
}
