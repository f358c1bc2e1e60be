//! Working sets of one mounted tracker and the pipeline applied to them.
//!
//! Every method here is synchronous and runs on the tracker loop, so the
//! sets are never touched concurrently.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use domain::models::{Alert, AlertId, Device, Geofence, Membership};
use domain::services::{AlertReconciler, DeviceRegistry, GeofenceEngine, TrackingView, ViewCommand};
use domain::DomainError;

use super::events::{TrackerEvent, TrackerSnapshot};
use super::TrackerSettings;
use crate::feed::FeedCycle;
use crate::services::ClearAllReport;
use crate::telemetry;

#[derive(Debug)]
pub struct TrackingState {
    settings: TrackerSettings,
    registry: DeviceRegistry,
    engine: GeofenceEngine,
    reconciler: AlertReconciler,
    view: TrackingView,
}

impl TrackingState {
    pub fn new(settings: TrackerSettings, deep_link: Option<String>) -> Self {
        let view = match deep_link {
            Some(device_id) => TrackingView::with_deep_link(settings.view.clone(), device_id),
            None => TrackingView::new(settings.view.clone()),
        };
        Self {
            settings,
            registry: DeviceRegistry::new(),
            engine: GeofenceEngine::new(),
            reconciler: AlertReconciler::new(),
            view,
        }
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn reconciler(&self) -> &AlertReconciler {
        &self.reconciler
    }

    pub fn view(&self) -> &TrackingView {
        &self.view
    }

    pub fn snapshot(&self, generation: u64, mounted: bool) -> TrackerSnapshot {
        TrackerSnapshot {
            generation,
            mounted,
            devices: self.registry.iter().cloned().collect(),
            geofences: self.engine.geofences().to_vec(),
            alerts: self.reconciler.alerts().to_vec(),
            view: self.view.state().clone(),
        }
    }

    /// Feed → geofence engine → alert reconciler → view, for one poll.
    pub fn apply_feed(&mut self, cycle: FeedCycle, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        let mut events = Vec::new();
        let roster = self.registry.sync_roster(&cycle.roster);
        let mut changed = !roster.added.is_empty()
            || !roster.relisted.is_empty()
            || !roster.unlisted.is_empty();

        for (device_id, position) in cycle.positions {
            let outcome = self.registry.apply_position(&device_id, position);
            if !outcome.is_applied() {
                debug!(device_id = %device_id, outcome = ?outcome, "Position not applied");
                continue;
            }
            changed = true;

            let transition = self.registry.get(&device_id).and_then(|device| {
                let (old, new) = self.engine.reconcile(device, &position);
                (old != new).then(|| (device.clone(), old, new))
            });
            if let Some((device, old, new)) = transition {
                events.extend(self.transition(device, old, new));
            }
            events.extend(to_events(self.view.on_position(&device_id, &position)));
        }

        events.extend(to_events(self.view.on_feed_cycle(&self.registry)));
        events.extend(self.check_inactivity(now));

        if changed {
            events.push(TrackerEvent::DevicesUpdated(self.registry.iter().cloned().collect()));
        }
        events
    }

    pub fn check_inactivity(&mut self, now: DateTime<Utc>) -> Vec<TrackerEvent> {
        let Some(threshold) = self.settings.inactivity_threshold else {
            return Vec::new();
        };
        let raised = self
            .reconciler
            .check_inactivity(self.registry.iter(), now, threshold);
        raised_events(raised)
    }

    pub fn select(&mut self, device_id: &str) -> Result<Vec<TrackerEvent>, DomainError> {
        let commands = self.view.select(device_id, &self.registry)?;
        Ok(to_events(commands))
    }

    pub fn show_all(&mut self) -> Vec<TrackerEvent> {
        to_events(self.view.show_all(&self.registry))
    }

    pub fn stop_tracking(&mut self) -> Vec<TrackerEvent> {
        to_events(self.view.stop_tracking(&self.registry))
    }

    /// Installs the server's geofence listing fetched under `seq`. Stale
    /// or unchanged listings produce no events.
    pub fn apply_geofences(&mut self, seq: u64, geofences: Vec<Geofence>) -> Vec<TrackerEvent> {
        match self.engine.apply_listing(seq, geofences) {
            Some(true) => {
                info!(seq, count = self.engine.len(), "Geofence listing applied");
                self.geofences_changed()
            }
            Some(false) | None => Vec::new(),
        }
    }

    /// A create or update the backend confirmed at `seq`.
    pub fn apply_geofence_saved(&mut self, geofence: Geofence, seq: u64) -> Vec<TrackerEvent> {
        self.engine.advance_seq(seq);
        self.engine.add(geofence);
        self.geofences_changed()
    }

    /// A deletion the backend confirmed at `seq`.
    pub fn apply_geofence_deleted(&mut self, id: i64, seq: u64) -> Vec<TrackerEvent> {
        self.engine.advance_seq(seq);
        if self.engine.remove(id).is_none() {
            return Vec::new();
        }
        self.geofences_changed()
    }

    /// Merges a server alert listing fetched under `seq`. Stale fetches
    /// produce no events.
    pub fn apply_alert_fetch(&mut self, seq: u64, alerts: Vec<Alert>) -> Vec<TrackerEvent> {
        match self.reconciler.apply_fetch(seq, alerts) {
            Some(summary) => {
                debug!(
                    seq,
                    retained = summary.retained,
                    superseded = summary.superseded_pending,
                    "Alert listing merged"
                );
                vec![self.alerts_changed()]
            }
            None => Vec::new(),
        }
    }

    pub fn apply_alert_acknowledged(&mut self, id: AlertId, seq: u64) -> Vec<TrackerEvent> {
        self.reconciler.advance_seq(seq);
        if self.reconciler.mark_acknowledged(&id) {
            vec![self.alerts_changed()]
        } else {
            Vec::new()
        }
    }

    pub fn apply_alert_resolved(&mut self, id: AlertId, seq: u64) -> Vec<TrackerEvent> {
        self.reconciler.advance_seq(seq);
        match self.reconciler.mark_resolved(&id) {
            Some(_) => vec![self.alerts_changed()],
            None => Vec::new(),
        }
    }

    pub fn apply_alert_deleted(&mut self, id: AlertId, seq: u64) -> Vec<TrackerEvent> {
        self.reconciler.advance_seq(seq);
        match self.reconciler.remove(&id) {
            Some(_) => vec![self.alerts_changed()],
            None => Vec::new(),
        }
    }

    /// Drops the alerts whose resolution succeeded; failed ones stay.
    pub fn apply_clear_all(&mut self, report: &ClearAllReport, seq: u64) -> Vec<TrackerEvent> {
        self.reconciler.advance_seq(seq);
        let mut removed = 0;
        for id in report.resolved() {
            if self.reconciler.mark_resolved(&id).is_some() {
                removed += 1;
            }
        }
        if removed == 0 {
            return Vec::new();
        }
        vec![self.alerts_changed()]
    }

    /// Recomputes every device's membership against the current geofences.
    fn geofences_changed(&mut self) -> Vec<TrackerEvent> {
        let mut events = vec![TrackerEvent::GeofencesChanged(self.engine.geofences().to_vec())];

        let updates: Vec<(Device, Membership)> = self
            .registry
            .iter()
            .filter(|device| device.last_position.is_some())
            .map(|device| (device.clone(), self.engine.evaluate(device.last_position.as_ref())))
            .filter(|(device, membership)| device.membership != *membership)
            .collect();

        if !updates.is_empty() {
            info!(devices = updates.len(), "Memberships changed after geofence update");
        }
        for (device, new) in updates {
            let old = device.membership;
            events.extend(self.transition(device, old, new));
        }
        events
    }

    fn transition(&mut self, device: Device, old: Membership, new: Membership) -> Vec<TrackerEvent> {
        self.registry.set_membership(&device.device_id, new);
        debug!(device_id = %device.device_id, old = %old, new = %new, "Membership changed");

        let mut events = vec![TrackerEvent::MembershipChanged {
            device_id: device.device_id.clone(),
            old,
            new,
        }];
        if let Some(alert) = self.reconciler.on_membership_transition(&device, old, new) {
            events.extend(raised_events(vec![alert]));
        }
        events
    }

    fn alerts_changed(&self) -> TrackerEvent {
        TrackerEvent::AlertsChanged(self.reconciler.alerts().to_vec())
    }
}

fn raised_events(raised: Vec<Alert>) -> Vec<TrackerEvent> {
    raised
        .into_iter()
        .map(|alert| {
            telemetry::record_alert_raised(alert.alert_type.as_str());
            TrackerEvent::AlertRaised(alert)
        })
        .collect()
}

fn to_events(commands: Vec<ViewCommand>) -> Vec<TrackerEvent> {
    commands
        .into_iter()
        .map(|command| match command {
            ViewCommand::SetViewport(viewport) => TrackerEvent::ViewportChanged(viewport),
            ViewCommand::SetCadence(cadence) => TrackerEvent::CadenceChanged(cadence),
        })
        .collect()
}
