//! Tracker runtime.
//!
//! A single loop owns the device registry, geofence engine, alert
//! reconciler and tracking view of the mounted map. Polling loops and
//! mutation tasks never touch that state: they send their results back to
//! the loop, which applies them one at a time. Every result carries the
//! mount generation it was started under; results from an earlier mount
//! are dropped.

mod events;
mod state;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use domain::models::{AlertId, Coordinate, Geofence, GeofenceDraft, PollCadence};
use domain::services::ViewSettings;

use crate::api::FarmTrackApi;
use crate::config::Config;
use crate::error::ClientError;
use crate::feed::{FeedCycle, PositionFeed};
use crate::jobs::{
    fetch_alerts, spawn_poll_loop, AlertPollJob, GeofencePollJob, PollHandle, PositionPollJob,
};
use crate::services::{AlertService, ClearAllReport, GeofenceService};
use crate::session::SessionStatus;

pub use events::{Notification, NotificationLevel, TrackerEvent, TrackerSnapshot};
pub use state::TrackingState;

use events::TrackerCommand;

const POLL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Tunables of a tracker, usually derived from [`Config`].
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    pub view: ViewSettings,
    pub focused_interval: Duration,
    pub overview_interval: Duration,
    pub alerts_interval: Duration,
    /// Geofence listing refresh; a failed listing is retried on this period.
    pub geofences_interval: Duration,
    pub degraded_after: u32,
    /// `None` disables device-inactive alerts.
    pub inactivity_threshold: Option<chrono::Duration>,
}

impl TrackerSettings {
    pub fn interval_for(&self, cadence: PollCadence) -> Duration {
        match cadence {
            PollCadence::Focused => self.focused_interval,
            PollCadence::Overview => self.overview_interval,
        }
    }
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            view: ViewSettings::default(),
            focused_interval: Duration::from_secs(3),
            overview_interval: Duration::from_secs(30),
            alerts_interval: Duration::from_secs(30),
            geofences_interval: Duration::from_secs(60),
            degraded_after: 3,
            inactivity_threshold: Some(chrono::Duration::seconds(900)),
        }
    }
}

impl From<&Config> for TrackerSettings {
    fn from(config: &Config) -> Self {
        Self {
            view: config.view_settings(),
            focused_interval: config.polling.focused_interval(),
            overview_interval: config.polling.overview_interval(),
            alerts_interval: config.polling.alerts_interval(),
            geofences_interval: config.polling.geofences_interval(),
            degraded_after: config.polling.degraded_after_failures,
            inactivity_threshold: config
                .alerts
                .inactivity_enabled
                .then(|| config.alerts.inactivity_threshold()),
        }
    }
}

/// Monotonic source of alert sequence numbers.
///
/// Fetches take a number before their request goes out; confirmed
/// mutations take one after the backend answered. The alert reconciler and
/// the geofence engine apply nothing older than the newest number they
/// have seen.
#[derive(Debug, Default)]
pub struct SequenceClock(AtomicU64);

impl SequenceClock {
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a background task, tagged with the mount it belongs to.
#[derive(Debug)]
pub(crate) enum TaskResult {
    Feed {
        generation: u64,
        result: Result<FeedCycle, ClientError>,
    },
    AlertsFetched {
        generation: u64,
        seq: u64,
        result: Result<Vec<domain::models::Alert>, ClientError>,
    },
    GeofencesLoaded {
        generation: u64,
        seq: u64,
        result: Result<Vec<Geofence>, ClientError>,
    },
    Confirmed {
        generation: u64,
        seq: u64,
        mutation: Mutation,
    },
}

impl TaskResult {
    fn generation(&self) -> u64 {
        match self {
            TaskResult::Feed { generation, .. }
            | TaskResult::AlertsFetched { generation, .. }
            | TaskResult::GeofencesLoaded { generation, .. }
            | TaskResult::Confirmed { generation, .. } => *generation,
        }
    }
}

/// Backend answer to a user mutation.
#[derive(Debug)]
pub(crate) enum Mutation {
    GeofenceSaved(Result<Geofence, ClientError>),
    GeofenceDeleted(i64, Result<i64, ClientError>),
    AlertAcknowledged(AlertId, Result<(), ClientError>),
    AlertResolved(AlertId, Result<(), ClientError>),
    AlertDeleted(AlertId, Result<(), ClientError>),
    AllCleared(ClearAllReport),
}

/// Cloneable front end of a running tracker.
#[derive(Debug, Clone)]
pub struct TrackerHandle {
    commands: mpsc::UnboundedSender<TrackerCommand>,
}

/// Starts the tracker loop. It runs until [`TrackerHandle::shutdown`] or
/// until every handle is dropped.
pub fn spawn_tracker(
    api: FarmTrackApi,
    settings: TrackerSettings,
) -> (TrackerHandle, mpsc::UnboundedReceiver<TrackerEvent>, JoinHandle<()>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (result_tx, result_rx) = mpsc::unbounded_channel();
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let session = api.rest().session().subscribe();
    let runtime = TrackerRuntime {
        api,
        settings,
        results: result_tx,
        events: event_tx,
        clock: Arc::new(SequenceClock::default()),
        generation: 1,
        mounted: None,
    };
    let task = tokio::spawn(runtime.run(command_rx, result_rx, session));

    (TrackerHandle { commands: command_tx }, event_rx, task)
}

impl TrackerHandle {
    fn send(&self, command: TrackerCommand) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .map_err(|_| ClientError::TrackerStopped)
    }

    async fn call<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> TrackerCommand,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(command(reply))?;
        rx.await.map_err(|_| ClientError::TrackerStopped)?
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    /// Mounts the map, optionally deep-linked to a device. Returns the
    /// generation of the new mount.
    pub async fn mount(&self, deep_link: Option<String>) -> Result<u64, ClientError> {
        self.call(|reply| TrackerCommand::Mount { deep_link, reply })
            .await
    }

    /// Stops polling and drops the working sets.
    pub async fn unmount(&self) -> Result<(), ClientError> {
        self.call(|reply| TrackerCommand::Unmount { reply }).await
    }

    /// Focuses a device. Fails with `NotFound` for unknown devices and
    /// devices without a position.
    pub async fn select(&self, device_id: impl Into<String>) -> Result<(), ClientError> {
        let device_id = device_id.into();
        self.call(|reply| TrackerCommand::Select { device_id, reply })
            .await
    }

    pub fn show_all(&self) -> Result<(), ClientError> {
        self.send(TrackerCommand::ShowAll)
    }

    pub fn stop_tracking(&self) -> Result<(), ClientError> {
        self.send(TrackerCommand::StopTracking)
    }

    /// Queues a geofence creation. The ring is validated here so drawing
    /// mistakes surface immediately; the engine changes once the backend
    /// confirmed.
    pub fn create_geofence(
        &self,
        name: impl Into<String>,
        description: impl Into<String>,
        vertices: Vec<Coordinate>,
    ) -> Result<(), ClientError> {
        let (name, description) = (name.into(), description.into());
        GeofenceDraft::new(&name, &description, vertices.clone())?;
        self.send(TrackerCommand::CreateGeofence {
            name,
            description,
            vertices,
        })
    }

    pub fn update_geofence(
        &self,
        id: i64,
        name: impl Into<String>,
        description: impl Into<String>,
        vertices: Vec<Coordinate>,
    ) -> Result<(), ClientError> {
        let (name, description) = (name.into(), description.into());
        GeofenceDraft::new(&name, &description, vertices.clone())?;
        self.send(TrackerCommand::UpdateGeofence {
            id,
            name,
            description,
            vertices,
        })
    }

    pub fn delete_geofence(&self, id: i64) -> Result<(), ClientError> {
        self.send(TrackerCommand::DeleteGeofence(id))
    }

    pub fn acknowledge_alert(&self, id: AlertId) -> Result<(), ClientError> {
        self.send(TrackerCommand::AcknowledgeAlert(id))
    }

    pub fn resolve_alert(&self, id: AlertId) -> Result<(), ClientError> {
        self.send(TrackerCommand::ResolveAlert(id))
    }

    pub fn delete_alert(&self, id: AlertId) -> Result<(), ClientError> {
        self.send(TrackerCommand::DeleteAlert(id))
    }

    /// Resolves every held alert. Not atomic: failures are reported as a
    /// notification and the failed alerts stay.
    pub fn clear_all_alerts(&self) -> Result<(), ClientError> {
        self.send(TrackerCommand::ClearAllAlerts)
    }

    /// Fetches the alert listing outside the polling schedule.
    pub fn refresh_alerts(&self) -> Result<(), ClientError> {
        self.send(TrackerCommand::RefreshAlerts)
    }

    pub async fn snapshot(&self) -> Result<TrackerSnapshot, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrackerCommand::Snapshot { reply })?;
        rx.await.map_err(|_| ClientError::TrackerStopped)
    }

    /// Unmounts and ends the tracker loop.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.send(TrackerCommand::Shutdown { reply }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Mounted {
    state: TrackingState,
    cancel: CancellationToken,
    positions: PollHandle,
    alerts: PollHandle,
    geofences: PollHandle,
    degraded: bool,
}

struct TrackerRuntime {
    api: FarmTrackApi,
    settings: TrackerSettings,
    results: mpsc::UnboundedSender<TaskResult>,
    events: mpsc::UnboundedSender<TrackerEvent>,
    clock: Arc<SequenceClock>,
    generation: u64,
    mounted: Option<Mounted>,
}

impl TrackerRuntime {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<TrackerCommand>,
        mut results: mpsc::UnboundedReceiver<TaskResult>,
        mut session: watch::Receiver<SessionStatus>,
    ) {
        info!("Tracker started");
        let mut watching_session = true;

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(TrackerCommand::Shutdown { reply }) => {
                        self.unmount().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.on_command(command).await,
                    None => {
                        self.unmount().await;
                        break;
                    }
                },
                Some(result) = results.recv() => self.on_result(result).await,
                changed = session.changed(), if watching_session => {
                    if changed.is_err() {
                        watching_session = false;
                        continue;
                    }
                    let status = *session.borrow_and_update();
                    if status == SessionStatus::Expired {
                        self.on_session_expired().await;
                    }
                }
            }
        }

        info!("Tracker stopped");
    }

    async fn on_command(&mut self, command: TrackerCommand) {
        match command {
            TrackerCommand::Mount { deep_link, reply } => {
                let result = self.mount(deep_link).await;
                let _ = reply.send(result);
            }
            TrackerCommand::Unmount { reply } => {
                self.unmount().await;
                let _ = reply.send(Ok(()));
            }
            TrackerCommand::Select { device_id, reply } => {
                let result = match self.mounted.as_mut() {
                    Some(mounted) => mounted.state.select(&device_id).map_err(ClientError::from),
                    None => Err(ClientError::TrackerStopped),
                };
                match result {
                    Ok(events) => {
                        self.publish(events);
                        let _ = reply.send(Ok(()));
                    }
                    Err(e) => {
                        debug!(device_id = %device_id, error = %e, "Select rejected");
                        let _ = reply.send(Err(e));
                    }
                }
            }
            TrackerCommand::ShowAll => {
                if let Some(mounted) = self.mounted.as_mut() {
                    let events = mounted.state.show_all();
                    self.publish(events);
                }
            }
            TrackerCommand::StopTracking => {
                if let Some(mounted) = self.mounted.as_mut() {
                    let events = mounted.state.stop_tracking();
                    self.publish(events);
                }
            }
            TrackerCommand::CreateGeofence {
                name,
                description,
                vertices,
            } => {
                let service = GeofenceService::new(self.api.clone());
                self.spawn_mutation(async move {
                    Mutation::GeofenceSaved(service.create(&name, &description, vertices).await)
                });
            }
            TrackerCommand::UpdateGeofence {
                id,
                name,
                description,
                vertices,
            } => {
                let service = GeofenceService::new(self.api.clone());
                self.spawn_mutation(async move {
                    Mutation::GeofenceSaved(service.update(id, &name, &description, vertices).await)
                });
            }
            TrackerCommand::DeleteGeofence(id) => {
                let service = GeofenceService::new(self.api.clone());
                self.spawn_mutation(async move { Mutation::GeofenceDeleted(id, service.delete(id).await) });
            }
            TrackerCommand::AcknowledgeAlert(id) => {
                let service = AlertService::new(self.api.clone());
                self.spawn_mutation(async move {
                    Mutation::AlertAcknowledged(id, service.acknowledge(id).await)
                });
            }
            TrackerCommand::ResolveAlert(id) => {
                let service = AlertService::new(self.api.clone());
                self.spawn_mutation(async move { Mutation::AlertResolved(id, service.resolve(id).await) });
            }
            TrackerCommand::DeleteAlert(id) => {
                let service = AlertService::new(self.api.clone());
                self.spawn_mutation(async move { Mutation::AlertDeleted(id, service.delete(id).await) });
            }
            TrackerCommand::ClearAllAlerts => {
                let Some(mounted) = self.mounted.as_ref() else {
                    return;
                };
                let ids = mounted.state.reconciler().ids();
                let service = AlertService::new(self.api.clone());
                self.spawn_mutation(async move { Mutation::AllCleared(service.clear_all(&ids).await) });
            }
            TrackerCommand::RefreshAlerts => {
                if self.mounted.is_none() {
                    return;
                }
                let service = AlertService::new(self.api.clone());
                let clock = Arc::clone(&self.clock);
                let results = self.results.clone();
                let generation = self.generation;
                tokio::spawn(async move {
                    fetch_alerts(&service, &clock, generation, &results).await;
                });
            }
            TrackerCommand::Snapshot { reply } => {
                let snapshot = match self.mounted.as_ref() {
                    Some(mounted) => mounted.state.snapshot(self.generation, true),
                    None => TrackingState::new(self.settings.clone(), None)
                        .snapshot(self.generation, false),
                };
                let _ = reply.send(snapshot);
            }
            TrackerCommand::Shutdown { reply } => {
                self.unmount().await;
                let _ = reply.send(());
            }
        }
    }

    async fn mount(&mut self, deep_link: Option<String>) -> Result<u64, ClientError> {
        let status = self.api.rest().session().status();
        if status != SessionStatus::Active {
            warn!(status = ?status, "Refusing to mount without an active session");
            return Err(ClientError::SessionExpired);
        }
        if self.mounted.is_some() {
            self.unmount().await;
        }

        let generation = self.generation;
        let state = TrackingState::new(self.settings.clone(), deep_link.clone());
        let cadence = state.view().cadence();
        let initial_viewport = state.view().state().viewport;
        let cancel = CancellationToken::new();

        let feed = PositionFeed::new(self.api.clone(), self.settings.degraded_after);
        let positions = spawn_poll_loop(
            PositionPollJob::new(feed, generation, self.results.clone()),
            self.settings.interval_for(cadence),
            &cancel,
        );
        let alerts = spawn_poll_loop(
            AlertPollJob::new(
                AlertService::new(self.api.clone()),
                Arc::clone(&self.clock),
                generation,
                self.results.clone(),
            ),
            self.settings.alerts_interval,
            &cancel,
        );
        let geofences = spawn_poll_loop(
            GeofencePollJob::new(
                GeofenceService::new(self.api.clone()),
                Arc::clone(&self.clock),
                generation,
                self.results.clone(),
            ),
            self.settings.geofences_interval,
            &cancel,
        );

        self.mounted = Some(Mounted {
            state,
            cancel,
            positions,
            alerts,
            geofences,
            degraded: false,
        });
        info!(generation, deep_link = ?deep_link, "Tracker mounted");
        self.emit(TrackerEvent::ViewportChanged(initial_viewport));
        Ok(generation)
    }

    async fn unmount(&mut self) {
        let Some(mounted) = self.mounted.take() else {
            return;
        };
        mounted.cancel.cancel();
        mounted.positions.shutdown(POLL_SHUTDOWN_TIMEOUT).await;
        mounted.alerts.shutdown(POLL_SHUTDOWN_TIMEOUT).await;
        mounted.geofences.shutdown(POLL_SHUTDOWN_TIMEOUT).await;

        info!(generation = self.generation, "Tracker unmounted");
        self.generation += 1;
        self.emit(TrackerEvent::Unmounted);
    }

    async fn on_session_expired(&mut self) {
        if self.mounted.is_none() {
            return;
        }
        warn!(generation = self.generation, "Session expired, stopping tracker");
        self.emit(TrackerEvent::SessionExpired);
        self.unmount().await;
    }

    async fn on_result(&mut self, result: TaskResult) {
        let generation = result.generation();
        if self.mounted.is_none() || generation != self.generation {
            debug!(
                generation,
                current = self.generation,
                "Discarding result from an earlier mount"
            );
            return;
        }

        match result {
            TaskResult::Feed { result, .. } => self.on_feed(result).await,
            TaskResult::AlertsFetched { seq, result, .. } => match result {
                Ok(alerts) => {
                    let events = self.state_mut(|state| state.apply_alert_fetch(seq, alerts));
                    self.publish(events);
                }
                Err(ClientError::SessionExpired) => self.on_session_expired().await,
                Err(e) => warn!(seq, error = %e, "Alert poll failed"),
            },
            TaskResult::GeofencesLoaded { seq, result, .. } => match result {
                Ok(geofences) => {
                    let events = self.state_mut(|state| state.apply_geofences(seq, geofences));
                    self.publish(events);
                }
                Err(ClientError::SessionExpired) => self.on_session_expired().await,
                Err(e) => warn!(seq, error = %e, "Geofence listing failed, retrying next tick"),
            },
            TaskResult::Confirmed { seq, mutation, .. } => self.on_mutation(seq, mutation).await,
        }
    }

    async fn on_feed(&mut self, result: Result<FeedCycle, ClientError>) {
        let Some(mounted) = self.mounted.as_mut() else {
            return;
        };
        match result {
            Ok(cycle) => {
                let restored = std::mem::replace(&mut mounted.degraded, false);
                let events = mounted.state.apply_feed(cycle, Utc::now());
                if restored {
                    info!("Connectivity restored");
                    self.emit(TrackerEvent::ConnectivityRestored);
                }
                self.publish(events);
            }
            Err(ClientError::SessionExpired) => self.on_session_expired().await,
            Err(ClientError::ConnectivityDegraded { failures }) => {
                mounted.degraded = true;
                self.emit(TrackerEvent::ConnectivityDegraded { failures });
            }
            Err(e) => debug!(error = %e, "Position poll failed, keeping last state"),
        }
    }

    async fn on_mutation(&mut self, seq: u64, mutation: Mutation) {
        match mutation {
            Mutation::GeofenceSaved(Ok(geofence)) => {
                let notice = Notification::info(format!("Geofence '{}' saved", geofence.name));
                let events = self.state_mut(|state| state.apply_geofence_saved(geofence, seq));
                self.publish(events);
                self.emit(TrackerEvent::Notification(notice));
            }
            Mutation::GeofenceDeleted(_, Ok(id)) => {
                let events = self.state_mut(|state| state.apply_geofence_deleted(id, seq));
                self.publish(events);
            }
            Mutation::AlertAcknowledged(id, Ok(())) => {
                let events = self.state_mut(|state| state.apply_alert_acknowledged(id, seq));
                self.publish(events);
            }
            Mutation::AlertResolved(id, Ok(())) => {
                let events = self.state_mut(|state| state.apply_alert_resolved(id, seq));
                self.publish(events);
            }
            Mutation::AlertDeleted(id, Ok(())) => {
                let events = self.state_mut(|state| state.apply_alert_deleted(id, seq));
                self.publish(events);
            }
            Mutation::AllCleared(report) => {
                if report.session_expired() {
                    self.on_session_expired().await;
                    return;
                }
                let events = self.state_mut(|state| state.apply_clear_all(&report, seq));
                self.publish(events);
                let failed = report.failed().len();
                if failed > 0 {
                    self.emit(TrackerEvent::Notification(Notification::error(format!(
                        "{} of {} alerts could not be resolved",
                        failed,
                        report.results.len()
                    ))));
                }
            }
            Mutation::GeofenceSaved(Err(e)) => self.on_failure(e, "Failed to save geofence").await,
            Mutation::GeofenceDeleted(id, Err(e)) => {
                self.on_failure(e, &format!("Failed to delete geofence {}", id))
                    .await
            }
            Mutation::AlertAcknowledged(id, Err(e)) => {
                self.on_failure(e, &format!("Failed to acknowledge alert {}", id))
                    .await
            }
            Mutation::AlertResolved(id, Err(e)) => {
                self.on_failure(e, &format!("Failed to resolve alert {}", id))
                    .await
            }
            Mutation::AlertDeleted(id, Err(e)) => {
                self.on_failure(e, &format!("Failed to delete alert {}", id))
                    .await
            }
        }
    }

    async fn on_failure(&mut self, error: ClientError, context: &str) {
        if error.is_session_expired() {
            self.on_session_expired().await;
            return;
        }
        warn!(error = %error, "{}", context);
        self.emit(TrackerEvent::Notification(Notification::error(format!(
            "{}: {}",
            context, error
        ))));
    }

    fn state_mut<F>(&mut self, apply: F) -> Vec<TrackerEvent>
    where
        F: FnOnce(&mut TrackingState) -> Vec<TrackerEvent>,
    {
        match self.mounted.as_mut() {
            Some(mounted) => apply(&mut mounted.state),
            None => Vec::new(),
        }
    }

    /// Runs a mutation in the background. Its sequence number is taken once
    /// the backend has answered.
    fn spawn_mutation<F>(&self, mutation: F)
    where
        F: Future<Output = Mutation> + Send + 'static,
    {
        if self.mounted.is_none() {
            debug!("Ignoring mutation while unmounted");
            return;
        }
        let generation = self.generation;
        let clock = Arc::clone(&self.clock);
        let results = self.results.clone();
        tokio::spawn(async move {
            let mutation = mutation.await;
            let seq = clock.next();
            let _ = results.send(TaskResult::Confirmed {
                generation,
                seq,
                mutation,
            });
        });
    }

    fn publish(&mut self, events: Vec<TrackerEvent>) {
        for event in events {
            if let TrackerEvent::CadenceChanged(cadence) = &event {
                if let Some(mounted) = self.mounted.as_ref() {
                    mounted
                        .positions
                        .set_interval(self.settings.interval_for(*cadence));
                }
            }
            self.emit(event);
        }
    }

    fn emit(&self, event: TrackerEvent) {
        if self.events.send(event).is_err() {
            debug!("No event listener attached");
        }
    }
}
