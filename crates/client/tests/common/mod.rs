//! Shared helpers for client integration tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tokio::sync::mpsc;

use farmtrack_client::api::FarmTrackApi;
use farmtrack_client::auth::MemoryTokenStore;
use farmtrack_client::error::ClientError;
use farmtrack_client::rest::RestClient;
use farmtrack_client::session::SessionContext;
use farmtrack_client::tracker::{
    spawn_tracker, TrackerEvent, TrackerHandle, TrackerSettings, TrackerSnapshot,
};
use farmtrack_client::transport::{ApiRequest, ApiResponse, Method, MockTransport};

/// Scenario geofence G1: a square around (-15.392072, 28.330145).
pub const G1: [(f64, f64); 4] = [
    (-15.394, 28.328),
    (-15.394, 28.333),
    (-15.390, 28.333),
    (-15.390, 28.328),
];

pub const INSIDE: (f64, f64) = (-15.392072, 28.330145);
pub const OUTSIDE: (f64, f64) = (-15.395, 28.335);

#[derive(Default)]
struct BackendState {
    overview: Vec<Value>,
    alerts: Vec<Value>,
    geofences: Vec<Value>,
    next_geofence_id: i64,
    offline: bool,
    failing_resolves: HashSet<i64>,
    tick: i64,
}

/// In-memory stand-in for the backend REST API.
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<Mutex<BackendState>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        let backend = Self::default();
        backend.state.lock().unwrap().next_geofence_id = 100;
        backend
    }

    /// Reports a new latest position for `device_id`, one second after the
    /// previous report.
    pub fn report(&self, device_id: &str, name: &str, (latitude, longitude): (f64, f64)) {
        let mut state = self.state.lock().unwrap();
        state.tick += 1;
        let timestamp = Utc::now() + chrono::Duration::seconds(state.tick);
        let entry = json!({
            "kind": "equipment",
            "id": 1,
            "name": name,
            "device_id": device_id,
            "latest": {
                "device_id": device_id,
                "latitude": latitude,
                "longitude": longitude,
                "speed": 12.5,
                "timestamp": timestamp.to_rfc3339(),
            },
            "inside_geofence": null,
        });
        state.overview.retain(|e| e["device_id"] != device_id);
        state.overview.push(entry);
    }

    pub fn add_geofence(&self, id: i64, name: &str, ring: &[(f64, f64)]) {
        let coordinates: Vec<[f64; 2]> = ring.iter().map(|(lat, lng)| [*lat, *lng]).collect();
        self.state.lock().unwrap().geofences.push(json!({
            "id": id,
            "name": name,
            "description": "",
            "coordinates": coordinates,
        }));
    }

    pub fn add_alert(&self, id: i64, device_id: &str, created_at: DateTime<Utc>) {
        self.state.lock().unwrap().alerts.push(json!({
            "id": id,
            "device_id": device_id,
            "alert_type": "geofence",
            "message": format!("{} left the geofence", device_id),
            "created_at": created_at.to_rfc3339(),
            "is_resolved": false,
        }));
    }

    pub fn set_offline(&self, offline: bool) {
        self.state.lock().unwrap().offline = offline;
    }

    pub fn fail_resolve(&self, id: i64) {
        self.state.lock().unwrap().failing_resolves.insert(id);
    }

    pub fn alert_count(&self) -> usize {
        self.state.lock().unwrap().alerts.len()
    }

    pub fn transport(&self) -> MockTransport {
        let backend = self.clone();
        MockTransport::new(move |request| backend.respond(request))
    }

    /// Answers one request the way the backend would.
    pub fn respond(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut state = self.state.lock().unwrap();
        if state.offline {
            return Err(ClientError::Network("connection refused".to_string()));
        }

        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        match (request.method, segments.as_slice()) {
            (Method::Get, ["status", "overview"]) => Ok(ApiResponse::json(200, &json!(state.overview))),
            (Method::Get, ["alerts"]) => Ok(ApiResponse::json(200, &json!(state.alerts))),
            (Method::Post, ["alerts", id, "resolve"]) => {
                let id: i64 = id.parse().unwrap();
                if state.failing_resolves.contains(&id) {
                    return Ok(ApiResponse::new(500, r#"{"detail": "resolve failed"}"#));
                }
                state.alerts.retain(|a| a["id"] != id);
                Ok(ApiResponse::new(200, r#"{"status": "resolved"}"#))
            }
            (Method::Post, ["alerts", _, "ack"]) => Ok(ApiResponse::new(200, "{}")),
            (Method::Delete, ["alerts", id]) => {
                let id: i64 = id.parse().unwrap();
                state.alerts.retain(|a| a["id"] != id);
                Ok(ApiResponse::new(204, ""))
            }
            (Method::Get, ["geofences-api"]) => Ok(ApiResponse::json(200, &json!(state.geofences))),
            (Method::Post, ["geofences-api"]) => {
                let id = state.next_geofence_id;
                state.next_geofence_id += 1;
                let mut record = request.body.clone().unwrap_or_default();
                record["id"] = json!(id);
                state.geofences.push(record.clone());
                Ok(ApiResponse::json(201, &record))
            }
            (Method::Delete, ["geofences-api", id]) => {
                let id: i64 = id.parse().unwrap();
                state.geofences.retain(|g| g["id"] != id);
                Ok(ApiResponse::new(204, ""))
            }
            _ => Ok(ApiResponse::new(404, r#"{"detail": "Not found."}"#)),
        }
    }
}

pub async fn active_session() -> Arc<SessionContext> {
    let session = Arc::new(SessionContext::new(Arc::new(MemoryTokenStore::new()), 30));
    session
        .set_tokens("access-token", Some("refresh-token".to_string()))
        .await
        .unwrap();
    session
}

pub fn settings() -> TrackerSettings {
    TrackerSettings {
        inactivity_threshold: None,
        ..TrackerSettings::default()
    }
}

pub struct Harness {
    pub backend: FakeBackend,
    pub transport: MockTransport,
    pub session: Arc<SessionContext>,
    pub tracker: TrackerHandle,
    pub events: mpsc::UnboundedReceiver<TrackerEvent>,
}

impl Harness {
    pub async fn start(backend: FakeBackend) -> Self {
        let transport = backend.transport();
        Self::start_with(backend, transport).await
    }

    pub async fn start_with(backend: FakeBackend, transport: MockTransport) -> Self {
        let session = active_session().await;
        let api = FarmTrackApi::new(RestClient::new(
            Arc::new(transport.clone()),
            Arc::clone(&session),
        ));
        let (tracker, events, _task) = spawn_tracker(api, settings());
        Self {
            backend,
            transport,
            session,
            tracker,
            events,
        }
    }

    /// Discards everything emitted so far.
    pub fn drain(&mut self) -> Vec<TrackerEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Consumes events until one matches, failing after two minutes of
    /// (virtual) time.
    pub async fn wait_for<F>(&mut self, mut matches: F) -> TrackerEvent
    where
        F: FnMut(&TrackerEvent) -> bool,
    {
        let deadline = Duration::from_secs(120);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Some(event) if matches(&event) => return event,
                    Some(_) => continue,
                    None => panic!("tracker event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for tracker event")
    }

    /// Events emitted until the next applied feed cycle, inclusive.
    pub async fn next_cycle(&mut self) -> Vec<TrackerEvent> {
        let mut seen = Vec::new();
        let deadline = Duration::from_secs(120);
        tokio::time::timeout(deadline, async {
            loop {
                match self.events.recv().await {
                    Some(event) => {
                        let done = matches!(event, TrackerEvent::DevicesUpdated(_));
                        seen.push(event);
                        if done {
                            return;
                        }
                    }
                    None => panic!("tracker event stream closed"),
                }
            }
        })
        .await
        .expect("timed out waiting for a feed cycle");
        seen
    }

    pub async fn wait_until<F>(&self, mut condition: F) -> TrackerSnapshot
    where
        F: FnMut(&TrackerSnapshot) -> bool,
    {
        for _ in 0..600 {
            let snapshot = self.tracker.snapshot().await.unwrap();
            if condition(&snapshot) {
                return snapshot;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        panic!("condition not reached");
    }
}
