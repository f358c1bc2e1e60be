//! Typed backend endpoints.
//!
//! Every response is decoded into an explicit schema here. Listings are
//! validated per item: an entry that does not fit its schema is dropped
//! and logged, the rest of the listing is kept.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::warn;

use domain::models::{
    Alert, AlertRecord, Geofence, GeofenceDraft, GeofenceRecord, LocationCheckResponse,
    OverviewEntry, PositionSample,
};

use crate::error::ClientError;
use crate::rest::RestClient;
use crate::transport::{ApiRequest, Method};

pub const OVERVIEW_PATH: &str = "/status/overview/";
pub const ALERTS_PATH: &str = "/alerts/";
pub const GEOFENCES_PATH: &str = "/geofences-api/";
pub const CHECK_LOCATION_PATH: &str = "/geofences-api/check_location/";

pub fn alert_path(id: i64, action: Option<&str>) -> String {
    match action {
        Some(action) => format!("/alerts/{}/{}/", id, action),
        None => format!("/alerts/{}/", id),
    }
}

pub fn geofence_path(id: i64) -> String {
    format!("/geofences-api/{}/", id)
}

pub fn history_path(device_id: &str) -> String {
    format!("/devices/{}/history/", device_id)
}

#[derive(Debug, Clone)]
pub struct FarmTrackApi {
    rest: RestClient,
}

impl FarmTrackApi {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// `GET /status/overview/`: every asset with its latest fix.
    pub async fn overview(&self) -> Result<Vec<OverviewEntry>, ClientError> {
        let items: Vec<Value> = self.rest.get(OVERVIEW_PATH).await?;
        Ok(decode_items("overview entry", items))
    }

    /// `GET /alerts/`.
    pub async fn alerts(&self) -> Result<Vec<Alert>, ClientError> {
        let items: Vec<Value> = self.rest.get(ALERTS_PATH).await?;
        let records: Vec<AlertRecord> = decode_items("alert", items);
        Ok(records
            .into_iter()
            .filter_map(|record| match Alert::try_from(record) {
                Ok(alert) => Some(alert),
                Err(e) => {
                    warn!(error = %e, "Dropping malformed alert");
                    None
                }
            })
            .collect())
    }

    pub async fn acknowledge_alert(&self, id: i64) -> Result<(), ClientError> {
        self.rest
            .request::<Value>(Method::Post, &alert_path(id, Some("ack")), None)
            .await?;
        Ok(())
    }

    pub async fn resolve_alert(&self, id: i64) -> Result<(), ClientError> {
        self.rest
            .request::<Value>(Method::Post, &alert_path(id, Some("resolve")), None)
            .await?;
        Ok(())
    }

    pub async fn delete_alert(&self, id: i64) -> Result<(), ClientError> {
        self.rest.delete(&alert_path(id, None)).await
    }

    /// `GET /devices/{id}/history/?from&to`.
    pub async fn history(
        &self,
        device_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<PositionSample>, ClientError> {
        let request = ApiRequest::new(Method::Get, history_path(device_id))
            .with_query("from", from.to_rfc3339_opts(SecondsFormat::Secs, true))
            .with_query("to", to.to_rfc3339_opts(SecondsFormat::Secs, true));
        let response = self.rest.send(request).await?;
        let items: Vec<Value> = serde_json::from_str(&response.body)
            .map_err(|e| ClientError::InvalidResponse(e.to_string()))?;
        Ok(decode_items("history sample", items))
    }

    /// `GET /geofences-api/`. Records without a usable polygon are dropped.
    pub async fn geofences(&self) -> Result<Vec<Geofence>, ClientError> {
        let items: Vec<Value> = self.rest.get(GEOFENCES_PATH).await?;
        let records: Vec<GeofenceRecord> = decode_items("geofence", items);
        Ok(records
            .into_iter()
            .filter_map(|record| {
                let id = record.id;
                match Geofence::try_from(record) {
                    Ok(geofence) => Some(geofence),
                    Err(e) => {
                        warn!(geofence_id = id, error = %e, "Dropping unusable geofence");
                        None
                    }
                }
            })
            .collect())
    }

    /// `POST /geofences-api/`; returns the persisted geofence.
    pub async fn create_geofence(&self, draft: &GeofenceDraft) -> Result<Geofence, ClientError> {
        let body = serde_json::to_value(draft.to_payload())
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        let record: GeofenceRecord = self.rest.post(GEOFENCES_PATH, body).await?;
        Ok(persisted(record, draft))
    }

    /// `PUT /geofences-api/{id}/`.
    pub async fn update_geofence(
        &self,
        id: i64,
        draft: &GeofenceDraft,
    ) -> Result<Geofence, ClientError> {
        let body = serde_json::to_value(draft.to_payload())
            .map_err(|e| ClientError::Validation(e.to_string()))?;
        let record: GeofenceRecord = self.rest.put(&geofence_path(id), body).await?;
        Ok(persisted(record, draft))
    }

    pub async fn delete_geofence(&self, id: i64) -> Result<(), ClientError> {
        self.rest.delete(&geofence_path(id)).await
    }

    /// `POST /geofences-api/check_location/`: server-side membership check.
    pub async fn check_location(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationCheckResponse, ClientError> {
        self.rest
            .post(
                CHECK_LOCATION_PATH,
                json!({ "latitude": latitude, "longitude": longitude }),
            )
            .await
    }
}

/// The backend's copy of a drafted geofence. The id is authoritative; the
/// polygon falls back to the draft when the echo carries none.
fn persisted(record: GeofenceRecord, draft: &GeofenceDraft) -> Geofence {
    let id = record.id;
    match Geofence::try_from(record) {
        Ok(geofence) => geofence,
        Err(_) => draft.clone().into_geofence(id),
    }
}

fn decode_items<T: DeserializeOwned>(what: &'static str, items: Vec<Value>) -> Vec<T> {
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<T>(item) {
            Ok(decoded) => Some(decoded),
            Err(e) => {
                warn!(kind = what, error = %e, "Dropping malformed record");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryTokenStore;
    use crate::session::SessionContext;
    use crate::transport::{ApiResponse, MockTransport};
    use domain::models::AlertId;
    use std::sync::Arc;

    async fn api(transport: MockTransport) -> FarmTrackApi {
        let session = Arc::new(SessionContext::new(Arc::new(MemoryTokenStore::new()), 30));
        session.set_tokens("t", Some("r".into())).await.unwrap();
        FarmTrackApi::new(RestClient::new(Arc::new(transport), session))
    }

    #[test]
    fn test_paths() {
        assert_eq!(alert_path(5, Some("ack")), "/alerts/5/ack/");
        assert_eq!(alert_path(5, None), "/alerts/5/");
        assert_eq!(geofence_path(2), "/geofences-api/2/");
        assert_eq!(history_path("D1"), "/devices/D1/history/");
    }

    #[tokio::test]
    async fn test_overview_drops_malformed_entries() {
        let transport = MockTransport::new(|_| {
            Ok(ApiResponse::new(
                200,
                r#"[
                    {"kind": "equipment", "id": 1, "name": "Tractor", "device_id": "D1", "latest": null},
                    {"kind": "spaceship", "id": 2},
                    {"kind": "employee", "id": 3, "name": "Ana", "device_id": "D2",
                     "latest": {"device_id": "D2", "latitude": -15.39, "longitude": 28.33,
                                "speed": 4.5, "altitude": 1200.0, "timestamp": "2025-03-01T08:00:00Z"}}
                ]"#,
            ))
        });
        let entries = api(transport).await.overview().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].device_id.as_deref(), Some("D2"));
    }

    #[tokio::test]
    async fn test_overview_rejects_non_list() {
        let transport = MockTransport::new(|_| Ok(ApiResponse::new(200, r#"{"results": []}"#)));
        let err = api(transport).await.overview().await.unwrap_err();
        assert!(matches!(err, ClientError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_alerts_decoding() {
        let transport = MockTransport::new(|_| {
            Ok(ApiResponse::new(
                200,
                r#"[
                    {"id": 1, "device_id": "D1", "alert_type": "geofence", "message": "left",
                     "created_at": "2025-03-01T08:00:00Z", "is_resolved": false},
                    {"id": 2, "alert_type": "geofence", "created_at": "2025-03-01T08:00:00Z"},
                    {"id": "x"}
                ]"#,
            ))
        });
        let alerts = api(transport).await.alerts().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].id, AlertId::Remote(1));
    }

    #[tokio::test]
    async fn test_history_sends_time_window() {
        let transport = MockTransport::new(|_| Ok(ApiResponse::new(200, "[]")));
        let api = api(transport.clone()).await;
        let from = DateTime::from_timestamp(1_740_000_000, 0).unwrap();
        let to = DateTime::from_timestamp(1_740_003_600, 0).unwrap();
        api.history("D1", from, to).await.unwrap();

        let request = &transport.requests()[0];
        assert_eq!(request.path, "/devices/D1/history/");
        assert_eq!(
            request.query,
            vec![
                ("from".to_string(), "2025-02-19T21:20:00Z".to_string()),
                ("to".to_string(), "2025-02-19T22:20:00Z".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_create_geofence_uses_server_id() {
        let transport = MockTransport::new(|req| {
            let body = req.body.as_ref().unwrap();
            assert_eq!(body["coordinates"].as_array().unwrap().len(), 4);
            Ok(ApiResponse::new(201, r#"{"id": 77, "name": "Paddock"}"#))
        });
        let draft =
            GeofenceDraft::new("Paddock", "", vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]).unwrap();
        let geofence = api(transport).await.create_geofence(&draft).await.unwrap();
        assert_eq!(geofence.id, 77);
        assert!(geofence.contains((0.2, 0.7)));
    }

    #[tokio::test]
    async fn test_check_location() {
        let transport =
            MockTransport::new(|_| Ok(ApiResponse::new(200, r#"{"inside": true, "geofences": []}"#)));
        let response = api(transport).await.check_location(-15.39, 28.33).await.unwrap();
        assert!(response.inside);
    }
}
