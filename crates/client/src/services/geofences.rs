//! Geofence create, update and delete against the backend.

use tracing::info;

use domain::models::{Coordinate, Geofence, GeofenceDraft, LocationCheckResponse};

use crate::api::FarmTrackApi;
use crate::error::ClientError;

#[derive(Debug, Clone)]
pub struct GeofenceService {
    api: FarmTrackApi,
}

impl GeofenceService {
    pub fn new(api: FarmTrackApi) -> Self {
        Self { api }
    }

    pub async fn list(&self) -> Result<Vec<Geofence>, ClientError> {
        self.api.geofences().await
    }

    /// Persists a freshly drawn polygon. Invalid rings fail with
    /// `InvalidGeofence` before any request is made.
    pub async fn create(
        &self,
        name: &str,
        description: &str,
        vertices: Vec<Coordinate>,
    ) -> Result<Geofence, ClientError> {
        let draft = GeofenceDraft::new(name, description, vertices)?;
        let geofence = self.api.create_geofence(&draft).await?;
        info!(geofence_id = geofence.id, name = %geofence.name, "Geofence created");
        Ok(geofence)
    }

    pub async fn update(
        &self,
        id: i64,
        name: &str,
        description: &str,
        vertices: Vec<Coordinate>,
    ) -> Result<Geofence, ClientError> {
        let draft = GeofenceDraft::new(name, description, vertices)?;
        let geofence = self.api.update_geofence(id, &draft).await?;
        info!(geofence_id = id, "Geofence updated");
        Ok(geofence)
    }

    /// Returns the id once the backend confirmed the deletion.
    pub async fn delete(&self, id: i64) -> Result<i64, ClientError> {
        self.api.delete_geofence(id).await?;
        info!(geofence_id = id, "Geofence deleted");
        Ok(id)
    }

    /// Asks the backend whether a point lies in any of its geofences.
    pub async fn check_location(
        &self,
        latitude: f64,
        longitude: f64,
    ) -> Result<LocationCheckResponse, ClientError> {
        shared::validation::validate_coordinate(latitude, longitude)?;
        self.api.check_location(latitude, longitude).await
    }
}
