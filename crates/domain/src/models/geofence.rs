//! Geofence domain model.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::position::Coordinate;
use crate::error::DomainError;

/// Minimum number of distinct vertices for a polygon.
pub const MIN_DISTINCT_VERTICES: usize = 3;

/// A validated, closed polygon ring of (lat, lng) vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceRing {
    points: Vec<Coordinate>,
}

impl GeofenceRing {
    /// Validates the vertices and closes the ring if the caller left it open.
    pub fn new(mut points: Vec<Coordinate>) -> Result<Self, DomainError> {
        for &(lat, lng) in &points {
            shared::validation::validate_coordinate(lat, lng)
                .map_err(|e| DomainError::from_validation(DomainError::InvalidGeofence, e))?;
        }

        let mut distinct: Vec<Coordinate> = Vec::with_capacity(points.len());
        for point in &points {
            if !distinct.contains(point) {
                distinct.push(*point);
            }
        }
        if distinct.len() < MIN_DISTINCT_VERTICES {
            return Err(DomainError::InvalidGeofence(format!(
                "polygon needs at least {} distinct vertices, got {}",
                MIN_DISTINCT_VERTICES,
                distinct.len()
            )));
        }

        if points.first() != points.last() {
            points.push(points[0]);
        }

        Ok(Self { points })
    }

    /// Vertices including the closing point.
    pub fn points(&self) -> &[Coordinate] {
        &self.points
    }

    /// Ray-casting point-in-polygon test.
    ///
    /// Casts a ray along increasing longitude from the point and counts edge
    /// crossings; an odd count means the point lies inside.
    pub fn contains(&self, (lat, lng): Coordinate) -> bool {
        let mut inside = false;
        for edge in self.points.windows(2) {
            let (lat_a, lng_a) = edge[0];
            let (lat_b, lng_b) = edge[1];
            if (lat_a > lat) != (lat_b > lat) {
                let crossing_lng = (lng_b - lng_a) * (lat - lat_a) / (lat_b - lat_a) + lng_a;
                if lng < crossing_lng {
                    inside = !inside;
                }
            }
        }
        inside
    }

    /// Wire form: `[[lat, lng], ...]`.
    pub fn to_pairs(&self) -> Vec<[f64; 2]> {
        self.points.iter().map(|&(lat, lng)| [lat, lng]).collect()
    }

    pub fn from_pairs(pairs: &[[f64; 2]]) -> Result<Self, DomainError> {
        Self::new(pairs.iter().map(|&[lat, lng]| (lat, lng)).collect())
    }
}

/// A geofence persisted by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct Geofence {
    pub id: i64,
    pub name: String,
    pub description: String,
    pub ring: GeofenceRing,
}

impl Geofence {
    pub fn contains(&self, point: Coordinate) -> bool {
        self.ring.contains(point)
    }
}

/// A geofence drawn by the user and not yet confirmed by the backend.
#[derive(Debug, Clone, PartialEq, Validate)]
pub struct GeofenceDraft {
    #[validate(length(min = 1, max = 100, message = "Name must be 1-100 characters"))]
    pub name: String,

    #[validate(length(max = 500, message = "Description must be at most 500 characters"))]
    pub description: String,

    pub ring: GeofenceRing,
}

impl GeofenceDraft {
    /// Builds a draft from freshly drawn vertices.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        vertices: Vec<Coordinate>,
    ) -> Result<Self, DomainError> {
        let draft = Self {
            name: name.into(),
            description: description.into(),
            ring: GeofenceRing::new(vertices)?,
        };
        draft.validate().map_err(|errors| {
            DomainError::InvalidGeofence(
                errors
                    .field_errors()
                    .values()
                    .flat_map(|errs| errs.iter())
                    .filter_map(|e| e.message.as_ref().map(|m| m.to_string()))
                    .collect::<Vec<_>>()
                    .join("; "),
            )
        })?;
        Ok(draft)
    }

    pub fn to_payload(&self) -> GeofencePayload {
        GeofencePayload {
            name: self.name.clone(),
            description: self.description.clone(),
            coordinates: self.ring.to_pairs(),
        }
    }

    /// The persisted geofence once the backend assigned `id`.
    pub fn into_geofence(self, id: i64) -> Geofence {
        Geofence {
            id,
            name: self.name,
            description: self.description,
            ring: self.ring,
        }
    }
}

/// Request body for `POST`/`PUT /geofences-api/`.
#[derive(Debug, Clone, Serialize)]
pub struct GeofencePayload {
    pub name: String,
    pub description: String,
    pub coordinates: Vec<[f64; 2]>,
}

/// Geofence as returned by `/geofences-api/`.
#[derive(Debug, Clone, Deserialize)]
pub struct GeofenceRecord {
    pub id: i64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub coordinates: Option<Vec<[f64; 2]>>,
}

impl TryFrom<GeofenceRecord> for Geofence {
    type Error = DomainError;

    fn try_from(record: GeofenceRecord) -> Result<Self, Self::Error> {
        let pairs = record.coordinates.ok_or_else(|| {
            DomainError::InvalidGeofence(format!("geofence {} has no coordinates", record.id))
        })?;
        Ok(Geofence {
            id: record.id,
            name: record.name.unwrap_or_default(),
            description: record.description.unwrap_or_default(),
            ring: GeofenceRing::from_pairs(&pairs)?,
        })
    }
}

/// Response of `POST /geofences-api/check_location/`.
#[derive(Debug, Clone, Deserialize)]
pub struct LocationCheckResponse {
    #[serde(default, alias = "is_inside", alias = "inside_geofence")]
    pub inside: bool,
    #[serde(default)]
    pub geofences: Vec<GeofenceRecord>,
}
