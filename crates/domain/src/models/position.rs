//! Position domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A (latitude, longitude) pair in decimal degrees.
pub type Coordinate = (f64, f64);

/// One validated GPS sample.
///
/// Only constructible through [`Position::new`], so every value in the
/// system has in-range coordinates and a finite, non-negative speed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    latitude: f64,
    longitude: f64,
    /// km/h
    speed: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    altitude: Option<f64>,
    timestamp: DateTime<Utc>,
}

impl Position {
    pub fn new(
        latitude: f64,
        longitude: f64,
        speed: f64,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        shared::validation::validate_latitude(latitude)
            .map_err(|e| DomainError::from_validation(DomainError::InvalidPosition, e))?;
        shared::validation::validate_longitude(longitude)
            .map_err(|e| DomainError::from_validation(DomainError::InvalidPosition, e))?;
        shared::validation::validate_speed(speed)
            .map_err(|e| DomainError::from_validation(DomainError::InvalidPosition, e))?;

        Ok(Self {
            latitude,
            longitude,
            speed,
            altitude: None,
            timestamp,
        })
    }

    /// Returns a copy carrying the reported altitude. Non-finite values are dropped.
    pub fn with_altitude(self, altitude: Option<f64>) -> Self {
        Self {
            altitude: altitude.filter(|a| a.is_finite()),
            ..self
        }
    }

    pub fn latitude(&self) -> f64 {
        self.latitude
    }

    pub fn longitude(&self) -> f64 {
        self.longitude
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn altitude(&self) -> Option<f64> {
        self.altitude
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn coordinate(&self) -> Coordinate {
        (self.latitude, self.longitude)
    }
}

/// Raw GPS record as returned by the backend (`latest` in the overview,
/// items of the history endpoint). Fields are optional so a malformed
/// record can be rejected individually instead of failing the whole batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSample {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub speed: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TryFrom<&PositionSample> for Position {
    type Error = DomainError;

    fn try_from(sample: &PositionSample) -> Result<Self, Self::Error> {
        let latitude = sample
            .latitude
            .ok_or_else(|| DomainError::InvalidPosition("missing latitude".into()))?;
        let longitude = sample
            .longitude
            .ok_or_else(|| DomainError::InvalidPosition("missing longitude".into()))?;
        let timestamp = sample
            .timestamp
            .ok_or_else(|| DomainError::InvalidPosition("missing timestamp".into()))?;

        Ok(Position::new(latitude, longitude, sample.speed.unwrap_or(0.0), timestamp)?
            .with_altitude(sample.altitude))
    }
}
