//! Common validation utilities.

use chrono::{DateTime, Utc};
use validator::ValidationError;

/// Validates that a latitude value is within valid range (-90 to 90).
///
/// NaN never falls inside the range and is rejected as well.
pub fn validate_latitude(lat: f64) -> Result<(), ValidationError> {
    if (-90.0..=90.0).contains(&lat) {
        Ok(())
    } else {
        let mut err = ValidationError::new("latitude_range");
        err.message = Some("Latitude must be between -90 and 90".into());
        Err(err)
    }
}

/// Validates that a longitude value is within valid range (-180 to 180).
pub fn validate_longitude(lon: f64) -> Result<(), ValidationError> {
    if (-180.0..=180.0).contains(&lon) {
        Ok(())
    } else {
        let mut err = ValidationError::new("longitude_range");
        err.message = Some("Longitude must be between -180 and 180".into());
        Err(err)
    }
}

/// Validates a (latitude, longitude) pair.
pub fn validate_coordinate(lat: f64, lon: f64) -> Result<(), ValidationError> {
    validate_latitude(lat)?;
    validate_longitude(lon)
}

/// Validates that speed is finite and non-negative (km/h).
pub fn validate_speed(speed: f64) -> Result<(), ValidationError> {
    if !speed.is_finite() {
        let mut err = ValidationError::new("speed_finite");
        err.message = Some("Speed must be a finite number".into());
        return Err(err);
    }
    if speed >= 0.0 {
        Ok(())
    } else {
        let mut err = ValidationError::new("speed_range");
        err.message = Some("Speed must be non-negative".into());
        Err(err)
    }
}

/// Validates that a history window is ordered (`from` not after `to`).
pub fn validate_time_window(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ValidationError> {
    if from <= to {
        Ok(())
    } else {
        let mut err = ValidationError::new("time_window");
        err.message = Some("History window start must not be after its end".into());
        Err(err)
    }
}
