//! Domain layer for the FarmTrack client.
//!
//! This crate contains:
//! - Domain models (Device, Position, Geofence, Alert, tracking view state)
//! - Pure services: geofence engine, device registry, alert reconciler and
//!   the tracking view state machine
//! - Domain error types

pub mod error;
pub mod models;
pub mod services;

pub use error::DomainError;
