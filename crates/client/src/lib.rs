//! FarmTrack tracking client.
//!
//! Session handling, the REST client, the typed backend API, the position
//! feed and the tracker runtime that drives the live map.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod feed;
pub mod jobs;
pub mod logging;
pub mod rest;
pub mod services;
pub mod session;
pub mod telemetry;
pub mod tracker;
pub mod transport;

pub use error::ClientError;
