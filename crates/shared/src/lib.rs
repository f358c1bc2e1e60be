//! Shared utilities and common types for the FarmTrack client.
//!
//! This crate provides functionality used across the other crates:
//! - Coordinate, speed and time-window validation
//! - Client-side decoding of bearer token claims

pub mod jwt;
pub mod validation;
