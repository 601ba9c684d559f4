//! Flutter-Rust bridge wrapper for geofence-core.
//!
//! This crate serves as a thin wrapper that exposes `geofence-core` to the
//! Flutter build system via Cargokit. The host feeds position fixes and
//! permission changes in through [`api::GeofenceApp`] and reads transition
//! events and pending notifications back out.

pub mod api;

pub use geofence_core::*;
