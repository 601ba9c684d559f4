//! Error types for geofence operations.
//!
//! This module defines errors that can occur while registering, removing,
//! or persisting geofences. None of them is fatal: each one is local to a
//! single call. Sampling problems are not errors; they surface as a
//! `SampleOutcome` or a warning event.

use thiserror::Error;

/// Error type for geofence operations.
#[derive(Error, Debug)]
pub enum GeofenceError {
    /// A geofence with this id is already registered.
    #[error("Geofence already exists: {0}")]
    DuplicateId(String),

    /// No geofence with this id is registered.
    #[error("Geofence not found: {0}")]
    NotFound(String),

    /// Invalid data provided.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Registration would exceed the configured limit.
    #[error("Too many geofences: limit is {0}")]
    TooManyGeofences(usize),

    /// Storage operation failed.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Database error from `SQLite`.
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// Result type alias for geofence operations.
pub type Result<T> = std::result::Result<T, GeofenceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_id_error_display() {
        let err = GeofenceError::DuplicateId("My house".to_string());
        assert_eq!(err.to_string(), "Geofence already exists: My house");
    }

    #[test]
    fn not_found_error_display() {
        let err = GeofenceError::NotFound("office".to_string());
        assert_eq!(err.to_string(), "Geofence not found: office");
    }

    #[test]
    fn invalid_data_error_display() {
        let err = GeofenceError::InvalidData("radius too small".to_string());
        assert_eq!(err.to_string(), "Invalid data: radius too small");
    }

    #[test]
    fn too_many_geofences_error_display() {
        let err = GeofenceError::TooManyGeofences(100);
        assert_eq!(err.to_string(), "Too many geofences: limit is 100");
    }

    #[test]
    fn storage_error_display() {
        let err = GeofenceError::Storage("lock poisoned".to_string());
        assert_eq!(err.to_string(), "Storage error: lock poisoned");
    }

    #[test]
    fn database_error_converts() {
        let err: GeofenceError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, GeofenceError::Database(_)));
        assert!(err.to_string().starts_with("Database error: "));
    }
}
