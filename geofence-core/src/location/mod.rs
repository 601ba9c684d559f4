//! Location module.
//!
//! Provides the position model and the platform collaborators that feed
//! geofence evaluation:
//! - [`Position`] fixes with optional accuracy radius
//! - Great-circle distance and destination math
//! - [`LocationSource`] and [`PermissionGate`] traits implemented by the host
//! - [`MonitorSettings`] for sampling configuration
//!
//! # Example Usage
//!
//! ```
//! use geofence_core::location::{haversine_distance, Position};
//!
//! let home = Position::new(-37.722_358, 145.049_592);
//! let here = Position::new(-37.722_900, 145.049_592).with_accuracy(8.0);
//!
//! let meters = haversine_distance(home.latitude, home.longitude, here.latitude, here.longitude);
//! assert!(meters > 50.0 && meters < 70.0);
//! ```

pub mod geo;
pub mod source;
pub mod types;

pub use geo::{destination, haversine_distance, is_valid_coordinate, location_to_geohash};
pub use source::{LocationError, LocationSource, PermissionGate};
#[cfg(any(test, feature = "test-utils"))]
pub use source::{ScriptedLocationSource, StaticPermissionGate};
pub use types::{AccessLevel, MonitorSettings, Position};
