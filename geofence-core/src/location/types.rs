//! Location data types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::geo::{is_valid_coordinate, location_to_geohash};
use crate::geofence::TransitionMask;

/// A single position fix produced by a [`LocationSource`](super::LocationSource).
///
/// Positions are ephemeral: each one is consumed by exactly one sampling
/// cycle. The optional `accuracy` is the platform's horizontal accuracy
/// radius in meters; a large accuracy makes boundary decisions ambiguous.
///
/// # Example
///
/// ```
/// use geofence_core::location::Position;
///
/// let fix = Position::new(-37.722_358, 145.049_592).with_accuracy(12.0);
/// assert!(fix.is_valid());
/// assert_eq!(fix.accuracy, Some(12.0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// When the fix was taken (UTC)
    pub timestamp: DateTime<Utc>,

    /// Latitude in degrees
    pub latitude: f64,

    /// Longitude in degrees
    pub longitude: f64,

    /// Horizontal accuracy radius in meters, if the platform reports one
    pub accuracy: Option<f64>,
}

impl Position {
    /// Creates a position stamped with the current time and no accuracy.
    #[must_use]
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            timestamp: Utc::now(),
            latitude,
            longitude,
            accuracy: None,
        }
    }

    /// Sets the accuracy radius in meters.
    #[must_use]
    pub const fn with_accuracy(mut self, accuracy: f64) -> Self {
        self.accuracy = Some(accuracy);
        self
    }

    /// Sets the fix timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns true when both coordinates are finite and in range.
    ///
    /// Invalid fixes are never guessed into a containment decision.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        is_valid_coordinate(self.latitude, self.longitude)
    }

    /// Returns the geohash of this fix at the given precision.
    ///
    /// Empty for invalid coordinates.
    #[must_use]
    pub fn geohash(&self, precision: u8) -> String {
        location_to_geohash(self.latitude, self.longitude, precision)
    }
}

/// Access level needed for a sampling frequency.
///
/// Foreground access covers sampling while the host app is visible;
/// background access is required for sampling driven by a background
/// scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AccessLevel {
    /// Location access while the app is in use.
    #[default]
    Foreground,
    /// Location access at all times.
    Background,
}

impl AccessLevel {
    /// Converts to string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Foreground => "foreground",
            Self::Background => "background",
        }
    }
}

/// Settings for geofence monitoring.
///
/// These settings control how positions are sampled and how many
/// geofences a monitor accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Access level requested from the permission gate before each sample
    pub access_level: AccessLevel,

    /// Upper bound on a single `current_position` call, in milliseconds
    pub position_timeout_ms: u64,

    /// Interval of the background sampling loop, in milliseconds
    pub sampling_interval_ms: u64,

    /// Maximum number of registered geofences (platform limit is 100)
    pub max_geofences: usize,

    /// Initial-trigger policy applied to geofences that do not set their own
    pub initial_trigger: TransitionMask,

    /// Whether transition events are rendered as notifications
    pub notifications_enabled: bool,
}

impl MonitorSettings {
    /// Position timeout as a [`Duration`].
    #[must_use]
    pub const fn position_timeout(&self) -> Duration {
        Duration::from_millis(self.position_timeout_ms)
    }

    /// Sampling interval as a [`Duration`].
    #[must_use]
    pub const fn sampling_interval(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms)
    }

    /// Loads settings from a JSON string. Missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Converts these settings to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            access_level: AccessLevel::Foreground,
            position_timeout_ms: 30_000,
            sampling_interval_ms: 60_000,
            max_geofences: 100,
            initial_trigger: TransitionMask::NONE,
            notifications_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn position_new_has_no_accuracy() {
        let fix = Position::new(37.7749, -122.4194);
        assert_eq!(fix.accuracy, None);
        assert!(fix.is_valid());
    }

    #[test]
    fn position_builders_set_fields() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let fix = Position::new(1.0, 2.0)
            .with_accuracy(25.0)
            .with_timestamp(at);

        assert_eq!(fix.accuracy, Some(25.0));
        assert_eq!(fix.timestamp, at);
    }

    #[test]
    fn position_rejects_out_of_range_coordinates() {
        assert!(!Position::new(91.0, 0.0).is_valid());
        assert!(!Position::new(0.0, -181.0).is_valid());
        assert!(!Position::new(f64::NAN, 0.0).is_valid());
        assert!(!Position::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn position_accepts_boundaries() {
        assert!(Position::new(90.0, 180.0).is_valid());
        assert!(Position::new(-90.0, -180.0).is_valid());
    }

    #[test]
    fn position_geohash_length() {
        let fix = Position::new(37.7749, -122.4194);
        assert_eq!(fix.geohash(7).len(), 7);
        assert!(Position::new(f64::NAN, 0.0).geohash(7).is_empty());
    }

    #[test]
    fn access_level_default_is_foreground() {
        assert_eq!(AccessLevel::default(), AccessLevel::Foreground);
        assert_eq!(AccessLevel::Background.as_str(), "background");
    }

    #[test]
    fn monitor_settings_default_values() {
        let settings = MonitorSettings::default();

        assert_eq!(settings.access_level, AccessLevel::Foreground);
        assert_eq!(settings.position_timeout(), Duration::from_secs(30));
        assert_eq!(settings.sampling_interval(), Duration::from_secs(60));
        assert_eq!(settings.max_geofences, 100);
        assert!(settings.initial_trigger.is_empty());
        assert!(settings.notifications_enabled);
    }

    #[test]
    fn monitor_settings_partial_json_uses_defaults() {
        let settings =
            MonitorSettings::from_json(r#"{"access_level":"Background","max_geofences":5}"#)
                .unwrap();

        assert_eq!(settings.access_level, AccessLevel::Background);
        assert_eq!(settings.max_geofences, 5);
        assert_eq!(settings.position_timeout_ms, 30_000);
    }

    #[test]
    fn monitor_settings_json_roundtrip() {
        let mut settings = MonitorSettings::default();
        settings.initial_trigger = TransitionMask::EXIT;
        settings.notifications_enabled = false;

        let json = settings.to_json().unwrap();
        let restored = MonitorSettings::from_json(&json).unwrap();

        assert_eq!(restored, settings);
    }

    #[test]
    fn monitor_settings_rejects_malformed_json() {
        assert!(MonitorSettings::from_json("{not json").is_err());
    }
}
