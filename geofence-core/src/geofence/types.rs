//! Core types for geofence management.
//!
//! This module defines geofences (circular regions with transition rules),
//! their runtime state, and the transition events produced when a tracked
//! device crosses a boundary.

use std::ops::{BitOr, BitOrAssign};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::error::{GeofenceError, Result};
use crate::location::{is_valid_coordinate, location_to_geohash, Position};

/// Smallest radius accepted at registration.
///
/// Location fixes are not accurate enough to resolve smaller regions
/// reliably.
pub const MIN_RADIUS_METERS: f64 = 100.0;

/// Kind of boundary transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transition {
    /// Moved from outside to inside.
    Enter,
    /// Moved from inside to outside.
    Exit,
    /// Stayed inside for at least the dwell delay.
    Dwell,
}

impl Transition {
    /// All transitions in mask-bit order.
    pub const ALL: [Self; 3] = [Self::Enter, Self::Exit, Self::Dwell];

    /// Converts to string representation for storage and logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
            Self::Dwell => "dwell",
        }
    }

    /// Parses from string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "enter" => Some(Self::Enter),
            "exit" => Some(Self::Exit),
            "dwell" => Some(Self::Dwell),
            _ => None,
        }
    }

    /// The single-bit mask for this transition.
    #[must_use]
    pub const fn mask(self) -> TransitionMask {
        match self {
            Self::Enter => TransitionMask::ENTER,
            Self::Exit => TransitionMask::EXIT,
            Self::Dwell => TransitionMask::DWELL,
        }
    }
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Set of transitions, stored as bits (ENTER = 1, EXIT = 2, DWELL = 4).
///
/// # Example
///
/// ```
/// use geofence_core::geofence::{Transition, TransitionMask};
///
/// let mask = TransitionMask::ENTER | TransitionMask::DWELL;
/// assert!(mask.contains(Transition::Enter));
/// assert!(!mask.contains(Transition::Exit));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransitionMask(u8);

impl TransitionMask {
    /// No transitions.
    pub const NONE: Self = Self(0);
    /// Outside to inside.
    pub const ENTER: Self = Self(1);
    /// Inside to outside.
    pub const EXIT: Self = Self(2);
    /// Inside past the dwell delay.
    pub const DWELL: Self = Self(4);
    /// Every transition.
    pub const ALL: Self = Self(7);

    /// Builds a mask from raw bits, rejecting unknown bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Option<Self> {
        if bits & !Self::ALL.0 == 0 {
            Some(Self(bits))
        } else {
            None
        }
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Returns true if `transition` is in the set.
    #[must_use]
    pub const fn contains(self, transition: Transition) -> bool {
        self.0 & transition.mask().0 != 0
    }

    /// Returns true if no transition is in the set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Iterates the contained transitions in bit order.
    pub fn iter(self) -> impl Iterator<Item = Transition> {
        Transition::ALL.into_iter().filter(move |t| self.contains(*t))
    }
}

impl BitOr for TransitionMask {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for TransitionMask {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl FromIterator<Transition> for TransitionMask {
    fn from_iter<I: IntoIterator<Item = Transition>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, |mask, t| mask | t.mask())
    }
}

/// When a geofence stops being monitored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Expiration {
    /// Monitored until removed.
    #[default]
    Never,
    /// Monitored until this instant.
    At(DateTime<Utc>),
}

impl Expiration {
    /// Returns true once the expiration instant is in the past.
    #[must_use]
    pub fn has_passed(&self, now: DateTime<Utc>) -> bool {
        match self {
            Self::Never => false,
            Self::At(at) => now > *at,
        }
    }

    /// Expiration as Unix milliseconds, `None` for never.
    #[must_use]
    pub fn as_millis(&self) -> Option<i64> {
        match self {
            Self::Never => None,
            Self::At(at) => Some(at.timestamp_millis()),
        }
    }

    /// Inverse of [`as_millis`](Self::as_millis).
    #[must_use]
    pub fn from_millis(millis: Option<i64>) -> Option<Self> {
        match millis {
            None => Some(Self::Never),
            Some(ms) => DateTime::from_timestamp_millis(ms).map(Self::At),
        }
    }
}

/// Result of evaluating one position against one geofence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Containment {
    /// Within the radius.
    Inside,
    /// Beyond the radius.
    Outside,
    /// Too close to the boundary (given the fix accuracy) or invalid fix.
    Unknown,
}

/// Runtime status of a geofence in the transition state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GeofenceStatus {
    /// No resolved sample yet.
    #[default]
    Unknown,
    /// Last resolved sample was outside.
    Outside,
    /// Inside, dwell not (yet) reached.
    Inside,
    /// Inside past the dwell delay.
    Dwelling,
}

impl GeofenceStatus {
    /// Returns true for [`Inside`](Self::Inside) and [`Dwelling`](Self::Dwelling).
    #[must_use]
    pub const fn is_inside(self) -> bool {
        matches!(self, Self::Inside | Self::Dwelling)
    }
}

/// A circular region with transition rules.
///
/// Built by the caller, validated and owned by the registry on
/// registration. Immutable once registered.
///
/// # Example
///
/// ```
/// use geofence_core::geofence::{Geofence, TransitionMask};
///
/// let home = Geofence::new("My house", -37.722_358, 145.049_592, 100.0)
///     .with_transitions(TransitionMask::ALL)
///     .with_dwell_delay_ms(1);
/// assert!(home.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geofence {
    /// Unique request identifier
    pub id: String,

    /// Center latitude in degrees
    pub latitude: f64,

    /// Center longitude in degrees
    pub longitude: f64,

    /// Radius in meters (at least [`MIN_RADIUS_METERS`])
    pub radius_meters: f64,

    /// When monitoring stops
    pub expiration: Expiration,

    /// Transitions that produce events
    pub transitions: TransitionMask,

    /// Delay after ENTER before DWELL fires, in milliseconds
    pub dwell_delay_ms: u64,

    /// Transitions reported for the condition already true at the first
    /// resolved sample. `None` uses the monitor default.
    pub initial_trigger: Option<TransitionMask>,
}

impl Geofence {
    /// Creates a never-expiring geofence reporting ENTER and EXIT.
    #[must_use]
    pub fn new(id: impl Into<String>, latitude: f64, longitude: f64, radius_meters: f64) -> Self {
        Self {
            id: id.into(),
            latitude,
            longitude,
            radius_meters,
            expiration: Expiration::Never,
            transitions: TransitionMask::ENTER | TransitionMask::EXIT,
            dwell_delay_ms: 0,
            initial_trigger: None,
        }
    }

    /// Sets the reported transitions.
    #[must_use]
    pub const fn with_transitions(mut self, transitions: TransitionMask) -> Self {
        self.transitions = transitions;
        self
    }

    /// Sets the dwell delay.
    #[must_use]
    pub const fn with_dwell_delay_ms(mut self, dwell_delay_ms: u64) -> Self {
        self.dwell_delay_ms = dwell_delay_ms;
        self
    }

    /// Sets the expiration.
    #[must_use]
    pub const fn with_expiration(mut self, expiration: Expiration) -> Self {
        self.expiration = expiration;
        self
    }

    /// Expires `duration` after `now`.
    #[must_use]
    pub fn expires_after(mut self, now: DateTime<Utc>, duration: Duration) -> Self {
        self.expiration = Expiration::At(now + duration);
        self
    }

    /// Sets the initial-trigger policy.
    #[must_use]
    pub const fn with_initial_trigger(mut self, initial_trigger: TransitionMask) -> Self {
        self.initial_trigger = Some(initial_trigger);
        self
    }

    /// Returns true once the expiration has passed.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiration.has_passed(now)
    }

    /// Dwell delay as a chrono duration, saturating on overflow.
    #[must_use]
    pub fn dwell_delay(&self) -> Duration {
        i64::try_from(self.dwell_delay_ms).map_or(Duration::MAX, Duration::milliseconds)
    }

    /// Geohash of the center.
    #[must_use]
    pub fn geohash(&self, precision: u8) -> String {
        location_to_geohash(self.latitude, self.longitude, precision)
    }

    /// Checks the registration constraints.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::InvalidData`] for an empty id, an invalid
    /// center, or a radius below [`MIN_RADIUS_METERS`].
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(GeofenceError::InvalidData("Geofence id is empty".to_string()));
        }

        if !is_valid_coordinate(self.latitude, self.longitude) {
            return Err(GeofenceError::InvalidData(format!(
                "Invalid center for {}: ({}, {})",
                self.id, self.latitude, self.longitude
            )));
        }

        if !self.radius_meters.is_finite() || self.radius_meters < MIN_RADIUS_METERS {
            return Err(GeofenceError::InvalidData(format!(
                "Radius for {} must be at least {MIN_RADIUS_METERS}m, got {}",
                self.id, self.radius_meters
            )));
        }

        Ok(())
    }
}

/// Per-geofence runtime state.
///
/// Created as [`GeofenceStatus::Unknown`] on registration and dropped on
/// removal, which also drops any pending dwell deadline.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeofenceState {
    /// Current state machine status.
    pub status: GeofenceStatus,
    /// When the last transition (or initialization) happened.
    pub last_transition_at: Option<DateTime<Utc>>,
    /// Pending dwell deadline; present means the dwell timer is active.
    pub dwell_deadline: Option<DateTime<Utc>>,
    /// Most recent fix that resolved to inside or outside.
    pub last_position: Option<Position>,
}

impl GeofenceState {
    /// Returns true while a dwell timer is pending.
    #[must_use]
    pub const fn dwell_timer_active(&self) -> bool {
        self.dwell_deadline.is_some()
    }
}

/// A discrete transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    /// Geofence that transitioned.
    pub geofence_id: String,
    /// Kind of transition.
    pub transition: Transition,
    /// When the transition was detected.
    pub timestamp: DateTime<Utc>,
    /// Fix that triggered it (for DWELL, the fix that resolved inside).
    pub position: Position,
}
