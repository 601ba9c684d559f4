//! In-memory store of registered geofences and their runtime state.

use chrono::{DateTime, Utc};

use super::error::{GeofenceError, Result};
use super::types::{Geofence, GeofenceState, GeofenceStatus};

/// Default registration limit (the platform's per-app geofence limit).
pub const DEFAULT_MAX_GEOFENCES: usize = 100;

#[derive(Debug, Clone)]
struct Entry {
    geofence: Geofence,
    state: GeofenceState,
}

/// Ordered store of geofences.
///
/// Iteration order is registration order; transition events are delivered
/// in this order.
///
/// # Example
///
/// ```
/// use geofence_core::geofence::{Geofence, GeofenceError, GeofenceRegistry};
///
/// let mut registry = GeofenceRegistry::default();
/// registry.register(Geofence::new("home", 0.0, 0.0, 100.0)).unwrap();
///
/// let err = registry.register(Geofence::new("home", 1.0, 1.0, 150.0)).unwrap_err();
/// assert!(matches!(err, GeofenceError::DuplicateId(_)));
/// ```
#[derive(Debug, Clone)]
pub struct GeofenceRegistry {
    entries: Vec<Entry>,
    max_geofences: usize,
}

impl Default for GeofenceRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_GEOFENCES)
    }
}

impl GeofenceRegistry {
    /// Creates an empty registry accepting at most `max_geofences` entries.
    #[must_use]
    pub const fn new(max_geofences: usize) -> Self {
        Self {
            entries: Vec::new(),
            max_geofences,
        }
    }

    /// Registers a geofence with state UNKNOWN.
    ///
    /// # Errors
    ///
    /// - [`GeofenceError::InvalidData`] if the geofence fails validation
    /// - [`GeofenceError::DuplicateId`] if the id is taken
    /// - [`GeofenceError::TooManyGeofences`] if the registry is full
    pub fn register(&mut self, geofence: Geofence) -> Result<()> {
        geofence.validate()?;

        if self.position_of(&geofence.id).is_some() {
            return Err(GeofenceError::DuplicateId(geofence.id));
        }

        if self.entries.len() >= self.max_geofences {
            return Err(GeofenceError::TooManyGeofences(self.max_geofences));
        }

        log::info!(
            "Registered geofence {} (cell {}, radius {}m, mask {:#05b})",
            geofence.id,
            geofence.geohash(7),
            geofence.radius_meters,
            geofence.transitions.bits()
        );

        self.entries.push(Entry {
            geofence,
            state: GeofenceState::default(),
        });
        Ok(())
    }

    /// Removes a geofence and its state, cancelling any pending dwell timer.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::NotFound`] if no geofence has this id.
    pub fn remove(&mut self, id: &str) -> Result<Geofence> {
        let index = self
            .position_of(id)
            .ok_or_else(|| GeofenceError::NotFound(id.to_string()))?;

        let entry = self.entries.remove(index);
        if entry.state.dwell_timer_active() {
            log::debug!("Cancelled pending dwell timer for {id}");
        }
        log::info!("Removed geofence {id}");

        Ok(entry.geofence)
    }

    /// Returns a snapshot of the registered geofences in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Geofence> {
        self.entries.iter().map(|e| e.geofence.clone()).collect()
    }

    /// Returns the geofence with this id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Geofence> {
        self.entries
            .iter()
            .find(|e| e.geofence.id == id)
            .map(|e| &e.geofence)
    }

    /// Returns the runtime state of the geofence with this id.
    #[must_use]
    pub fn state(&self, id: &str) -> Option<&GeofenceState> {
        self.entries
            .iter()
            .find(|e| e.geofence.id == id)
            .map(|e| &e.state)
    }

    /// Returns whether the geofence's expiration has passed at `now`.
    ///
    /// Expired geofences stay registered until the caller removes them.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::NotFound`] if no geofence has this id.
    pub fn is_expired(&self, id: &str, now: DateTime<Utc>) -> Result<bool> {
        self.get(id)
            .map(|g| g.is_expired(now))
            .ok_or_else(|| GeofenceError::NotFound(id.to_string()))
    }

    /// Removes every geofence expired at `now` and returns them.
    pub fn remove_expired(&mut self, now: DateTime<Utc>) -> Vec<Geofence> {
        let (expired, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| e.geofence.is_expired(now));
        self.entries = kept;

        for entry in &expired {
            log::info!("Removed expired geofence {}", entry.geofence.id);
        }
        expired.into_iter().map(|e| e.geofence).collect()
    }

    /// Removes every geofence, cancelling all pending dwell timers.
    pub fn clear(&mut self) -> Vec<Geofence> {
        let removed: Vec<Geofence> = self.entries.drain(..).map(|e| e.geofence).collect();
        log::info!("Removed all {} geofence(s)", removed.len());
        removed
    }

    /// Earliest dwell deadline that can still fire at or after `now`.
    ///
    /// Expired geofences and geofences no longer INSIDE are ignored, since
    /// their deadlines never produce an event.
    #[must_use]
    pub fn next_dwell_deadline(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.entries
            .iter()
            .filter(|e| !e.geofence.is_expired(now) && e.state.status == GeofenceStatus::Inside)
            .filter_map(|e| e.state.dwell_deadline)
            .min()
    }

    /// Number of registered geofences.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registration limit.
    #[must_use]
    pub const fn max_geofences(&self) -> usize {
        self.max_geofences
    }

    /// Geofences paired with mutable state, in registration order.
    pub(crate) fn entries_mut(&mut self) -> impl Iterator<Item = (&Geofence, &mut GeofenceState)> {
        self.entries
            .iter_mut()
            .map(|e| (&e.geofence, &mut e.state))
    }

    fn position_of(&self, id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.geofence.id == id)
    }
}
