//! High-level geofence monitoring API.
//!
//! This module provides the [`GeofenceMonitor`] which combines the registry,
//! the transition dispatcher and the platform collaborators (location
//! source, permission gate, clock) into one pipeline:
//!
//! ```text
//! PermissionGate ─► LocationSource ─► evaluate every geofence ─► dispatch
//! ```
//!
//! # Concurrency
//!
//! The registry lives behind its own lock. A sample is evaluated against all
//! geofences while holding it, so a concurrent `remove` either completes
//! before the cycle starts or waits for it to finish. The lock is never held
//! while waiting for a position fix.
//!
//! Subscribers sit behind a second lock. A cycle takes it before releasing
//! the registry and delivers with the registry already free, so events keep
//! their evaluation order while a slow subscriber only delays other
//! deliveries, not registration or removal. Locks are always taken in the
//! order registry, then dispatcher.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};

use crate::clock::Clock;
use crate::geofence::{
    Geofence, GeofenceError, GeofenceRegistry, GeofenceState, GeofenceStorage, MonitorEvent,
    Result, SamplingWarning, TransitionDispatcher, TransitionEvent, TransitionSubscriber,
};
use crate::location::{LocationError, LocationSource, MonitorSettings, PermissionGate, Position};

/// Result of one sampling cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SampleOutcome {
    /// A fix was evaluated against every geofence.
    Evaluated(Vec<TransitionEvent>),
    /// No fix was available; only due dwell timers were fired.
    NoFix(Vec<TransitionEvent>),
    /// Location access is missing; nothing was evaluated.
    PermissionDenied,
}

impl SampleOutcome {
    /// Events produced by this cycle.
    #[must_use]
    pub fn events(&self) -> &[TransitionEvent] {
        match self {
            Self::Evaluated(events) | Self::NoFix(events) => events,
            Self::PermissionDenied => &[],
        }
    }
}

/// Geofence monitor over a location source, permission gate and clock.
///
/// # Example
///
/// ```ignore
/// use geofence_core::{GeofenceMonitor, SystemClock};
/// use geofence_core::geofence::{Geofence, TransitionMask};
/// use geofence_core::location::MonitorSettings;
///
/// let monitor = GeofenceMonitor::new(source, gate, SystemClock, MonitorSettings::default());
/// monitor.register(
///     Geofence::new("My house", lat, lon, 100.0).with_transitions(TransitionMask::ALL),
/// )?;
/// let mut events = monitor.subscribe()?;
/// monitor.sample().await?;
/// ```
pub struct GeofenceMonitor<L, P, C> {
    registry: Mutex<GeofenceRegistry>,
    dispatcher: Mutex<TransitionDispatcher>,
    source: L,
    gate: P,
    clock: C,
    settings: MonitorSettings,
    storage: Option<GeofenceStorage>,
}

impl<L, P, C> std::fmt::Debug for GeofenceMonitor<L, P, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceMonitor")
            .field("settings", &self.settings)
            .field("persistent", &self.storage.is_some())
            .finish_non_exhaustive()
    }
}

impl<L, P, C> GeofenceMonitor<L, P, C>
where
    L: LocationSource,
    P: PermissionGate,
    C: Clock,
{
    /// Creates a monitor with an empty, in-memory registry.
    #[must_use]
    pub fn new(source: L, gate: P, clock: C, settings: MonitorSettings) -> Self {
        Self {
            registry: Mutex::new(GeofenceRegistry::new(settings.max_geofences)),
            dispatcher: Mutex::new(TransitionDispatcher::new(settings.initial_trigger)),
            source,
            gate,
            clock,
            settings,
            storage: None,
        }
    }

    /// Creates a monitor backed by persistent storage.
    ///
    /// Previously stored geofences are registered again with fresh UNKNOWN
    /// state. Rows that cannot be decoded, and entries that no longer pass
    /// validation, are skipped and logged.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored geofences cannot be queried at all.
    pub fn with_storage(
        source: L,
        gate: P,
        clock: C,
        settings: MonitorSettings,
        storage: GeofenceStorage,
    ) -> Result<Self> {
        let mut monitor = Self::new(source, gate, clock, settings);

        {
            let mut registry = monitor.registry()?;
            for geofence in storage.load_restorable()? {
                let id = geofence.id.clone();
                if let Err(e) = registry.register(geofence) {
                    log::warn!("Skipping stored geofence {id}: {e}");
                }
            }
        }

        monitor.storage = Some(storage);
        Ok(monitor)
    }

    fn registry(&self) -> Result<MutexGuard<'_, GeofenceRegistry>> {
        self.registry
            .lock()
            .map_err(|e| GeofenceError::Storage(format!("Failed to acquire registry lock: {e}")))
    }

    fn dispatcher(&self) -> Result<MutexGuard<'_, TransitionDispatcher>> {
        self.dispatcher
            .lock()
            .map_err(|e| GeofenceError::Storage(format!("Failed to acquire dispatcher lock: {e}")))
    }

    /// The monitor's settings.
    #[must_use]
    pub const fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    // ==================== Registration ====================

    /// Registers a geofence, persisting it when storage is attached.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateId`, `InvalidData` or `TooManyGeofences` from the
    /// registry, or a storage error. On a storage error the registration is
    /// rolled back.
    pub fn register(&self, geofence: Geofence) -> Result<()> {
        let mut registry = self.registry()?;
        let id = geofence.id.clone();

        let stored = self.storage.as_ref().map(|_| geofence.clone());
        registry.register(geofence)?;

        if let (Some(storage), Some(stored)) = (&self.storage, stored) {
            if let Err(e) = storage.save(&stored) {
                registry.remove(&id)?;
                return Err(e);
            }
        }

        Ok(())
    }

    /// Removes a geofence and cancels its pending dwell timer.
    ///
    /// Waits for an in-flight evaluation cycle to finish.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::NotFound`] if the id is not registered, or a
    /// storage error (in which case nothing is removed).
    pub fn remove(&self, id: &str) -> Result<Geofence> {
        let mut registry = self.registry()?;

        if registry.get(id).is_none() {
            return Err(GeofenceError::NotFound(id.to_string()));
        }
        if let Some(storage) = &self.storage {
            storage.delete(id)?;
        }

        registry.remove(id)
    }

    /// Removes every geofence and cancels every pending dwell timer.
    ///
    /// Returns the removed geofences in registration order.
    ///
    /// # Errors
    ///
    /// Returns a storage error, in which case nothing is removed.
    pub fn remove_all(&self) -> Result<Vec<Geofence>> {
        let mut registry = self.registry()?;

        if let Some(storage) = &self.storage {
            storage.clear()?;
        }

        Ok(registry.clear())
    }

    /// Removes every geofence whose expiration has passed.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned or storage fails.
    pub fn remove_expired(&self) -> Result<Vec<Geofence>> {
        let mut registry = self.registry()?;
        let removed = registry.remove_expired(self.clock.now());

        if let Some(storage) = &self.storage {
            for geofence in &removed {
                storage.delete(&geofence.id)?;
            }
        }

        Ok(removed)
    }

    /// Snapshot of the registered geofences.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn list(&self) -> Result<Vec<Geofence>> {
        Ok(self.registry()?.list())
    }

    /// Snapshot of a geofence's runtime state.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn state(&self, id: &str) -> Result<Option<GeofenceState>> {
        Ok(self.registry()?.state(id).cloned())
    }

    /// Returns whether the geofence has expired at the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns [`GeofenceError::NotFound`] if the id is not registered.
    pub fn is_expired(&self, id: &str) -> Result<bool> {
        self.registry()?.is_expired(id, self.clock.now())
    }

    /// Earliest pending dwell deadline, if any timer is running.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn next_dwell_deadline(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(self.registry()?.next_dwell_deadline(self.clock.now()))
    }

    // ==================== Subscription ====================

    /// Subscribes to transition events and sampling warnings.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<MonitorEvent>> {
        Ok(self.dispatcher()?.subscribe())
    }

    /// Attaches a subscriber, e.g. a
    /// [`NotificationSubscriber`](crate::notify::NotificationSubscriber).
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn add_subscriber(&self, subscriber: Box<dyn TransitionSubscriber>) -> Result<()> {
        self.dispatcher()?.add_subscriber(subscriber);
        Ok(())
    }

    // ==================== Sampling ====================

    /// Runs one sampling cycle.
    ///
    /// - Missing permission: a warning is dispatched, no state changes.
    /// - No fix or timeout: logged; due dwell timers still fire.
    /// - Fix: evaluated against every non-expired geofence.
    ///
    /// # Errors
    ///
    /// Returns an error only if a monitor lock is poisoned.
    pub async fn sample(&self) -> Result<SampleOutcome> {
        let level = self.settings.access_level;
        if !self.gate.has_access(level) {
            return self.permission_denied();
        }

        let timeout = self.settings.position_timeout();
        let fix = match tokio::time::timeout(timeout, self.source.current_position()).await {
            Ok(result) => result,
            Err(_) => Err(LocationError::Timeout(self.settings.position_timeout_ms)),
        };

        match fix {
            Ok(position) => self.process_position(position).map(SampleOutcome::Evaluated),
            Err(LocationError::PermissionDenied) => self.permission_denied(),
            Err(e) => {
                log::info!("No location fix this cycle: {e}");
                self.poll_timers().map(SampleOutcome::NoFix)
            }
        }
    }

    fn permission_denied(&self) -> Result<SampleOutcome> {
        let level = self.settings.access_level;
        log::warn!(
            "Skipping sample: {} location access not granted",
            level.as_str()
        );
        self.dispatcher()?
            .warn(SamplingWarning::PermissionDenied { level });
        Ok(SampleOutcome::PermissionDenied)
    }

    /// Evaluates a pushed fix against every geofence and dispatches the
    /// resulting events.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn process_position(&self, position: Position) -> Result<Vec<TransitionEvent>> {
        let now = self.clock.now();
        let mut registry = self.registry()?;
        let mut dispatcher = self.dispatcher()?;

        log::debug!(
            "Evaluating fix in cell {} against {} geofence(s)",
            position.geohash(6),
            registry.len()
        );
        let events = dispatcher.process(&mut registry, &position, now);
        drop(registry);

        dispatcher.dispatch(&events);
        Ok(events)
    }

    /// Fires dwell timers due at the clock's current time.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned.
    pub fn poll_timers(&self) -> Result<Vec<TransitionEvent>> {
        let now = self.clock.now();
        let mut registry = self.registry()?;
        let mut dispatcher = self.dispatcher()?;

        let events = dispatcher.fire_due_dwells(&mut registry, now);
        drop(registry);

        dispatcher.dispatch(&events);
        Ok(events)
    }

    /// How long until the next dwell deadline, measured on the monitor's
    /// clock. `None` when no timer is running.
    fn until_next_dwell(&self) -> Option<Duration> {
        let deadline = match self.next_dwell_deadline() {
            Ok(deadline) => deadline?,
            Err(e) => {
                log::warn!("Cannot read dwell deadlines: {e}");
                return None;
            }
        };
        Some(
            (deadline - self.clock.now())
                .to_std()
                .unwrap_or(Duration::ZERO),
        )
    }

    /// Samples every `sampling_interval` until `shutdown` becomes `true` or
    /// its sender is dropped.
    ///
    /// Between samples the loop also wakes at the earliest pending dwell
    /// deadline, so DWELL is delivered when its timer elapses rather than at
    /// the next sampling tick. Each cycle is independent: a failing cycle is
    /// logged and the loop continues.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.settings.sampling_interval().max(Duration::from_millis(1));
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        log::info!("Sampling loop started ({}ms interval)", period.as_millis());
        loop {
            let next_dwell = self.until_next_dwell();
            let dwell_timer = async move {
                match next_dwell {
                    Some(wait) => tokio::time::sleep(wait).await,
                    None => futures::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = interval.tick() => {
                    if let Err(e) = self.sample().await {
                        log::warn!("Sampling cycle failed: {e}");
                    }
                }
                () = dwell_timer => {
                    if let Err(e) = self.poll_timers() {
                        log::warn!("Dwell timer poll failed: {e}");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        log::info!("Sampling loop stopped");
    }
}
