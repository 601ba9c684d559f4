//! API bridging layer that exposes geofence-core functionality.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::DateTime;
use flutter_rust_bridge::frb;
use futures::future::{self, BoxFuture};
use futures::FutureExt;
use geofence_core::geofence::{
    Expiration, Geofence, GeofenceStorage, TransitionEvent, TransitionMask,
};
use geofence_core::location::{
    AccessLevel, LocationError, LocationSource, MonitorSettings, PermissionGate, Position,
};
use geofence_core::notify::{Notification, NotificationSink, NotificationSubscriber, NotifyError};
use geofence_core::{GeofenceMonitor, SampleOutcome, SystemClock};

type Monitor = GeofenceMonitor<Arc<HostLocationSource>, Arc<HostPermissionGate>, SystemClock>;

/// Serves the most recent fix reported by the host.
#[derive(Debug, Default)]
struct HostLocationSource {
    last: Mutex<Option<Position>>,
}

impl HostLocationSource {
    fn report(&self, position: Position) {
        if let Ok(mut last) = self.last.lock() {
            *last = Some(position);
        }
    }
}

impl LocationSource for HostLocationSource {
    fn current_position(&self) -> BoxFuture<'_, Result<Position, LocationError>> {
        let fix = self
            .last
            .lock()
            .ok()
            .and_then(|last| *last)
            .ok_or_else(|| LocationError::Unavailable("no last known location".to_string()));
        future::ready(fix).boxed()
    }
}

/// Permission grants as last reported by the host.
#[derive(Debug, Default)]
struct HostPermissionGate {
    foreground: AtomicBool,
    background: AtomicBool,
}

impl PermissionGate for HostPermissionGate {
    fn has_access(&self, level: AccessLevel) -> bool {
        match level {
            AccessLevel::Foreground => self.foreground.load(Ordering::SeqCst),
            AccessLevel::Background => self.background.load(Ordering::SeqCst),
        }
    }
}

/// Queues notifications until the host drains them.
#[derive(Debug, Default, Clone)]
struct QueuedSink {
    queue: Arc<Mutex<Vec<Notification>>>,
}

impl QueuedSink {
    fn drain(&self) -> Vec<Notification> {
        self.queue
            .lock()
            .map(|mut queue| std::mem::take(&mut *queue))
            .unwrap_or_default()
    }
}

impl NotificationSink for QueuedSink {
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.queue
            .lock()
            .map_err(|e| NotifyError::Delivery(e.to_string()))?
            .push(notification.clone());
        Ok(())
    }
}

/// Geofence monitoring handle for the Flutter host.
#[frb(opaque)]
pub struct GeofenceApp {
    monitor: Monitor,
    source: Arc<HostLocationSource>,
    gate: Arc<HostPermissionGate>,
    notifications: QueuedSink,
    runtime: tokio::runtime::Runtime,
}

impl std::fmt::Debug for GeofenceApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeofenceApp")
            .field("monitor", &self.monitor)
            .finish_non_exhaustive()
    }
}

impl GeofenceApp {
    /// Creates an in-memory monitor.
    ///
    /// `settings_json` is a partial settings object; missing fields take
    /// their defaults. `None` uses the defaults throughout.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the settings cannot be parsed.
    pub fn new(settings_json: Option<String>) -> Result<Self, String> {
        let settings = parse_settings(settings_json.as_deref())?;
        let source = Arc::new(HostLocationSource::default());
        let gate = Arc::new(HostPermissionGate::default());
        let monitor = GeofenceMonitor::new(
            Arc::clone(&source),
            Arc::clone(&gate),
            SystemClock,
            settings,
        );
        Self::assemble(monitor, source, gate)
    }

    /// Creates a monitor whose geofences persist in the database at
    /// `db_path` and are restored on startup.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the settings cannot be parsed or the database
    /// cannot be opened.
    pub fn with_database(db_path: String, settings_json: Option<String>) -> Result<Self, String> {
        let settings = parse_settings(settings_json.as_deref())?;
        let storage =
            GeofenceStorage::new(std::path::Path::new(&db_path)).map_err(|e| e.to_string())?;
        let source = Arc::new(HostLocationSource::default());
        let gate = Arc::new(HostPermissionGate::default());
        let monitor = GeofenceMonitor::with_storage(
            Arc::clone(&source),
            Arc::clone(&gate),
            SystemClock,
            settings,
            storage,
        )
        .map_err(|e| e.to_string())?;
        Self::assemble(monitor, source, gate)
    }

    fn assemble(
        monitor: Monitor,
        source: Arc<HostLocationSource>,
        gate: Arc<HostPermissionGate>,
    ) -> Result<Self, String> {
        let notifications = QueuedSink::default();
        if monitor.settings().notifications_enabled {
            monitor
                .add_subscriber(Box::new(NotificationSubscriber::new(notifications.clone())))
                .map_err(|e| e.to_string())?;
        }

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| format!("Failed to start runtime: {e}"))?;

        Ok(Self {
            monitor,
            source,
            gate,
            notifications,
            runtime,
        })
    }

    /// Current settings as JSON.
    ///
    /// # Errors
    ///
    /// Returns `Err` if serialization fails.
    #[frb(sync)]
    pub fn settings_json(&self) -> Result<String, String> {
        self.monitor.settings().to_json().map_err(|e| e.to_string())
    }

    // ==================== Registration ====================

    /// Registers a geofence.
    ///
    /// `transitions` and `initial_trigger` are bitmasks: 1 = enter,
    /// 2 = exit, 4 = dwell. `expires_at_ms` of `None` never expires.
    ///
    /// # Errors
    ///
    /// Returns `Err` for a duplicate id, invalid parameters, a full
    /// registry, or a storage failure.
    #[frb(sync)]
    #[allow(clippy::too_many_arguments)]
    pub fn register_geofence(
        &self,
        id: String,
        latitude: f64,
        longitude: f64,
        radius_meters: f64,
        transitions: u8,
        dwell_delay_ms: u64,
        expires_at_ms: Option<i64>,
        initial_trigger: Option<u8>,
    ) -> Result<(), String> {
        let transitions = mask_from_bits(transitions)?;
        let expiration = match expires_at_ms {
            None => Expiration::Never,
            Some(ms) => Expiration::from_millis(Some(ms))
                .ok_or_else(|| format!("Invalid expiration timestamp: {ms}"))?,
        };

        let mut geofence = Geofence::new(id, latitude, longitude, radius_meters)
            .with_transitions(transitions)
            .with_dwell_delay_ms(dwell_delay_ms)
            .with_expiration(expiration);
        if let Some(bits) = initial_trigger {
            geofence = geofence.with_initial_trigger(mask_from_bits(bits)?);
        }

        self.monitor.register(geofence).map_err(|e| e.to_string())
    }

    /// Removes a geofence and cancels its pending dwell timer.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the id is not registered or storage fails.
    #[frb(sync)]
    pub fn remove_geofence(&self, id: String) -> Result<(), String> {
        self.monitor
            .remove(&id)
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    /// Removes every geofence and cancels all pending dwell timers.
    /// Returns the removed ids.
    ///
    /// # Errors
    ///
    /// Returns `Err` if storage fails, in which case nothing is removed.
    #[frb(sync)]
    pub fn remove_all_geofences(&self) -> Result<Vec<String>, String> {
        self.monitor
            .remove_all()
            .map(|removed| removed.into_iter().map(|g| g.id).collect())
            .map_err(|e| e.to_string())
    }

    /// Removes expired geofences and returns their ids.
    ///
    /// # Errors
    ///
    /// Returns `Err` if storage fails.
    #[frb(sync)]
    pub fn remove_expired(&self) -> Result<Vec<String>, String> {
        self.monitor
            .remove_expired()
            .map(|removed| removed.into_iter().map(|g| g.id).collect())
            .map_err(|e| e.to_string())
    }

    /// Registered geofences, in registration order.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the monitor is unusable.
    #[frb(sync)]
    pub fn list_geofences(&self) -> Result<Vec<GeofenceDto>, String> {
        self.monitor
            .list()
            .map(|list| list.iter().map(GeofenceDto::from).collect())
            .map_err(|e| e.to_string())
    }

    // ==================== Host input ====================

    /// Records whether the user granted foreground or background location
    /// access.
    #[frb(sync)]
    pub fn set_permission(&self, background: bool, granted: bool) {
        let flag = if background {
            &self.gate.background
        } else {
            &self.gate.foreground
        };
        flag.store(granted, Ordering::SeqCst);
        log::info!(
            "{} location access {}",
            if background { "background" } else { "foreground" },
            if granted { "granted" } else { "revoked" }
        );
    }

    /// Reports a fresh fix from the platform and runs one sampling cycle.
    ///
    /// `accuracy_meters` is the platform's horizontal accuracy radius;
    /// `None` treats the fix as exact.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the monitor is unusable.
    pub fn report_position(
        &self,
        latitude: f64,
        longitude: f64,
        accuracy_meters: Option<f64>,
    ) -> Result<SampleResult, String> {
        let mut position = Position::new(latitude, longitude);
        if let Some(accuracy) = accuracy_meters {
            position = position.with_accuracy(accuracy);
        }
        self.source.report(position);
        self.sample()
    }

    /// Runs one sampling cycle against the last reported fix.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the monitor is unusable.
    pub fn sample(&self) -> Result<SampleResult, String> {
        let outcome = self
            .runtime
            .block_on(self.monitor.sample())
            .map_err(|e| e.to_string())?;
        Ok(SampleResult::from(outcome))
    }

    /// Fires dwell timers that are due now. Call on a timer between fixes.
    ///
    /// # Errors
    ///
    /// Returns `Err` if the monitor is unusable.
    #[frb(sync)]
    pub fn poll_timers(&self) -> Result<Vec<TransitionEventDto>, String> {
        self.monitor
            .poll_timers()
            .map(|events| events.iter().map(TransitionEventDto::from).collect())
            .map_err(|e| e.to_string())
    }

    /// Takes every notification queued since the last call.
    #[frb(sync)]
    pub fn take_notifications(&self) -> Vec<NotificationDto> {
        self.notifications
            .drain()
            .into_iter()
            .map(|n| NotificationDto {
                id: n.id,
                title: n.title,
                message: n.message,
            })
            .collect()
    }
}

fn parse_settings(json: Option<&str>) -> Result<MonitorSettings, String> {
    json.map_or_else(
        || Ok(MonitorSettings::default()),
        |json| MonitorSettings::from_json(json).map_err(|e| format!("Invalid settings: {e}")),
    )
}

fn mask_from_bits(bits: u8) -> Result<TransitionMask, String> {
    TransitionMask::from_bits(bits).ok_or_else(|| format!("Invalid transition mask: {bits}"))
}

/// A registered geofence (FFI copy).
#[derive(Debug, Clone, PartialEq)]
pub struct GeofenceDto {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub radius_meters: f64,
    /// 1 = enter, 2 = exit, 4 = dwell.
    pub transitions: u8,
    pub dwell_delay_ms: u64,
    /// Unix milliseconds, or `None` for never.
    pub expires_at_ms: Option<i64>,
}

impl From<&Geofence> for GeofenceDto {
    fn from(geofence: &Geofence) -> Self {
        Self {
            id: geofence.id.clone(),
            latitude: geofence.latitude,
            longitude: geofence.longitude,
            radius_meters: geofence.radius_meters,
            transitions: geofence.transitions.bits(),
            dwell_delay_ms: geofence.dwell_delay_ms,
            expires_at_ms: geofence.expiration.as_millis(),
        }
    }
}

/// A transition event (FFI copy).
#[derive(Debug, Clone, PartialEq)]
pub struct TransitionEventDto {
    pub geofence_id: String,
    /// `"enter"`, `"exit"` or `"dwell"`.
    pub transition: String,
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    pub latitude: f64,
    pub longitude: f64,
}

impl From<&TransitionEvent> for TransitionEventDto {
    fn from(event: &TransitionEvent) -> Self {
        Self {
            geofence_id: event.geofence_id.clone(),
            transition: event.transition.as_str().to_string(),
            timestamp_ms: event.timestamp.timestamp_millis(),
            latitude: event.position.latitude,
            longitude: event.position.longitude,
        }
    }
}

/// Outcome of one sampling cycle (FFI copy).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SampleResult {
    pub events: Vec<TransitionEventDto>,
    /// No fix was available; state was held.
    pub no_fix: bool,
    /// Location access is missing; the UI should prompt again.
    pub permission_denied: bool,
}

impl From<SampleOutcome> for SampleResult {
    fn from(outcome: SampleOutcome) -> Self {
        let events = outcome
            .events()
            .iter()
            .map(TransitionEventDto::from)
            .collect();
        Self {
            events,
            no_fix: matches!(outcome, SampleOutcome::NoFix(_)),
            permission_denied: matches!(outcome, SampleOutcome::PermissionDenied),
        }
    }
}

/// A notification waiting to be shown by the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationDto {
    pub id: i32,
    pub title: String,
    pub message: String,
}

/// Unix milliseconds to a display string, for hosts that log raw events.
#[frb(sync)]
#[must_use]
pub fn format_timestamp_ms(timestamp_ms: i64) -> String {
    DateTime::from_timestamp_millis(timestamp_ms)
        .map_or_else(String::new, |at| at.format("%Y-%m-%d %H:%M:%S").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> GeofenceApp {
        let app = GeofenceApp::new(None).unwrap();
        app.set_permission(false, true);
        app.register_geofence("My house".to_string(), 0.0, 0.0, 100.0, 7, 0, None, None)
            .unwrap();
        app
    }

    #[test]
    fn report_position_drives_transitions() {
        let app = app();

        let first = app.report_position(0.01, 0.0, None).unwrap();
        assert!(first.events.is_empty());

        let entered = app.report_position(0.0001, 0.0, Some(5.0)).unwrap();
        let kinds: Vec<&str> = entered.events.iter().map(|e| e.transition.as_str()).collect();
        assert_eq!(kinds, vec!["enter", "dwell"]);
        assert_eq!(entered.events[0].geofence_id, "My house");
    }

    #[test]
    fn sample_without_fix_reports_no_fix() {
        let app = app();
        let result = app.sample().unwrap();
        assert!(result.no_fix);
        assert!(!result.permission_denied);
    }

    #[test]
    fn revoked_permission_is_reported_and_notified() {
        let app = app();
        app.set_permission(false, false);

        let result = app.report_position(0.0, 0.0, None).unwrap();

        assert!(result.permission_denied);
        let notifications = app.take_notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].title, "Location permission needed");
        assert!(app.take_notifications().is_empty());
    }

    #[test]
    fn register_rejects_bad_mask_and_small_radius() {
        let app = app();
        assert!(app
            .register_geofence("x".to_string(), 0.0, 0.0, 100.0, 8, 0, None, None)
            .is_err());
        assert!(app
            .register_geofence("y".to_string(), 0.0, 0.0, 50.0, 1, 0, None, None)
            .is_err());
        assert!(app
            .register_geofence("My house".to_string(), 0.0, 0.0, 100.0, 1, 0, None, None)
            .is_err());
    }

    #[test]
    fn remove_all_stops_pending_dwell() {
        let app = GeofenceApp::new(None).unwrap();
        app.set_permission(false, true);
        app.register_geofence("home".to_string(), 0.0, 0.0, 100.0, 7, 50, None, None)
            .unwrap();
        app.register_geofence("work".to_string(), 1.0, 1.0, 100.0, 3, 0, None, None)
            .unwrap();
        app.report_position(0.01, 0.0, None).unwrap();
        let entered = app.report_position(0.0, 0.0, None).unwrap();
        assert_eq!(entered.events.len(), 1);

        let removed = app.remove_all_geofences().unwrap();

        assert_eq!(removed, vec!["home".to_string(), "work".to_string()]);
        assert!(app.list_geofences().unwrap().is_empty());
        std::thread::sleep(std::time::Duration::from_millis(80));
        assert!(app.poll_timers().unwrap().is_empty());
    }

    #[test]
    fn list_and_remove() {
        let app = app();
        app.register_geofence(
            "work".to_string(),
            -37.722_358,
            145.049_592,
            250.0,
            1,
            0,
            Some(4_102_444_800_000),
            Some(1),
        )
        .unwrap();

        let listed = app.list_geofences().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[1].expires_at_ms, Some(4_102_444_800_000));
        assert_eq!(listed[0].transitions, 7);

        app.remove_geofence("work".to_string()).unwrap();
        assert!(app.remove_geofence("work".to_string()).is_err());
        assert_eq!(app.list_geofences().unwrap().len(), 1);
    }

    #[test]
    fn settings_json_merges_defaults() {
        let app = GeofenceApp::new(Some(r#"{"max_geofences":1}"#.to_string())).unwrap();
        let json = app.settings_json().unwrap();
        let settings = MonitorSettings::from_json(&json).unwrap();
        assert_eq!(settings.max_geofences, 1);
        assert_eq!(settings.position_timeout_ms, 30_000);

        assert!(GeofenceApp::new(Some("not json".to_string())).is_err());
    }

    #[test]
    fn format_timestamp() {
        assert_eq!(format_timestamp_ms(0), "1970-01-01 00:00:00");
    }
}
