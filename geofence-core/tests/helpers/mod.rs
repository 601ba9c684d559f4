//! Reusable helpers for monitor integration tests.
//!
//! Every monitor is built from the `test-utils` fakes: a scripted location
//! source, a switchable permission gate and a manual clock, so dwell
//! timers are driven without waiting on wall-clock time.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use geofence_core::clock::ManualClock;
use geofence_core::geofence::{Geofence, TransitionMask};
use geofence_core::location::{
    destination, MonitorSettings, Position, ScriptedLocationSource, StaticPermissionGate,
};
use geofence_core::GeofenceMonitor;

/// Monitor type used across integration tests.
pub type TestMonitor =
    GeofenceMonitor<Arc<ScriptedLocationSource>, Arc<StaticPermissionGate>, Arc<ManualClock>>;

/// A monitor plus shared handles to its fakes.
pub struct Harness {
    pub monitor: TestMonitor,
    pub source: Arc<ScriptedLocationSource>,
    pub gate: Arc<StaticPermissionGate>,
    pub clock: Arc<ManualClock>,
}

/// Fixed start time for every test clock.
pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 8, 0, 0).unwrap()
}

/// Builds a monitor with foreground permission granted.
pub fn harness(settings: MonitorSettings) -> Harness {
    let source = Arc::new(ScriptedLocationSource::new());
    let gate = Arc::new(StaticPermissionGate::foreground());
    let clock = Arc::new(ManualClock::new(start_time()));
    let monitor = GeofenceMonitor::new(
        Arc::clone(&source),
        Arc::clone(&gate),
        Arc::clone(&clock),
        settings,
    );

    Harness {
        monitor,
        source,
        gate,
        clock,
    }
}

/// A fix `meters` north of `(lat, lon)`, stamped at [`start_time`].
pub fn fix_north_of(lat: f64, lon: f64, meters: f64) -> Position {
    let (plat, plon) = destination(lat, lon, 0.0, meters);
    Position::new(plat, plon).with_timestamp(start_time())
}

/// A fix `meters` north of (0, 0).
pub fn fix(meters: f64) -> Position {
    fix_north_of(0.0, 0.0, meters)
}

/// The reference geofence: (0,0), 100m, all transitions, 1000ms dwell.
pub fn origin_fence(id: &str) -> Geofence {
    Geofence::new(id, 0.0, 0.0, 100.0)
        .with_transitions(TransitionMask::ALL)
        .with_dwell_delay_ms(1_000)
}
