//! Geofence Core Library
//!
//! Geofence lifecycle management: register circular regions, sample the
//! device position behind a permission gate, and turn boundary crossings
//! into ENTER, EXIT and DWELL events for subscribers and notifications.

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![deny(unsafe_code)]

pub mod clock;
pub mod geofence;
pub mod location;
mod monitor;
pub mod notify;

pub use clock::{Clock, SystemClock};
pub use monitor::{GeofenceMonitor, SampleOutcome};
