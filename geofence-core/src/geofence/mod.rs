//! Geofence registration, containment and transitions.
//!
//! # Architecture
//!
//! ```text
//! GeofenceRegistry (definitions + per-geofence state, registration order)
//!     │
//!     ▼
//! evaluate() (position × geofence → Inside / Outside / Unknown)
//!     │
//!     ▼
//! TransitionDispatcher (state machine, dwell deadlines, subscribers)
//!
//! GeofenceStorage (SQLite copy of the definitions, optional)
//! ```
//!
//! # Types
//!
//! - [`Geofence`]: a circular region with transition rules
//! - [`GeofenceState`]: runtime status and pending dwell deadline
//! - [`TransitionEvent`]: an ENTER, EXIT or DWELL delivered to subscribers

mod dispatcher;
mod error;
mod evaluator;
mod registry;
mod storage;
pub mod types;

pub use dispatcher::{
    MonitorEvent, SamplingWarning, SubscriberStatus, TransitionDispatcher, TransitionSubscriber,
};
pub use error::{GeofenceError, Result};
pub use evaluator::evaluate;
pub use registry::{GeofenceRegistry, DEFAULT_MAX_GEOFENCES};
pub use storage::GeofenceStorage;
pub use types::{
    Containment, Expiration, Geofence, GeofenceState, GeofenceStatus, Transition,
    TransitionEvent, TransitionMask, MIN_RADIUS_METERS,
};
