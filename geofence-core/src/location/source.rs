//! Platform-side collaborators: position fixes and location permission.
//!
//! The host platform owns both concerns. The core only needs a position
//! on demand and a yes/no answer about access, so each is a small trait.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;

use super::types::{AccessLevel, Position};

/// Errors a [`LocationSource`] can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    /// The user has not granted the required location access.
    #[error("Location permission denied")]
    PermissionDenied,

    /// No fix could be obtained (no provider, no last known location).
    #[error("Location unavailable: {0}")]
    Unavailable(String),

    /// The source did not answer within the configured bound.
    #[error("Location request timed out after {0}ms")]
    Timeout(u64),
}

/// Supplies whether location access is currently authorized.
pub trait PermissionGate: Send + Sync {
    /// Returns whether the caller holds `level` access.
    fn has_access(&self, level: AccessLevel) -> bool;
}

/// Supplies the current best-known position.
///
/// Implementations may block on platform I/O; the monitor bounds every call
/// with its configured timeout.
pub trait LocationSource: Send + Sync {
    /// Returns the current position.
    ///
    /// # Errors
    ///
    /// Returns [`LocationError::PermissionDenied`] if access was revoked and
    /// [`LocationError::Unavailable`] if no fix exists.
    fn current_position(&self) -> BoxFuture<'_, Result<Position, LocationError>>;
}

impl<T: PermissionGate + ?Sized> PermissionGate for Arc<T> {
    fn has_access(&self, level: AccessLevel) -> bool {
        (**self).has_access(level)
    }
}

impl<T: LocationSource + ?Sized> LocationSource for Arc<T> {
    fn current_position(&self) -> BoxFuture<'_, Result<Position, LocationError>> {
        (**self).current_position()
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use fakes::{ScriptedLocationSource, StaticPermissionGate};

#[cfg(any(test, feature = "test-utils"))]
mod fakes {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use futures::future::BoxFuture;
    use futures::FutureExt;

    use super::{AccessLevel, LocationError, LocationSource, PermissionGate, Position};

    /// Permission gate with switchable foreground and background grants.
    #[derive(Debug, Default)]
    pub struct StaticPermissionGate {
        foreground: AtomicBool,
        background: AtomicBool,
    }

    impl StaticPermissionGate {
        /// Grants foreground access only.
        #[must_use]
        pub fn foreground() -> Self {
            let gate = Self::default();
            gate.set(AccessLevel::Foreground, true);
            gate
        }

        /// Grants both access levels.
        #[must_use]
        pub fn all() -> Self {
            let gate = Self::foreground();
            gate.set(AccessLevel::Background, true);
            gate
        }

        /// Denies everything.
        #[must_use]
        pub fn denied() -> Self {
            Self::default()
        }

        /// Grants or revokes a level.
        pub fn set(&self, level: AccessLevel, granted: bool) {
            match level {
                AccessLevel::Foreground => self.foreground.store(granted, Ordering::SeqCst),
                AccessLevel::Background => self.background.store(granted, Ordering::SeqCst),
            }
        }
    }

    impl PermissionGate for StaticPermissionGate {
        fn has_access(&self, level: AccessLevel) -> bool {
            match level {
                AccessLevel::Foreground => self.foreground.load(Ordering::SeqCst),
                AccessLevel::Background => self.background.load(Ordering::SeqCst),
            }
        }
    }

    /// Location source that replays a queue of results.
    ///
    /// Once the queue is empty every call reports `Unavailable`. A source
    /// built with [`hanging`](Self::hanging) never resolves, for timeout
    /// tests.
    #[derive(Debug, Default)]
    pub struct ScriptedLocationSource {
        script: Mutex<VecDeque<Result<Position, LocationError>>>,
        hang: bool,
    }

    impl ScriptedLocationSource {
        /// Creates an empty source.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Creates a source whose calls never complete.
        #[must_use]
        pub fn hanging() -> Self {
            Self {
                script: Mutex::new(VecDeque::new()),
                hang: true,
            }
        }

        /// Queues a fix.
        pub fn push(&self, position: Position) {
            self.push_result(Ok(position));
        }

        /// Queues an arbitrary result.
        pub fn push_result(&self, result: Result<Position, LocationError>) {
            if let Ok(mut script) = self.script.lock() {
                script.push_back(result);
            }
        }
    }

    impl LocationSource for ScriptedLocationSource {
        fn current_position(&self) -> BoxFuture<'_, Result<Position, LocationError>> {
            if self.hang {
                return futures::future::pending().boxed();
            }
            let next = self
                .script
                .lock()
                .ok()
                .and_then(|mut script| script.pop_front())
                .unwrap_or_else(|| Err(LocationError::Unavailable("no last known location".into())));
            futures::future::ready(next).boxed()
        }
    }
}
