//! User-visible alerts for geofence events.
//!
//! The host renders notifications; this module only decides what to say.
//! [`NotificationSubscriber`] adapts any [`NotificationSink`] into a
//! [`TransitionSubscriber`] so it can be attached to a monitor next to
//! channel subscribers.
//!
//! Delivery is best effort: a failing sink is logged and otherwise ignored,
//! and it never affects evaluation state.

use thiserror::Error;

use crate::geofence::{
    MonitorEvent, SamplingWarning, SubscriberStatus, Transition, TransitionEvent,
    TransitionSubscriber,
};

/// Errors reported by a [`NotificationSink`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NotifyError {
    /// The platform refused or failed to show the notification.
    #[error("Notification delivery failed: {0}")]
    Delivery(String),
}

/// A rendered alert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Platform notification id. Random, so alerts do not replace each other.
    pub id: i32,
    /// Title line.
    pub title: String,
    /// Body text.
    pub message: String,
}

impl Notification {
    /// Creates a notification with a random id.
    #[must_use]
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            id: rand::random(),
            title: title.into(),
            message: message.into(),
        }
    }

    /// Renders a transition event.
    #[must_use]
    pub fn for_transition(event: &TransitionEvent) -> Self {
        let title = match event.transition {
            Transition::Enter => "Geofence entered",
            Transition::Exit => "Geofence exited",
            Transition::Dwell => "Dwelling in geofence",
        };
        let message = format!(
            "{} at {}",
            event.geofence_id,
            event.timestamp.format("%H:%M:%S")
        );
        Self::new(title, message)
    }

    /// Renders a sampling warning.
    #[must_use]
    pub fn for_warning(warning: &SamplingWarning) -> Self {
        match warning {
            SamplingWarning::PermissionDenied { level } => Self::new(
                "Location permission needed",
                format!(
                    "Grant {} location access to keep geofences working",
                    level.as_str()
                ),
            ),
        }
    }
}

/// Receives rendered alerts. Fire-and-forget.
pub trait NotificationSink: Send + Sync {
    /// Shows a notification.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the platform could not show it; the
    /// caller only logs the failure.
    fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Bridges monitor events to a [`NotificationSink`].
#[derive(Debug)]
pub struct NotificationSubscriber<S> {
    sink: S,
}

impl<S: NotificationSink> NotificationSubscriber<S> {
    /// Wraps a sink.
    #[must_use]
    pub const fn new(sink: S) -> Self {
        Self { sink }
    }

    /// The wrapped sink.
    #[must_use]
    pub const fn sink(&self) -> &S {
        &self.sink
    }
}

impl<S: NotificationSink> TransitionSubscriber for NotificationSubscriber<S> {
    fn deliver(&self, event: &MonitorEvent) -> SubscriberStatus {
        let notification = match event {
            MonitorEvent::Transition(transition) => Notification::for_transition(transition),
            MonitorEvent::Warning(warning) => Notification::for_warning(warning),
        };

        if let Err(e) = self.sink.notify(&notification) {
            log::warn!("Dropping notification '{}': {e}", notification.title);
        }
        SubscriberStatus::Open
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use memory::MemorySink;

#[cfg(any(test, feature = "test-utils"))]
mod memory {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{Notification, NotificationSink, NotifyError};

    /// Sink that records notifications in memory. Clones share storage.
    #[derive(Debug, Clone, Default)]
    pub struct MemorySink {
        shown: Arc<Mutex<Vec<Notification>>>,
        failing: Arc<AtomicBool>,
    }

    impl MemorySink {
        /// Creates an empty sink.
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes every subsequent `notify` fail.
        pub fn fail(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        /// Notifications shown so far.
        #[must_use]
        pub fn shown(&self) -> Vec<Notification> {
            self.shown.lock().map(|v| v.clone()).unwrap_or_default()
        }
    }

    impl NotificationSink for MemorySink {
        fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(NotifyError::Delivery("sink offline".to_string()));
            }
            self.shown
                .lock()
                .map_err(|e| NotifyError::Delivery(e.to_string()))?
                .push(notification.clone());
            Ok(())
        }
    }
}
