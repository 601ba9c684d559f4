//! Transition state machine and event delivery.
//!
//! Each registered geofence moves through
//! `UNKNOWN -> {INSIDE, OUTSIDE}`, then toggles between `INSIDE` and
//! `OUTSIDE`, with `DWELLING` reachable only from `INSIDE` once its dwell
//! deadline passes without an intervening exit.
//!
//! ```text
//!            first resolved sample
//! UNKNOWN ───────────────┬──────────────► OUTSIDE
//!                        └──────────────► INSIDE
//! OUTSIDE ──inside──► INSIDE      (ENTER, dwell deadline set)
//! INSIDE  ──deadline─► DWELLING   (DWELL)
//! INSIDE | DWELLING ──outside──► OUTSIDE (EXIT, deadline cleared)
//! ```
//!
//! Dwell timers are absolute deadlines kept in [`GeofenceState`]; they are
//! checked whenever a sample is processed and whenever the owner polls
//! [`TransitionDispatcher::fire_due_dwells`]. Because the deadline lives in
//! the state it is dropped together with the geofence on removal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::evaluator::evaluate;
use super::registry::GeofenceRegistry;
use super::types::{
    Containment, Geofence, GeofenceState, GeofenceStatus, Transition, TransitionEvent,
    TransitionMask,
};
use crate::location::{AccessLevel, Position};

/// Non-transition condition reported to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SamplingWarning {
    /// Sampling was skipped because location access is not granted.
    PermissionDenied {
        /// The access level that was requested.
        level: AccessLevel,
    },
}

/// Anything delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MonitorEvent {
    /// A geofence transition.
    Transition(TransitionEvent),
    /// A per-cycle warning, e.g. so the UI can re-prompt for permission.
    Warning(SamplingWarning),
}

/// Whether a subscriber still wants events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberStatus {
    /// Keep delivering.
    Open,
    /// Drop this subscriber.
    Closed,
}

/// Receiver of monitor events.
///
/// The monitor delivers after evaluation with the registry lock released,
/// so a slow subscriber never stalls registration or removal. It does delay
/// delivery to later subscribers and the next cycle's delivery, so
/// implementations should return quickly and handle their own failures.
pub trait TransitionSubscriber: Send + Sync {
    /// Delivers one event.
    fn deliver(&self, event: &MonitorEvent) -> SubscriberStatus;
}

impl TransitionSubscriber for mpsc::UnboundedSender<MonitorEvent> {
    fn deliver(&self, event: &MonitorEvent) -> SubscriberStatus {
        match self.send(event.clone()) {
            Ok(()) => SubscriberStatus::Open,
            Err(_) => SubscriberStatus::Closed,
        }
    }
}

/// Turns containment samples into discrete transition events.
pub struct TransitionDispatcher {
    subscribers: Vec<Box<dyn TransitionSubscriber>>,
    default_initial_trigger: TransitionMask,
}

impl Default for TransitionDispatcher {
    fn default() -> Self {
        Self::new(TransitionMask::NONE)
    }
}

impl std::fmt::Debug for TransitionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionDispatcher")
            .field("subscribers", &self.subscribers.len())
            .field("default_initial_trigger", &self.default_initial_trigger)
            .finish()
    }
}

impl TransitionDispatcher {
    /// Creates a dispatcher. `default_initial_trigger` applies to geofences
    /// that do not carry their own initial-trigger policy.
    #[must_use]
    pub fn new(default_initial_trigger: TransitionMask) -> Self {
        Self {
            subscribers: Vec::new(),
            default_initial_trigger,
        }
    }

    /// Subscribes a new channel; events arrive in evaluation order.
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<MonitorEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Box::new(tx));
        rx
    }

    /// Adds an arbitrary subscriber.
    pub fn add_subscriber(&mut self, subscriber: Box<dyn TransitionSubscriber>) {
        self.subscribers.push(subscriber);
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Evaluates one sample against every non-expired geofence.
    ///
    /// For each geofence in registration order: a dwell deadline that passed
    /// before this sample fires first, then the sample's containment is
    /// applied, then a deadline that is already due (zero dwell delay) fires.
    /// Events are returned, not delivered; see [`dispatch`](Self::dispatch).
    pub fn process(
        &self,
        registry: &mut GeofenceRegistry,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Vec<TransitionEvent> {
        let mut events = Vec::new();

        for (geofence, state) in registry.entries_mut() {
            if geofence.is_expired(now) {
                continue;
            }

            events.extend(fire_dwell(geofence, state, now));

            let containment = evaluate(position, geofence);
            events.extend(self.apply(geofence, state, containment, position, now));

            events.extend(fire_dwell(geofence, state, now));
        }

        events
    }

    /// Fires every dwell deadline due at `now`, skipping expired geofences.
    pub fn fire_due_dwells(
        &self,
        registry: &mut GeofenceRegistry,
        now: DateTime<Utc>,
    ) -> Vec<TransitionEvent> {
        registry
            .entries_mut()
            .filter(|(geofence, _)| !geofence.is_expired(now))
            .filter_map(|(geofence, state)| fire_dwell(geofence, state, now))
            .collect()
    }

    /// Delivers transition events to all subscribers, in order.
    pub fn dispatch(&mut self, events: &[TransitionEvent]) {
        for event in events {
            self.deliver(&MonitorEvent::Transition(event.clone()));
        }
    }

    /// Delivers a warning to all subscribers.
    pub fn warn(&mut self, warning: SamplingWarning) {
        self.deliver(&MonitorEvent::Warning(warning));
    }

    fn deliver(&mut self, event: &MonitorEvent) {
        let before = self.subscribers.len();
        self.subscribers
            .retain(|subscriber| subscriber.deliver(event) == SubscriberStatus::Open);

        let dropped = before - self.subscribers.len();
        if dropped > 0 {
            log::debug!("Dropped {dropped} closed subscriber(s)");
        }
    }

    fn apply(
        &self,
        geofence: &Geofence,
        state: &mut GeofenceState,
        containment: Containment,
        position: &Position,
        now: DateTime<Utc>,
    ) -> Option<TransitionEvent> {
        let inside = match containment {
            Containment::Unknown => return None,
            Containment::Inside => true,
            Containment::Outside => false,
        };
        state.last_position = Some(*position);

        let mask = geofence.transitions;
        let fired = match (state.status, inside) {
            (GeofenceStatus::Unknown, true) => {
                let trigger = geofence
                    .initial_trigger
                    .unwrap_or(self.default_initial_trigger);
                state.status = GeofenceStatus::Inside;
                state.last_transition_at = Some(now);
                if trigger.contains(Transition::Dwell) && mask.contains(Transition::Dwell) {
                    start_dwell_timer(geofence, state, now);
                }
                (trigger.contains(Transition::Enter)).then_some(Transition::Enter)
            }
            (GeofenceStatus::Unknown, false) => {
                let trigger = geofence
                    .initial_trigger
                    .unwrap_or(self.default_initial_trigger);
                state.status = GeofenceStatus::Outside;
                state.last_transition_at = Some(now);
                (trigger.contains(Transition::Exit)).then_some(Transition::Exit)
            }
            (GeofenceStatus::Outside, true) => {
                state.status = GeofenceStatus::Inside;
                state.last_transition_at = Some(now);
                if mask.contains(Transition::Dwell) {
                    start_dwell_timer(geofence, state, now);
                }
                Some(Transition::Enter)
            }
            (GeofenceStatus::Inside | GeofenceStatus::Dwelling, false) => {
                state.status = GeofenceStatus::Outside;
                state.last_transition_at = Some(now);
                if state.dwell_deadline.take().is_some() {
                    log::debug!("Cancelled dwell timer for {} on exit", geofence.id);
                }
                Some(Transition::Exit)
            }
            (GeofenceStatus::Outside, false)
            | (GeofenceStatus::Inside | GeofenceStatus::Dwelling, true) => None,
        };

        fired
            .filter(|t| mask.contains(*t))
            .map(|transition| event(geofence, transition, now, *position))
    }
}

fn start_dwell_timer(geofence: &Geofence, state: &mut GeofenceState, now: DateTime<Utc>) {
    state.dwell_deadline = now.checked_add_signed(geofence.dwell_delay());
    if state.dwell_deadline.is_none() {
        log::warn!(
            "Dwell delay of {}ms for {} is out of range, dwell disabled",
            geofence.dwell_delay_ms,
            geofence.id
        );
    }
}

fn fire_dwell(
    geofence: &Geofence,
    state: &mut GeofenceState,
    now: DateTime<Utc>,
) -> Option<TransitionEvent> {
    let deadline = state.dwell_deadline?;
    if deadline > now || state.status != GeofenceStatus::Inside {
        return None;
    }

    state.dwell_deadline = None;
    state.status = GeofenceStatus::Dwelling;
    state.last_transition_at = Some(deadline);

    let position = state.last_position?;
    geofence
        .transitions
        .contains(Transition::Dwell)
        .then(|| event(geofence, Transition::Dwell, deadline, position))
}

fn event(
    geofence: &Geofence,
    transition: Transition,
    timestamp: DateTime<Utc>,
    position: Position,
) -> TransitionEvent {
    log::debug!("Geofence {} transition {transition}", geofence.id);
    TransitionEvent {
        geofence_id: geofence.id.clone(),
        transition,
        timestamp,
        position,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::destination;
    use chrono::{Duration, TimeZone};

    fn at_ms(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    fn fix(meters: f64, ms: i64) -> Position {
        let (lat, lon) = destination(0.0, 0.0, 0.0, meters);
        Position::new(lat, lon).with_timestamp(at_ms(ms))
    }

    fn registry_with(fence: Geofence) -> GeofenceRegistry {
        let mut registry = GeofenceRegistry::default();
        registry.register(fence).unwrap();
        registry
    }

    fn all_mask_fence() -> Geofence {
        Geofence::new("home", 0.0, 0.0, 100.0)
            .with_transitions(TransitionMask::ALL)
            .with_dwell_delay_ms(1_000)
    }

    fn kinds(events: &[TransitionEvent]) -> Vec<Transition> {
        events.iter().map(|e| e.transition).collect()
    }

    #[test]
    fn first_sample_initializes_without_event() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        let events = dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));

        assert!(events.is_empty());
        let state = registry.state("home").unwrap();
        assert_eq!(state.status, GeofenceStatus::Outside);
        assert_eq!(state.last_transition_at, Some(at_ms(0)));
    }

    #[test]
    fn first_sample_inside_without_trigger_starts_no_dwell() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        assert!(dispatcher
            .process(&mut registry, &fix(10.0, 0), at_ms(0))
            .is_empty());
        assert!(!registry.state("home").unwrap().dwell_timer_active());
        assert!(dispatcher
            .fire_due_dwells(&mut registry, at_ms(5_000))
            .is_empty());
    }

    #[test]
    fn initial_trigger_exit_reports_outside() {
        let dispatcher = TransitionDispatcher::new(TransitionMask::EXIT);
        let mut registry = registry_with(all_mask_fence());

        let events = dispatcher.process(&mut registry, &fix(500.0, 0), at_ms(0));
        assert_eq!(kinds(&events), vec![Transition::Exit]);
    }

    #[test]
    fn initial_trigger_enter_and_dwell_reports_inside() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(
            all_mask_fence().with_initial_trigger(TransitionMask::ENTER | TransitionMask::DWELL),
        );

        let events = dispatcher.process(&mut registry, &fix(20.0, 0), at_ms(0));
        assert_eq!(kinds(&events), vec![Transition::Enter]);

        let events = dispatcher.fire_due_dwells(&mut registry, at_ms(1_000));
        assert_eq!(kinds(&events), vec![Transition::Dwell]);
    }

    #[test]
    fn initial_trigger_respects_mask() {
        let dispatcher = TransitionDispatcher::new(TransitionMask::EXIT);
        let mut registry = registry_with(
            Geofence::new("home", 0.0, 0.0, 100.0).with_transitions(TransitionMask::ENTER),
        );

        assert!(dispatcher
            .process(&mut registry, &fix(500.0, 0), at_ms(0))
            .is_empty());
    }

    #[test]
    fn full_lifecycle_enter_dwell_exit() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        assert!(dispatcher
            .process(&mut registry, &fix(200.0, 0), at_ms(0))
            .is_empty());

        let events = dispatcher.process(&mut registry, &fix(50.0, 100), at_ms(100));
        assert_eq!(kinds(&events), vec![Transition::Enter]);
        assert!(registry.state("home").unwrap().dwell_timer_active());

        assert!(dispatcher
            .fire_due_dwells(&mut registry, at_ms(1_000))
            .is_empty());

        let events = dispatcher.fire_due_dwells(&mut registry, at_ms(1_200));
        assert_eq!(kinds(&events), vec![Transition::Dwell]);
        assert_eq!(events[0].timestamp, at_ms(1_100));
        assert_eq!(registry.state("home").unwrap().status, GeofenceStatus::Dwelling);

        assert!(dispatcher
            .fire_due_dwells(&mut registry, at_ms(5_000))
            .is_empty());

        let events = dispatcher.process(&mut registry, &fix(200.0, 6_000), at_ms(6_000));
        assert_eq!(kinds(&events), vec![Transition::Exit]);
        assert_eq!(registry.state("home").unwrap().status, GeofenceStatus::Outside);
    }

    #[test]
    fn exit_before_deadline_cancels_dwell() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        dispatcher.process(&mut registry, &fix(50.0, 100), at_ms(100));
        let events = dispatcher.process(&mut registry, &fix(300.0, 500), at_ms(500));

        assert_eq!(kinds(&events), vec![Transition::Exit]);
        assert!(!registry.state("home").unwrap().dwell_timer_active());
        assert!(dispatcher
            .fire_due_dwells(&mut registry, at_ms(10_000))
            .is_empty());
    }

    #[test]
    fn overdue_dwell_fires_before_exit_in_same_sample() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        dispatcher.process(&mut registry, &fix(50.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(300.0, 2_000), at_ms(2_000));

        assert_eq!(kinds(&events), vec![Transition::Dwell, Transition::Exit]);
    }

    #[test]
    fn zero_dwell_delay_fires_with_enter() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence().with_dwell_delay_ms(0));

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(10.0, 10), at_ms(10));

        assert_eq!(kinds(&events), vec![Transition::Enter, Transition::Dwell]);
    }

    #[test]
    fn repeated_samples_never_reemit() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence().with_dwell_delay_ms(60_000));

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let mut all = Vec::new();
        for i in 1..=5 {
            all.extend(dispatcher.process(&mut registry, &fix(40.0, i), at_ms(i)));
        }
        for i in 6..=10 {
            all.extend(dispatcher.process(&mut registry, &fix(400.0, i), at_ms(i)));
        }

        assert_eq!(kinds(&all), vec![Transition::Enter, Transition::Exit]);
    }

    #[test]
    fn unknown_samples_hold_state() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let noisy = fix(95.0, 10).with_accuracy(50.0);
        let events = dispatcher.process(&mut registry, &noisy, at_ms(10));

        assert!(events.is_empty());
        assert_eq!(registry.state("home").unwrap().status, GeofenceStatus::Outside);
    }

    #[test]
    fn unknown_first_sample_stays_unknown() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        dispatcher.process(&mut registry, &fix(100.0, 0).with_accuracy(30.0), at_ms(0));
        let state = registry.state("home").unwrap();
        assert_eq!(state.status, GeofenceStatus::Unknown);
        assert_eq!(state.last_position, None);
    }

    #[test]
    fn mask_filters_events_but_state_still_moves() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(
            Geofence::new("home", 0.0, 0.0, 100.0).with_transitions(TransitionMask::EXIT),
        );

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        assert!(dispatcher
            .process(&mut registry, &fix(10.0, 1), at_ms(1))
            .is_empty());
        assert_eq!(registry.state("home").unwrap().status, GeofenceStatus::Inside);
        assert!(!registry.state("home").unwrap().dwell_timer_active());

        let events = dispatcher.process(&mut registry, &fix(200.0, 2), at_ms(2));
        assert_eq!(kinds(&events), vec![Transition::Exit]);
    }

    #[test]
    fn expired_geofences_are_skipped() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(
            all_mask_fence().with_expiration(crate::geofence::Expiration::At(at_ms(50))),
        );

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(10.0, 100), at_ms(100));

        assert!(events.is_empty());
        assert_eq!(registry.state("home").unwrap().status, GeofenceStatus::Outside);
    }

    #[test]
    fn expired_geofence_dwell_never_fires() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(
            all_mask_fence().with_expiration(crate::geofence::Expiration::At(at_ms(500))),
        );

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        dispatcher.process(&mut registry, &fix(10.0, 100), at_ms(100));
        assert!(dispatcher
            .fire_due_dwells(&mut registry, at_ms(2_000))
            .is_empty());
    }

    #[test]
    fn events_follow_registration_order() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = GeofenceRegistry::default();
        registry
            .register(Geofence::new("second", 0.0, 0.0, 150.0))
            .unwrap();
        registry
            .register(Geofence::new("first", 0.0, 0.0, 100.0))
            .unwrap();

        dispatcher.process(&mut registry, &fix(500.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(10.0, 1), at_ms(1));

        let ids: Vec<_> = events.iter().map(|e| e.geofence_id.as_str()).collect();
        assert_eq!(ids, vec!["second", "first"]);
    }

    #[test]
    fn dwell_event_carries_inside_position() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence());

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let inside = fix(30.0, 10);
        dispatcher.process(&mut registry, &inside, at_ms(10));

        let events = dispatcher.fire_due_dwells(&mut registry, at_ms(2_000));
        assert_eq!(events[0].position, inside);
    }

    #[test]
    fn huge_dwell_delay_disables_dwell() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence().with_dwell_delay_ms(u64::MAX));

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(10.0, 1), at_ms(1));

        assert_eq!(kinds(&events), vec![Transition::Enter]);
        assert!(!registry.state("home").unwrap().dwell_timer_active());
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let mut dispatcher = TransitionDispatcher::default();
        let mut rx = dispatcher.subscribe();
        let mut registry = registry_with(all_mask_fence().with_dwell_delay_ms(0));

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        let events = dispatcher.process(&mut registry, &fix(10.0, 1), at_ms(1));
        dispatcher.dispatch(&events);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert!(matches!(first, MonitorEvent::Transition(e) if e.transition == Transition::Enter));
        assert!(matches!(second, MonitorEvent::Transition(e) if e.transition == Transition::Dwell));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn closed_subscribers_are_pruned() {
        let mut dispatcher = TransitionDispatcher::default();
        let rx = dispatcher.subscribe();
        let _kept = dispatcher.subscribe();
        assert_eq!(dispatcher.subscriber_count(), 2);

        drop(rx);
        dispatcher.warn(SamplingWarning::PermissionDenied {
            level: AccessLevel::Foreground,
        });

        assert_eq!(dispatcher.subscriber_count(), 1);
    }

    #[test]
    fn warning_is_delivered() {
        let mut dispatcher = TransitionDispatcher::default();
        let mut rx = dispatcher.subscribe();

        dispatcher.warn(SamplingWarning::PermissionDenied {
            level: AccessLevel::Background,
        });

        assert_eq!(
            rx.try_recv().unwrap(),
            MonitorEvent::Warning(SamplingWarning::PermissionDenied {
                level: AccessLevel::Background
            })
        );
    }

    #[test]
    fn dwell_deadline_uses_delay() {
        let dispatcher = TransitionDispatcher::default();
        let mut registry = registry_with(all_mask_fence().with_dwell_delay_ms(2_500));

        dispatcher.process(&mut registry, &fix(200.0, 0), at_ms(0));
        dispatcher.process(&mut registry, &fix(10.0, 0), at_ms(0));

        assert_eq!(
            registry.state("home").unwrap().dwell_deadline,
            Some(at_ms(0) + Duration::milliseconds(2_500))
        );
    }
}
