//! crates/personalization_core/src/analytics/mod.rs
//!
//! The process-wide analytics event bus.
//!
//! Events are queued and drained synchronously, in FIFO order, to every listener
//! registered at delivery time. A listener may call `track` again while handling an
//! event; the new event is queued behind everything already pending, so all listeners
//! observe events in emission order.

mod events;

pub use events::EventName;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde_json::{Map, Value};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Instant;
use tracing::{error, warn};

/// Open key/value payload attached to every event.
pub type Payload = Map<String, Value>;

pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&AnalyticsEvent) -> Result<(), ListenerError> + Send + Sync>;

#[derive(Debug, Clone, PartialEq)]
pub struct AnalyticsEvent {
    pub name: EventName,
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
}

static GLOBAL: Lazy<AnalyticsBus> = Lazy::new(AnalyticsBus::new);

/// The bus shared by the whole process. Created on first use and never torn down.
pub fn global() -> AnalyticsBus {
    GLOBAL.clone()
}

//=========================================================================================
// Bus
//=========================================================================================

#[derive(Clone)]
pub struct AnalyticsBus {
    shared: Arc<BusShared>,
}

struct BusShared {
    next_listener_id: AtomicU64,
    listeners: Mutex<Vec<(u64, Listener)>>,
    queue: Mutex<EventQueue>,
    session_started_at: Mutex<Option<Instant>>,
}

#[derive(Default)]
struct EventQueue {
    pending: VecDeque<AnalyticsEvent>,
    draining: bool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking listener never holds one of these locks, so a poisoned
    // guard still protects consistent data.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Default for AnalyticsBus {
    fn default() -> Self {
        Self::new()
    }
}

impl AnalyticsBus {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(BusShared {
                next_listener_id: AtomicU64::new(1),
                listeners: Mutex::new(Vec::new()),
                queue: Mutex::new(EventQueue::default()),
                session_started_at: Mutex::new(None),
            }),
        }
    }

    /// Registers a listener for every subsequently tracked event.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AnalyticsEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.shared.next_listener_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.listeners).push((id, Arc::new(listener)));
        Subscription {
            bus: Arc::downgrade(&self.shared),
            id,
        }
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.shared.listeners).len()
    }

    /// Starts the session-duration clock used to enrich later events.
    pub fn mark_session_start(&self) {
        *lock(&self.shared.session_started_at) = Some(Instant::now());
    }

    /// Clears session-duration bookkeeping. Listeners are kept.
    pub fn reset_session(&self) {
        *lock(&self.shared.session_started_at) = None;
    }

    /// Queues an event and delivers everything pending before returning.
    ///
    /// When called from inside a listener (or while another thread is draining)
    /// the event is only queued; the active drain loop delivers it in order.
    pub fn track(&self, name: EventName, mut payload: Payload) {
        let timestamp = Utc::now();
        payload.insert("timestamp".to_string(), Value::String(timestamp.to_rfc3339()));
        if let Some(started) = *lock(&self.shared.session_started_at) {
            let duration_ms = started.elapsed().as_millis() as u64;
            payload.insert("session_duration_ms".to_string(), Value::from(duration_ms));
        }

        let event = AnalyticsEvent {
            name,
            payload,
            timestamp,
        };

        {
            let mut queue = lock(&self.shared.queue);
            queue.pending.push_back(event);
            if queue.draining {
                return;
            }
            queue.draining = true;
        }

        self.drain();
    }

    fn drain(&self) {
        loop {
            let event = {
                let mut queue = lock(&self.shared.queue);
                match queue.pending.pop_front() {
                    Some(event) => event,
                    None => {
                        queue.draining = false;
                        return;
                    }
                }
            };

            let snapshot: Vec<(u64, Listener)> = lock(&self.shared.listeners).clone();
            for (id, listener) in snapshot {
                match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(listener = id, event = event.name.as_str(), "Analytics listener failed: {}", e);
                    }
                    Err(_) => {
                        error!(listener = id, event = event.name.as_str(), "Analytics listener panicked");
                    }
                }
            }
        }
    }
}

//=========================================================================================
// Subscription Handle
//=========================================================================================

/// Removes its listener when `unsubscribe` is called. Dropping it keeps the listener.
#[derive(Debug, Clone)]
pub struct Subscription {
    bus: Weak<BusShared>,
    id: u64,
}

impl Subscription {
    /// Safe to call repeatedly, and after the bus itself is gone.
    pub fn unsubscribe(&self) {
        if let Some(shared) = self.bus.upgrade() {
            lock(&shared.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn names(log: &Mutex<Vec<(String, EventName)>>) -> Vec<(String, EventName)> {
        log.lock().unwrap().clone()
    }

    fn payload_of(value: Value) -> Payload {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn events_are_enriched_with_timestamp_and_duration() {
        let bus = AnalyticsBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(move |event| {
            sink.lock().unwrap().push(event.clone());
            Ok(())
        });

        bus.track(EventName::CardView, Payload::new());
        bus.mark_session_start();
        bus.track(EventName::CardSwipe, payload_of(json!({ "action": "LIKE" })));
        bus.reset_session();
        bus.track(EventName::Error, Payload::new());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 3);
        assert!(seen[0].payload.contains_key("timestamp"));
        assert!(!seen[0].payload.contains_key("session_duration_ms"));
        assert!(seen[1].payload.contains_key("session_duration_ms"));
        assert_eq!(seen[1].payload["action"], json!("LIKE"));
        assert!(!seen[2].payload.contains_key("session_duration_ms"));
    }

    #[test]
    fn reentrant_track_is_delivered_after_pending_events() {
        let bus = AnalyticsBus::new();
        let log = Arc::new(Mutex::new(Vec::new()));

        let first_log = log.clone();
        let reentrant_bus = bus.clone();
        bus.subscribe(move |event| {
            first_log.lock().unwrap().push(("first".to_string(), event.name));
            if event.name == EventName::CardSwipe {
                reentrant_bus.track(EventName::DeckComplete, Payload::new());
            }
            Ok(())
        });
        let second_log = log.clone();
        bus.subscribe(move |event| {
            second_log.lock().unwrap().push(("second".to_string(), event.name));
            Ok(())
        });

        bus.track(EventName::CardSwipe, Payload::new());

        assert_eq!(
            names(&log),
            vec![
                ("first".to_string(), EventName::CardSwipe),
                ("second".to_string(), EventName::CardSwipe),
                ("first".to_string(), EventName::DeckComplete),
                ("second".to_string(), EventName::DeckComplete),
            ]
        );
    }

    #[test]
    fn failing_listeners_do_not_block_others() {
        let bus = AnalyticsBus::new();
        let delivered = Arc::new(Mutex::new(Vec::new()));

        bus.subscribe(|_| Err("listener broke".into()));
        bus.subscribe(|_| panic!("listener exploded"));
        let sink = delivered.clone();
        bus.subscribe(move |event| {
            sink.lock().unwrap().push(event.name);
            Ok(())
        });

        bus.track(EventName::RevealView, Payload::new());
        bus.track(EventName::ConfirmClick, Payload::new());

        assert_eq!(
            *delivered.lock().unwrap(),
            vec![EventName::RevealView, EventName::ConfirmClick]
        );
    }

    #[test]
    fn unsubscribe_is_idempotent_and_safe_after_drop() {
        let bus = AnalyticsBus::new();
        let subscription = bus.subscribe(|_| Ok(()));
        assert_eq!(bus.listener_count(), 1);

        subscription.unsubscribe();
        subscription.unsubscribe();
        assert_eq!(bus.listener_count(), 0);

        let orphan = {
            let short_lived = AnalyticsBus::new();
            short_lived.subscribe(|_| Ok(()))
        };
        orphan.unsubscribe();
    }

    #[test]
    fn listener_can_unsubscribe_itself_during_delivery() {
        let bus = AnalyticsBus::new();
        let count = Arc::new(Mutex::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let counter = count.clone();
        let own = slot.clone();
        let subscription = bus.subscribe(move |_| {
            *counter.lock().unwrap() += 1;
            if let Some(subscription) = own.lock().unwrap().take() {
                subscription.unsubscribe();
            }
            Ok(())
        });
        *slot.lock().unwrap() = Some(subscription);

        let other = Arc::new(Mutex::new(0));
        let other_counter = other.clone();
        bus.subscribe(move |_| {
            *other_counter.lock().unwrap() += 1;
            Ok(())
        });

        bus.track(EventName::CardView, Payload::new());
        bus.track(EventName::CardView, Payload::new());

        assert_eq!(*count.lock().unwrap(), 1);
        assert_eq!(*other.lock().unwrap(), 2);
    }
}
