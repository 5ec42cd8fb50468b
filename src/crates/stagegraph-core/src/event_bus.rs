//! The per-run event bus (§4.A): synchronous fan-out to subscribers in
//! registration order, no buffering, no replay. A panicking subscriber
//! must not affect its peers or the producer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex};

/// Engine or session event kind, per §6's two families. Carried as a plain
/// string rather than an enum so session events (owned by `stagegraph-agent`)
/// and engine events share one bus type without a crate cycle.
pub type EventKind = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    /// The run or session id this event belongs to.
    pub subject_id: String,
    pub payload: HashMap<String, Value>,
}

impl Event {
    pub fn new(kind: impl Into<String>, subject_id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            timestamp: Utc::now(),
            subject_id: subject_id.into(),
            payload: HashMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.payload.insert(key.into(), value);
        self
    }

    /// A transport layer MAY synthesise this event for a late subscriber;
    /// the core does not emit it itself (§4.A, §3 "Supplemented features").
    pub fn initial_state(subject_id: impl Into<String>, payload: HashMap<String, Value>) -> Self {
        Self {
            kind: "INITIAL_STATE".to_string(),
            timestamp: Utc::now(),
            subject_id: subject_id.into(),
            payload,
        }
    }
}

type Subscriber = Arc<dyn Fn(&Event) + Send + Sync>;

/// A registry of subscriber callbacks, keyed by run/session id. Delivery is
/// synchronous, in registration order, against a copy-on-write snapshot so
/// `emit` never holds the lock while calling out.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<(u64, Subscriber)>>>>,
    next_id: Arc<Mutex<u64>>,
}

/// A handle returned by [`EventBus::subscribe`]; calling it unsubscribes.
pub struct Unsubscribe {
    bus: EventBus,
    subject_id: String,
    id: u64,
}

impl Unsubscribe {
    pub fn call(self) {
        let mut subs = self.bus.subscribers.lock().unwrap();
        if let Some(list) = subs.get_mut(&self.subject_id) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        subject_id: impl Into<String>,
        callback: impl Fn(&Event) + Send + Sync + 'static,
    ) -> Unsubscribe {
        let subject_id = subject_id.into();
        let id = {
            let mut next = self.next_id.lock().unwrap();
            let id = *next;
            *next += 1;
            id
        };
        self.subscribers
            .lock()
            .unwrap()
            .entry(subject_id.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Unsubscribe {
            bus: self.clone(),
            subject_id,
            id,
        }
    }

    /// Deliver `event` to every current subscriber of `event.subject_id`,
    /// in registration order. A subscriber that panics is caught so it
    /// cannot prevent delivery to later subscribers or unwind into the
    /// producer.
    pub fn emit(&self, event: Event) {
        let snapshot: Vec<Subscriber> = {
            let subs = self.subscribers.lock().unwrap();
            subs.get(&event.subject_id)
                .map(|list| list.iter().map(|(_, cb)| cb.clone()).collect())
                .unwrap_or_default()
        };
        for callback in snapshot {
            let event_ref = AssertUnwindSafe(&event);
            if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback(*event_ref))) {
                tracing::error!(?panic, kind = %event.kind, "event subscriber panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn delivers_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        bus.subscribe("run1", move |_| o1.lock().unwrap().push(1));
        bus.subscribe("run1", move |_| o2.lock().unwrap().push(2));
        bus.emit(Event::new("NODE_START", "run1"));
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        let unsub = bus.subscribe("run1", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new("X", "run1"));
        unsub.call();
        bus.emit(Event::new("X", "run1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_peers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe("run1", |_| panic!("boom"));
        bus.subscribe("run1", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new("X", "run1"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_for_other_subjects_are_isolated() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        bus.subscribe("run1", move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        bus.emit(Event::new("X", "run2"));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
