//! Synchronous, topic-keyed publish/subscribe event bus.
//!
//! Producers (sensor services, the teleop loop) call [`EventBus::publish`];
//! every handler registered for that [`Topic`] at publish time is invoked
//! in registration order, on the publisher's thread.
//!
//! # Fault isolation
//!
//! A handler may return `Err` or panic. Either way the fault is caught,
//! counted and logged with `tracing::warn!`, and delivery continues with the
//! next handler. Nothing is propagated back to the publisher.
//!
//! # Concurrency
//!
//! The per-topic handler list is an immutable `Arc<[..]>` replaced wholesale
//! on subscribe/unsubscribe. `publish` clones that `Arc` under a short read
//! lock and runs the handlers outside the lock, so handlers may themselves
//! subscribe, unsubscribe or publish without deadlocking.
//!
//! | Topic | Payload |
//! |---|---|
//! | [`Topic::Sonar`], [`Topic::TofLeft`], [`Topic::TofRight`] | [`Payload::Range`] |
//! | [`Topic::Climate`] | [`Payload::Climate`] |
//! | [`Topic::Light`] | [`Payload::Light`] |
//! | [`Topic::Drive`] | [`Payload::Drive`] |
//! | [`Topic::Safety`] | [`Payload::Safety`] |

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use rover_types::{Payload, RoverError, Topic};
use tracing::warn;

/// Boxed handler invoked for each published payload.
pub type Handler = Arc<dyn Fn(&Payload) -> Result<(), RoverError> + Send + Sync>;

/// Opaque token returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Record of the most recent handler failure.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerFault {
    pub topic: Topic,
    pub subscription: SubscriptionId,
    pub message: String,
}

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    topics: RwLock<HashMap<Topic, Arc<[Subscriber]>>>,
    next_id: AtomicU64,
    fault_count: AtomicU64,
    last_fault: Mutex<Option<HandlerFault>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// EventBus
// ─────────────────────────────────────────────────────────────────────────────

/// Shared event bus. Clone it cheaply; all clones share one registry.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use rover_middleware::EventBus;
/// use rover_types::{Payload, SafetyState, Topic};
///
/// let bus = EventBus::new();
/// let seen = Arc::new(AtomicUsize::new(0));
/// let counter = seen.clone();
/// bus.subscribe(Topic::Safety, move |_| {
///     counter.fetch_add(1, Ordering::SeqCst);
///     Ok(())
/// });
///
/// let delivered = bus.publish(Topic::Safety, &Payload::Safety(SafetyState::default())).unwrap();
/// assert_eq!(delivered, 1);
/// assert_eq!(seen.load(Ordering::SeqCst), 1);
/// ```
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("topics", &self.inner.topics.read().len())
            .field("fault_count", &self.fault_count())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `topic`. Handlers run in registration order.
    pub fn subscribe<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&Payload) -> Result<(), RoverError> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let subscriber = Subscriber {
            id,
            handler: Arc::new(handler),
        };

        let mut topics = self.inner.topics.write();
        let mut list: Vec<Subscriber> = topics
            .get(&topic)
            .map(|current| current.to_vec())
            .unwrap_or_default();
        list.push(subscriber);
        topics.insert(topic, list.into());
        id
    }

    /// Remove the handler registered under `id`. Returns `false` when it was
    /// not registered for `topic`.
    pub fn unsubscribe(&self, topic: Topic, id: SubscriptionId) -> bool {
        let mut topics = self.inner.topics.write();
        let Some(current) = topics.get(&topic) else {
            return false;
        };
        if !current.iter().any(|s| s.id == id) {
            return false;
        }
        let remaining: Vec<Subscriber> = current.iter().filter(|s| s.id != id).cloned().collect();
        if remaining.is_empty() {
            topics.remove(&topic);
        } else {
            topics.insert(topic, remaining.into());
        }
        true
    }

    /// Drop every handler on every topic. Returns how many were removed.
    pub fn unsubscribe_all(&self) -> usize {
        let mut topics = self.inner.topics.write();
        let removed = topics.values().map(|list| list.len()).sum();
        topics.clear();
        removed
    }

    /// Number of handlers currently registered for `topic`.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .read()
            .get(&topic)
            .map_or(0, |list| list.len())
    }

    /// Deliver `payload` to every handler registered for `topic`.
    ///
    /// Returns the number of handlers that completed without a fault.
    /// Publishing to a topic with no handlers is not an error. The only
    /// error is a payload variant the topic does not carry.
    pub fn publish(&self, topic: Topic, payload: &Payload) -> Result<usize, RoverError> {
        if !topic.accepts(payload) {
            return Err(RoverError::TopicMismatch {
                topic,
                payload: payload.kind().to_string(),
            });
        }

        let Some(subscribers) = self.inner.topics.read().get(&topic).cloned() else {
            return Ok(0);
        };

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.handler)(payload)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => self.record_fault(topic, subscriber.id, e.to_string()),
                Err(panic) => self.record_fault(topic, subscriber.id, panic_message(panic.as_ref())),
            }
        }
        Ok(delivered)
    }

    /// Total handler faults observed since the bus was created.
    pub fn fault_count(&self) -> u64 {
        self.inner.fault_count.load(Ordering::Relaxed)
    }

    pub fn last_fault(&self) -> Option<HandlerFault> {
        self.inner.last_fault.lock().clone()
    }

    fn record_fault(&self, topic: Topic, subscription: SubscriptionId, message: String) {
        self.inner.fault_count.fetch_add(1, Ordering::Relaxed);
        warn!(%topic, %subscription, error = %message, "bus handler failed; continuing delivery");
        *self.inner.last_fault.lock() = Some(HandlerFault {
            topic,
            subscription,
            message,
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panic: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panic: {s}")
    } else {
        "panic: <non-string payload>".to_string()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rover_types::{LightSnapshot, RangeSnapshot, SafetyState};
    use std::sync::atomic::AtomicUsize;
    use std::thread;

    fn range(mm: f64) -> Payload {
        Payload::Range(RangeSnapshot {
            distance_mm: Some(mm),
            attached: true,
            timestamp_ms: 0,
            last_error: None,
        })
    }

    fn counter(bus: &EventBus, topic: Topic) -> (SubscriptionId, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = bus.subscribe(topic, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (id, hits)
    }

    #[test]
    fn delivers_in_registration_order() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        for n in 0..3 {
            let order = order.clone();
            bus.subscribe(Topic::Sonar, move |_| {
                order.lock().push(n);
                Ok(())
            });
        }

        assert_eq!(bus.publish(Topic::Sonar, &range(100.0))?, 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_ok() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        assert_eq!(bus.publish(Topic::TofLeft, &range(80.0))?, 0);
        Ok(())
    }

    #[test]
    fn failing_handlers_do_not_block_later_ones() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        bus.subscribe(Topic::Sonar, |_| Err(RoverError::Handler("boom".into())));
        bus.subscribe(Topic::Sonar, |_| panic!("handler exploded"));
        let (_, hits) = counter(&bus, Topic::Sonar);

        let delivered = bus.publish(Topic::Sonar, &range(50.0))?;

        assert_eq!(delivered, 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.fault_count(), 2);
        let last = bus.last_fault().ok_or("no fault recorded")?;
        assert_eq!(last.topic, Topic::Sonar);
        assert!(last.message.contains("handler exploded"));
        Ok(())
    }

    #[test]
    fn unsubscribe_stops_delivery() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        let (id, hits) = counter(&bus, Topic::Sonar);

        bus.publish(Topic::Sonar, &range(10.0))?;
        assert!(bus.unsubscribe(Topic::Sonar, id));
        assert!(!bus.unsubscribe(Topic::Sonar, id));
        bus.publish(Topic::Sonar, &range(10.0))?;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.subscriber_count(Topic::Sonar), 0);
        Ok(())
    }

    #[test]
    fn unsubscribe_wrong_topic_is_noop() {
        let bus = EventBus::new();
        let (id, _) = counter(&bus, Topic::Sonar);
        assert!(!bus.unsubscribe(Topic::Light, id));
        assert_eq!(bus.subscriber_count(Topic::Sonar), 1);
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let bus = EventBus::new();
        let (_, hits) = counter(&bus, Topic::Light);
        let err = bus.publish(Topic::Light, &range(1.0));
        assert!(matches!(err, Err(RoverError::TopicMismatch { topic: Topic::Light, .. })));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn topics_are_isolated() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        let (_, sonar_hits) = counter(&bus, Topic::Sonar);
        let (_, light_hits) = counter(&bus, Topic::Light);

        bus.publish(
            Topic::Light,
            &Payload::Light(LightSnapshot {
                illuminance_lux: Some(300.0),
                attached: true,
                timestamp_ms: 0,
                last_error: None,
            }),
        )?;

        assert_eq!(sonar_hits.load(Ordering::SeqCst), 0);
        assert_eq!(light_hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn handler_may_unsubscribe_itself() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));
        let hits = Arc::new(AtomicUsize::new(0));

        let (bus2, slot2, hits2) = (bus.clone(), slot.clone(), hits.clone());
        let id = bus.subscribe(Topic::Safety, move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = *slot2.lock() {
                bus2.unsubscribe(Topic::Safety, id);
            }
            Ok(())
        });
        *slot.lock() = Some(id);

        let payload = Payload::Safety(SafetyState::default());
        bus.publish(Topic::Safety, &payload)?;
        bus.publish(Topic::Safety, &payload)?;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn unsubscribe_all_clears_every_topic() {
        let bus = EventBus::new();
        counter(&bus, Topic::Sonar);
        counter(&bus, Topic::Sonar);
        counter(&bus, Topic::Drive);
        assert_eq!(bus.unsubscribe_all(), 3);
        assert_eq!(bus.subscriber_count(Topic::Sonar), 0);
        assert_eq!(bus.subscriber_count(Topic::Drive), 0);
    }

    #[test]
    fn concurrent_publish_delivers_exactly_once_per_handler() {
        const PUBLISHERS: usize = 4;
        const PER_PUBLISHER: usize = 250;

        let bus = EventBus::new();
        let (_, stable_hits) = counter(&bus, Topic::Sonar);

        thread::scope(|scope| {
            for _ in 0..PUBLISHERS {
                let bus = bus.clone();
                scope.spawn(move || {
                    for i in 0..PER_PUBLISHER {
                        let _ = bus.publish(Topic::Sonar, &range(i as f64 + 1.0));
                    }
                });
            }
            // Churn other subscriptions on the same topic while publishing.
            let churn = bus.clone();
            scope.spawn(move || {
                for _ in 0..200 {
                    let id = churn.subscribe(Topic::Sonar, |_| Ok(()));
                    churn.unsubscribe(Topic::Sonar, id);
                }
            });
        });

        assert_eq!(stable_hits.load(Ordering::SeqCst), PUBLISHERS * PER_PUBLISHER);
        assert_eq!(bus.subscriber_count(Topic::Sonar), 1);
        assert_eq!(bus.fault_count(), 0);
    }
}
