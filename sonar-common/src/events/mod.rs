//! Event types for the Sonar event system
//!
//! Provides the [`SoundEvent`] definitions and the [`EventBus`] used by a
//! sound ensemble to notify its consumers (typically a UI layer).

mod playback_types;

pub use playback_types::{Lifecycle, PlaybackState};

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tracing::trace;

/// Events emitted by a sound ensemble
///
/// Serialized adjacently tagged, e.g. `{"type":"volume","payload":0.5}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SoundEvent {
    /// Master volume changed (0.0-1.0)
    Volume(f32),

    /// Playback rate changed (0.5-2.0)
    Rate(f64),

    /// Ensemble state changed
    State(PlaybackState),

    /// Playback (re)started
    Play,

    /// Playback paused
    Pause,

    /// Playback stopped and position reset
    Stop,

    /// The last track reached its end
    End,

    /// The ensemble was destroyed (terminal)
    Destroy,

    /// Playing, but a track that should be audible is not mounted
    Stalled,

    /// Every audible track is mounted again after a stall
    Recovered,

    /// A track finished loading
    Loaded {
        /// Index of the track in construction order
        track: usize,
    },

    /// A track failed to fetch or decode; it will be retried
    LoadFailed {
        /// Index of the track in construction order
        track: usize,
        /// Human readable failure reason
        message: String,
    },
}

impl SoundEvent {
    /// The topic this event is published under
    pub fn topic(&self) -> Topic {
        match self {
            SoundEvent::Volume(_) => Topic::Volume,
            SoundEvent::Rate(_) => Topic::Rate,
            SoundEvent::State(_) => Topic::State,
            SoundEvent::Play => Topic::Play,
            SoundEvent::Pause => Topic::Pause,
            SoundEvent::Stop => Topic::Stop,
            SoundEvent::End => Topic::End,
            SoundEvent::Destroy => Topic::Destroy,
            SoundEvent::Stalled => Topic::Stalled,
            SoundEvent::Recovered => Topic::Recovered,
            SoundEvent::Loaded { .. } => Topic::Loaded,
            SoundEvent::LoadFailed { .. } => Topic::LoadFailed,
        }
    }
}

/// Subscription topics, one per [`SoundEvent`] variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Volume,
    Rate,
    State,
    Play,
    Pause,
    Stop,
    End,
    Destroy,
    Stalled,
    Recovered,
    Loaded,
    LoadFailed,
}

/// Handle returned by every subscription, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Handler = Arc<dyn Fn(&SoundEvent) + Send + Sync>;

struct Listener {
    id: SubscriptionId,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct Registry {
    topics: HashMap<Topic, Vec<Listener>>,
    wildcard: Vec<Listener>,
}

impl Registry {
    /// Collects the handlers to invoke for `topic` (topic listeners first,
    /// then wildcard listeners) and drops `once` listeners that are about
    /// to fire.
    fn take_handlers(&mut self, topic: Topic) -> Vec<Handler> {
        let mut handlers = Vec::new();

        if let Some(listeners) = self.topics.get_mut(&topic) {
            handlers.extend(listeners.iter().map(|l| Arc::clone(&l.handler)));
            listeners.retain(|l| !l.once);
        }

        handlers.extend(self.wildcard.iter().map(|l| Arc::clone(&l.handler)));
        self.wildcard.retain(|l| !l.once);

        handlers
    }

    fn remove(&mut self, id: SubscriptionId) -> bool {
        for listeners in self.topics.values_mut() {
            if let Some(pos) = listeners.iter().position(|l| l.id == id) {
                listeners.remove(pos);
                return true;
            }
        }

        if let Some(pos) = self.wildcard.iter().position(|l| l.id == id) {
            self.wildcard.remove(pos);
            return true;
        }

        false
    }

    fn len(&self) -> usize {
        self.topics.values().map(Vec::len).sum::<usize>() + self.wildcard.len()
    }
}

/// Topic-based event distribution for one sound ensemble
///
/// Two delivery paths:
/// - Callback listeners registered per topic (`on`, `once`) or for every
///   topic (`on_any`). Listeners of a topic run in registration order,
///   wildcard listeners run after them. Handlers are invoked without any
///   internal lock held, so a handler may subscribe, unsubscribe or emit.
/// - A `tokio::broadcast` stream (`subscribe_stream`) for async consumers.
///   Slow stream subscribers never block the emitter.
///
/// # Examples
///
/// ```
/// use sonar_common::events::{EventBus, SoundEvent, Topic};
///
/// let bus = EventBus::new(16);
/// let id = bus.on(Topic::Volume, |event| {
///     if let SoundEvent::Volume(v) = event {
///         println!("volume is now {v}");
///     }
/// });
///
/// bus.emit(SoundEvent::Volume(0.5));
/// assert!(bus.off(id));
/// ```
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: Arc<AtomicU64>,
    tx: broadcast::Sender<SoundEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus; `capacity` bounds the broadcast stream backlog
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            next_id: Arc::new(AtomicU64::new(1)),
            tx,
            capacity,
        }
    }

    fn registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    fn register(&self, topic: Option<Topic>, handler: Handler, once: bool) -> SubscriptionId {
        let id = self.next_id();
        let listener = Listener { id, handler, once };
        let mut registry = self.registry();
        match topic {
            Some(topic) => registry.topics.entry(topic).or_default().push(listener),
            None => registry.wildcard.push(listener),
        }
        id
    }

    /// Registers a handler for one topic
    pub fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.register(Some(topic), Arc::new(handler), false)
    }

    /// Registers a handler that is removed after its first invocation
    pub fn once<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.register(Some(topic), Arc::new(handler), true)
    }

    /// Registers a handler for every topic
    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler), false)
    }

    /// Removes a handler; returns false if the handle was unknown
    pub fn off(&self, id: SubscriptionId) -> bool {
        self.registry().remove(id)
    }

    /// Removes every callback listener
    ///
    /// Stream subscribers are unaffected; they see the channel close when
    /// the last bus clone is dropped.
    pub fn clear(&self) {
        let mut registry = self.registry();
        registry.topics.clear();
        registry.wildcard.clear();
    }

    /// Subscribe to all future events as an async stream
    pub fn subscribe_stream(&self) -> broadcast::Receiver<SoundEvent> {
        self.tx.subscribe()
    }

    /// Emits an event to every listener of its topic, then to wildcard
    /// listeners, then to stream subscribers
    ///
    /// Returns the number of callback listeners invoked.
    pub fn emit(&self, event: SoundEvent) -> usize {
        let handlers = self.registry().take_handlers(event.topic());
        trace!("Emitting {:?} to {} listener(s)", event, handlers.len());

        for handler in &handlers {
            handler(&event);
        }

        // No stream subscribers is fine
        let _ = self.tx.send(event);

        handlers.len()
    }

    /// Number of registered callback listeners
    pub fn listener_count(&self) -> usize {
        self.registry().len()
    }

    /// Number of live stream subscribers
    pub fn stream_subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured broadcast stream capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn recorder() -> (Arc<StdMutex<Vec<String>>>, impl Fn(&str) -> Handler) {
        let log = Arc::new(StdMutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let make = move |name: &str| -> Handler {
            let log = Arc::clone(&log_clone);
            let name = name.to_string();
            Arc::new(move |event: &SoundEvent| {
                log.lock().unwrap().push(format!("{}:{:?}", name, event.topic()));
            })
        };
        (log, make)
    }

    #[test]
    fn test_topic_listeners_run_in_registration_order() {
        let bus = EventBus::new(8);
        let (log, make) = recorder();

        let first = make("first");
        let second = make("second");
        bus.on(Topic::Play, move |e| first(e));
        bus.on(Topic::Play, move |e| second(e));

        assert_eq!(bus.emit(SoundEvent::Play), 2);
        assert_eq!(*log.lock().unwrap(), vec!["first:Play", "second:Play"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_topic() {
        let bus = EventBus::new(8);
        let (log, make) = recorder();

        let pause = make("pause");
        bus.on(Topic::Pause, move |e| pause(e));

        assert_eq!(bus.emit(SoundEvent::Play), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_off_removes_only_that_listener() {
        let bus = EventBus::new(8);
        let (log, make) = recorder();

        let a = make("a");
        let b = make("b");
        let id_a = bus.on(Topic::Stop, move |e| a(e));
        bus.on(Topic::Stop, move |e| b(e));

        assert!(bus.off(id_a));
        assert!(!bus.off(id_a), "second unsubscribe must report unknown handle");

        bus.emit(SoundEvent::Stop);
        assert_eq!(*log.lock().unwrap(), vec!["b:Stop"]);
    }

    #[test]
    fn test_once_listener_fires_once() {
        let bus = EventBus::new(8);
        let (log, make) = recorder();

        let h = make("once");
        bus.once(Topic::End, move |e| h(e));

        bus.emit(SoundEvent::End);
        bus.emit(SoundEvent::End);
        assert_eq!(log.lock().unwrap().len(), 1);
        assert_eq!(bus.listener_count(), 0);
    }

    #[test]
    fn test_wildcard_runs_after_topic_listeners() {
        let bus = EventBus::new(8);
        let (log, make) = recorder();

        let any = make("any");
        let topic = make("topic");
        bus.on_any(move |e| any(e));
        bus.on(Topic::Volume, move |e| topic(e));

        bus.emit(SoundEvent::Volume(0.3));
        assert_eq!(*log.lock().unwrap(), vec!["topic:Volume", "any:Volume"]);
    }

    #[test]
    fn test_handler_may_unsubscribe_during_emit() {
        let bus = EventBus::new(8);
        let bus_clone = bus.clone();
        let id = Arc::new(StdMutex::new(None));
        let id_clone = Arc::clone(&id);

        let sub = bus.on(Topic::Pause, move |_| {
            if let Some(id) = *id_clone.lock().unwrap() {
                bus_clone.off(id);
            }
        });
        *id.lock().unwrap() = Some(sub);

        assert_eq!(bus.emit(SoundEvent::Pause), 1);
        assert_eq!(bus.emit(SoundEvent::Pause), 0);
    }

    #[test]
    fn test_clear_drops_all_listeners() {
        let bus = EventBus::new(8);
        bus.on(Topic::Play, |_| {});
        bus.on_any(|_| {});
        assert_eq!(bus.listener_count(), 2);

        bus.clear();
        assert_eq!(bus.listener_count(), 0);
        assert_eq!(bus.emit(SoundEvent::Play), 0);
    }

    #[tokio::test]
    async fn test_stream_subscriber_receives_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_stream();

        bus.emit(SoundEvent::Rate(1.5));
        bus.emit(SoundEvent::State(PlaybackState::Play));

        assert_eq!(rx.recv().await.unwrap(), SoundEvent::Rate(1.5));
        assert_eq!(rx.recv().await.unwrap(), SoundEvent::State(PlaybackState::Play));
    }

    #[test]
    fn test_event_serialization_is_adjacently_tagged() {
        let json = serde_json::to_string(&SoundEvent::State(PlaybackState::Pause)).unwrap();
        assert_eq!(json, r#"{"type":"state","payload":"pause"}"#);

        let json = serde_json::to_string(&SoundEvent::Stop).unwrap();
        assert_eq!(json, r#"{"type":"stop"}"#);
    }
}
