//! A small synchronous publish/subscribe bus for client events.
//!
//! Listeners run inline on the emitting call stack. Each `emit` works on a
//! snapshot of the listeners registered for that kind, so a listener may
//! subscribe, unsubscribe, or call back into the client while it runs.

use crate::{
    error::ClientError,
    protocol::{ModelContent, ToolCall, ToolCallCancellation},
};
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tracing::trace;

/// An event published by the client.
#[derive(Debug, Clone)]
pub enum Event {
    /// The channel is open and the setup message has been sent.
    Connected,
    /// Opening the channel (or sending setup) failed, or the reconnect budget ran out.
    ConnectionError(ClientError),
    /// The channel closed. `reconnect_in` is set when a reconnect has been scheduled.
    Disconnected {
        code: u16,
        reason: String,
        reconnect_in: Option<Duration>,
    },
    ToolCall(ToolCall),
    ToolCallCancellation(ToolCallCancellation),
    /// The model's output was interrupted by user activity.
    Interrupted,
    TurnComplete,
    /// Non-audio parts of a model turn.
    Content(ModelContent),
    /// One decoded PCM chunk from the model.
    Audio(Vec<u8>),
}

/// The name of an [`Event`], used to subscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    ConnectionError,
    Disconnected,
    ToolCall,
    ToolCallCancellation,
    Interrupted,
    TurnComplete,
    Content,
    Audio,
}

impl EventKind {
    /// The event's name as it appears in logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ConnectionError => "connection_error",
            Self::Disconnected => "disconnected",
            Self::ToolCall => "tool_call",
            Self::ToolCallCancellation => "tool_call_cancellation",
            Self::Interrupted => "interrupted",
            Self::TurnComplete => "turn_complete",
            Self::Content => "content",
            Self::Audio => "audio",
        }
    }
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::ConnectionError(_) => EventKind::ConnectionError,
            Self::Disconnected { .. } => EventKind::Disconnected,
            Self::ToolCall(_) => EventKind::ToolCall,
            Self::ToolCallCancellation(_) => EventKind::ToolCallCancellation,
            Self::Interrupted => EventKind::Interrupted,
            Self::TurnComplete => EventKind::TurnComplete,
            Self::Content(_) => EventKind::Content,
            Self::Audio(_) => EventKind::Audio,
        }
    }
}

/// A registered event callback.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Identifies one registration on an [`EventBus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
struct Registry {
    listeners: HashMap<EventKind, Vec<(ListenerId, Listener)>>,
}

/// Maps each [`EventKind`] to its listeners, invoked in registration order.
#[derive(Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener` for events of `kind`.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        lock(&self.registry)
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(listener)));
        Subscription {
            id,
            kind,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Removes a registration. Returns `false` if it was already gone.
    pub fn off(&self, kind: EventKind, id: ListenerId) -> bool {
        remove(&self.registry, kind, id)
    }

    /// Delivers `event` to every listener registered for its kind.
    pub fn emit(&self, event: Event) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = lock(&self.registry)
            .listeners
            .get(&kind)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();
        trace!(event = kind.as_str(), listeners = snapshot.len(), "Emitting event");
        for listener in snapshot {
            listener(&event);
        }
    }

    /// Removes every listener.
    pub fn clear(&self) {
        lock(&self.registry).listeners.clear();
    }

    #[cfg(test)]
    fn listener_count(&self, kind: EventKind) -> usize {
        lock(&self.registry)
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventBus::on`]. Call [`Subscription::unsubscribe`] to detach.
///
/// Dropping the handle leaves the listener registered.
#[derive(Debug)]
pub struct Subscription {
    id: ListenerId,
    kind: EventKind,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| remove(&registry, self.kind, self.id))
    }
}

fn remove(registry: &Mutex<Registry>, kind: EventKind, id: ListenerId) -> bool {
    let mut registry = lock(registry);
    let Some(entries) = registry.listeners.get_mut(&kind) else {
        return false;
    };
    let before = entries.len();
    entries.retain(|(existing, _)| *existing != id);
    before != entries.len()
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_listeners_run_in_registration_order() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            bus.on(EventKind::TurnComplete, move |_| seen.lock().unwrap().push(tag));
        }

        bus.emit(Event::TurnComplete);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_emit_only_reaches_matching_kind() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        bus.on(EventKind::Audio, move |event| {
            assert!(matches!(event, Event::Audio(_)));
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::Interrupted);
        bus.emit(Event::Audio(vec![1, 2]));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unsubscribe_detaches_listener() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let subscription = bus.on(EventKind::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Event::Connected);
        assert!(subscription.unsubscribe());
        bus.emit(Event::Connected);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.listener_count(EventKind::Connected), 0);
    }

    #[test]
    fn test_clear_drops_listeners() {
        let bus = EventBus::new();
        let token = Arc::new(());
        let held = Arc::clone(&token);
        bus.on(EventKind::Audio, move |_| {
            let _ = &held;
        });
        assert_eq!(Arc::strong_count(&token), 2);

        bus.clear();
        assert_eq!(Arc::strong_count(&token), 1);
        assert_eq!(bus.listener_count(EventKind::Audio), 0);
    }

    #[test]
    fn test_off_twice_reports_missing() {
        let bus = EventBus::new();
        let id = bus.on(EventKind::Interrupted, |_| {}).id();
        assert!(bus.off(EventKind::Interrupted, id));
        assert!(!bus.off(EventKind::Interrupted, id));
    }

    #[test]
    fn test_listener_may_mutate_registry_during_emit() {
        let bus = Arc::new(EventBus::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let inner_bus = Arc::clone(&bus);
        let inner_hits = Arc::clone(&hits);
        bus.on(EventKind::TurnComplete, move |_| {
            let hits = Arc::clone(&inner_hits);
            inner_bus.on(EventKind::TurnComplete, move |_| {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        });

        // The listener added during the first emit is not part of its snapshot.
        bus.emit(Event::TurnComplete);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        bus.emit(Event::TurnComplete);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_kind_names() {
        assert_eq!(EventKind::ConnectionError.as_str(), "connection_error");
        assert_eq!(EventKind::ToolCallCancellation.as_str(), "tool_call_cancellation");
        assert_eq!(Event::Audio(Vec::new()).kind(), EventKind::Audio);
    }
}
