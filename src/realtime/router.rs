//! Typed in-process pub/sub.
//!
//! Listeners are keyed by an event's kind discriminant. Dispatch snapshots the
//! matching handlers and runs them outside the router lock, so a handler may
//! subscribe or unsubscribe without deadlocking.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// An event that can be routed by kind.
pub trait RoutedEvent: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Shared listener callback.
pub type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// Identifies one registered listener.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, PartialOrd, Ord)]
pub struct ListenerId(u64);

struct Listener<E: RoutedEvent> {
    id: ListenerId,
    kind: E::Kind,
    once: bool,
    handler: Handler<E>,
}

/// Per-channel dispatch table.
pub struct EventRouter<E: RoutedEvent> {
    next_id: AtomicU64,
    listeners: Mutex<Vec<Listener<E>>>,
}

impl<E: RoutedEvent> EventRouter<E> {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            listeners: Mutex::new(Vec::new()),
        }
    }

    /// Registers a persistent listener.
    pub fn on(&self, kind: E::Kind, handler: Handler<E>) -> ListenerId {
        self.insert(kind, false, handler)
    }

    /// Registers a listener removed just before its first invocation.
    pub fn once(&self, kind: E::Kind, handler: Handler<E>) -> ListenerId {
        self.insert(kind, true, handler)
    }

    /// Removes one listener. Returns whether it was registered under `kind`.
    pub fn off(&self, kind: E::Kind, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|listener| !(listener.id == id && listener.kind == kind));
        listeners.len() != before
    }

    /// Removes every listener for `kind` and returns how many were dropped.
    pub fn off_kind(&self, kind: E::Kind) -> usize {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|listener| listener.kind != kind);
        before - listeners.len()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock()
            .iter()
            .filter(|listener| listener.kind == kind)
            .count()
    }

    /// Dispatches `event` to the listeners of its own kind.
    pub fn emit(&self, event: &E) -> usize {
        self.emit_as(event.kind(), event)
    }

    /// Dispatches `event` to the listeners of `kind`, in registration order.
    pub fn emit_as(&self, kind: E::Kind, event: &E) -> usize {
        let handlers: Vec<Handler<E>> = {
            let mut listeners = self.lock();
            let handlers = listeners
                .iter()
                .filter(|listener| listener.kind == kind)
                .map(|listener| Arc::clone(&listener.handler))
                .collect();
            listeners.retain(|listener| !(listener.once && listener.kind == kind));
            handlers
        };

        for handler in &handlers {
            handler(event);
        }
        handlers.len()
    }

    fn insert(&self, kind: E::Kind, once: bool, handler: Handler<E>) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push(Listener {
            id,
            kind,
            once,
            handler,
        });
        id
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Listener<E>>> {
        self.listeners
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E: RoutedEvent> Default for EventRouter<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: RoutedEvent> fmt::Debug for EventRouter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRouter")
            .field("listeners", &self.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::{EventRouter, RoutedEvent};

    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    enum Kind {
        Ping,
        Pong,
    }

    #[derive(Debug)]
    struct Event(Kind, u32);

    impl RoutedEvent for Event {
        type Kind = Kind;

        fn kind(&self) -> Kind {
            self.0
        }
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Fn(&Event) + Send + Sync>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let handler: Arc<dyn Fn(&Event) + Send + Sync> = {
            let calls = Arc::clone(&calls);
            Arc::new(move |_: &Event| {
                calls.fetch_add(1, Ordering::SeqCst);
            })
        };
        (calls, handler)
    }

    #[test]
    fn emits_only_to_matching_kind_in_order() {
        let router = EventRouter::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            router.on(
                Kind::Ping,
                Arc::new(move |event: &Event| seen.lock().expect("seen").push((tag, event.1))),
            );
        }
        let (pongs, pong_handler) = counter();
        router.on(Kind::Pong, pong_handler);

        assert_eq!(router.emit(&Event(Kind::Ping, 7)), 2);
        assert_eq!(
            *seen.lock().expect("seen"),
            vec![("first", 7), ("second", 7)]
        );
        assert_eq!(pongs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn once_listener_runs_a_single_time() {
        let router = EventRouter::new();
        let (calls, handler) = counter();
        router.once(Kind::Ping, handler);

        router.emit(&Event(Kind::Ping, 1));
        router.emit(&Event(Kind::Ping, 2));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(router.listener_count(Kind::Ping), 0);
    }

    #[test]
    fn off_removes_only_the_named_listener() {
        let router = EventRouter::new();
        let (kept, kept_handler) = counter();
        let (dropped, dropped_handler) = counter();
        router.on(Kind::Ping, kept_handler);
        let id = router.on(Kind::Ping, dropped_handler);

        assert!(!router.off(Kind::Pong, id));
        assert!(router.off(Kind::Ping, id));
        router.emit(&Event(Kind::Ping, 0));

        assert_eq!(kept.load(Ordering::SeqCst), 1);
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn off_kind_and_clear_drop_listeners() {
        let router = EventRouter::new();
        let (_, handler) = counter();
        router.on(Kind::Ping, handler.clone());
        router.on(Kind::Ping, handler.clone());
        router.on(Kind::Pong, handler);

        assert_eq!(router.off_kind(Kind::Ping), 2);
        assert_eq!(router.listener_count(Kind::Pong), 1);
        router.clear();
        assert_eq!(router.listener_count(Kind::Pong), 0);
    }

    #[test]
    fn handlers_may_subscribe_during_dispatch() {
        let router = Arc::new(EventRouter::new());
        let (calls, counting) = counter();
        {
            let inner = Arc::clone(&router);
            router.once(
                Kind::Ping,
                Arc::new(move |_: &Event| {
                    inner.on(Kind::Ping, counting.clone());
                }),
            );
        }

        router.emit(&Event(Kind::Ping, 0));
        router.emit(&Event(Kind::Ping, 0));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn emit_as_targets_a_catch_all_kind() {
        let router = EventRouter::new();
        let (calls, handler) = counter();
        router.on(Kind::Pong, handler);

        assert_eq!(router.emit_as(Kind::Pong, &Event(Kind::Ping, 3)), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
