//! In-process publish/subscribe keyed by event kind.
//!
//! Listeners run synchronously, in registration order, on the thread that calls
//! [`EventEmitter::emit`]. The registry lock is released before any listener
//! runs, so a listener may freely register, remove, or emit from inside its
//! own invocation.
//!
//! Events that expose a [`duplicate_key`](Event::duplicate_key) are subject to
//! short-horizon suppression: a repeat of the same key inside the configured
//! window is dropped without reaching any listener.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! use resilient_socket::emitter::{EventEmitter, Listener};
//! use resilient_socket::ws::{EventKind, SocketEvent};
//!
//! let emitter = EventEmitter::<SocketEvent>::default();
//! let opened = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&opened);
//! let listener: Listener<SocketEvent> = Arc::new(move |_: &SocketEvent| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//! emitter.once(EventKind::Open, listener);
//!
//! emitter.emit(&SocketEvent::Open);
//! emitter.emit(&SocketEvent::Open);
//! assert_eq!(opened.load(Ordering::SeqCst), 1);
//! ```

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(3);
const DEFAULT_DUPLICATE_CAPACITY: usize = 10;

/// An event that can be routed through an [`EventEmitter`].
pub trait Event: Send + Sync + 'static {
    /// Fieldless discriminant listeners subscribe to.
    type Kind: Copy + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;

    /// Key under which repeated emissions are suppressed. `None` never suppresses.
    fn duplicate_key(&self) -> Option<String> {
        None
    }
}

/// A registered callback. Identity (for [`EventEmitter::off`]) is the `Arc` pointer.
pub type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registration<E> {
    listener: Listener<E>,
    once: bool,
}

/// Insertion-ordered `key -> last emitted` map with a fixed capacity.
///
/// Overwriting a key keeps its original position; eviction always drops the
/// oldest-inserted entry.
#[derive(Debug)]
struct RecentKeys {
    entries: VecDeque<(String, Instant)>,
    capacity: usize,
}

impl RecentKeys {
    fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.saturating_add(1)),
            capacity,
        }
    }

    /// Returns `false` when `key` was admitted less than `window` ago. A suppressed
    /// key keeps its original timestamp.
    fn admit(&mut self, key: String, now: Instant, window: Duration) -> bool {
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            if now.saturating_duration_since(entry.1) < window {
                return false;
            }
            entry.1 = now;
            return true;
        }

        self.entries.push_back((key, now));
        if self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
        true
    }

    fn clear(&mut self) {
        self.entries.clear();
    }
}

struct Registry<E: Event> {
    listeners: HashMap<E::Kind, Vec<Registration<E>>>,
    recent: RecentKeys,
}

/// Synchronous publish/subscribe registry with duplicate suppression.
pub struct EventEmitter<E: Event> {
    registry: Mutex<Registry<E>>,
    window: Duration,
}

impl<E: Event> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new(DEFAULT_DUPLICATE_WINDOW, DEFAULT_DUPLICATE_CAPACITY)
    }
}

impl<E: Event> fmt::Debug for EventEmitter<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = self.lock();
        let counts: HashMap<_, _> = registry
            .listeners
            .iter()
            .map(|(kind, regs)| (*kind, regs.len()))
            .collect();
        f.debug_struct("EventEmitter")
            .field("listeners", &counts)
            .field("recent", &registry.recent)
            .field("window", &self.window)
            .finish()
    }
}

impl<E: Event> EventEmitter<E> {
    /// Create an emitter that suppresses repeats within `window`, remembering at
    /// most `capacity` keys.
    #[must_use]
    pub fn new(window: Duration, capacity: usize) -> Self {
        Self {
            registry: Mutex::new(Registry {
                listeners: HashMap::new(),
                recent: RecentKeys::new(capacity),
            }),
            window,
        }
    }

    // The registry holds no invariant a panicking listener could break (listeners
    // never run under the lock), so a poisoned lock is safe to recover.
    fn lock(&self) -> MutexGuard<'_, Registry<E>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, kind: E::Kind, listener: Listener<E>, once: bool) {
        self.lock()
            .listeners
            .entry(kind)
            .or_default()
            .push(Registration { listener, once });
    }

    /// Invoke `listener` on every future event of `kind`. Registering the same
    /// listener twice makes it run twice.
    pub fn on(&self, kind: E::Kind, listener: Listener<E>) {
        self.register(kind, listener, false);
    }

    /// Invoke `listener` on the next event of `kind` only.
    pub fn once(&self, kind: E::Kind, listener: Listener<E>) {
        self.register(kind, listener, true);
    }

    /// Remove every registration of `listener` for `kind`, including ones made
    /// with [`once`](Self::once). Unknown kinds or listeners are ignored.
    pub fn off(&self, kind: E::Kind, listener: &Listener<E>) {
        let mut registry = self.lock();
        if let Some(regs) = registry.listeners.get_mut(&kind) {
            regs.retain(|reg| !Arc::ptr_eq(&reg.listener, listener));
            if regs.is_empty() {
                registry.listeners.remove(&kind);
            }
        }
    }

    /// Drop all listeners for `kind`, e.g. when everything watching a channel is
    /// torn down together and the individual `Arc`s are no longer at hand.
    pub fn remove_all(&self, kind: E::Kind) {
        self.lock().listeners.remove(&kind);
    }

    #[must_use]
    pub fn listener_count(&self, kind: E::Kind) -> usize {
        self.lock().listeners.get(&kind).map_or(0, Vec::len)
    }

    /// Forget every remembered duplicate key.
    pub fn clear_duplicates(&self) {
        self.lock().recent.clear();
    }

    /// Deliver `event` to the listeners currently registered for its kind.
    ///
    /// Returns the number of listeners invoked; `0` when the event was suppressed
    /// as a duplicate or nobody is listening. One-shot listeners are removed before
    /// any listener runs, so a re-entrant emit never reaches them twice.
    pub fn emit(&self, event: &E) -> usize {
        let listeners: Vec<Listener<E>> = {
            let mut registry = self.lock();

            if let Some(key) = event.duplicate_key()
                && !registry.recent.admit(key, Instant::now(), self.window)
            {
                #[cfg(feature = "tracing")]
                tracing::trace!(kind = ?event.kind(), "Suppressed duplicate event");
                return 0;
            }

            let Some(regs) = registry.listeners.get_mut(&event.kind()) else {
                return 0;
            };
            let snapshot = regs.iter().map(|reg| Arc::clone(&reg.listener)).collect();
            regs.retain(|reg| !reg.once);
            snapshot
        };

        for listener in &listeners {
            listener(event);
        }

        listeners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Channel {
        Ping,
        Note,
    }

    #[derive(Debug)]
    enum TestEvent {
        Ping(u32),
        Note { kind: &'static str, status: Option<&'static str> },
    }

    impl Event for TestEvent {
        type Kind = Channel;

        fn kind(&self) -> Channel {
            match self {
                Self::Ping(_) => Channel::Ping,
                Self::Note { .. } => Channel::Note,
            }
        }

        fn duplicate_key(&self) -> Option<String> {
            match self {
                Self::Note {
                    kind,
                    status: Some(status),
                } => Some(format!("{kind}_{status}")),
                _ => None,
            }
        }
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &'static str) -> Listener<TestEvent> {
        let log = Arc::clone(log);
        Arc::new(move |event: &TestEvent| {
            log.lock().unwrap().push(format!("{name}:{event:?}"));
        })
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));

        emitter.on(Channel::Ping, recorder(&log, "l1"));
        emitter.on(Channel::Ping, recorder(&log, "l2"));
        emitter.on(Channel::Ping, recorder(&log, "l3"));

        assert_eq!(emitter.emit(&TestEvent::Ping(7)), 3);
        assert_eq!(
            *log.lock().unwrap(),
            ["l1:Ping(7)", "l2:Ping(7)", "l3:Ping(7)"]
        );
    }

    #[test]
    fn repeated_on_registers_twice() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "dup");

        emitter.on(Channel::Ping, Arc::clone(&listener));
        emitter.on(Channel::Ping, Arc::clone(&listener));
        emitter.emit(&TestEvent::Ping(1));

        assert_eq!(log.lock().unwrap().len(), 2);

        emitter.off(Channel::Ping, &listener);
        assert_eq!(emitter.listener_count(Channel::Ping), 0);
    }

    #[test]
    fn once_fires_exactly_once() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.once(Channel::Ping, recorder(&log, "once"));

        for n in 0..5 {
            emitter.emit(&TestEvent::Ping(n));
        }

        assert_eq!(*log.lock().unwrap(), ["once:Ping(0)"]);
        assert_eq!(emitter.listener_count(Channel::Ping), 0);
    }

    #[test]
    fn once_is_not_rerun_by_reentrant_emit() {
        let emitter = Arc::new(EventEmitter::<TestEvent>::default());
        let calls = Arc::new(Mutex::new(0_u32));

        let inner_emitter = Arc::downgrade(&emitter);
        let inner_calls = Arc::clone(&calls);
        emitter.once(
            Channel::Ping,
            Arc::new(move |event: &TestEvent| {
                *inner_calls.lock().unwrap() += 1;
                if let (TestEvent::Ping(n), Some(emitter)) = (event, inner_emitter.upgrade())
                    && *n < 3
                {
                    emitter.emit(&TestEvent::Ping(n + 1));
                }
            }),
        );

        emitter.emit(&TestEvent::Ping(0));
        assert_eq!(*calls.lock().unwrap(), 1);
    }

    #[test]
    fn off_unknown_listener_is_noop() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let registered = recorder(&log, "kept");
        let stranger = recorder(&log, "stranger");

        emitter.off(Channel::Note, &stranger);
        emitter.on(Channel::Ping, Arc::clone(&registered));
        emitter.off(Channel::Ping, &stranger);
        emitter.emit(&TestEvent::Ping(2));

        assert_eq!(*log.lock().unwrap(), ["kept:Ping(2)"]);
    }

    #[test]
    fn off_removes_once_registration() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        let listener = recorder(&log, "once");

        emitter.once(Channel::Ping, Arc::clone(&listener));
        emitter.off(Channel::Ping, &listener);

        assert_eq!(emitter.emit(&TestEvent::Ping(1)), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let emitter = Arc::new(EventEmitter::<TestEvent>::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let slot: Arc<Mutex<Option<Listener<TestEvent>>>> = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&emitter);
        let inner_slot = Arc::clone(&slot);
        let inner_log = Arc::clone(&log);
        let listener: Listener<TestEvent> = Arc::new(move |_: &TestEvent| {
            inner_log.lock().unwrap().push("ran");
            if let (Some(emitter), Some(me)) = (weak.upgrade(), inner_slot.lock().unwrap().take())
            {
                emitter.off(Channel::Ping, &me);
            }
        });
        *slot.lock().unwrap() = Some(Arc::clone(&listener));
        emitter.on(Channel::Ping, listener);

        emitter.emit(&TestEvent::Ping(1));
        emitter.emit(&TestEvent::Ping(2));

        assert_eq!(*log.lock().unwrap(), ["ran"]);
    }

    #[test]
    fn events_without_key_are_never_suppressed() {
        let emitter = EventEmitter::<TestEvent>::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.on(Channel::Note, recorder(&log, "n"));

        let note = TestEvent::Note {
            kind: "A",
            status: None,
        };
        emitter.emit(&note);
        emitter.emit(&note);

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn recent_keys_keep_insertion_order_on_overwrite() {
        let window = Duration::from_secs(3);
        let mut recent = RecentKeys::new(2);
        let start = Instant::now();

        assert!(recent.admit("a".to_owned(), start, window));
        assert!(recent.admit("b".to_owned(), start, window));
        // Refreshing "a" after the window keeps it at the front.
        let later = start + Duration::from_secs(4);
        assert!(recent.admit("a".to_owned(), later, window));
        assert!(recent.admit("c".to_owned(), later, window));

        let keys: Vec<&str> = recent.entries.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["b", "c"]);
    }

    #[test]
    fn suppressed_key_keeps_original_timestamp() {
        let window = Duration::from_secs(3);
        let mut recent = RecentKeys::new(10);
        let start = Instant::now();

        assert!(recent.admit("k".to_owned(), start, window));
        assert!(!recent.admit("k".to_owned(), start + Duration::from_secs(2), window));
        // Measured from the first admission, not the suppressed one.
        assert!(recent.admit("k".to_owned(), start + Duration::from_millis(3100), window));
    }
}
