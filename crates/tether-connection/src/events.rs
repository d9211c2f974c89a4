//! Change notification for connection lifecycle events
//!
//! Events are queued while the lifecycle state is locked and delivered after
//! the lock is released. A single dispatcher drains the queue, so every
//! listener observes events in the order they were queued even when a
//! listener triggers further events.

use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, ThreadId};
use uuid::Uuid;

/// Kind of event a listener subscribes to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ConnectionsChanged,
    ActiveConnectionChanging,
    ActiveConnectionChanged,
}

/// Lifecycle event delivered to listeners
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The saved connection list or the connection status changed
    ConnectionsChanged,
    /// A connect attempt started
    ActiveConnectionChanging {
        previous: Option<Uuid>,
        next: Uuid,
        attempt: u64,
    },
    /// The active connection settled, either on a connection or on none
    ActiveConnectionChanged {
        active: Option<Uuid>,
        /// Connector failure message when the attempt failed
        error: Option<String>,
    },
}

impl ConnectionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            ConnectionEvent::ConnectionsChanged => EventKind::ConnectionsChanged,
            ConnectionEvent::ActiveConnectionChanging { .. } => EventKind::ActiveConnectionChanging,
            ConnectionEvent::ActiveConnectionChanged { .. } => EventKind::ActiveConnectionChanged,
        }
    }
}

pub type Listener = Arc<dyn Fn(&ConnectionEvent) + Send + Sync>;

/// Handle returned by [`ChangeNotifier::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    kind: EventKind,
    listener: Listener,
}

#[derive(Default)]
pub struct ChangeNotifier {
    listeners: RwLock<Vec<Registration>>,
    next_id: AtomicU64,
    queue: Mutex<VecDeque<ConnectionEvent>>,
    /// Thread currently draining the queue
    dispatcher: Mutex<Option<ThreadId>>,
    idle: Condvar,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&ConnectionEvent) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(Registration {
            id,
            kind,
            listener: Arc::new(listener),
        });
        id
    }

    /// Returns false when no such listener was registered for `kind`
    pub fn remove_listener(&self, kind: EventKind, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|r| !(r.id == id && r.kind == kind));
        listeners.len() != before
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().iter().filter(|r| r.kind == kind).count()
    }

    /// Queue an event for the next [`flush`](Self::flush)
    pub fn queue(&self, event: ConnectionEvent) {
        self.queue.lock().push_back(event);
    }

    /// Deliver queued events.
    ///
    /// When another thread is dispatching, waits for it to finish and then
    /// drains whatever is left, so the caller's events have been delivered
    /// when this returns. Called from inside a listener it returns at once;
    /// the running dispatch delivers the new events after that listener.
    /// A listener must therefore not block on another thread that flushes.
    pub fn flush(&self) {
        let me = thread::current().id();
        {
            let mut dispatcher = self.dispatcher.lock();
            loop {
                match *dispatcher {
                    None => break,
                    Some(owner) if owner == me => return,
                    Some(_) => self.idle.wait(&mut dispatcher),
                }
            }
            *dispatcher = Some(me);
        }

        loop {
            let next = self.queue.lock().pop_front();
            match next {
                Some(event) => self.dispatch(&event),
                None => break,
            }
        }

        // Anything queued after the last pop is flushed by whoever queued it
        *self.dispatcher.lock() = None;
        self.idle.notify_all();
    }

    /// Queue and deliver an event; see [`flush`](Self::flush)
    pub fn emit(&self, event: ConnectionEvent) {
        self.queue(event);
        self.flush();
    }

    fn dispatch(&self, event: &ConnectionEvent) {
        let kind = event.kind();
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| r.listener.clone())
            .collect();

        tracing::trace!(?kind, listeners = listeners.len(), "dispatching connection event");

        for listener in listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                tracing::error!(?kind, "connection event listener panicked");
            }
        }
    }
}
