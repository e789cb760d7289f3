//! Message dispatcher: decodes inbound frames and republishes them.
//!
//! Only the latest message is kept. Consumers that need continuity register
//! a handler (called once per message, inline, in transport order) or hold a
//! broadcast receiver and derive their own state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use huddle_core::{Message, decode_frame};
use tokio::sync::{broadcast, watch};

/// Capacity of the broadcast fan-out. Slow receivers see `Lagged`.
const BROADCAST_CAPACITY: usize = 256;

type Handler = Arc<dyn Fn(&Message) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    handlers: Mutex<Vec<(HandlerId, Handler)>>,
    next_handler: AtomicU64,
    last_tx: watch::Sender<Option<Arc<Message>>>,
    notify_tx: broadcast::Sender<Arc<Message>>,
    dispatched: AtomicU64,
    dropped: AtomicU64,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (last_tx, _) = watch::channel(None);
        let (notify_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(DispatcherInner {
                handlers: Mutex::new(Vec::new()),
                next_handler: AtomicU64::new(1),
                last_tx,
                notify_tx,
                dispatched: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Register a handler invoked for every published message.
    pub fn on_message<F>(&self, handler: F) -> HandlerId
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        let id = HandlerId(self.inner.next_handler.fetch_add(1, Ordering::Relaxed));
        self.handlers().push((id, Arc::new(handler)));
        id
    }

    /// Returns `false` if the handler was not registered.
    pub fn remove_handler(&self, id: HandlerId) -> bool {
        let mut handlers = self.handlers();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Message>> {
        self.inner.notify_tx.subscribe()
    }

    pub fn watch_last(&self) -> watch::Receiver<Option<Arc<Message>>> {
        self.inner.last_tx.subscribe()
    }

    pub fn last_message(&self) -> Option<Arc<Message>> {
        self.inner.last_tx.borrow().clone()
    }

    /// Decode and publish one raw frame. Malformed frames are logged and
    /// dropped; they never propagate.
    pub fn dispatch_frame(&self, raw: &str) -> Option<Arc<Message>> {
        match decode_frame(raw) {
            Ok(message) => Some(self.publish(message)),
            Err(e) => {
                self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error = %e, len = raw.len(), "dispatcher: dropping malformed frame");
                None
            }
        }
    }

    pub fn publish(&self, message: Message) -> Arc<Message> {
        let message = Arc::new(message);
        self.inner.last_tx.send_replace(Some(Arc::clone(&message)));

        // Snapshot so handlers may register or remove handlers themselves.
        let handlers: Vec<Handler> = self.handlers().iter().map(|(_, h)| Arc::clone(h)).collect();
        for handler in handlers {
            handler(&message);
        }

        // No receivers is fine.
        let _ = self.inner.notify_tx.send(Arc::clone(&message));
        self.inner.dispatched.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(kind = message.kind(), "dispatcher: published");
        message
    }

    /// Forget the last message (session teardown).
    pub fn reset(&self) {
        self.inner.last_tx.send_replace(None);
    }

    pub fn dispatched(&self) -> u64 {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    fn handlers(&self) -> std::sync::MutexGuard<'_, Vec<(HandlerId, Handler)>> {
        self.inner.handlers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
