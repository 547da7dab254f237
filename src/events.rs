use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, PoisonError,
};
use tokio::sync::mpsc as tokio_mpsc;

type SubscriptionId = u64;

/// Events that belong to one audiobook
pub trait FilenameEvent: Clone + Send + 'static {
    fn filename(&self) -> &str;
}

struct Subscription<E> {
    /// `None` receives everything
    filename: Option<String>,
    tx: tokio_mpsc::UnboundedSender<E>,
}

/// Fan-out of events to any number of receivers
///
/// Subscriptions are removed as soon as a send fails, i.e. once the receiver was dropped.
pub struct Subscribers<E> {
    subscriptions: Arc<Mutex<HashMap<SubscriptionId, Subscription<E>>>>,
    next_id: Arc<AtomicU64>,
}

impl<E> Clone for Subscribers<E> {
    fn clone(&self) -> Self {
        Self {
            subscriptions: self.subscriptions.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<E: FilenameEvent> Default for Subscribers<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: FilenameEvent> Subscribers<E> {
    pub fn new() -> Self {
        Self {
            subscriptions: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Subscribe to every event
    pub fn subscribe_all(&self) -> tokio_mpsc::UnboundedReceiver<E> {
        self.insert(None)
    }

    /// Subscribe to the events of one filename
    pub fn subscribe_filename(&self, filename: String) -> tokio_mpsc::UnboundedReceiver<E> {
        self.insert(Some(filename))
    }

    fn insert(&self, filename: Option<String>) -> tokio_mpsc::UnboundedReceiver<E> {
        let (tx, rx) = tokio_mpsc::unbounded_channel();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Subscription { filename, tx });
        rx
    }

    /// Dispatch to all matching subscribers
    pub fn publish(&self, event: E) {
        let mut subs = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        subs.retain(|_, subscription| {
            let matches = subscription
                .filename
                .as_deref()
                .map_or(true, |f| f == event.filename());
            // A failed send means the receiver was dropped
            !matches || subscription.tx.send(event.clone()).is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
