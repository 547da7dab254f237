use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};

/// A user-facing message about a failed action, shown until dismissed
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: u64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct NotificationList {
    items: Vec<Notification>,
    next_id: u64,
}

/// Dismissible notifications, oldest first
#[derive(Clone, Default)]
pub struct Notifications {
    inner: Arc<Mutex<NotificationList>>,
}

impl Notifications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a notification, returning its id
    pub fn push(&self, message: impl Into<String>) -> u64 {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        list.next_id += 1;
        let id = list.next_id;
        list.items.push(Notification {
            id,
            message: message.into(),
            created_at: Utc::now(),
        });
        id
    }

    /// Remove a notification. Returns false if it was already gone.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut list = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let before = list.items.len();
        list.items.retain(|n| n.id != id);
        list.items.len() != before
    }

    pub fn list(&self) -> Vec<Notification> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clone()
    }

    pub fn clear(&self) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .items
            .clear();
    }
}
