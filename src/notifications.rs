//! Persisted, newest-first notification log with an unread flag.
//!
//! One [`NotificationStore`] is constructed per process and shared (behind an
//! `Arc`) with every producer: the rider session and the check-in action both
//! add to it. Every mutation rewrites the whole log under
//! [`NOTIFICATIONS_KEY`](crate::storage::NOTIFICATIONS_KEY).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, error, warn};

use crate::storage::{KeyValueStore, NOTIFICATIONS_KEY};

const DEFAULT_TITLE: &str = "Notification";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub is_read: bool,
    #[serde(rename = "timestamp")]
    pub created_at: DateTime<Utc>,
}

#[derive(Default)]
struct Log {
    items: Vec<Notification>,
    has_unread: bool,
    last_id: i64,
}

impl Log {
    fn recompute_unread(&mut self) {
        self.has_unread = self.items.iter().any(|n| !n.is_read);
    }
}

pub struct NotificationStore {
    log: Mutex<Log>,
    backend: Arc<dyn KeyValueStore>,
}

impl NotificationStore {
    /// Rehydrates the log from `backend`.
    ///
    /// A missing, unreadable or corrupt entry yields an empty log.
    pub fn load(backend: Arc<dyn KeyValueStore>) -> Self {
        let items = match backend.get(NOTIFICATIONS_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Notification>>(&raw) {
                Ok(items) => items,
                Err(e) => {
                    warn!(error = %e, "Discarding corrupt notification log");
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(e) => {
                warn!(error = %e, "Failed to read notification log");
                Vec::new()
            }
        };

        let mut log = Log {
            last_id: items.iter().map(|n| n.id).max().unwrap_or(0),
            items,
            has_unread: false,
        };
        log.recompute_unread();
        debug!(count = log.items.len(), has_unread = log.has_unread, "Notification log loaded");

        Self {
            log: Mutex::new(log),
            backend,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Log> {
        self.log.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn persist(&self, log: &Log) {
        let result = serde_json::to_string(&log.items)
            .map_err(anyhow::Error::from)
            .and_then(|json| self.backend.set(NOTIFICATIONS_KEY, &json));
        if let Err(e) = result {
            error!(error = %e, "Failed to save notifications to storage");
        }
    }

    /// Prepends a new unread notification and returns it.
    pub fn add(&self, title: &str, body: &str) -> Notification {
        let mut log = self.lock();

        let now = Utc::now();
        let id = now.timestamp_millis().max(log.last_id + 1);
        log.last_id = id;

        let notification = Notification {
            id,
            title: if title.is_empty() {
                DEFAULT_TITLE.to_string()
            } else {
                title.to_string()
            },
            body: body.to_string(),
            is_read: false,
            created_at: now,
        };

        log.items.insert(0, notification.clone());
        log.has_unread = true;
        self.persist(&log);

        debug!(id, title = %notification.title, "Notification added");
        notification
    }

    /// Marks every notification read. No-op when nothing is unread.
    pub fn mark_all_read(&self) {
        let mut log = self.lock();
        if !log.has_unread {
            return;
        }
        for n in log.items.iter_mut() {
            n.is_read = true;
        }
        log.has_unread = false;
        self.persist(&log);
    }

    /// Deletes the notification with `id`, if present.
    pub fn remove(&self, id: i64) {
        let mut log = self.lock();
        let Some(pos) = log.items.iter().position(|n| n.id == id) else {
            return;
        };
        let removed = log.items.remove(pos);
        if !removed.is_read {
            log.recompute_unread();
        }
        self.persist(&log);
    }

    /// Newest first.
    pub fn list(&self) -> Vec<Notification> {
        self.lock().items.clone()
    }

    pub fn has_unread(&self) -> bool {
        self.lock().has_unread
    }

    pub fn unread_count(&self) -> usize {
        self.lock().items.iter().filter(|n| !n.is_read).count()
    }
}
