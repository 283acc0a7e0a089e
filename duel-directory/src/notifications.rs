//! # Change Notification System
//!
//! Push notifications for directory key changes. Watchers use them as a hint
//! to re-read a key early; polling remains the source of truth.

use crate::DirectorySessionId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Types of changes that can occur to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    Created,
    Updated,
    /// The bound session died and the key was unbound but kept
    Released,
    Deleted,
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeType::Created => write!(f, "CREATED"),
            ChangeType::Updated => write!(f, "UPDATED"),
            ChangeType::Released => write!(f, "RELEASED"),
            ChangeType::Deleted => write!(f, "DELETED"),
        }
    }
}

/// Notification about a change to a directory key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub key: String,
    pub change_type: ChangeType,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    pub session: Option<DirectorySessionId>,
    pub modify_index: u64,
}

/// Unique identifier for a subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// Filter for notifications
#[derive(Debug, Clone)]
pub enum NotificationFilter {
    /// All notifications
    All,
    /// Only notifications for specific key
    Key(String),
    /// Only notifications for keys with specific prefix
    KeyPrefix(String),
}

impl NotificationFilter {
    /// Check if a notification matches this filter
    pub fn matches(&self, notification: &ChangeNotification) -> bool {
        match self {
            NotificationFilter::All => true,
            NotificationFilter::Key(key) => notification.key == *key,
            NotificationFilter::KeyPrefix(prefix) => notification.key.starts_with(prefix),
        }
    }
}

/// Subscription to notifications
pub struct Subscription {
    pub id: SubscriptionId,
    pub filter: NotificationFilter,
    pub receiver: mpsc::UnboundedReceiver<ChangeNotification>,
}

/// Statistics about the notification bus
#[derive(Debug, Clone, Default)]
pub struct NotificationStats {
    pub total_notifications_sent: u64,
    pub total_subscribers: usize,
    pub dropped_notifications: u64,
}

type SubscriberMap =
    HashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<ChangeNotification>)>;

/// Message bus for distributing key change notifications
pub struct NotificationBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    stats: Arc<RwLock<NotificationStats>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Subscribe to notifications with a filter
    pub fn subscribe(&self, filter: NotificationFilter) -> Subscription {
        let id = SubscriptionId::new();
        let (tx, rx) = mpsc::unbounded_channel();

        self.subscribers.write().insert(id, (filter.clone(), tx));

        debug!("New subscription created: {:?} with filter: {:?}", id, filter);

        Subscription {
            id,
            filter,
            receiver: rx,
        }
    }

    pub fn subscribe_key(&self, key: &str) -> Subscription {
        self.subscribe(NotificationFilter::Key(key.to_string()))
    }

    pub fn subscribe_prefix(&self, prefix: &str) -> Subscription {
        self.subscribe(NotificationFilter::KeyPrefix(prefix.to_string()))
    }

    pub fn unsubscribe(&self, subscription_id: SubscriptionId) {
        if self.subscribers.write().remove(&subscription_id).is_some() {
            debug!("Subscription removed: {:?}", subscription_id);
        }
    }

    /// Publish a notification to all matching subscribers
    pub async fn publish(&self, notification: ChangeNotification) {
        self.stats.write().total_notifications_sent += 1;

        let mut dropped_count = 0;
        {
            let subscribers = self.subscribers.read();
            for (filter, sender) in subscribers.values() {
                if filter.matches(&notification) && sender.send(notification.clone()).is_err() {
                    dropped_count += 1;
                }
            }
        }

        if dropped_count > 0 {
            self.stats.write().dropped_notifications += dropped_count;
            self.cleanup_closed_subscribers();
        }

        debug!(
            "Published notification: key={}, type={}",
            notification.key, notification.change_type
        );
    }

    pub fn get_stats(&self) -> NotificationStats {
        let mut stats = self.stats.read().clone();
        stats.total_subscribers = self.subscribers.read().len();
        stats
    }

    /// Clean up closed subscriber channels
    pub fn cleanup_closed_subscribers(&self) {
        let mut subscribers = self.subscribers.write();
        let initial_count = subscribers.len();

        subscribers.retain(|_, (_, sender)| !sender.is_closed());

        let removed = initial_count - subscribers.len();
        if removed > 0 {
            debug!("Cleaned up {} closed subscriber channels", removed);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}
