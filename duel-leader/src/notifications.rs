//! Notification system for leadership changes.

use duel_core::{LeaderAddress, Role};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;

/// Leadership transitions observed by a coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum LeadershipChange {
    /// This replica acquired leadership and published its address
    Acquired {
        role: Role,
        address: LeaderAddress,
        term: u64,
        timestamp: u64,
    },

    /// Leadership was lost involuntarily
    Lost {
        role: Role,
        term: u64,
        reason: String,
        timestamp: u64,
    },

    /// Leadership was given up on shutdown
    Released { role: Role, term: u64, timestamp: u64 },

    /// An acquire attempt did not win the pointer key
    AcquireFailed {
        role: Role,
        reason: String,
        timestamp: u64,
    },
}

impl LeadershipChange {
    pub fn role(&self) -> &Role {
        match self {
            LeadershipChange::Acquired { role, .. }
            | LeadershipChange::Lost { role, .. }
            | LeadershipChange::Released { role, .. }
            | LeadershipChange::AcquireFailed { role, .. } => role,
        }
    }
}

/// Subscription filter for notifications
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationFilter {
    /// Every change of one role, on a bus shared by several coordinators
    Role(Role),

    /// Skip failed acquire attempts, which repeat every backoff
    Transitions,
}

impl NotificationFilter {
    pub fn matches(&self, change: &LeadershipChange) -> bool {
        match self {
            NotificationFilter::Role(role) => change.role() == role,
            NotificationFilter::Transitions => {
                !matches!(change, LeadershipChange::AcquireFailed { .. })
            }
        }
    }
}

/// Unique identifier for a subscription
pub type SubscriptionId = Uuid;

/// Statistics about notification delivery
#[derive(Debug, Default, Clone)]
pub struct NotificationStats {
    pub notifications_sent: u64,
    pub notifications_delivered: u64,
    pub notifications_dropped: u64,
    pub active_subscriptions: usize,
    pub total_subscriptions: u64,
}

type SubscriberMap =
    HashMap<SubscriptionId, (NotificationFilter, mpsc::UnboundedSender<LeadershipChange>)>;

/// Notification bus for leadership events
pub struct LeadershipNotificationBus {
    subscribers: Arc<RwLock<SubscriberMap>>,
    stats: Arc<RwLock<NotificationStats>>,
}

impl Default for LeadershipNotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LeadershipNotificationBus {
    pub fn new() -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            stats: Arc::new(RwLock::new(NotificationStats::default())),
        }
    }

    /// Subscribe to notifications with a filter
    pub async fn subscribe(
        &self,
        filter: NotificationFilter,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<LeadershipChange>) {
        let subscription_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();

        {
            let mut subscribers = self.subscribers.write().await;
            subscribers.insert(subscription_id, (filter, tx));

            let mut stats = self.stats.write().await;
            stats.active_subscriptions = subscribers.len();
            stats.total_subscriptions += 1;
        }

        debug!("Created leadership subscription {}", subscription_id);
        (subscription_id, rx)
    }

    pub async fn unsubscribe(&self, subscription_id: SubscriptionId) {
        let mut subscribers = self.subscribers.write().await;

        if subscribers.remove(&subscription_id).is_some() {
            debug!("Removed leadership subscription {}", subscription_id);
            self.stats.write().await.active_subscriptions = subscribers.len();
        }
    }

    async fn broadcast(&self, change: LeadershipChange) {
        self.stats.write().await.notifications_sent += 1;

        let mut delivered = 0;
        let mut dropped = 0;
        {
            let subscribers = self.subscribers.read().await;
            for (filter, tx) in subscribers.values() {
                if filter.matches(&change) {
                    match tx.send(change.clone()) {
                        Ok(_) => delivered += 1,
                        Err(_) => {
                            dropped += 1;
                            warn!("Failed to deliver leadership notification to subscriber");
                        }
                    }
                }
            }
        }

        let mut stats = self.stats.write().await;
        stats.notifications_delivered += delivered;
        stats.notifications_dropped += dropped;
    }

    pub async fn notify_acquired(&self, role: &Role, address: &LeaderAddress, term: u64) {
        self.broadcast(LeadershipChange::Acquired {
            role: role.clone(),
            address: address.clone(),
            term,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_lost(&self, role: &Role, term: u64, reason: impl Into<String>) {
        self.broadcast(LeadershipChange::Lost {
            role: role.clone(),
            term,
            reason: reason.into(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_released(&self, role: &Role, term: u64) {
        self.broadcast(LeadershipChange::Released {
            role: role.clone(),
            term,
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn notify_acquire_failed(&self, role: &Role, reason: impl Into<String>) {
        self.broadcast(LeadershipChange::AcquireFailed {
            role: role.clone(),
            reason: reason.into(),
            timestamp: now_millis(),
        })
        .await;
    }

    pub async fn get_stats(&self) -> NotificationStats {
        self.stats.read().await.clone()
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_filters_by_role_and_transition() {
        let bus = LeadershipNotificationBus::new();
        let (_, mut game_rx) = bus.subscribe(NotificationFilter::Role(Role::game())).await;
        let (_, mut transitions_rx) = bus.subscribe(NotificationFilter::Transitions).await;

        let address = LeaderAddress::new("tcp://10.0.0.1:50051");
        bus.notify_acquire_failed(&Role::game(), "pointer held").await;
        bus.notify_acquired(&Role::persistence(), &address, 1).await;
        bus.notify_lost(&Role::game(), 3, "session expired").await;

        assert!(matches!(
            game_rx.recv().await,
            Some(LeadershipChange::AcquireFailed { .. })
        ));
        assert!(matches!(
            game_rx.recv().await,
            Some(LeadershipChange::Lost { term: 3, .. })
        ));

        assert!(matches!(
            transitions_rx.recv().await,
            Some(LeadershipChange::Acquired { term: 1, .. })
        ));

        let stats = bus.get_stats().await;
        assert_eq!(stats.notifications_sent, 3);
        assert_eq!(stats.notifications_delivered, 4);
    }

    #[tokio::test]
    async fn test_unsubscribe() {
        let bus = LeadershipNotificationBus::new();
        let (id, _rx) = bus.subscribe(NotificationFilter::Transitions).await;
        bus.unsubscribe(id).await;
        assert_eq!(bus.get_stats().await.active_subscriptions, 0);
    }
}
