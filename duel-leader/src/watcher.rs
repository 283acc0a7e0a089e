//! Leader pointer watching for dependents of a role.
//!
//! The watcher polls the role's pointer key and turns what it reads into a
//! stream of [`PointerEvent`]s. Push notifications from the directory only
//! trigger an early read; the read itself stays the source of truth.

use crate::config::jittered;
use crate::coordinator::sleep_unless_shutdown;
use crate::{LeaderResult, WatcherConfig};
use duel_core::{LeaderAddress, Role};
use duel_directory::{Directory, Subscription};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What dependents learn about a role's leader
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerEvent {
    /// A leader is advertised at this address
    Changed(LeaderAddress),
    /// No leader is advertised
    Vacant,
    /// The pointer could not be read; the last known address may still be good
    DirectoryUnreachable,
}

/// Statistics about pointer watching
#[derive(Debug, Default, Clone)]
pub struct WatcherStats {
    pub polls: u64,
    pub read_failures: u64,
    pub push_wakeups: u64,
    pub notifications_sent: u64,
}

#[derive(Default)]
struct WatcherShared {
    current: Option<LeaderAddress>,
    last_event: Option<PointerEvent>,
    subscribers: Vec<mpsc::UnboundedSender<PointerEvent>>,
    stats: WatcherStats,
}

impl WatcherShared {
    /// Record one observation, notifying subscribers unless it repeats the
    /// previous notification.
    fn record(&mut self, role: &Role, event: PointerEvent) {
        self.stats.polls += 1;
        match &event {
            PointerEvent::Changed(address) => self.current = Some(address.clone()),
            PointerEvent::Vacant => self.current = None,
            PointerEvent::DirectoryUnreachable => self.stats.read_failures += 1,
        }

        if self.last_event.as_ref() == Some(&event) {
            return;
        }

        match &event {
            PointerEvent::Changed(address) => info!("Leader for {} is now {}", role, address),
            PointerEvent::Vacant => info!("No leader advertised for {}", role),
            PointerEvent::DirectoryUnreachable => {
                warn!("Directory unreachable while watching {}", role)
            }
        }

        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
        self.stats.notifications_sent += 1;
        self.last_event = Some(event);
    }

    /// Events that bring a late subscriber up to date.
    fn replay(&self) -> Vec<PointerEvent> {
        match (&self.last_event, &self.current) {
            (Some(PointerEvent::DirectoryUnreachable), Some(address)) => vec![
                PointerEvent::Changed(address.clone()),
                PointerEvent::DirectoryUnreachable,
            ],
            (Some(event), _) => vec![event.clone()],
            (None, _) => Vec::new(),
        }
    }
}

/// Watches one role's pointer key.
pub struct LeaderPointerWatcher {
    role: Role,
    directory: Arc<dyn Directory>,
    config: WatcherConfig,
    shared: Arc<Mutex<WatcherShared>>,
}

enum Wake {
    Poll,
    Push,
    PushClosed,
    Shutdown,
}

impl LeaderPointerWatcher {
    pub fn new(
        role: Role,
        directory: Arc<dyn Directory>,
        config: WatcherConfig,
    ) -> LeaderResult<Self> {
        config.validate()?;
        Ok(Self {
            role,
            directory,
            config,
            shared: Arc::new(Mutex::new(WatcherShared::default())),
        })
    }

    /// Start polling. Dropping the handle stops it.
    pub fn spawn(self) -> WatcherHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let role = self.role.clone();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(self.run(shutdown_rx));

        WatcherHandle {
            role,
            shared,
            shutdown_tx,
            task,
        }
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let key = self.role.pointer_key();
        debug!("Watching pointer key {}", key);

        let mut push = if self.config.use_push_notifications {
            self.directory.subscribe_key(&key)
        } else {
            None
        };

        self.observe(&key).await;
        loop {
            let interval = jittered(self.config.poll_interval, self.config.jitter_ratio);
            let wake = tokio::select! {
                proceed = sleep_unless_shutdown(interval, &mut shutdown_rx) => {
                    if proceed { Wake::Poll } else { Wake::Shutdown }
                }
                note = next_push(&mut push) => {
                    if note { Wake::Push } else { Wake::PushClosed }
                }
            };

            match wake {
                Wake::Poll => {}
                Wake::Push => self.shared.lock().stats.push_wakeups += 1,
                Wake::PushClosed => {
                    debug!("Push notifications for {} closed; polling only", key);
                    push = None;
                    continue;
                }
                Wake::Shutdown => break,
            }
            self.observe(&key).await;
        }

        debug!("Stopped watching pointer key {}", key);
    }

    async fn observe(&self, key: &str) {
        let read =
            tokio::time::timeout(self.config.read_timeout, self.directory.read_key(key)).await;
        let event = match read {
            // An unbound pointer was left behind by a dead session
            Ok(Ok(Some(entry))) if entry.session.is_some() => {
                PointerEvent::Changed(LeaderAddress::new(entry.value))
            }
            Ok(Ok(_)) => PointerEvent::Vacant,
            Ok(Err(e)) => {
                debug!("Pointer read for {} failed: {}", key, e);
                PointerEvent::DirectoryUnreachable
            }
            Err(_) => {
                debug!("Pointer read for {} timed out", key);
                PointerEvent::DirectoryUnreachable
            }
        };
        self.shared.lock().record(&self.role, event);
    }
}

/// Resolves when a push hint arrives. True for a hint, false once the
/// notification channel is closed. Never resolves without a subscription.
async fn next_push(push: &mut Option<Subscription>) -> bool {
    match push {
        Some(subscription) => subscription.receiver.recv().await.is_some(),
        None => std::future::pending().await,
    }
}

/// Handle to a running watcher
pub struct WatcherHandle {
    role: Role,
    shared: Arc<Mutex<WatcherShared>>,
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl WatcherHandle {
    pub fn role(&self) -> &Role {
        &self.role
    }

    /// Subscribe to pointer events. The subscriber first receives whatever
    /// brings it up to date with the latest observation.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<PointerEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut shared = self.shared.lock();
        for event in shared.replay() {
            // The receiver is still in scope; this cannot fail.
            let _ = tx.send(event);
        }
        shared.subscribers.push(tx);
        rx
    }

    /// The last address read from the directory, if a leader was advertised.
    pub fn current_address(&self) -> Option<LeaderAddress> {
        self.shared.lock().current.clone()
    }

    pub fn last_event(&self) -> Option<PointerEvent> {
        self.shared.lock().last_event.clone()
    }

    pub fn get_stats(&self) -> WatcherStats {
        self.shared.lock().stats.clone()
    }

    pub async fn shutdown(self) -> LeaderResult<()> {
        if self.shutdown_tx.send(true).is_err() {
            debug!("Watcher for {} already exited", self.role);
        }
        self.task.await?;
        Ok(())
    }
}
