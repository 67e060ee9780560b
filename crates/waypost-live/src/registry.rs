//! Subscriber registry and broadcaster.
//!
//! Subscribers are grouped by tracking number. Each one owns a bounded
//! channel and a keep-alive task. Broadcasting never waits: handles that are
//! closed or full are evicted after the pass and the rest still receive the
//! event.
//!
//! A subscriber moves `unregistered -> active -> removed`. Removal happens
//! exactly once, whichever comes first of dropping the `Subscription`, an
//! explicit unsubscribe, eviction on broadcast, or a failed heartbeat.

use std::{
    collections::HashMap,
    fmt,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, PoisonError, RwLock, Weak,
    },
    task::{Context, Poll},
    time::Duration,
};

use futures::Stream;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use waypost_core::{Clock, TrackingNumber};

use crate::event::PushEvent;

/// Identifier of one subscription, unique within a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Interval between heartbeats on an idle stream.
    pub keepalive_interval: Duration,

    /// Per-subscriber channel capacity.
    pub buffer: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { keepalive_interval: Duration::from_secs(30), buffer: 64 }
    }
}

struct SubscriberHandle {
    sender: mpsc::Sender<PushEvent>,
    keepalive: CancellationToken,
}

type SubscriberMap = HashMap<TrackingNumber, HashMap<SubscriberId, SubscriberHandle>>;

/// In-memory registry of live subscribers keyed by tracking number.
pub struct SubscriberRegistry {
    subscribers: RwLock<SubscriberMap>,
    next_id: AtomicU64,
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
}

impl SubscriberRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig, clock: Arc<dyn Clock>) -> Self {
        Self { subscribers: RwLock::new(HashMap::new()), next_id: AtomicU64::new(1), config, clock }
    }

    /// Returns the registry configuration.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Registers a subscriber for `tracking_number`.
    ///
    /// The returned stream yields a `connected` event first, then every
    /// broadcast for this tracking number and periodic heartbeats. Must be
    /// called from within a Tokio runtime.
    pub fn subscribe(self: &Arc<Self>, tracking_number: &TrackingNumber) -> Subscription {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.buffer.max(1));
        let keepalive = CancellationToken::new();

        // Capacity is at least one, so the greeting always fits.
        let _ = sender.try_send(PushEvent::connected(tracking_number));

        self.write()
            .entry(tracking_number.clone())
            .or_default()
            .insert(id, SubscriberHandle { sender: sender.clone(), keepalive: keepalive.clone() });

        tokio::spawn(run_keepalive(
            Arc::downgrade(self),
            tracking_number.clone(),
            id,
            sender,
            keepalive,
            self.config.keepalive_interval,
        ));

        debug!(
            tracking_number = %tracking_number,
            subscriber_id = %id,
            subscribers = self.subscriber_count(tracking_number),
            "subscriber registered"
        );

        Subscription {
            id,
            tracking_number: tracking_number.clone(),
            receiver,
            registry: Arc::downgrade(self),
        }
    }

    /// Removes one subscriber and stops its keep-alive.
    ///
    /// Returns `false` if it was already gone.
    pub fn unsubscribe(&self, tracking_number: &TrackingNumber, id: SubscriberId) -> bool {
        let removed = {
            let mut subscribers = self.write();
            let Some(set) = subscribers.get_mut(tracking_number) else {
                return false;
            };
            let removed = set.remove(&id);
            if set.is_empty() {
                subscribers.remove(tracking_number);
            }
            removed
        };

        match removed {
            Some(handle) => {
                handle.keepalive.cancel();
                debug!(
                    tracking_number = %tracking_number,
                    subscriber_id = %id,
                    "subscriber removed"
                );
                true
            },
            None => false,
        }
    }

    /// Delivers `event` to every subscriber of `tracking_number`.
    ///
    /// Never waits on a slow subscriber. Closed or full handles are evicted
    /// once the pass completes. Returns the number of successful deliveries.
    pub fn broadcast(&self, tracking_number: &TrackingNumber, event: PushEvent) -> usize {
        let targets: Vec<(SubscriberId, mpsc::Sender<PushEvent>)> = {
            let subscribers = self.read();
            match subscribers.get(tracking_number) {
                Some(set) => set.iter().map(|(id, h)| (*id, h.sender.clone())).collect(),
                None => return 0,
            }
        };

        let mut delivered = 0;
        let mut stale = Vec::new();

        for (id, sender) in targets {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        tracking_number = %tracking_number,
                        subscriber_id = %id,
                        "subscriber buffer full, evicting"
                    );
                    stale.push(id);
                },
                Err(TrySendError::Closed(_)) => stale.push(id),
            }
        }

        for id in stale {
            self.unsubscribe(tracking_number, id);
        }

        debug!(
            tracking_number = %tracking_number,
            event = %event.kind(),
            delivered,
            "event broadcast"
        );

        delivered
    }

    /// Number of active subscribers for one tracking number.
    pub fn subscriber_count(&self, tracking_number: &TrackingNumber) -> usize {
        self.read().get(tracking_number).map_or(0, HashMap::len)
    }

    /// Number of active subscribers across all tracking numbers.
    pub fn total_subscribers(&self) -> usize {
        self.read().values().map(HashMap::len).sum()
    }

    /// Number of tracking numbers with at least one subscriber.
    pub fn tracking_count(&self) -> usize {
        self.read().len()
    }

    /// Removes every subscriber, ending all open streams.
    pub fn close_all(&self) {
        let drained: Vec<_> = self.write().drain().collect();
        let count: usize = drained.iter().map(|(_, set)| set.len()).sum();

        for (_, set) in drained {
            for handle in set.into_values() {
                handle.keepalive.cancel();
            }
        }

        info!(subscribers = count, "closed all live subscriptions");
    }

    // A panic while holding the lock cannot leave the map half-mutated, so
    // poisoning is ignored.
    fn read(&self) -> std::sync::RwLockReadGuard<'_, SubscriberMap> {
        self.subscribers.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, SubscriberMap> {
        self.subscribers.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("trackings", &self.tracking_count())
            .field("subscribers", &self.total_subscribers())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

async fn run_keepalive(
    registry: Weak<SubscriberRegistry>,
    tracking_number: TrackingNumber,
    id: SubscriberId,
    sender: mpsc::Sender<PushEvent>,
    cancelled: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancelled.cancelled() => break,
            _ = ticker.tick() => {
                let Some(registry) = registry.upgrade() else { break };
                let beat = PushEvent::heartbeat(registry.clock.now_utc());

                match sender.try_send(beat) {
                    Ok(()) => {},
                    Err(TrySendError::Full(_)) => {
                        debug!(subscriber_id = %id, "subscriber buffer full, skipping heartbeat");
                    },
                    Err(TrySendError::Closed(_)) => {
                        registry.unsubscribe(&tracking_number, id);
                        break;
                    },
                }
            }
        }
    }
}

/// Stream of push events for one subscriber.
///
/// Dropping it unsubscribes. The stream ends when the subscriber is evicted
/// or the registry is closed.
pub struct Subscription {
    id: SubscriberId,
    tracking_number: TrackingNumber,
    receiver: mpsc::Receiver<PushEvent>,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    /// Returns the subscriber id.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Returns the tracking number this subscription listens to.
    pub fn tracking_number(&self) -> &TrackingNumber {
        &self.tracking_number
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("tracking_number", &self.tracking_number)
            .finish_non_exhaustive()
    }
}

impl Stream for Subscription {
    type Item = PushEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unsubscribe(&self.tracking_number, self.id);
        }
    }
}
