//! ---
//! nf_section: "02-telemetry-engine"
//! nf_subsection: "module"
//! nf_type: "source"
//! nf_scope: "code"
//! nf_description: "Best-effort fan-out of telemetry events to live subscribers."
//! nf_version: "v0.0.0-prealpha"
//! nf_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use nf_logging::{fleet_debug, fleet_warn, LogContext};
use nf_metrics::TelemetryMetrics;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use uuid::Uuid;

use crate::error::{TelemetryError, UnreachableReason};

pub type SubscriberId = Uuid;

/// Receiving end of the fan-out.
///
/// `send` must not block: a subscriber that cannot take the payload right
/// now reports itself unreachable and is dropped by the broadcaster.
pub trait Subscriber: Send + Sync {
    fn name(&self) -> &str;
    fn send(&self, payload: Arc<str>) -> Result<(), UnreachableReason>;
}

/// Anything the scheduler can hand encoded events to.
pub trait TelemetrySink: Send + Sync {
    fn publish(&self, payload: Arc<str>) -> PublishReport;
}

/// Outcome of one publish call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

/// Lifetime totals kept by a [`Broadcaster`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastStats {
    /// Events published, counted once per publish call.
    pub published: u64,
    /// Individual deliveries to subscribers.
    pub delivered: u64,
    /// Subscribers unregistered after a failed send.
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    published: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> BroadcastStats {
        BroadcastStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Subscriber backed by a bounded in-memory queue.
#[derive(Debug, Clone)]
pub struct ChannelSubscriber {
    name: String,
    sender: mpsc::Sender<Arc<str>>,
}

impl ChannelSubscriber {
    pub fn new(name: impl Into<String>, sender: mpsc::Sender<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

impl Subscriber for ChannelSubscriber {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, payload: Arc<str>) -> Result<(), UnreachableReason> {
        self.sender.try_send(payload).map_err(|err| match err {
            TrySendError::Full(_) => UnreachableReason::QueueFull,
            TrySendError::Closed(_) => UnreachableReason::Disconnected,
        })
    }
}

/// Handle returned by [`Broadcaster::subscribe`]. Events arrive in publish
/// order. Dropping the handle disconnects the subscriber on the next publish.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next event. `None` once the broadcaster has dropped
    /// this subscriber and the queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        match self.receiver.try_recv() {
            Ok(payload) => Some(payload),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

/// Live-subscriber registry and fan-out.
pub struct Broadcaster {
    subscribers: RwLock<HashMap<SubscriberId, Arc<dyn Subscriber>>>,
    buffer: usize,
    counters: Counters,
    metrics: Option<TelemetryMetrics>,
}

impl Broadcaster {
    /// `buffer` is the queue depth given to subscribers created via
    /// [`Broadcaster::subscribe`].
    pub fn new(buffer: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            buffer: buffer.max(1),
            counters: Counters::default(),
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: TelemetryMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a queue-backed subscriber.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.buffer);
        let id = Uuid::new_v4();
        let subscriber = ChannelSubscriber::new(format!("channel-{id}"), sender);
        self.insert(id, Arc::new(subscriber));
        Subscription { id, receiver }
    }

    /// Register a custom subscriber implementation.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) -> SubscriberId {
        let id = Uuid::new_v4();
        self.insert(id, subscriber);
        id
    }

    /// Returns `false` when the id was not (or no longer) registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.write().remove(&id);
        match removed {
            Some(subscriber) => {
                let id = id.to_string();
                fleet_debug!(
                    context = LogContext::new().with_subscriber(&id),
                    "subscriber {} left",
                    subscriber.name()
                );
                self.refresh_gauge();
                true
            }
            None => false,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn stats(&self) -> BroadcastStats {
        self.counters.snapshot()
    }

    /// Deliver `payload` to every live subscriber.
    ///
    /// The registry lock is released before any send. Subscribers whose send
    /// fails are unregistered afterwards; the rest are unaffected.
    pub fn publish(&self, payload: Arc<str>) -> PublishReport {
        let targets: Vec<(SubscriberId, Arc<dyn Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .map(|(id, subscriber)| (*id, Arc::clone(subscriber)))
            .collect();

        let mut report = PublishReport::default();
        let mut failed = Vec::new();
        for (id, subscriber) in targets {
            match subscriber.send(Arc::clone(&payload)) {
                Ok(()) => report.delivered += 1,
                Err(reason) => failed.push((id, subscriber, reason)),
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write();
            for (id, subscriber, reason) in &failed {
                if subscribers.remove(id).is_none() {
                    continue;
                }
                report.dropped += 1;
                let err = TelemetryError::SubscriberUnreachable {
                    subscriber: subscriber.name().to_owned(),
                    reason: reason.clone(),
                };
                let id = id.to_string();
                fleet_warn!(
                    context = LogContext::new().with_subscriber(&id),
                    "dropping subscriber: {}",
                    err
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_subscriber_dropped(reason.as_label());
                }
            }
            drop(subscribers);
            self.refresh_gauge();
        }

        self.counters.published.fetch_add(1, Ordering::Relaxed);
        self.counters
            .delivered
            .fetch_add(report.delivered as u64, Ordering::Relaxed);
        self.counters
            .dropped
            .fetch_add(report.dropped as u64, Ordering::Relaxed);
        report
    }

    fn insert(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber>) {
        let name = subscriber.name().to_owned();
        self.subscribers.write().insert(id, subscriber);
        let id = id.to_string();
        fleet_debug!(
            context = LogContext::new().with_subscriber(&id),
            "subscriber {} joined",
            name
        );
        self.refresh_gauge();
    }

    fn refresh_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_subscriber_count(self.subscriber_count());
        }
    }
}

impl TelemetrySink for Broadcaster {
    fn publish(&self, payload: Arc<str>) -> PublishReport {
        Broadcaster::publish(self, payload)
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscriber_count())
            .field("buffer", &self.buffer)
            .field("stats", &self.stats())
            .finish()
    }
}
