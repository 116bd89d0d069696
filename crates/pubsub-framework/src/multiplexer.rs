//! # Topic Multiplexer
//!
//! One `TopicMultiplexer` per process owns the broker connection and shares it
//! between every actor. For each topic it keeps the set of delivery targets
//! that want it, keyed by actor identity, and talks to the broker only when a
//! set changes between empty and non-empty.
//!
//! ## Concurrency Model
//!
//! The topic map sits behind a `tokio::sync::Mutex`. Subscribe and unsubscribe
//! hold it across the broker round-trip so reference-count transitions are
//! linearizable.
//!
//! Inbound broker messages are read by a pump task. The pump never calls a
//! target itself: every registration owns a delivery lane, an unbounded
//! channel drained by its own task. The pump pushes each payload onto the
//! lanes of the topic's current subscribers in arrival order, so one target
//! sees a topic's messages in broker order while a slow or failing target
//! only holds up its own lane.
//!
//! ## Reconnecting
//!
//! Registrations survive a lost connection. The next [`connect`] asks the new
//! broker for every registered topic again; targets whose topic is refused are
//! dropped.
//!
//! [`connect`]: TopicMultiplexer::connect

use crate::broker::{Broker, BrokerEvent, Connection, Connector};
use crate::config::PubSubConfig;
use crate::error::{PubSubError, Result};
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// Receives messages published on a topic.
#[async_trait]
pub trait DeliveryTarget: Send + Sync {
    /// Hand one raw broker payload to the target.
    ///
    /// An error is terminal: the multiplexer removes the target from the topic.
    async fn deliver(&self, topic: &str, raw: &str) -> Result<()>;

    /// Called after the multiplexer removed this target from `topic`.
    fn dropped(&self, _topic: &str) {}
}

/// One actor's registration on one topic.
struct Subscriber {
    target: Arc<dyn DeliveryTarget>,
    lane: mpsc::UnboundedSender<Arc<str>>,
    lane_id: u64,
}

type SubscriberSet = HashMap<String, Subscriber>;

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

struct Inner {
    topics: Mutex<HashMap<String, SubscriberSet>>,
    broker: RwLock<Option<Arc<dyn Broker>>>,
    closed: watch::Sender<bool>,
    pump: parking_lot::Mutex<Option<JoinHandle<()>>>,
    next_lane: AtomicU64,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(pump) = self.pump.get_mut().take() {
            pump.abort();
        }
    }
}

/// Process-wide handle to the shared broker connection. Cheap to clone.
#[derive(Clone)]
pub struct TopicMultiplexer {
    inner: Arc<Inner>,
}

impl Default for TopicMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl TopicMultiplexer {
    /// A multiplexer without a broker connection. Call [`connect`](Self::connect).
    pub fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                broker: RwLock::new(None),
                closed,
                pump: parking_lot::Mutex::new(None),
                next_lane: AtomicU64::new(0),
            }),
        }
    }

    /// Validate `config`, open the broker connection and start the inbound pump.
    ///
    /// Topics still registered from an earlier connection are subscribed on
    /// the new broker before this returns.
    pub async fn connect(&self, config: &PubSubConfig, connector: &dyn Connector) -> Result<()> {
        config.validate()?;
        let Connection { broker, events } =
            connector
                .connect(&config.broker)
                .await
                .map_err(|e| match e {
                    PubSubError::Connection(_) => e,
                    other => PubSubError::Connection(other.to_string()),
                })?;

        let mut topics = self.inner.topics.lock().await;
        let previous = self.inner.broker.write().replace(Arc::clone(&broker));
        if let Some(previous) = previous {
            warn!("Replacing existing broker connection");
            previous.close().await;
        }

        let pump = tokio::spawn(pump(Arc::downgrade(&self.inner), events));
        if let Some(previous) = self.inner.pump.lock().replace(pump) {
            previous.abort();
        }

        let lost = resubscribe(broker.as_ref(), &mut topics).await;
        drop(topics);
        self.inner.closed.send_replace(false);

        for (topic, actor, target) in lost {
            warn!(actor = %actor, topic = %topic, "Dropped subscriber");
            target.dropped(&topic);
        }
        info!(
            hostname = %config.broker.hostname,
            port = config.broker.port,
            "Connected to broker"
        );
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.broker.read().is_some()
    }

    fn broker(&self) -> Option<Arc<dyn Broker>> {
        self.inner.broker.read().clone()
    }

    fn subscriber(&self, topic: &str, actor: &str, target: Arc<dyn DeliveryTarget>) -> Subscriber {
        let (lane, queue) = mpsc::unbounded_channel();
        let lane_id = self.inner.next_lane.fetch_add(1, Ordering::Relaxed);
        tokio::spawn(drain_lane(
            Arc::downgrade(&self.inner),
            topic.to_string(),
            actor.to_string(),
            lane_id,
            queue,
        ));
        Subscriber {
            target,
            lane,
            lane_id,
        }
    }

    /// Register `target` for `topic` under `actor`.
    ///
    /// A repeated call for the same actor replaces the stored target without
    /// touching the broker and keeps the actor's delivery lane, so messages
    /// already queued reach the new target in order. The broker is only asked
    /// to subscribe when the topic gains its first target, and the target is
    /// only stored once the broker accepted.
    pub async fn subscribe(
        &self,
        topic: &str,
        actor: &str,
        target: Arc<dyn DeliveryTarget>,
    ) -> Result<()> {
        let mut topics = self.inner.topics.lock().await;
        let broker = self.broker().ok_or(PubSubError::NoConnection)?;

        if let Some(set) = topics.get_mut(topic) {
            let replaced = match set.get_mut(actor) {
                Some(subscriber) => {
                    subscriber.target = target;
                    true
                }
                None => {
                    let subscriber = self.subscriber(topic, actor, target);
                    set.insert(actor.to_string(), subscriber);
                    false
                }
            };
            debug!(actor, topic, replaced, subscribers = set.len(), "Subscribed");
            return Ok(());
        }

        broker.subscribe(topic).await?;
        let subscriber = self.subscriber(topic, actor, target);
        topics.insert(
            topic.to_string(),
            HashMap::from([(actor.to_string(), subscriber)]),
        );
        info!(actor, topic, "Broker subscription opened");
        Ok(())
    }

    /// Remove `actor` from every topic in `topics`.
    ///
    /// Without a connection the broker side is already gone, so only local
    /// state is updated. Broker failures are logged; the first one is returned
    /// after every topic has been processed.
    pub async fn unsubscribe(&self, topics: &[String], actor: &str) -> Result<()> {
        let mut map = self.inner.topics.lock().await;
        let broker = self.broker();
        let mut first_error = None;

        for topic in topics {
            let Some(set) = map.get_mut(topic.as_str()) else {
                continue;
            };
            if set.remove(actor).is_none() {
                continue;
            }
            debug!(actor, topic = %topic, subscribers = set.len(), "Unsubscribed");
            if !set.is_empty() {
                continue;
            }

            map.remove(topic.as_str());
            if let Some(broker) = &broker {
                match broker.unsubscribe(topic).await {
                    Ok(()) => info!(topic = %topic, "Broker subscription closed"),
                    Err(e) => {
                        warn!(topic = %topic, error = %e, "Broker unsubscribe failed");
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Forward a payload to the broker. Local subscribers play no part.
    pub async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let broker = self.broker().ok_or(PubSubError::NoConnection)?;
        trace!(topic, bytes = payload.len(), "Publish");
        broker.publish(topic, payload).await
    }

    /// Fan `raw` out to every target registered for `topic` and wait for all
    /// of them, bypassing the delivery lanes.
    pub async fn deliver(&self, topic: &str, raw: &str) -> DeliveryReport {
        let targets: Vec<(String, Arc<dyn DeliveryTarget>)> = {
            let map = self.inner.topics.lock().await;
            match map.get(topic) {
                Some(set) => set
                    .iter()
                    .map(|(actor, subscriber)| (actor.clone(), Arc::clone(&subscriber.target)))
                    .collect(),
                None => {
                    trace!(topic, "No subscribers");
                    return DeliveryReport::default();
                }
            }
        };

        let outcomes = join_all(
            targets
                .into_iter()
                .map(|(actor, target)| async move { self.deliver_to(topic, &actor, target, raw).await }),
        )
        .await;

        let delivered = outcomes.iter().filter(|ok| **ok).count();
        DeliveryReport {
            delivered,
            dropped: outcomes.len() - delivered,
        }
    }

    /// Queue `raw` on the lane of every current subscriber of `topic`.
    async fn enqueue(&self, topic: &str, raw: Arc<str>) {
        let map = self.inner.topics.lock().await;
        let Some(set) = map.get(topic) else {
            trace!(topic, "No subscribers");
            return;
        };
        for subscriber in set.values() {
            let _ = subscriber.lane.send(Arc::clone(&raw));
        }
    }

    /// The target behind lane `lane_id`, unless the registration is gone.
    async fn lane_target(&self, topic: &str, actor: &str, lane_id: u64) -> Option<Arc<dyn DeliveryTarget>> {
        let map = self.inner.topics.lock().await;
        map.get(topic)?
            .get(actor)
            .filter(|subscriber| subscriber.lane_id == lane_id)
            .map(|subscriber| Arc::clone(&subscriber.target))
    }

    async fn deliver_to(
        &self,
        topic: &str,
        actor: &str,
        target: Arc<dyn DeliveryTarget>,
        raw: &str,
    ) -> bool {
        let outcome = AssertUnwindSafe(target.deliver(topic, raw))
            .catch_unwind()
            .await;
        let reason = match outcome {
            Ok(Ok(())) => return true,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "delivery panicked".to_string(),
        };
        self.drop_target(topic, actor, &target, &reason).await;
        false
    }

    async fn drop_target(
        &self,
        topic: &str,
        actor: &str,
        target: &Arc<dyn DeliveryTarget>,
        reason: &str,
    ) {
        {
            let mut map = self.inner.topics.lock().await;
            let Some(set) = map.get_mut(topic) else {
                return;
            };
            // The actor may have registered a new target since the snapshot.
            let current = set.get(actor).is_some_and(|s| {
                Arc::as_ptr(&s.target) as *const () == Arc::as_ptr(target) as *const ()
            });
            if !current {
                return;
            }
            set.remove(actor);

            if set.is_empty() {
                map.remove(topic);
                if let Some(broker) = self.broker() {
                    if let Err(e) = broker.unsubscribe(topic).await {
                        warn!(topic, error = %e, "Broker unsubscribe failed");
                    }
                }
            }
        }

        warn!(actor, topic, reason, "Dropped subscriber");
        target.dropped(topic);
    }

    pub async fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.inner.topics.lock().await.keys().cloned().collect();
        topics.sort();
        topics
    }

    pub async fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .lock()
            .await
            .get(topic)
            .map_or(0, HashMap::len)
    }

    /// Resolves once the connection is gone, either after a fatal broker
    /// error or after [`shutdown`](Self::shutdown).
    pub async fn closed(&self) {
        let mut closed = self.inner.closed.subscribe();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    /// Close the broker connection and forget every subscriber. Idempotent.
    pub async fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
        }
        let broker = self.inner.broker.write().take();
        if let Some(broker) = broker {
            broker.close().await;
            info!("Broker connection closed");
        }
        self.inner.topics.lock().await.clear();
        self.inner.closed.send_replace(true);
    }

    /// Drop the broker after a fatal error. Registrations are kept for the
    /// next [`connect`](Self::connect).
    async fn fail(&self) {
        let broker = self.inner.broker.write().take();
        if let Some(broker) = broker {
            broker.close().await;
        }
        self.inner.closed.send_replace(true);
    }
}

/// Subscribe `broker` to every registered topic. Refused topics are removed
/// and their targets returned.
async fn resubscribe(
    broker: &dyn Broker,
    topics: &mut HashMap<String, SubscriberSet>,
) -> Vec<(String, String, Arc<dyn DeliveryTarget>)> {
    let mut lost = Vec::new();
    let names: Vec<String> = topics.keys().cloned().collect();
    for topic in names {
        match broker.subscribe(&topic).await {
            Ok(()) => debug!(topic = %topic, "Broker subscription restored"),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Broker subscription not restored");
                if let Some(set) = topics.remove(&topic) {
                    lost.extend(
                        set.into_iter()
                            .map(|(actor, subscriber)| (topic.clone(), actor, subscriber.target)),
                    );
                }
            }
        }
    }
    lost
}

async fn pump(inner: Weak<Inner>, mut events: mpsc::UnboundedReceiver<BrokerEvent>) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mux = TopicMultiplexer { inner };
        match event {
            BrokerEvent::Message { topic, payload } => {
                trace!(topic = %topic, "Inbound");
                mux.enqueue(&topic, payload.into()).await;
            }
            BrokerEvent::Error(reason) => {
                error!(reason = %reason, "Broker connection lost");
                mux.fail().await;
                break;
            }
        }
    }
    debug!("Broker pump stopped");
}

/// Deliver one registration's queued payloads, one at a time.
///
/// Ends once the registration is removed and its queue is drained. Payloads
/// left over from a removed registration are discarded.
async fn drain_lane(
    inner: Weak<Inner>,
    topic: String,
    actor: String,
    lane_id: u64,
    mut queue: mpsc::UnboundedReceiver<Arc<str>>,
) {
    while let Some(raw) = queue.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let mux = TopicMultiplexer { inner };
        let Some(target) = mux.lane_target(&topic, &actor, lane_id).await else {
            continue;
        };
        mux.deliver_to(&topic, &actor, target, &raw).await;
    }
    trace!(actor = %actor, topic = %topic, "Delivery lane closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBroker;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        fail: bool,
        dropped: AtomicUsize,
    }

    #[async_trait]
    impl DeliveryTarget for Counting {
        async fn deliver(&self, _topic: &str, _raw: &str) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(PubSubError::ShutDown);
            }
            Ok(())
        }

        fn dropped(&self, _topic: &str) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    async fn connected() -> (TopicMultiplexer, MockBroker) {
        let broker = MockBroker::new();
        let mux = TopicMultiplexer::new();
        mux.connect(&PubSubConfig::local(), &broker).await.unwrap();
        (mux, broker)
    }

    #[tokio::test]
    async fn test_subscribe_without_connection_fails() {
        let mux = TopicMultiplexer::new();
        let result = mux
            .subscribe("forum-a", "alice-a", Arc::new(Counting::default()))
            .await;
        assert!(matches!(result, Err(PubSubError::NoConnection)));
        assert!(mux.topics().await.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_without_connection_is_noop() {
        let mux = TopicMultiplexer::new();
        mux.unsubscribe(&["forum-a".to_string()], "alice-a")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_repeated_subscribe_replaces_target() {
        let (mux, broker) = connected().await;
        let first = Arc::new(Counting::default());
        let second = Arc::new(Counting::default());

        mux.subscribe("forum-a", "alice-a", first.clone()).await.unwrap();
        mux.subscribe("forum-a", "alice-a", second.clone()).await.unwrap();
        let report = mux.deliver("forum-a", "{}").await;

        assert_eq!(broker.subscribe_calls("forum-a"), 1);
        assert_eq!(mux.subscriber_count("forum-a").await, 1);
        assert_eq!(report.delivered, 1);
        assert_eq!(first.calls.load(Ordering::SeqCst), 0);
        assert_eq!(second.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_broker_subscribe_leaves_no_set() {
        let (mux, broker) = connected().await;
        broker.fail_subscribe_on("forum-a");

        let result = mux
            .subscribe("forum-a", "alice-a", Arc::new(Counting::default()))
            .await;
        assert!(matches!(result, Err(PubSubError::Broker { .. })));
        assert_eq!(mux.subscriber_count("forum-a").await, 0);
    }

    #[tokio::test]
    async fn test_stale_drop_does_not_remove_replacement() {
        let (mux, broker) = connected().await;
        let failing = Arc::new(Counting {
            fail: true,
            ..Default::default()
        });
        let replacement: Arc<dyn DeliveryTarget> = Arc::new(Counting::default());
        mux.subscribe("forum-a", "alice-a", failing.clone()).await.unwrap();

        let as_target: Arc<dyn DeliveryTarget> = failing.clone();
        mux.subscribe("forum-a", "alice-a", replacement).await.unwrap();
        mux.drop_target("forum-a", "alice-a", &as_target, "late").await;

        assert_eq!(mux.subscriber_count("forum-a").await, 1);
        assert_eq!(failing.dropped.load(Ordering::SeqCst), 0);
        assert!(broker.is_subscribed("forum-a"));
    }

    #[derive(Default)]
    struct Recording {
        seen: parking_lot::Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl DeliveryTarget for Recording {
        async fn deliver(&self, _topic: &str, raw: &str) -> Result<()> {
            let n: u32 = raw.parse().map_err(|_| PubSubError::ShutDown)?;
            tokio::task::yield_now().await;
            self.seen.lock().push(n);
            Ok(())
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_inbound_order_kept_per_target() {
        let (mux, broker) = connected().await;
        let first = Arc::new(Recording::default());
        let second = Arc::new(Recording::default());
        mux.subscribe("forum-a", "alice-a", first.clone()).await.unwrap();
        mux.subscribe("forum-a", "bob-b", second.clone()).await.unwrap();

        for n in 0..2000u32 {
            broker.inject("forum-a", &n.to_string());
        }
        for _ in 0..500 {
            if first.seen.lock().len() == 2000 && second.seen.lock().len() == 2000 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }

        let expected: Vec<u32> = (0..2000).collect();
        assert_eq!(*first.seen.lock(), expected);
        assert_eq!(*second.seen.lock(), expected);
    }

    #[tokio::test]
    async fn test_reconnect_resubscribes_registered_topics() {
        let (mux, first) = connected().await;
        let target = Arc::new(Counting::default());
        mux.subscribe("forum-a", "alice-a", target.clone()).await.unwrap();

        let second = MockBroker::new();
        mux.connect(&PubSubConfig::local(), &second).await.unwrap();

        assert!(first.is_closed());
        assert!(second.is_subscribed("forum-a"));
        assert_eq!(mux.subscriber_count("forum-a").await, 1);

        mux.subscribe("forum-a", "bob-b", Arc::new(Counting::default()))
            .await
            .unwrap();
        assert_eq!(second.subscribe_calls("forum-a"), 1);
    }

    #[tokio::test]
    async fn test_reconnect_after_broker_loss_restores_or_drops() {
        let (mux, first) = connected().await;
        let kept = Arc::new(Counting::default());
        let refused = Arc::new(Counting::default());
        mux.subscribe("forum-a", "alice-a", kept.clone()).await.unwrap();
        mux.subscribe("forum-b", "alice-a", refused.clone()).await.unwrap();

        first.inject_error("connection reset");
        tokio::time::timeout(std::time::Duration::from_secs(1), mux.closed())
            .await
            .unwrap();
        assert_eq!(mux.topics().await, vec!["forum-a", "forum-b"]);

        let second = MockBroker::new();
        second.fail_subscribe_on("forum-b");
        mux.connect(&PubSubConfig::local(), &second).await.unwrap();

        assert!(second.is_subscribed("forum-a"));
        assert_eq!(mux.topics().await, vec!["forum-a"]);
        assert_eq!(kept.dropped.load(Ordering::SeqCst), 0);
        assert_eq!(refused.dropped.load(Ordering::SeqCst), 1);
    }
}
