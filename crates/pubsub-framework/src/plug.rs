//! # Pub/Sub Plug
//!
//! The per-actor transactional subscription log. [`PubSubPlug`] wraps a
//! [`TransactionLog`] of [`PendingOperation`]s and adds the committed
//! subscription map, drop reconciliation and re-registration on resume.
//!
//! ```text
//! subscribe/publish/unsubscribe ──► pending log ──commit──► PubSubActions ──► TopicMultiplexer
//!                                                                │
//!                                                     SubscriptionTable ◄── DeliveryAdapter
//! ```
//!
//! Nothing an actor does through the plug is visible outside the actor until
//! the runtime commits the transaction that did it.

use crate::adapter::{ActorProcessor, DeliveryAdapter};
use crate::error::Result;
use crate::message::{Checkpoint, PendingOperation, TopicMessage};
use crate::multiplexer::{DeliveryTarget, TopicMultiplexer};
use crate::subscriptions::SubscriptionTable;
use crate::transaction::{ActionTarget, TransactionLog, TransactionalPlug};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Applies committed operations to the multiplexer on behalf of one actor.
pub struct PubSubActions {
    identity: String,
    mux: TopicMultiplexer,
    adapter: Arc<DeliveryAdapter>,
    table: Arc<SubscriptionTable>,
}

impl PubSubActions {
    async fn subscribe(&self, topic: &str, handler: &str) -> Result<()> {
        let previous = self.table.insert(topic, handler);
        self.table.forget_dropped(topic);

        let target: Arc<dyn DeliveryTarget> = self.adapter.clone();
        if let Err(e) = self.mux.subscribe(topic, &self.identity, target).await {
            match previous {
                Some(handler) => self.table.insert(topic, &handler),
                None => self.table.remove(topic),
            };
            return Err(e);
        }
        Ok(())
    }

    async fn unsubscribe(&self, topics: Vec<String>) -> Result<()> {
        let result = self.mux.unsubscribe(&topics, &self.identity).await;
        for topic in &topics {
            self.table.remove(topic);
        }
        result
    }

    /// Register every committed topic with the multiplexer again.
    async fn register_all(&self) -> Result<()> {
        let target: Arc<dyn DeliveryTarget> = self.adapter.clone();
        for topic in self.table.topics() {
            self.mux
                .subscribe(&topic, &self.identity, Arc::clone(&target))
                .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl ActionTarget<PendingOperation> for PubSubActions {
    async fn apply(&self, op: &PendingOperation) -> Result<()> {
        match op {
            PendingOperation::Publish { topic, value } => {
                let payload = TopicMessage::new(topic, &self.identity, value.clone()).encode()?;
                self.mux.publish(topic, &payload).await
            }
            PendingOperation::Subscribe { topic, handler } => {
                self.subscribe(topic, handler).await
            }
            PendingOperation::Unsubscribe { topic: Some(topic) } => {
                self.unsubscribe(vec![topic.clone()]).await
            }
            PendingOperation::Unsubscribe { topic: None } => {
                let topics = self.table.topics();
                self.unsubscribe(topics).await
            }
        }
    }
}

/// Transactional pub/sub access for one actor.
pub struct PubSubPlug {
    identity: String,
    log: TransactionLog<PendingOperation, PubSubActions>,
}

impl PubSubPlug {
    pub fn new(
        identity: impl Into<String>,
        mux: TopicMultiplexer,
        processor: Arc<dyn ActorProcessor>,
    ) -> Self {
        let identity = identity.into();
        let table = Arc::new(SubscriptionTable::default());
        let adapter = Arc::new(DeliveryAdapter::new(
            identity.clone(),
            table.clone(),
            processor,
        ));
        let actions = PubSubActions {
            identity: identity.clone(),
            mux,
            adapter,
            table,
        };
        Self {
            identity,
            log: TransactionLog::new(actions),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn publish(&mut self, topic: impl Into<String>, value: Value) -> Result<()> {
        self.log.push(PendingOperation::Publish {
            topic: topic.into(),
            value,
        })
    }

    pub fn subscribe(&mut self, topic: impl Into<String>, handler: impl Into<String>) -> Result<()> {
        self.log.push(PendingOperation::Subscribe {
            topic: topic.into(),
            handler: handler.into(),
        })
    }

    /// `None` unsubscribes from every topic committed when the transaction commits.
    pub fn unsubscribe(&mut self, topic: Option<&str>) -> Result<()> {
        self.log.push(PendingOperation::Unsubscribe {
            topic: topic.map(str::to_string),
        })
    }

    /// The committed `topic -> handler` map.
    pub fn subscriptions(&self) -> BTreeMap<String, String> {
        self.table().snapshot()
    }

    pub fn pending(&self) -> &[PendingOperation] {
        self.log.pending()
    }

    fn table(&self) -> &SubscriptionTable {
        &self.log.target().table
    }

    /// Forget topics the multiplexer dropped since the last transaction.
    fn reconcile_drops(&self) {
        let table = self.table();
        for topic in table.take_dropped() {
            if let Some(handler) = table.remove(&topic) {
                info!(actor = %self.identity, topic = %topic, handler = %handler, "Subscription dropped by relay");
            }
        }
    }
}

#[async_trait]
impl TransactionalPlug for PubSubPlug {
    type Checkpoint = Checkpoint;

    async fn init(&mut self) -> Result<()> {
        self.log.init().await
    }

    async fn begin(&mut self) -> Result<()> {
        self.log.begin().await?;
        self.reconcile_drops();
        Ok(())
    }

    async fn prepare(&mut self) -> Result<Checkpoint> {
        let pending_log = self.log.prepare().await?;
        self.reconcile_drops();
        Ok(Checkpoint {
            subscribed: self.subscriptions(),
            pending_log,
        })
    }

    async fn commit(&mut self) -> Result<()> {
        self.log.commit().await
    }

    async fn abort(&mut self) -> Result<()> {
        self.log.abort().await
    }

    async fn resume(&mut self, checkpoint: Checkpoint) -> Result<()> {
        debug!(
            actor = %self.identity,
            topics = checkpoint.subscribed.len(),
            pending = checkpoint.pending_log.len(),
            "Resuming"
        );
        self.table().restore(checkpoint.subscribed);
        self.log.resume(checkpoint.pending_log).await?;
        self.log.target().register_all().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.log.shutdown().await?;
        let actions = self.log.target();
        actions.table.shut_down();
        let topics = actions.table.clear();
        if let Err(e) = actions.mux.unsubscribe(&topics, &self.identity).await {
            warn!(actor = %self.identity, error = %e, "Unsubscribe on shutdown failed");
            return Err(e);
        }
        debug!(actor = %self.identity, topics = topics.len(), "Pub/sub shut down");
        Ok(())
    }
}
