//! # Delivery Adapter
//!
//! Bridges the multiplexer and one actor. The adapter turns a raw broker
//! payload into the actor's [`InboundRequest`], runs it through the actor's
//! processing entry point and tells the multiplexer whether to keep the
//! subscription.
//!
//! | Outcome | Result |
//! |---------|--------|
//! | normal return | kept |
//! | [`ProcessError::Application`] / [`ProcessError::Exception`] | kept, logged |
//! | [`ProcessError::System`] | dropped |
//! | no handler for the topic, actor shut down, bad payload | dropped |

use crate::error::{ProcessError, PubSubError, Result};
use crate::message::{InboundRequest, TopicMessage};
use crate::multiplexer::DeliveryTarget;
use crate::subscriptions::SubscriptionTable;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{trace, warn};

/// The actor runtime's processing entry point.
#[async_trait]
pub trait ActorProcessor: Send + Sync {
    async fn process(&self, request: InboundRequest) -> std::result::Result<Option<Value>, ProcessError>;
}

pub struct DeliveryAdapter {
    identity: String,
    table: Arc<SubscriptionTable>,
    processor: Arc<dyn ActorProcessor>,
}

impl DeliveryAdapter {
    pub fn new(
        identity: impl Into<String>,
        table: Arc<SubscriptionTable>,
        processor: Arc<dyn ActorProcessor>,
    ) -> Self {
        Self {
            identity: identity.into(),
            table,
            processor,
        }
    }

    fn classify(
        &self,
        topic: &str,
        method: &str,
        outcome: std::result::Result<Option<Value>, ProcessError>,
    ) -> Result<()> {
        match outcome {
            Ok(reply) => {
                if let Some(reply) = reply.filter(|r| !r.is_null()) {
                    trace!(actor = %self.identity, topic, method, %reply, "Handler replied");
                }
                Ok(())
            }
            Err(e) if e.is_terminal() => Err(PubSubError::Delivery {
                actor: self.identity.clone(),
                source: e,
            }),
            Err(e) => {
                warn!(actor = %self.identity, topic, method, error = %e, "Handler failed");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DeliveryTarget for DeliveryAdapter {
    async fn deliver(&self, topic: &str, raw: &str) -> Result<()> {
        if self.table.is_shut_down() {
            return Err(PubSubError::ShutDown);
        }
        let method = self
            .table
            .handler(topic)
            .ok_or_else(|| PubSubError::SubscriptionInconsistency {
                actor: self.identity.clone(),
                topic: topic.to_string(),
            })?;
        let message = TopicMessage::decode(raw)?;

        let request = InboundRequest::from_message(&self.identity, &method, message);
        let outcome = self.processor.process(request).await;
        self.classify(topic, &method, outcome)
    }

    fn dropped(&self, topic: &str) {
        self.table.mark_dropped(topic);
    }
}
