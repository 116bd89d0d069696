//! # Hello Client
//!
//! Typed API over the generic [`ActorClient`] for the hello actor.

use crate::error::HostError;
use crate::hello_actor::HelloActor;
use crate::host::ActorClient;
use serde_json::{json, Value};
use tracing::instrument;

#[derive(Clone)]
pub struct HelloClient {
    inner: ActorClient,
}

impl HelloClient {
    pub fn new(inner: ActorClient) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &ActorClient {
        &self.inner
    }

    pub fn identity(&self) -> &str {
        self.inner.identity()
    }

    #[instrument(skip(self))]
    pub async fn subscribe(&self, topic: &str, handler: &str) -> Result<(), HostError> {
        self.inner
            .invoke("subscribe", vec![json!(topic), json!(handler)])
            .await
            .map(|_| ())
    }

    /// `None` unsubscribes from everything.
    #[instrument(skip(self))]
    pub async fn unsubscribe(&self, topic: Option<&str>) -> Result<(), HostError> {
        self.inner
            .invoke("unsubscribe", vec![json!(topic)])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self, value))]
    pub async fn publish(&self, topic: &str, value: Value) -> Result<(), HostError> {
        self.inner
            .invoke("publish", vec![json!(topic), value])
            .await
            .map(|_| ())
    }

    /// Publishes, then fails the transaction.
    pub async fn publish_fail(&self, topic: &str, value: Value) -> Result<(), HostError> {
        self.inner
            .invoke("publish_fail", vec![json!(topic), value])
            .await
            .map(|_| ())
    }

    pub async fn get_state(&self) -> Result<HelloActor, HostError> {
        let state = self.inner.get_state().await?;
        Ok(serde_json::from_value(state)?)
    }
}
