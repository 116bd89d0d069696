//! # Hosted Actor
//!
//! The server half of a hosted actor. It owns the behaviour state, the
//! actor's [`PubSubPlug`] and the receiving end of its mailbox.
//!
//! Every mailbox message that runs application code runs inside one
//! transaction:
//!
//! 1. `begin` on the plug, and a copy of the state is kept.
//! 2. The method runs with a [`PubSubProxy`] over the plug.
//! 3. On success: `prepare`, store the checkpoint, then `commit`.
//! 4. On failure: restore the copy and `abort`. Nothing the method
//!    published or subscribed becomes visible.
//!
//! Messages are processed one at a time, so neither the state nor the plug
//! needs a lock.

use super::behavior::ActorBehavior;
use super::checkpoint::{CheckpointStore, HostCheckpoint};
use super::client::ActorClient;
use super::message::ActorRequest;
use crate::error::{HandlerError, HostError};
use futures::FutureExt;
use pubsub_framework::{
    InboundRequest, ProcessError, PubSubConfig, PubSubPlug, PubSubProxy, TopicMultiplexer,
    TopicPolicy, TransactionalPlug,
};
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

enum Call<'m> {
    Init,
    Invoke { method: &'m str, args: Vec<Value> },
}

pub struct HostedActor<B: ActorBehavior> {
    identity: String,
    behavior: B,
    plug: PubSubPlug,
    policy: TopicPolicy,
    store: CheckpointStore,
    receiver: mpsc::Receiver<ActorRequest>,
}

impl<B: ActorBehavior> HostedActor<B> {
    /// Creates the actor and its client. The actor does nothing until
    /// [`start`](Self::start) and [`run`](Self::run).
    pub fn new(
        identity: &str,
        behavior: B,
        mux: TopicMultiplexer,
        config: &PubSubConfig,
        store: CheckpointStore,
    ) -> (Self, ActorClient) {
        let (sender, receiver) = mpsc::channel(config.mailbox_capacity);
        let client = ActorClient::new(identity, sender);
        let plug = PubSubPlug::new(identity, mux, Arc::new(client.downgrade()));
        let actor = Self {
            identity: identity.to_string(),
            behavior,
            plug,
            policy: TopicPolicy::for_identity(identity, config),
            store,
            receiver,
        };
        (actor, client)
    }

    /// Bring the actor up, either fresh or from `checkpoint`.
    ///
    /// A fresh actor runs `init` in its first transaction. A resumed actor
    /// takes its state from the checkpoint and rebuilds its subscriptions.
    pub async fn start(&mut self, checkpoint: Option<HostCheckpoint>) -> Result<(), HostError> {
        self.plug.init().await?;
        match checkpoint {
            Some(checkpoint) => {
                self.behavior = serde_json::from_value(checkpoint.state)?;
                self.plug.resume(checkpoint.pubsub).await?;
                info!(actor = %self.identity, "Resumed");
            }
            None => {
                self.transaction(Call::Init).await?;
                info!(actor = %self.identity, "Initialized");
            }
        }
        Ok(())
    }

    pub async fn run(mut self) {
        info!(actor = %self.identity, "Actor started");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                ActorRequest::Invoke {
                    method,
                    args,
                    respond_to,
                } => {
                    debug!(actor = %self.identity, method = %method, "Invoke");
                    let result = self.invoke(&method, args).await;
                    if let Err(e) = &result {
                        warn!(actor = %self.identity, method = %method, error = %e, "Invoke failed");
                    }
                    let _ = respond_to.send(result);
                }
                ActorRequest::Deliver {
                    request,
                    respond_to,
                } => {
                    let result = self.deliver(request).await;
                    let _ = respond_to.send(result);
                }
                ActorRequest::GetState { respond_to } => {
                    let _ = respond_to.send(serde_json::to_value(&self.behavior).map_err(Into::into));
                }
                ActorRequest::Checkpoint { respond_to } => {
                    let _ = respond_to.send(self.checkpoint().await);
                }
                ActorRequest::Shutdown { respond_to } => {
                    let result = self.plug.shutdown().await.map_err(Into::into);
                    info!(actor = %self.identity, "Shutdown");
                    let _ = respond_to.send(result);
                    return;
                }
            }
        }

        if let Err(e) = self.plug.shutdown().await {
            warn!(actor = %self.identity, error = %e, "Shutdown failed");
        }
        info!(actor = %self.identity, "Shutdown");
    }

    async fn invoke(&mut self, method: &str, args: Vec<Value>) -> Result<Value, HostError> {
        if !B::METHODS.iter().any(|known| *known == method) {
            return Err(HandlerError::UnknownMethod(method.to_string()).into());
        }
        self.transaction(Call::Invoke { method, args }).await
    }

    async fn deliver(&mut self, request: InboundRequest) -> Result<Option<Value>, ProcessError> {
        debug!(
            actor = %self.identity,
            topic = %request.topic,
            handler = %request.method,
            from = %request.from,
            "Deliver"
        );
        let args = vec![json!(request.topic), request.value, json!(request.from)];
        match self.invoke(&request.method, args).await {
            Ok(reply) => Ok(Some(reply)),
            Err(e) => Err(e.to_process_error()),
        }
    }

    async fn checkpoint(&mut self) -> Result<HostCheckpoint, HostError> {
        Ok(HostCheckpoint {
            state: serde_json::to_value(&self.behavior)?,
            pubsub: self.plug.prepare().await?,
        })
    }

    /// Run `call` as one transaction.
    async fn transaction(&mut self, call: Call<'_>) -> Result<Value, HostError> {
        self.plug.begin().await?;
        let saved = self.behavior.clone();

        let outcome = {
            let behavior = &mut self.behavior;
            let mut proxy = PubSubProxy::new(&mut self.plug, &self.policy, B::METHODS);
            let body = async {
                match call {
                    Call::Init => behavior.init(&mut proxy).await.map(|()| Value::Null),
                    Call::Invoke { method, args } => behavior.invoke(method, args, &mut proxy).await,
                }
            };
            AssertUnwindSafe(body)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(HandlerError::Exception("handler panicked".to_string())))
        };

        match outcome {
            Ok(value) => {
                if let Err(e) = self.persist().await {
                    self.behavior = saved;
                    self.plug.abort().await?;
                    return Err(e);
                }
                self.plug.commit().await?;
                Ok(value)
            }
            Err(e) => {
                self.behavior = saved;
                self.plug.abort().await?;
                Err(e.into())
            }
        }
    }

    async fn persist(&mut self) -> Result<(), HostError> {
        let checkpoint = self.checkpoint().await?;
        self.store.save(&self.identity, &checkpoint)
    }
}
