use super::checkpoint::HostCheckpoint;
use super::message::ActorRequest;
use crate::error::HostError;
use async_trait::async_trait;
use pubsub_framework::{ActorProcessor, InboundRequest, ProcessError};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, instrument};

/// Cloneable handle to one hosted actor.
#[derive(Clone)]
pub struct ActorClient {
    identity: Arc<str>,
    sender: mpsc::Sender<ActorRequest>,
}

impl ActorClient {
    pub fn new(identity: &str, sender: mpsc::Sender<ActorRequest>) -> Self {
        Self {
            identity: Arc::from(identity),
            sender,
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    #[instrument(skip(self, args), fields(actor = %self.identity))]
    pub async fn invoke(&self, method: &str, args: Vec<Value>) -> Result<Value, HostError> {
        debug!("Sending request");
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ActorRequest::Invoke {
                method: method.to_string(),
                args,
                respond_to,
            })
            .await
            .map_err(|_| HostError::ActorClosed)?;
        response.await.map_err(|_| HostError::ActorDropped)?
    }

    pub async fn get_state(&self) -> Result<Value, HostError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ActorRequest::GetState { respond_to })
            .await
            .map_err(|_| HostError::ActorClosed)?;
        response.await.map_err(|_| HostError::ActorDropped)?
    }

    pub async fn checkpoint(&self) -> Result<HostCheckpoint, HostError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ActorRequest::Checkpoint { respond_to })
            .await
            .map_err(|_| HostError::ActorClosed)?;
        response.await.map_err(|_| HostError::ActorDropped)?
    }

    pub async fn shutdown(&self) -> Result<(), HostError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(ActorRequest::Shutdown { respond_to })
            .await
            .map_err(|_| HostError::ActorClosed)?;
        response.await.map_err(|_| HostError::ActorDropped)?
    }

    /// A processor that does not keep the mailbox open.
    pub(crate) fn downgrade(&self) -> MailboxProcessor {
        MailboxProcessor {
            sender: self.sender.downgrade(),
        }
    }
}

async fn deliver(
    sender: &mpsc::Sender<ActorRequest>,
    request: InboundRequest,
) -> Result<Option<Value>, ProcessError> {
    let (respond_to, response) = oneshot::channel();
    sender
        .send(ActorRequest::Deliver {
            request,
            respond_to,
        })
        .await
        .map_err(|_| ProcessError::System(HostError::ActorClosed.to_string()))?;
    response
        .await
        .map_err(|_| ProcessError::System(HostError::ActorDropped.to_string()))?
}

#[async_trait]
impl ActorProcessor for ActorClient {
    async fn process(&self, request: InboundRequest) -> Result<Option<Value>, ProcessError> {
        deliver(&self.sender, request).await
    }
}

/// Entry point handed to the actor's own pub/sub plug.
///
/// The plug lives inside the actor and its adapter is shared with the relay,
/// so a strong sender here would keep the mailbox open forever.
pub(crate) struct MailboxProcessor {
    sender: mpsc::WeakSender<ActorRequest>,
}

#[async_trait]
impl ActorProcessor for MailboxProcessor {
    async fn process(&self, request: InboundRequest) -> Result<Option<Value>, ProcessError> {
        let sender = self
            .sender
            .upgrade()
            .ok_or_else(|| ProcessError::System(HostError::ActorClosed.to_string()))?;
        deliver(&sender, request).await
    }
}
