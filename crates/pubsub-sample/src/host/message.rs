use super::checkpoint::HostCheckpoint;
use crate::error::HostError;
use pubsub_framework::{InboundRequest, ProcessError};
use serde_json::Value;
use tokio::sync::oneshot;

pub type Response<T> = oneshot::Sender<Result<T, HostError>>;

/// Everything a hosted actor's mailbox accepts.
#[derive(Debug)]
pub enum ActorRequest {
    /// Client call of an application method.
    Invoke {
        method: String,
        args: Vec<Value>,
        respond_to: Response<Value>,
    },
    /// Topic message routed by the relay.
    Deliver {
        request: InboundRequest,
        respond_to: oneshot::Sender<Result<Option<Value>, ProcessError>>,
    },
    GetState {
        respond_to: Response<Value>,
    },
    /// Build the record `prepare` would persist, without a transaction.
    Checkpoint {
        respond_to: Response<HostCheckpoint>,
    },
    /// Release subscriptions and stop. The stored checkpoint is kept.
    Shutdown {
        respond_to: Response<()>,
    },
}
