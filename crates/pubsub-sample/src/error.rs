//! # Host Errors
//!
//! [`HandlerError`] is what application methods return. [`HostError`] is what
//! callers of an actor see, and adds the mailbox failures of the host itself.

use pubsub_framework::{ProcessError, PubSubError};

#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("Unknown method: {0}")]
    UnknownMethod(String),

    #[error("Bad arguments for {method}: {reason}")]
    BadArguments { method: String, reason: String },

    #[error("{0}")]
    Application(String),

    #[error("Handler exception: {0}")]
    Exception(String),

    #[error("System failure: {0}")]
    System(String),

    #[error(transparent)]
    PubSub(#[from] PubSubError),
}

#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("Actor closed")]
    ActorClosed,

    #[error("Actor dropped response channel")]
    ActorDropped,

    #[error("Actor not found: {0}")]
    ActorNotFound(String),

    #[error("No checkpoint for actor {0}")]
    NoCheckpoint(String),

    #[error(transparent)]
    Handler(#[from] HandlerError),

    #[error("Pub/sub failure: {0}")]
    PubSub(#[from] PubSubError),

    #[error("Checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HostError {
    /// How a failed delivery looks to the relay.
    ///
    /// Handler-level failures stay inside the actor. Failures of the host or
    /// of the relay itself cost the subscription.
    pub fn to_process_error(&self) -> ProcessError {
        match self {
            HostError::Handler(HandlerError::Exception(reason)) => {
                ProcessError::Exception(reason.clone())
            }
            HostError::Handler(HandlerError::System(reason)) => ProcessError::System(reason.clone()),
            HostError::Handler(HandlerError::UnknownMethod(method)) => {
                ProcessError::System(format!("no handler {}", method))
            }
            HostError::Handler(e) => ProcessError::Application(e.to_string()),
            other => ProcessError::System(other.to_string()),
        }
    }
}
