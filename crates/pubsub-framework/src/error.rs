//! # Framework Errors
//!
//! This module defines the error types shared by the multiplexer, the
//! transactional plug and the delivery adapter. Keeping them in one enum lets
//! a commit failure carry the broker error that caused it.

/// Outcome of an actor's processing entry point when it did not return normally.
///
/// Only [`ProcessError::System`] is terminal for a subscription; the other two
/// are contained inside the actor.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProcessError {
    #[error("Application error: {0}")]
    Application(String),
    #[error("Handler exception: {0}")]
    Exception(String),
    #[error("System error: {0}")]
    System(String),
}

impl ProcessError {
    /// Whether this outcome should remove the subscriber from the multiplexer.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessError::System(_))
    }
}

/// Errors that can occur within the pub/sub relay.
#[derive(Debug, thiserror::Error)]
pub enum PubSubError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Broker connection failed: {0}")]
    Connection(String),

    #[error("No broker connection")]
    NoConnection,

    #[error("Broker rejected {operation} on topic {topic}: {reason}")]
    Broker {
        operation: &'static str,
        topic: String,
        reason: String,
    },

    #[error("Actor {actor} has no subscription for topic {topic}")]
    SubscriptionInconsistency { actor: String, topic: String },

    #[error("Delivery to {actor} failed: {source}")]
    Delivery {
        actor: String,
        #[source]
        source: ProcessError,
    },

    #[error("Invalid topic {topic}, should have prefix {prefix}")]
    TopicAuthorization { topic: String, prefix: String },

    #[error("Unknown handler: {0}")]
    UnknownHandler(String),

    #[error("Commit replay failed at operation {index} of {total}: {source}")]
    Replay {
        index: usize,
        total: usize,
        #[source]
        source: Box<PubSubError>,
    },

    #[error("Plug is shut down")]
    ShutDown,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PubSubError {
    pub(crate) fn broker(
        operation: &'static str,
        topic: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PubSubError::Broker {
            operation,
            topic: topic.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PubSubError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PubSubError::TopicAuthorization {
            topic: "topic".to_string(),
            prefix: "alice-".to_string(),
        };
        assert_eq!(err.to_string(), "Invalid topic topic, should have prefix alice-");

        let err = PubSubError::broker("subscribe", "forum-news", "refused");
        assert_eq!(
            err.to_string(),
            "Broker rejected subscribe on topic forum-news: refused"
        );

        let err = PubSubError::Replay {
            index: 1,
            total: 3,
            source: Box::new(PubSubError::NoConnection),
        };
        assert_eq!(
            err.to_string(),
            "Commit replay failed at operation 1 of 3: No broker connection"
        );
    }

    #[test]
    fn test_replay_keeps_source_chain() {
        use std::error::Error;

        let err = PubSubError::Replay {
            index: 0,
            total: 1,
            source: Box::new(PubSubError::NoConnection),
        };
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("No broker connection"));
    }

    #[test]
    fn test_only_system_errors_are_terminal() {
        assert!(ProcessError::System("mailbox closed".into()).is_terminal());
        assert!(!ProcessError::Application("bad input".into()).is_terminal());
        assert!(!ProcessError::Exception("Oops".into()).is_terminal());
    }
}
