//! # Actor Host
//!
//! A minimal actor runtime that drives the pub/sub lifecycle hooks: one tokio
//! task per actor, a bounded mailbox, one transaction per message and a
//! checkpoint after every commit.
//!
//! ## Structure
//!
//! - [`actor`] - [`HostedActor`], the mailbox loop and transaction driver
//! - [`behavior`] - [`ActorBehavior`], implemented by application actors
//! - [`client`] - [`ActorClient`], the cloneable handle
//! - [`checkpoint`] - [`CheckpointStore`] and the persisted record
//! - [`message`] - [`ActorRequest`], the mailbox protocol

pub mod actor;
pub mod behavior;
pub mod checkpoint;
pub mod client;
pub mod message;

pub use actor::HostedActor;
pub use behavior::ActorBehavior;
pub use checkpoint::{CheckpointStore, HostCheckpoint};
pub use client::ActorClient;
pub use message::{ActorRequest, Response};

use crate::error::HostError;
use pubsub_framework::{PubSubConfig, TopicMultiplexer};
use tokio::task::JoinHandle;

/// Create, start and spawn one actor.
///
/// The actor resumes from `store` when it holds a checkpoint for `identity`,
/// and starts from `B::default()` otherwise.
pub async fn spawn<B: ActorBehavior + Default>(
    identity: &str,
    mux: &TopicMultiplexer,
    config: &PubSubConfig,
    store: &CheckpointStore,
) -> Result<(ActorClient, JoinHandle<()>), HostError> {
    let checkpoint = store.load(identity)?;
    let (mut actor, client) =
        HostedActor::new(identity, B::default(), mux.clone(), config, store.clone());
    actor.start(checkpoint).await?;
    let handle = tokio::spawn(actor.run());
    Ok((client, handle))
}
