//! # Pub/Sub Framework
//!
//! A transactional publish/subscribe relay for actors that share one process
//! and one broker connection.
//!
//! Actors publish, subscribe and unsubscribe as part of processing a message.
//! None of it is visible until the actor runtime commits that message's
//! transaction, and all of it survives the actor crashing or moving to
//! another task because subscriptions are rebuilt from the actor's checkpoint.
//!
//! ## Architecture Overview
//!
//! 1. **Transaction layer** ([`TransactionLog`], [`PubSubPlug`]) buffers one
//!    actor's operations and replays them on commit. The plug is a decorator
//!    over the generic log and adds the committed subscription map.
//! 2. **Relay layer** ([`TopicMultiplexer`]) owns the broker connection,
//!    reference-counts topic interest across actors and fans inbound messages
//!    out concurrently.
//! 3. **Delivery layer** ([`DeliveryAdapter`]) turns a broker payload into an
//!    [`InboundRequest`] for one actor and decides whether a failure should
//!    cost the actor its subscription.
//!
//! Application code only sees a [`PubSubProxy`], which checks topic
//! namespaces and handler names before anything is buffered.
//!
//! ## Lifecycle
//!
//! ```text
//! begin ──► handler (proxy.publish / subscribe / unsubscribe) ──► prepare ──► commit
//!   │                                                              │
//!   └──────────────────────────── abort ◄──── handler failed ──────┘
//!
//! crash/migrate ──► resume(checkpoint) ──► replay pending ──► re-register subscriptions
//! ```
//!
//! ## Testing
//!
//! The [`mock`] module provides an in-process broker and a scripted actor
//! entry point. See `tests/relay_test.rs` for end-to-end relay scenarios.

pub mod adapter;
pub mod broker;
pub mod config;
pub mod error;
pub mod message;
pub mod mock;
pub mod multiplexer;
pub mod plug;
pub mod proxy;
pub mod subscriptions;
pub mod tracing;
pub mod transaction;

pub use adapter::{ActorProcessor, DeliveryAdapter};
pub use broker::{Broker, BrokerEvent, Connection, Connector};
pub use config::{BrokerConfig, PubSubConfig};
pub use error::{ProcessError, PubSubError, Result};
pub use message::{Checkpoint, InboundRequest, PendingOperation, TopicMessage, DEFAULT_SESSION};
pub use multiplexer::{DeliveryReport, DeliveryTarget, TopicMultiplexer};
pub use plug::PubSubPlug;
pub use proxy::{PubSubProxy, TopicPolicy};
pub use transaction::{ActionTarget, TransactionLog, TransactionalPlug};
