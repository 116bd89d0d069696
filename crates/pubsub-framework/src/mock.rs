//! # Test Doubles
//!
//! In-memory stand-ins for the two external collaborators of the relay.
//!
//! | Double | Replaces | Useful for |
//! |--------|----------|------------|
//! | [`MockBroker`] | the broker connection | counting subscribe/unsubscribe calls, failure injection, loopback delivery |
//! | [`MockProcessor`] | an actor's processing entry point | scripting handler outcomes, inspecting built requests |
//!
//! `MockBroker` behaves like a pub/sub server: a publish is echoed back to
//! the relay only while the topic is subscribed.
//!
//! ```rust
//! use pubsub_framework::mock::MockBroker;
//! use pubsub_framework::{PubSubConfig, TopicMultiplexer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let broker = MockBroker::new();
//!     let mux = TopicMultiplexer::new();
//!     mux.connect(&PubSubConfig::local(), &broker).await.unwrap();
//!
//!     mux.publish("forum-news", "{}").await.unwrap();
//!     assert_eq!(broker.published("forum-news").len(), 1);
//! }
//! ```

use crate::adapter::ActorProcessor;
use crate::broker::{Broker, BrokerEvent, Connection, Connector};
use crate::config::BrokerConfig;
use crate::error::{ProcessError, PubSubError, Result};
use crate::message::InboundRequest;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Default)]
struct BrokerState {
    subscribed: HashSet<String>,
    subscribe_calls: HashMap<String, usize>,
    unsubscribe_calls: HashMap<String, usize>,
    published: HashMap<String, Vec<String>>,
    fail_subscribe: HashSet<String>,
    fail_publish: HashSet<String>,
    fail_connect: Option<String>,
    events: Option<mpsc::UnboundedSender<BrokerEvent>>,
    connections: usize,
}

/// In-process broker. Clones share state.
#[derive(Clone, Default)]
pub struct MockBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_subscribe_on(&self, topic: &str) {
        self.state.lock().fail_subscribe.insert(topic.to_string());
    }

    pub fn fail_publish_on(&self, topic: &str) {
        self.state.lock().fail_publish.insert(topic.to_string());
    }

    pub fn fail_connect(&self, reason: &str) {
        self.state.lock().fail_connect = Some(reason.to_string());
    }

    pub fn subscribe_calls(&self, topic: &str) -> usize {
        self.state.lock().subscribe_calls.get(topic).copied().unwrap_or(0)
    }

    pub fn unsubscribe_calls(&self, topic: &str) -> usize {
        self.state.lock().unsubscribe_calls.get(topic).copied().unwrap_or(0)
    }

    pub fn published(&self, topic: &str) -> Vec<String> {
        self.state.lock().published.get(topic).cloned().unwrap_or_default()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.state.lock().subscribed.contains(topic)
    }

    pub fn connections(&self) -> usize {
        self.state.lock().connections
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().events.is_none()
    }

    /// Push a raw payload to the relay whether or not the topic is subscribed.
    pub fn inject(&self, topic: &str, payload: &str) {
        self.send(BrokerEvent::Message {
            topic: topic.to_string(),
            payload: payload.to_string(),
        });
    }

    /// Simulate a lost connection.
    pub fn inject_error(&self, reason: &str) {
        self.send(BrokerEvent::Error(reason.to_string()));
    }

    fn send(&self, event: BrokerEvent) {
        if let Some(events) = &self.state.lock().events {
            let _ = events.send(event);
        }
    }

    fn closed_error(operation: &'static str, topic: &str) -> PubSubError {
        PubSubError::broker(operation, topic, "connection closed")
    }
}

#[async_trait]
impl Connector for MockBroker {
    async fn connect(&self, _config: &BrokerConfig) -> Result<Connection> {
        let mut state = self.state.lock();
        if let Some(reason) = &state.fail_connect {
            return Err(PubSubError::Connection(reason.clone()));
        }
        let (sender, events) = mpsc::unbounded_channel();
        state.events = Some(sender);
        state.connections += 1;
        Ok(Connection {
            broker: Arc::new(self.clone()),
            events,
        })
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn subscribe(&self, topic: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(Self::closed_error("subscribe", topic));
        }
        if state.fail_subscribe.contains(topic) {
            return Err(PubSubError::broker("subscribe", topic, "refused"));
        }
        *state.subscribe_calls.entry(topic.to_string()).or_default() += 1;
        state.subscribed.insert(topic.to_string());
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(Self::closed_error("unsubscribe", topic));
        }
        *state.unsubscribe_calls.entry(topic.to_string()).or_default() += 1;
        state.subscribed.remove(topic);
        Ok(())
    }

    async fn publish(&self, topic: &str, payload: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.events.is_none() {
            return Err(Self::closed_error("publish", topic));
        }
        if state.fail_publish.contains(topic) {
            return Err(PubSubError::broker("publish", topic, "refused"));
        }
        state
            .published
            .entry(topic.to_string())
            .or_default()
            .push(payload.to_string());
        if state.subscribed.contains(topic) {
            if let Some(events) = &state.events {
                let _ = events.send(BrokerEvent::Message {
                    topic: topic.to_string(),
                    payload: payload.to_string(),
                });
            }
        }
        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock();
        state.events = None;
        state.subscribed.clear();
    }
}

// =============================================================================
// PROCESSOR EXPECTATIONS
// =============================================================================

type Outcome = std::result::Result<Option<Value>, ProcessError>;

/// Scripted actor entry point. Unscripted calls return `Ok(None)`.
#[derive(Clone, Default)]
pub struct MockProcessor {
    expectations: Arc<Mutex<VecDeque<Outcome>>>,
    received: Arc<Mutex<Vec<InboundRequest>>>,
}

impl MockProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue the outcome of the next `process` call.
    pub fn expect_process(&self) -> ProcessExpectationBuilder {
        ProcessExpectationBuilder {
            expectations: self.expectations.clone(),
        }
    }

    pub fn received(&self) -> Vec<InboundRequest> {
        self.received.lock().clone()
    }

    /// Panics if a queued outcome was never consumed.
    pub fn verify(&self) {
        let remaining = self.expectations.lock().len();
        if remaining > 0 {
            panic!("Not all expectations were met. {} remaining", remaining);
        }
    }
}

#[async_trait]
impl ActorProcessor for MockProcessor {
    async fn process(&self, request: InboundRequest) -> Outcome {
        self.received.lock().push(request);
        let next = self.expectations.lock().pop_front();
        next.unwrap_or(Ok(None))
    }
}

pub struct ProcessExpectationBuilder {
    expectations: Arc<Mutex<VecDeque<Outcome>>>,
}

impl ProcessExpectationBuilder {
    pub fn return_ok(self, reply: Option<Value>) {
        self.expectations.lock().push_back(Ok(reply));
    }

    pub fn return_err(self, error: ProcessError) {
        self.expectations.lock().push_back(Err(error));
    }
}
