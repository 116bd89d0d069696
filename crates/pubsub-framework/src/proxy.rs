//! # Scoping Proxy
//!
//! What application code actually holds while handling a message. The proxy
//! enforces the topic namespace before anything reaches the transaction log:
//! an actor may only publish on its own topics (`<owner>-...`), shared forum
//! topics (`forum-...`) or explicitly insecure ones (`anybody/...`). It may
//! subscribe to any topic, but only with a handler it actually implements.

use crate::config::PubSubConfig;
use crate::error::{PubSubError, Result};
use crate::plug::PubSubPlug;
use serde_json::Value;
use tracing::{debug, instrument};

/// Topic prefixes an actor may publish on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicPolicy {
    owner_prefix: String,
    forum_prefix: String,
    insecure_prefix: String,
}

impl TopicPolicy {
    /// Derive the owner prefix from an actor name such as `alice-inbox`.
    pub fn for_identity(identity: &str, config: &PubSubConfig) -> Self {
        let separator = config.owner_separator.as_str();
        let owner = identity.split(separator).next().unwrap_or(identity);
        Self {
            owner_prefix: format!("{owner}{separator}"),
            forum_prefix: config.forum_prefix.clone(),
            insecure_prefix: config.insecure_channel_prefix.clone(),
        }
    }

    pub fn owner_prefix(&self) -> &str {
        &self.owner_prefix
    }

    pub fn check(&self, topic: &str) -> Result<()> {
        let allowed = [&self.owner_prefix, &self.forum_prefix, &self.insecure_prefix]
            .iter()
            .any(|prefix| topic.starts_with(prefix.as_str()));
        if allowed {
            Ok(())
        } else {
            Err(PubSubError::TopicAuthorization {
                topic: topic.to_string(),
                prefix: self.owner_prefix.clone(),
            })
        }
    }
}

pub struct PubSubProxy<'a> {
    plug: &'a mut PubSubPlug,
    policy: &'a TopicPolicy,
    methods: &'a [&'a str],
}

impl<'a> PubSubProxy<'a> {
    pub fn new(plug: &'a mut PubSubPlug, policy: &'a TopicPolicy, methods: &'a [&'a str]) -> Self {
        Self {
            plug,
            policy,
            methods,
        }
    }

    #[instrument(skip(self, value), fields(actor = %self.plug.identity()))]
    pub fn publish(&mut self, topic: &str, value: Value) -> Result<()> {
        self.policy.check(topic)?;
        self.plug.publish(topic, value)
    }

    #[instrument(skip(self), fields(actor = %self.plug.identity()))]
    pub fn subscribe(&mut self, topic: &str, handler: &str) -> Result<()> {
        if !self.methods.iter().any(|method| *method == handler) {
            debug!(handler, "Rejected subscribe with unknown handler");
            return Err(PubSubError::UnknownHandler(handler.to_string()));
        }
        self.plug.subscribe(topic, handler)
    }

    pub fn unsubscribe(&mut self, topic: Option<&str>) -> Result<()> {
        self.plug.unsubscribe(topic)
    }

    /// Committed subscriptions, as of the start of this transaction.
    pub fn subscriptions(&self) -> std::collections::BTreeMap<String, String> {
        self.plug.subscriptions()
    }
}
