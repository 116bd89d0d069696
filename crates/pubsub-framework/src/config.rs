//! # Relay Configuration
//!
//! Connection parameters for the broker and the topic namespace conventions
//! enforced by [`PubSubProxy`](crate::proxy::PubSubProxy).
//!
//! ```toml
//! insecure_channel_prefix = "anybody/"
//! forum_prefix = "forum-"
//! mailbox_capacity = 32
//!
//! [broker]
//! hostname = "localhost"
//! port = 6379
//! password = "secret"
//! ```

use crate::error::{PubSubError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Where the broker lives and how to authenticate against it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BrokerConfig {
    pub hostname: String,
    pub port: u16,
    #[serde(default)]
    pub password: Option<String>,
}

/// Top-level configuration for one relay process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PubSubConfig {
    pub broker: BrokerConfig,

    /// Topics anybody may publish to.
    #[serde(default = "default_insecure_prefix")]
    pub insecure_channel_prefix: String,

    /// Shared topics every actor may publish to.
    #[serde(default = "default_forum_prefix")]
    pub forum_prefix: String,

    /// Separates the owner from the rest of an actor name (`owner-local`).
    #[serde(default = "default_owner_separator")]
    pub owner_separator: String,

    /// Capacity of each actor's mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,
}

fn default_insecure_prefix() -> String {
    "anybody/".to_string()
}

fn default_forum_prefix() -> String {
    "forum-".to_string()
}

fn default_owner_separator() -> String {
    "-".to_string()
}

fn default_mailbox_capacity() -> usize {
    32
}

impl PubSubConfig {
    /// Configuration for a broker running in this process.
    pub fn local() -> Self {
        Self::with_broker(BrokerConfig {
            hostname: "localhost".to_string(),
            port: 6379,
            password: None,
        })
    }

    pub fn with_broker(broker: BrokerConfig) -> Self {
        Self {
            broker,
            insecure_channel_prefix: default_insecure_prefix(),
            forum_prefix: default_forum_prefix(),
            owner_separator: default_owner_separator(),
            mailbox_capacity: default_mailbox_capacity(),
        }
    }

    /// Load and validate configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: PubSubConfig = toml::from_str(contents)
            .map_err(|e| PubSubError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot possibly reach a broker.
    pub fn validate(&self) -> Result<()> {
        if self.broker.hostname.trim().is_empty() {
            return Err(PubSubError::Configuration(
                "broker.hostname must not be empty".to_string(),
            ));
        }
        if self.broker.port == 0 {
            return Err(PubSubError::Configuration(
                "broker.port must be > 0".to_string(),
            ));
        }
        if self.insecure_channel_prefix.is_empty() || self.forum_prefix.is_empty() {
            return Err(PubSubError::Configuration(
                "topic prefixes must not be empty".to_string(),
            ));
        }
        if self.owner_separator.is_empty() {
            return Err(PubSubError::Configuration(
                "owner_separator must not be empty".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(PubSubError::Configuration(
                "mailbox_capacity must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}
