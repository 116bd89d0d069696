//! # Hello Actor
//!
//! The demo actor. It exposes the pub/sub API as client methods and records
//! what its topic handlers receive:
//!
//! - `handler1` stores the value under `h1[topic]`
//! - `handler2` stores the value under `h2[topic]`
//! - `handler_exception` stores into both, then fails with an exception, so
//!   neither write survives
//! - `handler_system_failure` fails in a way that costs the subscription
//!
//! ```rust,no_run
//! use pubsub_framework::mock::MockBroker;
//! use pubsub_framework::PubSubConfig;
//! use pubsub_sample::lifecycle::PubSubSystem;
//! use pubsub_sample::hello_actor::HelloActor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut system = PubSubSystem::start(PubSubConfig::local(), &MockBroker::new()).await?;
//!     let alice = system.spawn_hello("alice-inbox").await?;
//!     alice.subscribe("forum-news", "handler1").await?;
//!     system.shutdown().await?;
//!     Ok(())
//! }
//! ```

use crate::error::HandlerError;
use crate::host::behavior::{arg_opt_str, arg_str, arg_value};
use crate::host::ActorBehavior;
use async_trait::async_trait;
use pubsub_framework::PubSubProxy;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const HANDLER1: &str = "handler1";
pub const HANDLER2: &str = "handler2";
pub const HANDLER_EXCEPTION: &str = "handler_exception";
pub const HANDLER_SYSTEM_FAILURE: &str = "handler_system_failure";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HelloActor {
    pub h1: BTreeMap<String, Value>,
    pub h2: BTreeMap<String, Value>,
}

#[async_trait]
impl ActorBehavior for HelloActor {
    const METHODS: &'static [&'static str] = &[
        "subscribe",
        "unsubscribe",
        "publish",
        "publish_fail",
        HANDLER1,
        HANDLER2,
        HANDLER_EXCEPTION,
        HANDLER_SYSTEM_FAILURE,
    ];

    async fn invoke(
        &mut self,
        method: &str,
        args: Vec<Value>,
        pubsub: &mut PubSubProxy<'_>,
    ) -> Result<Value, HandlerError> {
        match method {
            "subscribe" => {
                let topic = arg_str(method, &args, 0)?;
                let handler = arg_str(method, &args, 1)?;
                pubsub.subscribe(topic, handler)?;
            }
            "unsubscribe" => {
                pubsub.unsubscribe(arg_opt_str(method, &args, 0)?)?;
            }
            "publish" => {
                let topic = arg_str(method, &args, 0)?;
                pubsub.publish(topic, arg_value(method, &args, 1)?)?;
            }
            "publish_fail" => {
                let topic = arg_str(method, &args, 0)?;
                pubsub.publish(topic, arg_value(method, &args, 1)?)?;
                return Err(HandlerError::Application("Oops".to_string()));
            }
            HANDLER1 => {
                let topic = arg_str(method, &args, 0)?;
                self.h1.insert(topic.to_string(), arg_value(method, &args, 1)?);
            }
            HANDLER2 => {
                let topic = arg_str(method, &args, 0)?;
                self.h2.insert(topic.to_string(), arg_value(method, &args, 1)?);
            }
            HANDLER_EXCEPTION => {
                let topic = arg_str(method, &args, 0)?;
                let value = arg_value(method, &args, 1)?;
                self.h1.insert(topic.to_string(), value.clone());
                self.h2.insert(topic.to_string(), value);
                return Err(HandlerError::Exception("Really Oops".to_string()));
            }
            HANDLER_SYSTEM_FAILURE => {
                return Err(HandlerError::System("handler lost its resources".to_string()));
            }
            other => return Err(HandlerError::UnknownMethod(other.to_string())),
        }
        Ok(Value::Null)
    }
}
