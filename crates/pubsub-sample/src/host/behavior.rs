use crate::error::HandlerError;
use async_trait::async_trait;
use pubsub_framework::PubSubProxy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Application logic of a hosted actor.
///
/// The implementing type is the actor's state. It is cloned before each
/// method call so a failed call can be rolled back, and serialized into the
/// checkpoint after each successful one.
///
/// Topic handlers are ordinary methods called with `[topic, value, from]`.
#[async_trait]
pub trait ActorBehavior: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Every method name clients may call or subscriptions may name.
    const METHODS: &'static [&'static str];

    /// Runs once, inside the actor's first transaction.
    async fn init(&mut self, _pubsub: &mut PubSubProxy<'_>) -> Result<(), HandlerError> {
        Ok(())
    }

    async fn invoke(
        &mut self,
        method: &str,
        args: Vec<Value>,
        pubsub: &mut PubSubProxy<'_>,
    ) -> Result<Value, HandlerError>;
}

/// String argument `index` of `method`.
pub fn arg_str<'a>(method: &str, args: &'a [Value], index: usize) -> Result<&'a str, HandlerError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::BadArguments {
            method: method.to_string(),
            reason: format!("argument {} must be a string", index),
        })
}

/// Optional string argument: missing and `null` both read as `None`.
pub fn arg_opt_str<'a>(
    method: &str,
    args: &'a [Value],
    index: usize,
) -> Result<Option<&'a str>, HandlerError> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(_) => arg_str(method, args, index).map(Some),
    }
}

pub fn arg_value(method: &str, args: &[Value], index: usize) -> Result<Value, HandlerError> {
    args.get(index)
        .cloned()
        .ok_or_else(|| HandlerError::BadArguments {
            method: method.to_string(),
            reason: format!("missing argument {}", index),
        })
}
