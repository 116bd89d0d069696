//! # Pub/Sub Demo
//!
//! Three hello actors share one broker connection:
//!
//! 1. `alice` subscribes to `forum-topic1` with `handler1`, `bob` with `handler2`.
//! 2. `carol` publishes `hello1`. Both subscribers record it.
//! 3. `carol` publishes inside a failing transaction. Nobody sees it.
//! 4. `alice` crashes and is restarted from its checkpoint. The actor still
//!    receives messages and the broker saw a single subscribe.
//!
//! If the broker connection drops mid-run the demo stops early and the system
//! shuts down.
//!
//! Run with `RUST_LOG=debug cargo run -p pubsub-sample` to watch every
//! subscription transition. Pass a TOML file as the first argument to use a
//! non-default configuration.

use pubsub_framework::mock::MockBroker;
use pubsub_framework::tracing::setup_tracing;
use pubsub_framework::PubSubConfig;
use pubsub_sample::clients::HelloClient;
use pubsub_sample::error::HostError;
use pubsub_sample::hello_actor::{HelloActor, HANDLER1, HANDLER2};
use pubsub_sample::lifecycle::PubSubSystem;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

const TOPIC: &str = "forum-topic1";

#[tokio::main]
async fn main() -> Result<(), HostError> {
    setup_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => PubSubConfig::load(path)?,
        None => PubSubConfig::local(),
    };

    let broker = MockBroker::new();
    let mut system = PubSubSystem::start(config, &broker).await?;
    let relay = system.mux().clone();

    let outcome = tokio::select! {
        result = demo(&mut system, &broker) => result,
        _ = relay.closed() => {
            warn!("Broker connection lost, shutting down");
            Ok(())
        }
    };
    system.shutdown().await?;
    outcome
}

async fn demo(system: &mut PubSubSystem, broker: &MockBroker) -> Result<(), HostError> {
    let alice = system.spawn_hello("alice-a").await?;
    let bob = system.spawn_hello("bob-b").await?;
    let carol = system.spawn_hello("carol-c").await?;

    alice.subscribe(TOPIC, HANDLER1).await?;
    bob.subscribe(TOPIC, HANDLER2).await?;

    carol.publish(TOPIC, json!("hello1")).await?;
    settle().await;
    let (a, b) = (alice.get_state().await?, bob.get_state().await?);
    info!(alice = ?a.h1, bob = ?b.h2, "After first publish");

    if let Err(e) = carol.publish_fail(TOPIC, json!("hello2")).await {
        warn!(error = %e, "Publish rolled back");
    }
    settle().await;
    let a = alice.get_state().await?;
    info!(alice = ?a.h1, "After failed publish");

    system.crash("alice-a").await?;
    let alice = HelloClient::new(system.restart::<HelloActor>("alice-a").await?);
    carol.publish(TOPIC, json!("hello3")).await?;
    settle().await;
    let a = alice.get_state().await?;
    info!(
        alice = ?a.h1,
        broker_subscribes = broker.subscribe_calls(TOPIC),
        "After restart"
    );
    Ok(())
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
