//! # System Lifecycle
//!
//! [`PubSubSystem`] wires one process: it opens the shared broker connection,
//! spawns hosted actors against it and tears everything down in order.
//!
//! ## Failure drills
//!
//! | Call | What happens to the actor | Subscriptions |
//! |------|---------------------------|---------------|
//! | [`crash`](PubSubSystem::crash) | task aborted, no hooks run | stale targets stay registered until the actor is restarted or a delivery fails |
//! | [`restart`](PubSubSystem::restart) | fresh task resumed from the last checkpoint | re-registered in place, no broker traffic |
//! | [`migrate`](PubSubSystem::migrate) | graceful shutdown, then restart | released, then subscribed again |
//! | [`remove`](PubSubSystem::remove) | graceful shutdown, checkpoint deleted | released |
//!
//! ## Broker loss
//!
//! A watcher started with the system waits for the relay to close. When the
//! broker connection is lost it stops every running actor gracefully, the
//! same way [`shutdown`](PubSubSystem::shutdown) does, and later spawns are
//! refused. Checkpoints are kept so the actors can be restarted once a new
//! connection is up.

use crate::clients::HelloClient;
use crate::error::HostError;
use crate::hello_actor::HelloActor;
use crate::host::{self, ActorBehavior, ActorClient, CheckpointStore};
use parking_lot::Mutex;
use pubsub_framework::{Connector, PubSubConfig, PubSubError, TopicMultiplexer};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

struct Running {
    client: ActorClient,
    handle: JoinHandle<()>,
}

type Actors = Arc<Mutex<HashMap<String, Running>>>;

pub struct PubSubSystem {
    config: PubSubConfig,
    mux: TopicMultiplexer,
    store: CheckpointStore,
    actors: Actors,
    watcher: JoinHandle<()>,
}

impl PubSubSystem {
    /// Connect to the broker. No actors run yet.
    pub async fn start(config: PubSubConfig, connector: &dyn Connector) -> Result<Self, HostError> {
        let mux = TopicMultiplexer::new();
        mux.connect(&config, connector).await?;
        let actors = Actors::default();
        let watcher = tokio::spawn(watch_broker(mux.clone(), Arc::clone(&actors)));
        info!("System started");
        Ok(Self {
            config,
            mux,
            store: CheckpointStore::new(),
            actors,
            watcher,
        })
    }

    pub fn mux(&self) -> &TopicMultiplexer {
        &self.mux
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    pub fn client(&self, identity: &str) -> Option<ActorClient> {
        self.actors
            .lock()
            .get(identity)
            .map(|running| running.client.clone())
    }

    /// Spawn `identity`, resuming it if a checkpoint exists.
    pub async fn spawn<B: ActorBehavior + Default>(
        &mut self,
        identity: &str,
    ) -> Result<ActorClient, HostError> {
        if !self.mux.is_connected() {
            return Err(PubSubError::NoConnection.into());
        }
        let replaced = self.actors.lock().remove(identity);
        if let Some(running) = replaced {
            warn!(actor = identity, "Replacing running actor");
            running.handle.abort();
        }
        let (client, handle) =
            host::spawn::<B>(identity, &self.mux, &self.config, &self.store).await?;
        self.actors.lock().insert(
            identity.to_string(),
            Running {
                client: client.clone(),
                handle,
            },
        );
        Ok(client)
    }

    pub async fn spawn_hello(&mut self, identity: &str) -> Result<HelloClient, HostError> {
        self.spawn::<HelloActor>(identity).await.map(HelloClient::new)
    }

    /// Kill the actor's task without running any shutdown hook.
    pub async fn crash(&mut self, identity: &str) -> Result<(), HostError> {
        let running = self.take(identity)?;
        running.handle.abort();
        let _ = running.handle.await;
        warn!(actor = identity, "Crashed");
        Ok(())
    }

    /// Bring a crashed or stopped actor back from its last checkpoint.
    pub async fn restart<B: ActorBehavior + Default>(
        &mut self,
        identity: &str,
    ) -> Result<ActorClient, HostError> {
        if !self.store.contains(identity) {
            return Err(HostError::NoCheckpoint(identity.to_string()));
        }
        self.spawn::<B>(identity).await
    }

    /// Stop the actor gracefully and resume it on a fresh task.
    pub async fn migrate<B: ActorBehavior + Default>(
        &mut self,
        identity: &str,
    ) -> Result<ActorClient, HostError> {
        self.stop(identity).await?;
        info!(actor = identity, "Migrating");
        self.restart::<B>(identity).await
    }

    /// Stop the actor and forget its checkpoint.
    pub async fn remove(&mut self, identity: &str) -> Result<(), HostError> {
        self.stop(identity).await?;
        self.store.remove(identity);
        Ok(())
    }

    fn take(&self, identity: &str) -> Result<Running, HostError> {
        self.actors
            .lock()
            .remove(identity)
            .ok_or_else(|| HostError::ActorNotFound(identity.to_string()))
    }

    async fn stop(&mut self, identity: &str) -> Result<(), HostError> {
        let running = self.take(identity)?;
        running.client.shutdown().await?;
        let _ = running.handle.await;
        Ok(())
    }

    /// Identities of the actors currently running.
    pub fn running(&self) -> Vec<String> {
        let mut identities: Vec<String> = self.actors.lock().keys().cloned().collect();
        identities.sort();
        identities
    }

    /// Resolves when the broker connection is lost.
    pub async fn closed(&self) {
        self.mux.closed().await
    }

    /// Stop every actor, then close the broker connection.
    pub async fn shutdown(self) -> Result<(), HostError> {
        info!("Shutting down system...");
        self.watcher.abort();

        let running: Vec<(String, Running)> = self.actors.lock().drain().collect();
        let failed = stop_all(running).await;

        self.mux.shutdown().await;
        info!("System shutdown complete");
        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Drop for PubSubSystem {
    fn drop(&mut self) {
        self.watcher.abort();
    }
}

/// Gracefully stop `running`, returning the first failure.
async fn stop_all(running: Vec<(String, Running)>) -> Option<HostError> {
    let mut failed = None;
    for (identity, running) in running {
        if let Err(e) = running.client.shutdown().await {
            warn!(actor = %identity, error = %e, "Actor shutdown failed");
            failed.get_or_insert(e);
        }
        if let Err(e) = running.handle.await {
            error!(actor = %identity, error = %e, "Actor task failed");
        }
    }
    failed
}

async fn watch_broker(mux: TopicMultiplexer, actors: Actors) {
    mux.closed().await;
    let running: Vec<(String, Running)> = actors.lock().drain().collect();
    if running.is_empty() {
        return;
    }
    error!(actors = running.len(), "Broker connection lost, stopping actors");
    if let Some(e) = stop_all(running).await {
        warn!(error = %e, "Not every actor stopped cleanly");
    }
    info!("Actors stopped after broker loss");
}
