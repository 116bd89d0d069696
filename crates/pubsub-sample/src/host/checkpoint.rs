use crate::error::HostError;
use parking_lot::RwLock;
use pubsub_framework::Checkpoint;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What the host persists for one actor after every committed transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostCheckpoint {
    pub state: Value,
    pub pubsub: Checkpoint,
}

/// In-memory checkpoint storage keyed by actor identity.
///
/// Records are stored serialized so a restart goes through the same decode
/// path a durable store would.
#[derive(Clone, Default)]
pub struct CheckpointStore {
    records: Arc<RwLock<HashMap<String, String>>>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, identity: &str, checkpoint: &HostCheckpoint) -> Result<(), HostError> {
        let record = serde_json::to_string(checkpoint)?;
        self.records.write().insert(identity.to_string(), record);
        Ok(())
    }

    pub fn load(&self, identity: &str) -> Result<Option<HostCheckpoint>, HostError> {
        let record = self.records.read().get(identity).cloned();
        match record {
            Some(record) => Ok(Some(serde_json::from_str(&record)?)),
            None => Ok(None),
        }
    }

    pub fn remove(&self, identity: &str) -> bool {
        self.records.write().remove(identity).is_some()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.records.read().contains_key(identity)
    }
}
