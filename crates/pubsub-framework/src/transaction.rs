//! # Transactional Log
//!
//! The base layer of every transactional plug. A [`TransactionLog`] buffers
//! operations while the owning actor processes a message and only replays
//! them against its [`ActionTarget`] once the actor runtime commits.
//!
//! Plugs that need more than buffering (the pub/sub plug keeps a committed
//! subscription map next to the log) wrap a `TransactionLog` and call it first
//! from each lifecycle hook, then add their own behaviour.
//!
//! ## Commit failures
//!
//! Replay stops at the first operation the target rejects. Operations before
//! it stay applied and leave the log; the rejected operation and everything
//! after it stay pending. The caller receives [`PubSubError::Replay`] with the
//! position of the failure.

use crate::error::{PubSubError, Result};
use async_trait::async_trait;
use std::fmt::Debug;
use tracing::{debug, warn};

/// Receives operations when a transaction commits.
#[async_trait]
pub trait ActionTarget<Op>: Send + Sync {
    async fn apply(&self, op: &Op) -> Result<()>;
}

/// Lifecycle hooks the actor runtime drives around every processed message.
#[async_trait]
pub trait TransactionalPlug: Send {
    /// What `prepare` hands to the runtime for persistence.
    type Checkpoint: Send;

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn begin(&mut self) -> Result<()>;

    async fn prepare(&mut self) -> Result<Self::Checkpoint>;

    async fn commit(&mut self) -> Result<()>;

    async fn abort(&mut self) -> Result<()>;

    async fn resume(&mut self, checkpoint: Self::Checkpoint) -> Result<()>;

    async fn shutdown(&mut self) -> Result<()>;
}

/// Ordered buffer of operations scoped to one transaction.
pub struct TransactionLog<Op, T> {
    pending: Vec<Op>,
    target: T,
    shut_down: bool,
}

impl<Op, T> TransactionLog<Op, T>
where
    Op: Clone + Debug + Send + Sync + 'static,
    T: ActionTarget<Op> + 'static,
{
    pub fn new(target: T) -> Self {
        Self {
            pending: Vec::new(),
            target,
            shut_down: false,
        }
    }

    /// Append an operation. It has no visible effect until commit.
    pub fn push(&mut self, op: Op) -> Result<()> {
        if self.shut_down {
            return Err(PubSubError::ShutDown);
        }
        debug!(?op, pending = self.pending.len() + 1, "Buffered");
        self.pending.push(op);
        Ok(())
    }

    pub fn pending(&self) -> &[Op] {
        &self.pending
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

#[async_trait]
impl<Op, T> TransactionalPlug for TransactionLog<Op, T>
where
    Op: Clone + Debug + Send + Sync + 'static,
    T: ActionTarget<Op> + 'static,
{
    type Checkpoint = Vec<Op>;

    async fn begin(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }

    async fn prepare(&mut self) -> Result<Vec<Op>> {
        Ok(self.pending.clone())
    }

    async fn commit(&mut self) -> Result<()> {
        let total = self.pending.len();
        for index in 0..total {
            if let Err(e) = self.target.apply(&self.pending[index]).await {
                warn!(index, total, error = %e, "Commit replay failed");
                self.pending.drain(..index);
                return Err(PubSubError::Replay {
                    index,
                    total,
                    source: Box::new(e),
                });
            }
        }
        if total > 0 {
            debug!(total, "Committed");
        }
        self.pending.clear();
        Ok(())
    }

    async fn abort(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            debug!(discarded = self.pending.len(), "Aborted");
        }
        self.pending.clear();
        Ok(())
    }

    async fn resume(&mut self, checkpoint: Vec<Op>) -> Result<()> {
        self.pending = checkpoint;
        self.commit().await
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.pending.clear();
        self.shut_down = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        applied: Mutex<Vec<String>>,
        reject: Option<String>,
    }

    #[async_trait]
    impl ActionTarget<String> for Recorder {
        async fn apply(&self, op: &String) -> Result<()> {
            if self.reject.as_deref() == Some(op.as_str()) {
                return Err(PubSubError::NoConnection);
            }
            self.applied.lock().push(op.clone());
            Ok(())
        }
    }

    fn log_with(reject: Option<&str>) -> TransactionLog<String, Recorder> {
        TransactionLog::new(Recorder {
            applied: Mutex::new(Vec::new()),
            reject: reject.map(str::to_string),
        })
    }

    #[tokio::test]
    async fn test_commit_replays_in_order_and_clears() {
        let mut log = log_with(None);
        log.begin().await.unwrap();
        log.push("a".into()).unwrap();
        log.push("b".into()).unwrap();
        log.push("c".into()).unwrap();

        assert!(log.target().applied.lock().is_empty());
        log.commit().await.unwrap();

        assert_eq!(*log.target().applied.lock(), vec!["a", "b", "c"]);
        assert!(log.pending().is_empty());
    }

    #[tokio::test]
    async fn test_begin_discards_leftovers() {
        let mut log = log_with(None);
        log.push("stale".into()).unwrap();
        log.begin().await.unwrap();
        assert!(log.pending().is_empty());
    }

    #[tokio::test]
    async fn test_failure_on_second_of_three_is_surfaced() {
        let mut log = log_with(Some("b"));
        log.begin().await.unwrap();
        for op in ["a", "b", "c"] {
            log.push(op.to_string()).unwrap();
        }

        let result = log.commit().await;
        assert!(matches!(
            result,
            Err(PubSubError::Replay { index: 1, total: 3, .. })
        ));
        assert_eq!(*log.target().applied.lock(), vec!["a"]);
        assert_eq!(log.pending(), ["b".to_string(), "c".to_string()]);
    }

    #[tokio::test]
    async fn test_abort_has_no_side_effects() {
        let mut log = log_with(None);
        log.begin().await.unwrap();
        log.push("a".into()).unwrap();
        log.abort().await.unwrap();
        log.commit().await.unwrap();

        assert!(log.target().applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_prepare_then_resume_replays_pending() {
        let mut log = log_with(None);
        log.push("a".into()).unwrap();
        log.push("b".into()).unwrap();
        let checkpoint = log.prepare().await.unwrap();

        let mut restored = log_with(None);
        restored.resume(checkpoint).await.unwrap();

        assert_eq!(*restored.target().applied.lock(), vec!["a", "b"]);
        assert!(restored.pending().is_empty());
    }

    #[tokio::test]
    async fn test_push_after_shutdown_is_rejected() {
        let mut log = log_with(None);
        log.push("a".into()).unwrap();
        log.shutdown().await.unwrap();

        assert!(log.is_shut_down());
        assert!(log.pending().is_empty());
        assert!(matches!(log.push("b".into()), Err(PubSubError::ShutDown)));
    }
}
