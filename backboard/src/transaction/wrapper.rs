use crate::engine::{EngineTransaction, TransactionMode};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::transaction::{ObjectStore, QuotaRelay, Settlement, SettlementObserver};
use itertools::Itertools;
use std::sync::Arc;
use uuid::Uuid;

/// A live multi-store transaction with a single completion settlement.
///
/// # Purpose
/// Wraps an engine transaction, hands out [`ObjectStore`] accessors for the
/// stores in its scope and tracks how the transaction ended. The outcome is
/// settled by the first completion signal of the engine: `Ok(())` on
/// completion, the engine's error on error or abort. Later signals are ignored.
///
/// # Lifecycle
/// - [`complete`](Transaction::complete) requests the commit if needed and
///   returns the settled outcome, the same one on every call
/// - [`abort`](Transaction::abort) rolls every change back
/// - dropping the last handle of an active transaction commits it
///
/// Requests issued after settlement fail with the engine's own
/// `TransactionInactiveError`.
///
/// # Usage
/// ```text
/// let tx = db.tx(&["players", "teams"], TransactionMode::ReadWrite)?;
/// let pid = tx.store("players")?.put(json!({"name": "John", "tid": 1}))?;
/// tx.store("teams")?.put(json!({"tid": 1, "region": "Boston"}))?;
/// tx.complete()?;
/// ```
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub(crate) fn new(engine: Arc<dyn EngineTransaction>, quota_relay: Option<QuotaRelay>) -> Self {
        let id = Uuid::new_v4();
        let settlement = Settlement::new(id);
        engine.set_observer(Arc::new(SettlementObserver::new(settlement.clone(), quota_relay)));
        let mode = engine.mode();
        Transaction {
            inner: Arc::new(TransactionInner {
                id,
                mode,
                engine,
                settlement,
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Stores in scope, sorted.
    pub fn object_store_names(&self) -> Vec<String> {
        self.inner.engine.store_names().into_iter().sorted().collect()
    }

    /// Accessor for one store of the scope.
    pub fn store(&self, name: &str) -> BackboardResult<ObjectStore> {
        if !self.inner.engine.store_names().iter().any(|n| n == name) {
            return Err(BackboardError::new(
                &format!("Object store '{}' is not in the scope of the transaction", name),
                ErrorKind::NotFoundError,
            ));
        }
        Ok(ObjectStore::new(name, self.clone()))
    }

    /// Commits the transaction if it is still active and returns its settled
    /// outcome. Every call returns the same outcome.
    ///
    /// The upgrade transaction settles when the upgrade finishes; completing it
    /// from inside the upgrade fails with `InvalidStateError`.
    pub fn complete(&self) -> BackboardResult<()> {
        if let Some(outcome) = self.inner.settlement.outcome() {
            return outcome;
        }
        if self.inner.mode == TransactionMode::VersionChange {
            return Err(BackboardError::new(
                "The upgrade transaction completes when the upgrade finishes",
                ErrorKind::InvalidStateError,
            ));
        }
        let result = self.inner.engine.commit();
        self.inner.settlement.settle(result)
    }

    /// Aborts the transaction. Its outcome settles to an `AbortError`.
    pub fn abort(&self) -> BackboardResult<()> {
        log::debug!("Aborting transaction {}", self.inner.id);
        self.inner.engine.abort()
    }

    pub fn is_settled(&self) -> bool {
        self.inner.settlement.is_settled()
    }

    /// The settled outcome, `None` while the transaction is running.
    pub fn outcome(&self) -> Option<BackboardResult<()>> {
        self.inner.settlement.outcome()
    }

    pub(crate) fn engine(&self) -> &Arc<dyn EngineTransaction> {
        &self.inner.engine
    }
}

struct TransactionInner {
    id: Uuid,
    mode: TransactionMode,
    engine: Arc<dyn EngineTransaction>,
    settlement: Arc<Settlement>,
}

impl Drop for TransactionInner {
    fn drop(&mut self) {
        if self.mode == TransactionMode::VersionChange
            || self.settlement.is_settled()
            || self.engine.is_finished()
        {
            return;
        }
        log::debug!("Transaction {} dropped while active, committing", self.id);
        if let Err(error) = self.engine.commit() {
            log::warn!("Auto-commit of transaction {} failed: {}", self.id, error);
        }
    }
}
