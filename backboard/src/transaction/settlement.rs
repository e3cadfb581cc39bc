use crate::common::EventBus;
use crate::engine::{TransactionObserver, TransactionSignal};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::event::BackboardEvent;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// Single completion outcome of a transaction. The first outcome recorded
/// wins; later ones are dropped.
pub(crate) struct Settlement {
    transaction_id: Uuid,
    outcome: Mutex<Option<BackboardResult<()>>>,
}

impl Settlement {
    pub(crate) fn new(transaction_id: Uuid) -> Arc<Self> {
        Arc::new(Settlement {
            transaction_id,
            outcome: Mutex::new(None),
        })
    }

    /// Records `outcome` unless already settled, and returns the settled outcome.
    pub(crate) fn settle(&self, outcome: BackboardResult<()>) -> BackboardResult<()> {
        let mut guard = self.outcome.lock();
        match &*guard {
            Some(settled) => {
                log::debug!(
                    "Transaction {} already settled, ignoring {:?}",
                    self.transaction_id,
                    outcome.as_ref().err().map(|e| e.name())
                );
                settled.clone()
            }
            None => {
                *guard = Some(outcome.clone());
                outcome
            }
        }
    }

    pub(crate) fn outcome(&self) -> Option<BackboardResult<()>> {
        self.outcome.lock().clone()
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.lock().is_some()
    }
}

/// Forwards quota failures of a database's transactions to its manager.
#[derive(Clone)]
pub(crate) struct QuotaRelay {
    database: String,
    events: EventBus<BackboardEvent>,
}

impl QuotaRelay {
    pub(crate) fn new(database: &str, events: EventBus<BackboardEvent>) -> Self {
        QuotaRelay {
            database: database.to_string(),
            events,
        }
    }

    fn emit(&self, error: &BackboardError) {
        let event = BackboardEvent::QuotaExceeded {
            database: self.database.clone(),
            error: error.clone(),
        };
        if let Err(e) = self.events.publish(event) {
            log::error!("QuotaExceeded listener failed for '{}': {}", self.database, e);
        }
    }
}

/// Settles a [`Settlement`] from the engine's completion signals.
pub(crate) struct SettlementObserver {
    settlement: Arc<Settlement>,
    quota_relay: Option<QuotaRelay>,
}

impl SettlementObserver {
    pub(crate) fn new(settlement: Arc<Settlement>, quota_relay: Option<QuotaRelay>) -> Self {
        SettlementObserver {
            settlement,
            quota_relay,
        }
    }
}

impl TransactionObserver for SettlementObserver {
    fn on_signal(&self, signal: TransactionSignal) {
        match signal {
            TransactionSignal::Complete => {
                let _ = self.settlement.settle(Ok(()));
            }
            TransactionSignal::Error(error) => {
                let _ = self.settlement.settle(Err(error.clone()));
                if error.kind() == &ErrorKind::QuotaExceededError {
                    if let Some(relay) = &self.quota_relay {
                        relay.emit(&error);
                    }
                }
            }
            TransactionSignal::Abort(error) => {
                let _ = self.settlement.settle(Err(error));
            }
        }
    }
}
