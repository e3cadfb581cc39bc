use crate::common::{atomic, Atomic, EventBus, ReadExecutor, WriteExecutor};
use crate::engine::{OpenObserver, UpgradeTransaction, VersionChangeEvent};
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::event::BackboardEvent;
use crate::schema::{diff, SchemaOperation, SchemaRegistry};
use crate::transaction::QuotaRelay;
use crate::upgrade::UpgradeDb;
use parking_lot::Mutex;
use std::sync::Arc;

/// User supplied upgrade logic, run once after every pending snapshot was
/// applied. Errors abort the upgrade.
pub type UpgradeCallback = Box<dyn FnOnce(&UpgradeDb) -> anyhow::Result<()> + Send>;

/// Progress of one open through the upgrade protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    /// The open was issued; the engine has not asked for an upgrade yet.
    AwaitingUpgradeSignal,
    /// Issuing the operations of the `step`-th pending snapshot.
    Applying { step: usize, version: u32 },
    CallbackPhase,
    /// Everything was issued, waiting for the engine to commit.
    Committing,
    Done,
    Aborted,
}

/// Drives the upgrade of one open request.
///
/// # Purpose
/// The coordinator is the [`OpenObserver`] handed to the engine's `open`.
/// When the engine reports that an upgrade is needed, it replays every pending
/// snapshot of its [`SchemaRegistry`] in ascending version order, issuing the
/// operations of each diff against the upgrade transaction, then runs the user
/// callback if one was supplied.
///
/// # Characteristics
/// - **Ordered**: one snapshot is fully issued before the next is diffed
/// - **Atomic**: any failure aborts the whole upgrade transaction
/// - **Single Use**: the callback runs at most once
pub struct UpgradeCoordinator {
    name: String,
    registry: Option<SchemaRegistry>,
    callback: Mutex<Option<UpgradeCallback>>,
    state: Atomic<UpgradeState>,
    applied_versions: Atomic<Vec<u32>>,
    events: EventBus<BackboardEvent>,
    quota_relay: Option<QuotaRelay>,
}

impl UpgradeCoordinator {
    pub(crate) fn new(
        name: &str,
        registry: Option<SchemaRegistry>,
        callback: Option<UpgradeCallback>,
        events: EventBus<BackboardEvent>,
        quota_relay: Option<QuotaRelay>,
    ) -> Self {
        UpgradeCoordinator {
            name: name.to_string(),
            registry,
            callback: Mutex::new(callback),
            state: atomic(UpgradeState::Idle),
            applied_versions: atomic(Vec::new()),
            events,
            quota_relay,
        }
    }

    pub fn state(&self) -> UpgradeState {
        self.state.read_with(|state| *state)
    }

    /// Snapshot versions applied so far, ascending.
    pub fn applied_versions(&self) -> Vec<u32> {
        self.applied_versions.read_with(|versions| versions.clone())
    }

    /// Target version of the registry, if the open is schema driven.
    pub fn target_version(&self) -> Option<u32> {
        self.registry.as_ref().map(|registry| registry.target_version())
    }

    pub(crate) fn begin(&self) {
        self.transition(UpgradeState::AwaitingUpgradeSignal);
    }

    /// Records the outcome of the open once the engine returned.
    pub(crate) fn finish<T>(&self, result: &BackboardResult<T>) {
        match (self.state(), result) {
            (UpgradeState::AwaitingUpgradeSignal, Ok(_)) => self.transition(UpgradeState::Done),
            (UpgradeState::Done, _) | (UpgradeState::Aborted, _) => {}
            (_, Err(_)) => self.transition(UpgradeState::Aborted),
            (_, Ok(_)) => self.transition(UpgradeState::Done),
        }
    }

    fn transition(&self, next: UpgradeState) {
        let previous = self.state.write_with(|state| std::mem::replace(state, next));
        log::debug!("Upgrade of '{}': {:?} -> {:?}", self.name, previous, next);
    }

    fn reconcile(&self, event: &VersionChangeEvent, upgrade: &dyn UpgradeTransaction) -> BackboardResult<()> {
        let registry = match &self.registry {
            Some(registry) => registry,
            None => return Ok(()),
        };
        let target = event.new_version().unwrap_or(registry.target_version());

        let mut live = upgrade.schema();
        for (step, snapshot) in registry.pending(event.old_version(), target).enumerate() {
            let version = snapshot.version();
            self.transition(UpgradeState::Applying { step, version });

            let result = diff(&live, snapshot);
            if result.is_empty() {
                log::debug!("Version {} of '{}' needs no structural change", version, self.name);
            }
            for operation in result.operations() {
                log::debug!("Applying {} for version {} of '{}'", operation, version, self.name);
                issue(upgrade, &operation).map_err(|cause| {
                    BackboardError::new_with_cause(
                        &format!(
                            "Failed to apply version {} of '{}' ({})",
                            version, self.name, operation
                        ),
                        ErrorKind::OpenError,
                        cause,
                    )
                })?;
                live.apply(&operation);
            }
            self.applied_versions.write_with(|versions| versions.push(version));
        }
        Ok(())
    }

    fn run_callback(&self, upgrade: Arc<dyn UpgradeTransaction>) -> BackboardResult<()> {
        let callback = match self.callback.lock().take() {
            Some(callback) => callback,
            None => return Ok(()),
        };
        self.transition(UpgradeState::CallbackPhase);

        let db = UpgradeDb::new(upgrade, self.applied_versions(), self.quota_relay.clone())?;
        callback(&db).map_err(|err| {
            let cause = BackboardError::from(err);
            log::error!("Upgrade callback of '{}' failed: {}", self.name, cause);
            BackboardError::new_with_cause(
                &format!("Upgrade callback of '{}' failed", self.name),
                ErrorKind::UpgradeCallbackError,
                cause,
            )
        })
    }
}

impl OpenObserver for UpgradeCoordinator {
    fn on_blocked(&self, event: &VersionChangeEvent) {
        log::info!("Open of '{}' is blocked by other connections", self.name);
        let blocked = BackboardEvent::Blocked {
            name: self.name.clone(),
            event: *event,
        };
        if let Err(e) = self.events.publish(blocked) {
            log::error!("Blocked listener failed for '{}': {}", self.name, e);
        }
    }

    fn on_upgrade_needed(
        &self,
        event: &VersionChangeEvent,
        upgrade: Arc<dyn UpgradeTransaction>,
    ) -> BackboardResult<()> {
        log::info!(
            "Upgrading '{}' from version {} to {:?}",
            self.name,
            event.old_version(),
            event.new_version()
        );
        let result = self
            .reconcile(event, upgrade.as_ref())
            .and_then(|_| self.run_callback(upgrade));
        match &result {
            Ok(()) => self.transition(UpgradeState::Committing),
            Err(_) => self.transition(UpgradeState::Aborted),
        }
        result
    }

    fn on_upgrade_complete(&self) {
        self.transition(UpgradeState::Done);
    }

    fn on_upgrade_aborted(&self, error: &BackboardError) {
        log::warn!("Upgrade of '{}' aborted: {}", self.name, error);
        self.transition(UpgradeState::Aborted);
    }
}

fn issue(upgrade: &dyn UpgradeTransaction, operation: &SchemaOperation) -> BackboardResult<()> {
    match operation {
        SchemaOperation::CreateStore { name, options } => upgrade.create_object_store(name, options),
        SchemaOperation::DeleteStore { name } => upgrade.delete_object_store(name),
        SchemaOperation::CreateIndex {
            store,
            name,
            definition,
        } => upgrade.create_index(store, name, definition),
        SchemaOperation::DeleteIndex { store, name } => upgrade.delete_index(store, name),
    }
}
