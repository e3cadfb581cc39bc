use crate::backboard_builder::BackboardBuilder;
use crate::backboard_config::BackboardConfig;
use crate::common::{atomic, Atomic, EventBus, ReadExecutor, SubscriberRef, WriteExecutor};
use crate::database::Database;
use crate::engine::DeleteOutcome;
use crate::errors::{BackboardError, BackboardResult, ErrorKind};
use crate::event::{BackboardEvent, BackboardEventKind, BackboardEventListener};
use crate::schema::{SchemaRegistry, SchemaSnapshot};
use crate::transaction::QuotaRelay;
use crate::upgrade::{UpgradeCallback, UpgradeCoordinator, UpgradeDb};
use indexmap::IndexSet;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use uuid::Uuid;

/// Connection manager over a storage engine.
///
/// # Purpose
/// `Backboard` opens and deletes databases, running the upgrade protocol on
/// open, and carries the manager level events and the pub/sub channel.
///
/// # Characteristics
/// - **Cloneable**: clones share the same state
/// - **Thread-Safe**: all state sits behind `Arc` and `parking_lot` locks
/// - **Re-entrant**: no lock is held while listeners or upgrade callbacks run
///
/// # Usage
/// ```text
/// let backboard = backboard::instance();
/// let db = backboard.open("league", vec![
///     SchemaSnapshot::new(1).store("players", StoreDefinition::new().key_path("pid").auto_increment()),
/// ])?;
/// backboard.on(BackboardEventKind::Blocked, BackboardEventListener::new(|_| Ok(())));
/// ```
#[derive(Clone)]
pub struct Backboard {
    inner: Arc<BackboardInner>,
}

impl Backboard {
    pub(crate) fn new(config: BackboardConfig) -> Self {
        Backboard {
            inner: Arc::new(BackboardInner {
                config,
                events: EventBus::new(),
                subscriptions: atomic(IndexSet::new()),
                attachment: Mutex::new(None),
            }),
        }
    }

    pub fn builder() -> BackboardBuilder {
        BackboardBuilder::new()
    }

    pub fn config(&self) -> &BackboardConfig {
        &self.inner.config
    }

    /// Opens `name`, upgrading it first if `target` asks for a newer version.
    ///
    /// # Arguments
    ///
    /// * `name` - Database name
    /// * `target` - Either a literal version (`u32`, optionally with an upgrade
    ///   callback) or a list of [`SchemaSnapshot`]s whose highest version is
    ///   the target; pending snapshots are applied before the callback runs.
    ///
    /// # Errors
    ///
    /// * `ConfigurationError` - malformed snapshots or a zero version
    /// * `UpgradeCallbackError` - the upgrade callback failed; its error is the cause
    /// * `OpenError` - any other failure, including an upgrade blocked by open
    ///   connections after the `Blocked` event was emitted
    pub fn open(&self, name: &str, target: impl Into<OpenTarget>) -> BackboardResult<Database> {
        if name.is_empty() {
            return Err(configuration_error("Database name cannot be empty"));
        }
        let (version, registry, upgrade) = match target.into() {
            OpenTarget::Version { version, upgrade } => {
                if version == 0 {
                    return Err(configuration_error("Database version must be a positive integer"));
                }
                (version, None, upgrade)
            }
            OpenTarget::Schemas { snapshots, upgrade } => {
                let registry = SchemaRegistry::new(snapshots)?;
                (registry.target_version(), Some(registry), upgrade)
            }
        };

        let quota_relay = QuotaRelay::new(name, self.inner.events.clone());
        let coordinator = UpgradeCoordinator::new(
            name,
            registry,
            upgrade,
            self.inner.events.clone(),
            Some(quota_relay.clone()),
        );

        log::debug!("Opening '{}' at version {}", name, version);
        coordinator.begin();
        let result = self.inner.config.engine().open(name, Some(version), &coordinator);
        coordinator.finish(&result);

        let connection = result.map_err(|error| open_error(name, error))?;
        log::info!("Opened '{}' at version {}", name, connection.version());
        Ok(Database::new(
            connection,
            self.inner.config.close_on_version_change(),
            Some(quota_relay),
        ))
    }

    /// Deletes `name`. Succeeds when the database does not exist, and when the
    /// deletion is blocked by open connections; it then completes once they close.
    pub fn delete(&self, name: &str) -> BackboardResult<()> {
        match self.inner.config.engine().delete_database(name)? {
            DeleteOutcome::Deleted => log::info!("Deleted '{}'", name),
            DeleteOutcome::NotFound => log::debug!("'{}' does not exist", name),
            DeleteOutcome::Blocked => {
                log::info!("Deletion of '{}' is pending until its connections close", name)
            }
        }
        Ok(())
    }

    pub fn database_names(&self) -> Vec<String> {
        self.inner.config.engine().database_names()
    }

    pub fn on(&self, kind: BackboardEventKind, listener: BackboardEventListener) -> SubscriberRef {
        self.inner.events.register(kind, listener)
    }

    pub fn off(&self, subscriber: &SubscriberRef) -> bool {
        self.inner.events.deregister(subscriber)
    }

    /// Starts delivering messages of `channel` as `Message` events.
    pub fn subscribe(&self, channel: &str) {
        self.ensure_attached();
        let added = self
            .inner
            .subscriptions
            .write_with(|subscriptions| subscriptions.insert(channel.to_string()));
        if added {
            self.inner.config.relay().subscribe(channel);
            log::debug!("Subscribed to '{}'", channel);
        }
    }

    pub fn unsubscribe(&self, channel: &str) {
        let removed = self
            .inner
            .subscriptions
            .write_with(|subscriptions| subscriptions.shift_remove(channel));
        if removed {
            self.inner.config.relay().unsubscribe(channel);
            log::debug!("Unsubscribed from '{}'", channel);
        }
    }

    /// Sends `message` on `channel` to every manager sharing the relay,
    /// this one included.
    pub fn publish(&self, channel: &str, message: &str) -> BackboardResult<()> {
        self.inner.config.relay().publish(channel, message)
    }

    /// Channels this manager is subscribed to, in subscription order.
    pub fn subscriptions(&self) -> Vec<String> {
        self.inner
            .subscriptions
            .read_with(|subscriptions| subscriptions.iter().cloned().collect())
    }

    /// Tears the manager down: drops every subscription, detaches from the
    /// relay, removes the `Message`, `Blocked` and `QuotaExceeded` listeners and
    /// emits `End`. Calling it again repeats the teardown, which finds nothing
    /// left to remove, and emits `End` again.
    pub fn end(&self) -> BackboardResult<()> {
        self.teardown()
    }

    /// Same as [`end`](Backboard::end), also removing the listener registered
    /// as `subscriber` before `End` is emitted. Returns whether that listener
    /// was still registered.
    pub fn end_with(&self, subscriber: &SubscriberRef) -> BackboardResult<bool> {
        let removed = self.inner.events.deregister(subscriber);
        self.teardown()?;
        Ok(removed)
    }

    fn teardown(&self) -> BackboardResult<()> {
        let relay = self.inner.config.relay();
        let channels = self.inner.subscriptions.write_with(std::mem::take);
        for channel in &channels {
            relay.unsubscribe(channel);
        }
        self.inner.detach();

        let removed = [
            BackboardEventKind::Message,
            BackboardEventKind::Blocked,
            BackboardEventKind::QuotaExceeded,
        ]
        .into_iter()
        .map(|kind| self.inner.events.deregister_kind(kind))
        .sum::<usize>();

        log::info!(
            "Connection manager ended, dropped {} subscriptions and {} listeners",
            channels.len(),
            removed
        );
        self.inner.events.publish(BackboardEvent::End)
    }

    fn ensure_attached(&self) {
        let mut attachment = self.inner.attachment.lock();
        if attachment.is_some() {
            return;
        }
        let manager = Arc::downgrade(&self.inner);
        let id = self.inner.config.relay().attach(Arc::new(move |channel: &str, message: &str| {
            if let Some(inner) = manager.upgrade() {
                inner.deliver(channel, message);
            }
        }));
        *attachment = Some(id);
    }
}

struct BackboardInner {
    config: BackboardConfig,
    events: EventBus<BackboardEvent>,
    subscriptions: Atomic<IndexSet<String>>,
    attachment: Mutex<Option<Uuid>>,
}

impl BackboardInner {
    fn deliver(&self, channel: &str, message: &str) {
        let subscribed = self
            .subscriptions
            .read_with(|subscriptions| subscriptions.contains(channel));
        if !subscribed {
            return;
        }
        let event = BackboardEvent::Message {
            channel: channel.to_string(),
            message: message.to_string(),
        };
        if let Err(e) = self.events.publish(event) {
            log::error!("Message listener failed on '{}': {}", channel, e);
        }
    }

    fn detach(&self) {
        if let Some(id) = self.attachment.lock().take() {
            self.config.relay().detach(&id);
        }
    }
}

impl Drop for BackboardInner {
    fn drop(&mut self) {
        self.detach();
    }
}

/// What [`Backboard::open`] should open a database at.
pub enum OpenTarget {
    /// A literal version, with an optional upgrade callback.
    Version {
        version: u32,
        upgrade: Option<UpgradeCallback>,
    },
    /// Schema snapshots; the highest version is the target.
    Schemas {
        snapshots: Vec<SchemaSnapshot>,
        upgrade: Option<UpgradeCallback>,
    },
}

impl OpenTarget {
    pub fn version(version: u32) -> Self {
        OpenTarget::Version {
            version,
            upgrade: None,
        }
    }

    pub fn schemas(snapshots: Vec<SchemaSnapshot>) -> Self {
        OpenTarget::Schemas {
            snapshots,
            upgrade: None,
        }
    }

    /// Sets the callback run at the end of an upgrade.
    pub fn with_upgrade<F>(self, callback: F) -> Self
    where
        F: FnOnce(&UpgradeDb) -> anyhow::Result<()> + Send + 'static,
    {
        let upgrade: Option<UpgradeCallback> = Some(Box::new(callback));
        match self {
            OpenTarget::Version { version, .. } => OpenTarget::Version { version, upgrade },
            OpenTarget::Schemas { snapshots, .. } => OpenTarget::Schemas { snapshots, upgrade },
        }
    }
}

impl From<u32> for OpenTarget {
    fn from(version: u32) -> Self {
        OpenTarget::version(version)
    }
}

impl From<Vec<SchemaSnapshot>> for OpenTarget {
    fn from(snapshots: Vec<SchemaSnapshot>) -> Self {
        OpenTarget::schemas(snapshots)
    }
}

impl Debug for OpenTarget {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            OpenTarget::Version { version, upgrade } => f
                .debug_struct("Version")
                .field("version", version)
                .field("upgrade", &upgrade.is_some())
                .finish(),
            OpenTarget::Schemas { snapshots, upgrade } => f
                .debug_struct("Schemas")
                .field("versions", &snapshots.iter().map(|s| s.version()).collect::<Vec<_>>())
                .field("upgrade", &upgrade.is_some())
                .finish(),
        }
    }
}

fn configuration_error(message: &str) -> BackboardError {
    log::error!("{}", message);
    BackboardError::new(message, ErrorKind::ConfigurationError)
}

fn open_error(name: &str, error: BackboardError) -> BackboardError {
    match error.kind() {
        ErrorKind::OpenError | ErrorKind::UpgradeCallbackError | ErrorKind::ConfigurationError => error,
        _ => BackboardError::new_with_cause(
            &format!("Failed to open '{}'", name),
            ErrorKind::OpenError,
            error,
        ),
    }
}
