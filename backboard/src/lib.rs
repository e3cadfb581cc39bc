//! # Backboard - Versioned Object Store Convenience Layer
//!
//! Backboard sits on top of a versioned object-store engine, the kind of
//! engine where a database has an integer version, structure changes only
//! inside an upgrade transaction and data lives in object stores with
//! optional indexes.
//!
//! ## Key Features
//!
//! - **Declarative Schemas**: describe every version as a [`SchemaSnapshot`];
//!   opening a database diffs the live structure against each pending snapshot
//!   and applies the difference, in ascending version order
//! - **Upgrade Callbacks**: run data migrations inside the upgrade transaction
//!   after the snapshots were applied
//! - **Settled Transactions**: every [`Transaction`] settles exactly once
//! - **Events**: `Blocked`, `QuotaExceeded`, `Message` and `End` on the manager,
//!   `VersionChange` and `Closed` on each database
//! - **Pub/Sub**: channel messages shared between managers through a relay
//! - **Pluggable Engine**: an in-memory engine ships with the crate; any
//!   [`StorageEngine`](engine::StorageEngine) can be used instead
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use backboard::schema::{IndexDefinition, SchemaSnapshot, StoreDefinition};
//! use backboard::json;
//!
//! let backboard = backboard::instance();
//! let db = backboard.open("league", vec![
//!     SchemaSnapshot::new(1).store(
//!         "players",
//!         StoreDefinition::new()
//!             .key_path("pid")
//!             .auto_increment()
//!             .index("tid", IndexDefinition::new("tid")),
//!     ),
//! ])?;
//!
//! let pid = db.store("players")?.put(json!({"name": "John", "tid": 1}))?;
//! let on_team = db.store("players")?.index("tid")?.count(Some(1.into()))?;
//! ```
//!
//! ## Module Organization
//!
//! - [`backboard`] - The connection manager
//! - [`common`] - Keys, key ranges, the event bus and shared helpers
//! - [`database`] - Open database handles
//! - [`engine`] - The storage engine contract and the memory engine
//! - [`errors`] - Error types and result definitions
//! - [`event`] - Manager and database events
//! - [`pubsub`] - Message relays
//! - [`schema`] - Snapshots, the registry and the reconciler
//! - [`transaction`] - Transactions and store accessors
//! - [`upgrade`] - The upgrade coordinator and the callback handle

use std::sync::LazyLock;

pub mod backboard;
pub mod backboard_builder;
pub mod backboard_config;
pub mod common;
pub mod database;
pub mod engine;
pub mod errors;
pub mod event;
pub mod pubsub;
pub mod schema;
pub mod transaction;
pub mod upgrade;

pub use crate::backboard::{Backboard, OpenTarget};
pub use crate::common::{Key, KeyPath, KeyRange};
pub use crate::database::{Database, DatabaseIndex, DatabaseStore, WeakDatabase};
pub use crate::errors::{BackboardError, BackboardResult, ErrorKind};
pub use crate::transaction::{Index, ObjectStore, Transaction, TransactionMode};
pub use serde_json::{json, Value};

static INSTANCE: LazyLock<Backboard> = LazyLock::new(|| Backboard::builder().build());

/// The process-wide connection manager, over a process-wide memory engine and
/// relay. Initialised on first use.
pub fn instance() -> Backboard {
    INSTANCE.clone()
}
