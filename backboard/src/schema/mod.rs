//! Declarative schema snapshots and their reconciliation against a live database.
//!
//! A [`SchemaRegistry`] holds the ordered snapshot list given to an open. During
//! an upgrade each pending snapshot is compared with the [`LiveSchemaState`] by
//! [`diff`], and the resulting [`SchemaOperation`]s are issued against the
//! engine's upgrade transaction.

mod live;
mod reconciler;
mod registry;
mod snapshot;

pub use live::*;
pub use reconciler::*;
pub use registry::*;
pub use snapshot::*;
