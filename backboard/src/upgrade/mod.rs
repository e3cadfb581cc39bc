//! Upgrade protocol: snapshot replay followed by the user callback, all inside
//! the engine's upgrade transaction.

mod coordinator;
mod upgrade_db;

pub use coordinator::*;
pub use upgrade_db::*;
