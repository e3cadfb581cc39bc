//! Transactions with a single completion settlement and their store accessors.

mod object_store;
mod settlement;
mod wrapper;

pub use crate::engine::TransactionMode;
pub use object_store::*;
pub(crate) use settlement::*;
pub use wrapper::*;
