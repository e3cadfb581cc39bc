//! Common types shared by every layer: keys, key paths, key ranges, the typed
//! event registry and the `Atomic` lock helpers.

mod event_bus;
mod key;
mod key_range;
mod type_utils;

pub use event_bus::*;
pub use key::*;
pub use key_range::*;
pub use type_utils::*;
