mod config;
mod database;
mod engine;
mod transaction;

pub use config::*;
pub use engine::MemoryEngine;
