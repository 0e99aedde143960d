//! rescache - fetch-and-cache of versioned resources on workers
//!
//! A resource instance (type, source, version, params) is fetched onto a
//! worker at most once. The fetched volume becomes a resource cache that
//! later requests for the same instance reuse, guarded by a per-worker
//! fetch lock and a double-checked lookup.

pub mod audit;
pub mod cli;
pub mod config;
pub mod error;
pub mod lock;
pub mod resource;
pub mod store;
pub mod ui;
pub mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use error::{RescacheError, RescacheResult};
