//! Resource instances and the fetch-and-cache protocol
//!
//! - `identity`: cache keys and lock names
//! - `fetch_source`: find/create against one worker
//! - `fetcher`: lock acquisition loop around a fetch source
//! - `get`: the resource type's get script

mod fetch_source;
mod fetcher;
mod get;
mod identity;
mod step;
mod types;
mod versioned;

pub use fetch_source::{FetchOutcome, FetchSource, RESOURCE_MOUNT_PATH};
pub use fetcher::{Fetcher, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_INTERVAL};
pub use get::{GetExecutor, GetRequest, ScriptGetExecutor, GET_SCRIPT_PATH};
pub use identity::{CacheKey, ResourceInstance};
pub use step::StepMetadata;
pub use types::{ResourceType, ResourceTypes};
pub use versioned::{Config, Metadata, MetadataField, Version, VersionedSource};
