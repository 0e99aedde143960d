//! CLI command implementations

pub mod completions;
pub mod config;
pub mod find;
pub mod get;
pub mod lock_name;

pub use completions::execute as completions;
pub use config::execute as config;
pub use find::execute as find;
pub use get::execute as get;
pub use lock_name::execute as lock_name;
