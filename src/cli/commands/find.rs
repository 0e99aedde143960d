//! Find command - look up a cached resource without fetching

use crate::cli::args::ResourceArgs;
use crate::cli::context;
use crate::config::Config;
use crate::error::RescacheResult;
use crate::ui::{self, UiContext};

/// Execute the find command
///
/// Prints the cached versioned source as JSON. Returns `false` when the
/// resource is not cached on the worker.
pub async fn execute(args: ResourceArgs, config: &Config) -> RescacheResult<bool> {
    let source = context::fetch_source(&args, config).await?;

    match source.find().await? {
        Some(found) => {
            println!("{}", serde_json::to_string_pretty(&found)?);
            Ok(true)
        }
        None => {
            let ctx = UiContext::detect();
            ui::step_info(
                &ctx,
                &format!("Not cached on worker {}", source.worker_name()),
            );
            Ok(false)
        }
    }
}
