//! Lock-name command - print the fetch lock of a resource on a worker

use crate::cli::args::LockNameArgs;
use crate::cli::context;
use crate::config::Config;
use crate::error::RescacheResult;

/// Execute the lock-name command
pub fn execute(args: LockNameArgs, config: &Config) -> RescacheResult<()> {
    let instance = context::instance(&args.resource)?;
    let worker = context::worker_name(&args.resource, config);
    let lock_name = instance.lock_name(worker)?;

    if args.json {
        let out = serde_json::json!({
            "lock_name": lock_name,
            "cache_key": instance.cache_key()?,
            "worker": worker,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("{}", lock_name);
    }

    Ok(())
}
