//! CLI argument definitions using clap derive

use clap::{ArgAction, Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// rescache - fetch resources once per worker and reuse the cache
///
/// Fetches a versioned resource into a worker volume through the resource
/// type's get script and serves later requests for the same resource from
/// that volume.
#[derive(Parser, Debug)]
#[command(name = "rescache")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "RESCACHE_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the fetch lock name for a resource on a worker
    LockName(LockNameArgs),

    /// Look up a cached resource without fetching
    Find(ResourceArgs),

    /// Fetch a resource, reusing the worker's cache when present
    Get(GetArgs),

    /// Show or edit configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: Shell,
    },
}

/// Identity of a resource instance and the worker it is fetched on
#[derive(Args, Debug, Clone)]
pub struct ResourceArgs {
    /// Resource type (e.g. git)
    #[arg(short = 't', long = "type")]
    pub resource_type: String,

    /// Source configuration entry (KEY=VALUE)
    #[arg(short, long, value_parser = parse_key_val)]
    pub source: Vec<(String, String)>,

    /// Source configuration as a JSON object
    #[arg(long, conflicts_with = "source")]
    pub source_json: Option<String>,

    /// Version field to fetch (KEY=VALUE)
    #[arg(long = "resource-version", value_parser = parse_key_val)]
    pub resource_version: Vec<(String, String)>,

    /// Version as a JSON object of strings
    #[arg(long, conflicts_with = "resource_version")]
    pub version_json: Option<String>,

    /// Get parameter (KEY=VALUE)
    #[arg(short, long, value_parser = parse_key_val)]
    pub param: Vec<(String, String)>,

    /// Get parameters as a JSON object
    #[arg(long, conflicts_with = "param")]
    pub params_json: Option<String>,

    /// Worker name (default: from config)
    #[arg(short, long)]
    pub worker: Option<String>,
}

/// Arguments for the lock-name command
#[derive(Args, Debug)]
pub struct LockNameArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,

    /// Print lock name, cache key and worker as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the get command
#[derive(Args, Debug)]
pub struct GetArgs {
    #[command(flatten)]
    pub resource: ResourceArgs,

    /// Placement tag the worker must carry (repeatable)
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Team the step belongs to
    #[arg(long)]
    pub team_id: Option<i32>,

    /// JSON file with custom resource type definitions
    #[arg(long)]
    pub resource_types: Option<PathBuf>,

    /// Pipeline name exported to the get script
    #[arg(long)]
    pub pipeline: Option<String>,

    /// Job name exported to the get script
    #[arg(long)]
    pub job: Option<String>,

    /// Build name exported to the get script
    #[arg(long)]
    pub build: Option<String>,
}

/// Arguments for the config command
#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., worker.name)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Parse a KEY=VALUE pair
fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let pos = s
        .find('=')
        .ok_or_else(|| format!("invalid KEY=VALUE format: no '=' found in '{s}'"))?;
    if pos == 0 {
        return Err(format!("invalid KEY=VALUE format: empty key in '{s}'"));
    }
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_key_val_valid() {
        let (k, v) = parse_key_val("uri=https://x/y").unwrap();
        assert_eq!(k, "uri");
        assert_eq!(v, "https://x/y");
    }

    #[test]
    fn parse_key_val_with_equals() {
        let (k, v) = parse_key_val("query=a=b").unwrap();
        assert_eq!(k, "query");
        assert_eq!(v, "a=b");
    }

    #[test]
    fn parse_key_val_invalid() {
        assert!(parse_key_val("uri").is_err());
        assert!(parse_key_val("=x").is_err());
    }

    #[test]
    fn cli_parses_get() {
        let cli = Cli::parse_from([
            "rescache",
            "get",
            "--type",
            "git",
            "--source",
            "uri=https://x/y",
            "--resource-version",
            "ref=abc123",
            "--tag",
            "linux",
        ]);
        match cli.command {
            Commands::Get(args) => {
                assert_eq!(args.resource.resource_type, "git");
                assert_eq!(
                    args.resource.source,
                    vec![("uri".to_string(), "https://x/y".to_string())]
                );
                assert_eq!(
                    args.resource.resource_version,
                    vec![("ref".to_string(), "abc123".to_string())]
                );
                assert_eq!(args.tags, vec!["linux"]);
            }
            _ => panic!("expected Get command"),
        }
    }

    #[test]
    fn cli_rejects_source_and_source_json() {
        let result = Cli::try_parse_from([
            "rescache",
            "find",
            "-t",
            "git",
            "--source",
            "uri=x",
            "--source-json",
            "{}",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn cli_parses_completions() {
        let cli = Cli::parse_from(["rescache", "completions", "bash"]);
        assert!(matches!(
            cli.command,
            Commands::Completions { shell: Shell::Bash }
        ));
    }

    #[test]
    fn cli_verbose_levels() {
        let cli = Cli::parse_from(["rescache", "config", "path"]);
        assert_eq!(cli.verbose, 0);

        let cli = Cli::parse_from(["rescache", "-v", "config", "path"]);
        assert_eq!(cli.verbose, 1);

        let cli = Cli::parse_from(["rescache", "-vv", "config", "path"]);
        assert_eq!(cli.verbose, 2);
    }
}
