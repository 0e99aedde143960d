//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{RescacheError, RescacheResult};
use crate::ui::{self, UiContext};
use tokio::fs;
use toml_edit::{Array, DocumentMut, Item};

/// Execute the config command
pub async fn execute(args: ConfigArgs, manager: &ConfigManager, config: &Config) -> RescacheResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(config)?,
        Some(ConfigAction::Path) => println!("{}", manager.path().display()),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => {
            set_value(manager, &key, &value).await?;
            ui::step_ok(&UiContext::detect(), &format!("Set {} = {}", key, value));
        }
    }

    Ok(())
}

fn show_config(config: &Config) -> RescacheResult<()> {
    println!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn init_config(manager: &ConfigManager, force: bool) -> RescacheResult<()> {
    let ctx = UiContext::detect();
    let path = manager.path();

    if path.exists() && !force {
        ui::step_warn_hint(
            &ctx,
            &format!("Config already exists at {}", path.display()),
            "Use --force to overwrite",
        );
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    ui::step_ok_detail(&ctx, "Configuration initialized", &path.display().to_string());

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum KeyKind {
    Text,
    Bool,
    Integer,
    List,
}

/// Value type of a settable key
fn key_kind(key: &str) -> Option<KeyKind> {
    let parts: Vec<&str> = key.split('.').collect();
    match parts.as_slice() {
        ["general", "log_format"]
        | ["fetch", "mount_path" | "script_path"]
        | ["store", "dir"]
        | ["worker", "name" | "podman"] => Some(KeyKind::Text),
        ["worker", "resource_types", name] if !name.is_empty() => Some(KeyKind::Text),
        ["general", "audit_log"] => Some(KeyKind::Bool),
        ["fetch", "lock_retry_interval_ms" | "lock_attempts"]
        | ["locks", "stale_after_secs"]
        | ["worker", "team_id"] => Some(KeyKind::Integer),
        ["worker", "tags"] => Some(KeyKind::List),
        _ => None,
    }
}

fn parse_item(kind: KeyKind, value: &str) -> RescacheResult<Item> {
    Ok(match kind {
        KeyKind::Text => toml_edit::value(value),
        KeyKind::Bool => toml_edit::value(parse_bool(value)?),
        KeyKind::Integer => toml_edit::value(
            value
                .parse::<i64>()
                .map_err(|_| RescacheError::User(format!("Invalid number: {}", value)))?,
        ),
        KeyKind::List => {
            let mut items = Array::new();
            for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
                items.push(item);
            }
            toml_edit::value(items)
        }
    })
}

/// Set one key in the config file, keeping the rest of the file as written
async fn set_value(manager: &ConfigManager, key: &str, value: &str) -> RescacheResult<()> {
    let kind = key_kind(key).ok_or_else(|| {
        RescacheError::User(format!(
            "Unknown config key: {}. Valid keys: {}",
            key,
            VALID_KEYS.join(", ")
        ))
    })?;
    let item = parse_item(kind, value)?;

    let path = manager.path();
    let content = if path.exists() {
        fs::read_to_string(path)
            .await
            .map_err(|e| RescacheError::io(format!("reading {}", path.display()), e))?
    } else {
        String::new()
    };

    let mut doc: DocumentMut = content.parse().map_err(|e: toml_edit::TomlError| {
        RescacheError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }
    })?;

    let parts: Vec<&str> = key.split('.').collect();
    let (leaf, tables) = parts
        .split_last()
        .ok_or_else(|| RescacheError::User(format!("Empty config key: {}", key)))?;

    let mut table = doc.as_table_mut();
    for part in tables {
        table = table
            .entry(part)
            .or_insert(toml_edit::table())
            .as_table_mut()
            .ok_or_else(|| RescacheError::User(format!("Expected table at key: {}", part)))?;
    }
    table.insert(leaf, item);

    let rendered = doc.to_string();
    toml::from_str::<Config>(&rendered).map_err(|e| {
        RescacheError::User(format!("Invalid value for {}: {}", key, e))
    })?;

    manager.ensure_config_dir().await?;
    fs::write(path, rendered)
        .await
        .map_err(|e| RescacheError::io(format!("writing {}", path.display()), e))?;

    Ok(())
}

fn parse_bool(value: &str) -> RescacheResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(RescacheError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "general.audit_log",
    "fetch.mount_path",
    "fetch.script_path",
    "fetch.lock_retry_interval_ms",
    "fetch.lock_attempts",
    "locks.stale_after_secs",
    "store.dir",
    "worker.name",
    "worker.tags",
    "worker.team_id",
    "worker.podman",
    "worker.resource_types.<type>",
];
