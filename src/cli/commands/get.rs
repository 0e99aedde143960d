//! Get command - fetch a resource through the worker cache

use crate::audit::{AuditEvent, AuditLog};
use crate::cli::args::GetArgs;
use crate::cli::context;
use crate::config::Config;
use crate::error::RescacheResult;
use crate::ui::{self, FetchProgress, UiContext};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Execute the get command
pub async fn execute(args: GetArgs, config: &Config) -> RescacheResult<()> {
    let ctx = UiContext::detect();
    let audit = AuditLog::new(config);

    let progress = Arc::new(FetchProgress::new(&ctx, &args.resource.resource_type));
    let source = context::fetch_source(&args.resource, config).await?;
    let source = context::configure_step(source, &args)
        .await?
        .with_delegate(progress.clone());
    let fetcher = context::fetcher(config);

    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                debug!("Interrupted, cancelling fetch");
                cancel.cancel();
            }
        })
    };

    let result = fetcher.fetch(&cancel, &source).await;
    interrupt.abort();
    progress.finish();

    let outcome = result?;
    let key = source.instance().cache_key()?;
    let worker = source.worker_name().to_string();
    let resource_type = source.instance().resource_type().to_string();

    if outcome.from_cache() {
        ui::step_ok_detail(&ctx, "Using cached resource", key.short());
        audit
            .record(&AuditEvent::CacheHit {
                worker,
                resource_type,
                cache_key: key,
            })
            .await;
    } else {
        ui::step_ok_detail(&ctx, "Fetched resource", key.short());
        if let Some(warning) = outcome.persist_warning() {
            ui::step_warn_hint(
                &ctx,
                "Resource metadata was not saved",
                "cache hits for this version will report no metadata",
            );
            audit
                .record(&AuditEvent::MetadataPersistFailed {
                    worker: worker.clone(),
                    cache_key: key.clone(),
                    reason: warning.to_string(),
                })
                .await;
        }
        audit
            .record(&AuditEvent::Fetched {
                worker,
                resource_type,
                cache_key: key,
                version: outcome.source().version().clone(),
            })
            .await;
    }

    println!("{}", serde_json::to_string_pretty(outcome.source())?);
    Ok(())
}

