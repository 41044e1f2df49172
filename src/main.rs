//! sync-tick: one pass over every configured agent, then exit.
//! The external timer runs this binary once per tick.
//!
//! Exit code is non-zero only when config or store initialization fails;
//! workflow failures are reported in the execution log and tracing output.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use campaign_sync::config::{load_config_default, SyncConfig};
use campaign_sync::feed::{CaptionTransformer, FeedSyncWorkflow};
use campaign_sync::membership::MembershipWorkflow;
use campaign_sync::providers::{
    HttpFeedSource, HttpGateway, OpenAiCaptionTransformer, PassthroughTransformer,
};
use campaign_sync::store::JsonFileStore;
use campaign_sync::{metrics, tick};

/// Compact logs by default; `SYNC_LOG_JSON=1` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,reqwest=warn,hyper=warn"));
    let json = std::env::var("SYNC_LOG_JSON").ok().is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

fn build_transformer(cfg: &SyncConfig) -> Result<Arc<dyn CaptionTransformer>> {
    if cfg.openai.enabled {
        Ok(Arc::new(OpenAiCaptionTransformer::from_config(&cfg.openai)?))
    } else {
        Ok(Arc::new(PassthroughTransformer))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let dump_metrics = std::env::var("SYNC_METRICS_DUMP").ok().is_some_and(|v| v == "1");
    let prom = if dump_metrics {
        Some(metrics::install_prometheus()?)
    } else {
        None
    };

    let cfg = load_config_default().context("loading sync config")?;
    let store = Arc::new(
        JsonFileStore::open(&cfg.storage.state_path)
            .await
            .context("opening state store")?
            .with_log_cap(cfg.storage.log_cap),
    );

    if cfg.feed_agents.is_empty() && cfg.membership_agents.is_empty() {
        tracing::warn!("no agents configured; nothing to do");
        return Ok(());
    }

    let timeout = Duration::from_secs(cfg.gateway.timeout_secs);
    let gateway = Arc::new(HttpGateway::from_config(&cfg.gateway)?);
    let feed_source = Arc::new(HttpFeedSource::new(timeout)?);

    let feed = FeedSyncWorkflow::new(
        feed_source,
        build_transformer(&cfg)?,
        gateway.clone(),
        store.clone(),
        store.clone(),
    )
    .with_item_delay(Duration::from_secs(cfg.timing.item_delay_secs));

    let membership = MembershipWorkflow::new(
        gateway.clone(),
        gateway,
        store.clone(),
        store.clone(),
        store,
    )
    .with_lookup_batch_size(cfg.timing.lookup_batch_size);

    let summary = tick::run_once(&cfg, &feed, &membership).await;
    tracing::info!(
        feed_agents = summary.feed.len(),
        membership_agents = summary.membership.len(),
        failures = summary.failures(),
        "tick finished"
    );

    if let Some(handle) = prom {
        println!("{}", handle.render());
    }
    Ok(())
}
