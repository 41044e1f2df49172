// src/metrics.rs
//! Metric names used by both workflows, and an optional Prometheus recorder
//! for the `sync-tick` process. Without an installed recorder every
//! `counter!`/`gauge!` call is a no-op.

use anyhow::{Context, Result};
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

pub fn ensure_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("sync_runs_total", "Agent runs, labelled by workflow.");
        describe_counter!(
            "sync_posts_dispatched_total",
            "Posts delivered to a destination chat."
        );
        describe_counter!(
            "sync_dispatch_errors_total",
            "Dispatch failures that stopped a feed run."
        );
        describe_counter!(
            "sync_caption_fallbacks_total",
            "Posts sent with the cleaned original caption because the generator failed."
        );
        describe_counter!("sync_voters_created_total", "Voter rows created from rosters.");
        describe_counter!(
            "sync_voters_updated_total",
            "Voter names replaced by a better name."
        );
        describe_counter!("sync_contact_lookups_total", "Contact name lookups issued.");
        describe_counter!(
            "sync_contact_lookup_errors_total",
            "Contact lookups that failed and were cached as empty."
        );
        describe_gauge!("sync_last_run_ts", "Unix ts when an agent run last finished.");
    });
}

/// Install the global Prometheus recorder. Fails if one is already installed.
pub fn install_prometheus() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .context("installing prometheus recorder")?;
    ensure_described();
    Ok(handle)
}
