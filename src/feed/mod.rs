// src/feed/mod.rs
//! # Feed Synchronization & Media Dispatch
//! Resolves posts that are new since the agent's checkpoint, rewrites each
//! caption and delivers the posts one by one, oldest first.
//!
//! The checkpoint advances after every successful dispatch and before the
//! next one starts, so a run that dies halfway resumes at the first post that
//! was not delivered. The first dispatch failure ends the run.

pub mod caption;
pub mod delta;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::config::DeliveryInstance;
use crate::error::SyncError;
use crate::run_log::RunLog;
use crate::store::{AgentCheckpoint, CheckpointStore, ExecutionLog};

use self::caption::{compose_message, dedup_key, sanitize_caption, truncate_chars, MAX_CAPTION_CHARS};
use self::delta::{resolve_delta, select_posts, DeltaTier};

/// Default pause between two dispatches.
pub const DEFAULT_ITEM_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Image,
    Video,
}

impl std::fmt::Display for MediaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaType::Image => f.write_str("image"),
            MediaType::Video => f.write_str("video"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPost {
    pub post_id: String,
    pub caption: String,
    pub media_url: String,
    pub media_type: MediaType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub pinned: bool,
}

/// One outgoing media message; the caption travels with the media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediaMessage {
    pub destination: String,
    pub media_type: MediaType,
    pub media_url: String,
    pub caption: String,
    pub dedup_key: String,
}

/// Static definition of a feed agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedAgent {
    pub agent_id: String,
    pub feed_url: String,
    /// Destination chat (group JID or phone).
    pub destination: String,
    /// Display name the caption persona refers to.
    pub subject_name: String,
    /// Public handle appended under every caption.
    pub subject_handle: String,
    #[serde(default)]
    pub instance_id: Option<String>,
}

#[async_trait::async_trait]
pub trait FeedSource: Send + Sync {
    async fn fetch_posts(&self, feed_url: &str) -> Result<Vec<MediaPost>>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait CaptionTransformer: Send + Sync {
    async fn transform(&self, text: &str, subject_name: &str) -> Result<String>;
    fn name(&self) -> &'static str;
}

#[async_trait::async_trait]
pub trait MediaDispatcher: Send + Sync {
    /// Single call, routed by media type, caption attached.
    async fn send_media(&self, instance: &DeliveryInstance, msg: &MediaMessage) -> Result<()>;
}

/// Outcome handed back to the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRunResult {
    pub success: bool,
    pub last_processed_post_id: Option<String>,
    pub posts_processed: usize,
    pub error: Option<String>,
}

impl FeedRunResult {
    fn ok(processed: usize, last: Option<String>) -> Self {
        Self {
            success: true,
            last_processed_post_id: last,
            posts_processed: processed,
            error: None,
        }
    }

    fn failed(err: &SyncError, processed: usize, last: Option<String>) -> Self {
        Self {
            success: false,
            last_processed_post_id: last,
            posts_processed: processed,
            error: Some(err.to_string()),
        }
    }
}

pub struct FeedSyncWorkflow {
    feed: Arc<dyn FeedSource>,
    transformer: Arc<dyn CaptionTransformer>,
    dispatcher: Arc<dyn MediaDispatcher>,
    checkpoints: Arc<dyn CheckpointStore>,
    log: Arc<dyn ExecutionLog>,
    item_delay: Duration,
}

impl FeedSyncWorkflow {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        transformer: Arc<dyn CaptionTransformer>,
        dispatcher: Arc<dyn MediaDispatcher>,
        checkpoints: Arc<dyn CheckpointStore>,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self {
            feed,
            transformer,
            dispatcher,
            checkpoints,
            log,
            item_delay: DEFAULT_ITEM_DELAY,
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Run one agent once. Never panics, never returns early without
    /// flushing the execution log.
    pub async fn run(
        &self,
        agent: &FeedAgent,
        instance: Option<&DeliveryInstance>,
    ) -> FeedRunResult {
        crate::metrics::ensure_described();
        let mut log = RunLog::new(&agent.agent_id);

        let result = self.run_inner(agent, instance, &mut log).await;

        if result.success {
            log.info(format!(
                "feed sync finished: {} post(s) delivered",
                result.posts_processed
            ));
        } else {
            log.error(format!(
                "feed sync failed after {} post(s): {}",
                result.posts_processed,
                result.error.as_deref().unwrap_or("unknown error")
            ));
        }
        log.flush(self.log.as_ref()).await;

        counter!("sync_runs_total", "workflow" => "feed").increment(1);
        gauge!("sync_last_run_ts").set(Utc::now().timestamp() as f64);
        result
    }

    async fn run_inner(
        &self,
        agent: &FeedAgent,
        instance: Option<&DeliveryInstance>,
        log: &mut RunLog,
    ) -> FeedRunResult {
        log.info(format!("feed sync started ({})", agent.feed_url));

        // 1) Preconditions: zero side effects on failure
        let instance = match DeliveryInstance::require_active(&agent.agent_id, instance) {
            Ok(i) => i,
            Err(e) => return FeedRunResult::failed(&e, 0, None),
        };

        let mut checkpoint = match self.checkpoints.load(&agent.agent_id).await {
            Ok(Some(cp)) => cp,
            Ok(None) => AgentCheckpoint::new_feed(&agent.agent_id),
            Err(e) => {
                let err = SyncError::Checkpoint(SyncError::flatten(&e));
                return FeedRunResult::failed(&err, 0, None);
            }
        };
        if !checkpoint.is_active {
            return FeedRunResult::failed(&SyncError::InactiveAgent(agent.agent_id.clone()), 0, None);
        }

        // 2) Fetch + order
        let raw = match self.feed.fetch_posts(&agent.feed_url).await {
            Ok(p) => p,
            Err(e) => {
                let err = SyncError::Feed(SyncError::flatten(&e));
                return FeedRunResult::failed(&err, 0, None);
            }
        };
        let fetched = raw.len();
        let (posts, fell_back) = select_posts(raw);
        if fell_back {
            log.warn("every fetched post is pinned; processing the unfiltered set");
        }

        // 3) Delta
        let delta = resolve_delta(&posts, checkpoint.last_post_id(), checkpoint.last_run_at);
        log.info(format!(
            "fetched {fetched} post(s), {} eligible, {} new ({})",
            posts.len(),
            delta.posts.len(),
            describe_tier(delta.tier)
        ));
        if delta.posts.is_empty() {
            return FeedRunResult::ok(0, None);
        }

        // 4) Deliver, oldest first, one at a time
        let total = delta.posts.len();
        let mut processed = 0usize;
        let mut last_ok: Option<String> = None;

        for (idx, post) in delta.posts.iter().enumerate() {
            let text = self.rewrite_caption(agent, post, log).await;
            let msg = MediaMessage {
                destination: agent.destination.clone(),
                media_type: post.media_type,
                media_url: post.media_url.clone(),
                caption: compose_message(&text, &agent.subject_handle),
                dedup_key: dedup_key(&agent.agent_id, &post.post_id),
            };

            if let Err(e) = self.dispatcher.send_media(instance, &msg).await {
                counter!("sync_dispatch_errors_total").increment(1);
                tracing::warn!(target: "feed_sync", agent = %agent.agent_id, post_id = %post.post_id, error = ?e, "dispatch failed; stopping run");
                let err = SyncError::Dispatch {
                    post_id: post.post_id.clone(),
                    reason: SyncError::flatten(&e),
                };
                return FeedRunResult::failed(&err, processed, last_ok);
            }

            processed += 1;
            last_ok = Some(post.post_id.clone());
            tracing::debug!(target: "feed_sync", agent = %agent.agent_id, post_id = %post.post_id, dedup_key = %msg.dedup_key, "post dispatched");
            counter!("sync_posts_dispatched_total").increment(1);

            checkpoint.advance_feed(&post.post_id, post.timestamp);
            if let Err(e) = self.checkpoints.save(&checkpoint).await {
                // Delivered but not recorded: stop before anything else goes out.
                let err = SyncError::Checkpoint(SyncError::flatten(&e));
                return FeedRunResult::failed(&err, processed, last_ok);
            }
            log.info(format!(
                "delivered post {} ({}) [{}/{}]",
                post.post_id, post.media_type, processed, total
            ));

            if idx + 1 < total && !self.item_delay.is_zero() {
                tokio::time::sleep(self.item_delay).await;
            }
        }

        FeedRunResult::ok(processed, last_ok)
    }

    /// Transformed caption, or the cleaned original when the generator fails.
    async fn rewrite_caption(&self, agent: &FeedAgent, post: &MediaPost, log: &mut RunLog) -> String {
        let fallback = || truncate_chars(&sanitize_caption(&post.caption), MAX_CAPTION_CHARS);

        match self
            .transformer
            .transform(&post.caption, &agent.subject_name)
            .await
        {
            Ok(t) => {
                let cleaned = sanitize_caption(&t);
                if cleaned.is_empty() {
                    counter!("sync_caption_fallbacks_total").increment(1);
                    log.warn(format!(
                        "caption generator returned empty text for post {}; using original caption",
                        post.post_id
                    ));
                    fallback()
                } else {
                    truncate_chars(&cleaned, MAX_CAPTION_CHARS)
                }
            }
            Err(e) => {
                counter!("sync_caption_fallbacks_total").increment(1);
                log.warn(format!(
                    "caption generator ({}) failed for post {}: {e:#}; using original caption",
                    self.transformer.name(),
                    post.post_id
                ));
                fallback()
            }
        }
    }
}

fn describe_tier(tier: DeltaTier) -> &'static str {
    match tier {
        DeltaTier::EmptyFeed => "feed returned no posts",
        DeltaTier::UpToDate => "checkpoint is the newest post",
        DeltaTier::AfterCursor => "after checkpointed post",
        DeltaTier::SinceLastRun => "checkpointed post not in window, using last run time",
        DeltaTier::LatestOnly => "no usable checkpoint, newest post only",
    }
}
