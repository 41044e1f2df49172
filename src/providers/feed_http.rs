// src/providers/feed_http.rs
//! Instagram feed over HTTP: the JSON dataset a profile scraper publishes.
//!
//! Decoding is tolerant. A dataset may be a bare array or wrapped in
//! `items` / `data`; ids may be strings or numbers; timestamps ISO-8601 or
//! unix seconds (milliseconds are detected). Items that cannot be turned into
//! a post are skipped with a warning instead of failing the whole fetch.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;

use super::{send_with_retry, DEFAULT_BACKOFF, USER_AGENT};
use crate::feed::{FeedSource, MediaPost, MediaType};

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Dataset {
    Bare(Vec<RawItem>),
    Items { items: Vec<RawItem> },
    Data { data: Vec<RawItem> },
}

impl Dataset {
    fn into_items(self) -> Vec<RawItem> {
        match self {
            Dataset::Bare(v) | Dataset::Items { items: v } | Dataset::Data { data: v } => v,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Num(u64),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawTs {
    Unix(i64),
    Text(String),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawItem {
    #[serde(default)]
    id: Option<RawId>,
    #[serde(default)]
    short_code: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    display_url: Option<String>,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    timestamp: Option<RawTs>,
    #[serde(default)]
    is_pinned: bool,
}

fn parse_ts(ts: &RawTs) -> Option<DateTime<Utc>> {
    match ts {
        // > year 33658 in seconds means the value is in milliseconds
        RawTs::Unix(n) if *n > 1_000_000_000_000 => Utc.timestamp_millis_opt(*n).single(),
        RawTs::Unix(n) => Utc.timestamp_opt(*n, 0).single(),
        RawTs::Text(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|d| d.with_timezone(&Utc))
            .or_else(|| s.trim().parse::<i64>().ok().and_then(|n| parse_ts(&RawTs::Unix(n)))),
    }
}

fn to_post(item: RawItem) -> Option<MediaPost> {
    let post_id = match item.id {
        Some(RawId::Text(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(RawId::Num(n)) => n.to_string(),
        _ => item.short_code.filter(|s| !s.trim().is_empty())?,
    };
    let is_video = item
        .kind
        .as_deref()
        .is_some_and(|k| k.eq_ignore_ascii_case("video"));
    let (media_type, media_url) = match (is_video, item.video_url) {
        (true, Some(v)) if !v.is_empty() => (MediaType::Video, v),
        _ => (MediaType::Image, item.display_url.filter(|u| !u.is_empty())?),
    };
    let timestamp = item.timestamp.as_ref().and_then(parse_ts)?;
    Some(MediaPost {
        post_id,
        caption: item.caption.unwrap_or_default(),
        media_url,
        media_type,
        timestamp,
        pinned: item.is_pinned,
    })
}

/// Decode a dataset body into posts, dropping unusable items.
pub fn parse_dataset(body: &str) -> Result<Vec<MediaPost>> {
    let ds: Dataset = serde_json::from_str(body).context("parsing feed dataset JSON")?;
    let items = ds.into_items();
    let total = items.len();
    let posts: Vec<MediaPost> = items.into_iter().filter_map(to_post).collect();
    if posts.len() < total {
        tracing::warn!(target: "providers", skipped = total - posts.len(), "feed items without id, media or timestamp skipped");
    }
    Ok(posts)
}

pub struct HttpFeedSource {
    client: Client,
    max_attempts: u8,
    backoff: Duration,
}

impl HttpFeedSource {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building feed HTTP client")?;
        Ok(Self {
            client,
            max_attempts: 3,
            backoff: DEFAULT_BACKOFF,
        })
    }

    pub fn with_retries(mut self, attempts: u8, backoff: Duration) -> Self {
        self.max_attempts = attempts;
        self.backoff = backoff;
        self
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_posts(&self, feed_url: &str) -> Result<Vec<MediaPost>> {
        let rsp = send_with_retry("feed fetch", self.max_attempts, self.backoff, || {
            self.client.get(feed_url)
        })
        .await?;
        let body = rsp.text().await.context("reading feed body")?;
        parse_dataset(&body)
    }

    fn name(&self) -> &'static str {
        "http-feed"
    }
}
