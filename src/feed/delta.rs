// src/feed/delta.rs
//! Ordering and "new since last checkpoint" resolution for feed posts.
//! Pure functions over already-fetched posts.

use chrono::{DateTime, Utc};

use super::MediaPost;

/// Which resolution tier produced the delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaTier {
    /// Feed returned nothing at all.
    EmptyFeed,
    /// Checkpointed post is the newest one.
    UpToDate,
    /// Posts strictly after the checkpointed post.
    AfterCursor,
    /// Checkpointed post drifted out of the window (or is unknown); posts
    /// newer than `last_run_at`.
    SinceLastRun,
    /// No usable signal: only the newest post.
    LatestOnly,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delta {
    pub tier: DeltaTier,
    pub posts: Vec<MediaPost>,
}

/// Drop pinned posts (unless that empties the set) and sort ascending by
/// timestamp, ties by post id. Returns the posts and whether the pinned
/// filter had to be abandoned.
pub fn select_posts(raw: Vec<MediaPost>) -> (Vec<MediaPost>, bool) {
    let total = raw.len();
    let (pinned, mut kept): (Vec<MediaPost>, Vec<MediaPost>) =
        raw.into_iter().partition(|p| p.pinned);

    let fell_back = kept.is_empty() && total > 0;
    if fell_back {
        kept = pinned;
    }

    kept.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.post_id.cmp(&b.post_id))
    });
    (kept, fell_back)
}

/// Resolve the delta over posts already sorted by [`select_posts`].
pub fn resolve_delta(
    posts: &[MediaPost],
    last_post_id: Option<&str>,
    last_run_at: Option<DateTime<Utc>>,
) -> Delta {
    let Some(newest) = posts.last() else {
        return Delta {
            tier: DeltaTier::EmptyFeed,
            posts: Vec::new(),
        };
    };

    // 1) Cursor found in the window
    if let Some(id) = last_post_id {
        if let Some(pos) = posts.iter().position(|p| p.post_id == id) {
            if newest.post_id == id {
                return Delta {
                    tier: DeltaTier::UpToDate,
                    posts: Vec::new(),
                };
            }
            return Delta {
                tier: DeltaTier::AfterCursor,
                posts: posts[pos + 1..].to_vec(),
            };
        }
    }

    // 2) Window drift (or no cursor yet): fall back to the run timestamp
    if let Some(since) = last_run_at {
        return Delta {
            tier: DeltaTier::SinceLastRun,
            posts: posts
                .iter()
                .filter(|p| p.timestamp > since)
                .cloned()
                .collect(),
        };
    }

    // 3) Ambiguous first run: never replay the backlog
    Delta {
        tier: DeltaTier::LatestOnly,
        posts: vec![newest.clone()],
    }
}
