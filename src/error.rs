// src/error.rs
//! Workflow-level errors. External adapters and stores speak `anyhow`; the
//! workflows classify those failures into `SyncError` before rendering them
//! into a run result.

/// Errors that end (or short-circuit) a single agent run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// The agent has no delivery/collector instance bound to it.
    #[error("no active instance bound to agent {0}")]
    MissingInstance(String),

    /// The bound instance exists but is switched off.
    #[error("instance {0} is inactive")]
    InactiveInstance(String),

    /// The agent itself was deactivated by an operator.
    #[error("agent {0} is inactive")]
    InactiveAgent(String),

    /// Fetching the external feed failed.
    #[error("feed fetch failed: {0}")]
    Feed(String),

    /// Delivering a post failed; processing stopped at this post.
    #[error("dispatch of post {post_id} failed: {reason}")]
    Dispatch { post_id: String, reason: String },

    /// Persisting or reading a checkpoint failed.
    #[error("checkpoint store failed: {0}")]
    Checkpoint(String),

    /// Fetching the group roster failed.
    #[error("roster fetch failed: {0}")]
    Roster(String),
}

impl SyncError {
    /// Render an `anyhow` chain on one line, the way run results carry it.
    pub(crate) fn flatten(err: &anyhow::Error) -> String {
        format!("{err:#}")
    }
}
