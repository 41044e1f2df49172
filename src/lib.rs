// src/lib.rs
// Public library surface for the sync-tick binary and integration tests.

pub mod config;
pub mod error;
pub mod merge;
pub mod metrics;
pub mod run_log;
pub mod store;

// Workflows
pub mod feed;
pub mod membership;
pub mod tick;

// External adapters and test doubles
pub mod mock;
pub mod providers;

// ---- Re-exports for stable public API ----
pub use crate::config::{load_config_default, load_config_from, DeliveryInstance, SyncConfig};
pub use crate::error::SyncError;
pub use crate::feed::{FeedAgent, FeedRunResult, FeedSyncWorkflow};
pub use crate::membership::{MembershipAgent, MembershipRunResult, MembershipWorkflow};
pub use crate::store::{CheckpointStore, ExecutionLog, JsonFileStore, MemoryStore, VoterStore};
