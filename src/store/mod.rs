// src/store/mod.rs
//! Checkpoint store, execution log and voter store contracts.
//!
//! These traits are the surface the surrounding CRUD/UI layer uses to read
//! and reset agent state. Implementations hold no business logic: the
//! workflows decide *when* to write, the store only persists.

pub mod json_file;
pub mod memory;

use std::collections::BTreeSet;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use json_file::JsonFileStore;
pub use memory::MemoryStore;

/// Maximum execution-log lines retained per agent; oldest lines drop first.
pub const DEFAULT_LOG_CAP: usize = 500;

/// Persisted resume marker of an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Cursor {
    Feed {
        last_post_id: Option<String>,
    },
    Membership {
        #[serde(default)]
        last_processed_member_ids: BTreeSet<String>,
    },
}

/// One per agent instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentCheckpoint {
    pub agent_id: String,
    pub is_active: bool,
    pub cursor: Cursor,
    pub last_run_at: Option<DateTime<Utc>>,
}

impl AgentCheckpoint {
    /// Fresh, active feed checkpoint with no history.
    pub fn new_feed(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            is_active: true,
            cursor: Cursor::Feed { last_post_id: None },
            last_run_at: None,
        }
    }

    /// Fresh, active membership checkpoint with an empty member set.
    pub fn new_membership(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            is_active: true,
            cursor: Cursor::Membership {
                last_processed_member_ids: BTreeSet::new(),
            },
            last_run_at: None,
        }
    }

    pub fn last_post_id(&self) -> Option<&str> {
        match &self.cursor {
            Cursor::Feed { last_post_id } => last_post_id.as_deref(),
            Cursor::Membership { .. } => None,
        }
    }

    /// Phones already processed; empty for feed checkpoints.
    pub fn member_ids(&self) -> BTreeSet<String> {
        match &self.cursor {
            Cursor::Membership {
                last_processed_member_ids,
            } => last_processed_member_ids.clone(),
            Cursor::Feed { .. } => BTreeSet::new(),
        }
    }

    /// Move the feed cursor to a post that was just delivered.
    pub fn advance_feed(&mut self, post_id: &str, post_ts: DateTime<Utc>) {
        self.cursor = Cursor::Feed {
            last_post_id: Some(post_id.to_string()),
        };
        self.last_run_at = Some(post_ts);
    }

    /// Add a phone to the processed set. The set only ever grows.
    pub fn record_member(&mut self, phone: &str) {
        match &mut self.cursor {
            Cursor::Membership {
                last_processed_member_ids,
            } => {
                last_processed_member_ids.insert(phone.to_string());
            }
            Cursor::Feed { .. } => {
                self.cursor = Cursor::Membership {
                    last_processed_member_ids: BTreeSet::from([phone.to_string()]),
                };
            }
        }
    }
}

/// One timestamped execution-log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Which resolution tier produced a stored voter name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NameSource {
    #[serde(rename = "group-metadata-pushName")]
    GroupMetadataPushName,
    #[serde(rename = "group-metadata-name")]
    GroupMetadataName,
    #[serde(rename = "group-metadata-notify")]
    GroupMetadataNotify,
    #[serde(rename = "contacts-api")]
    ContactsApi,
    #[serde(rename = "placeholder")]
    Placeholder,
    #[serde(rename = "manual")]
    Manual,
}

impl NameSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            NameSource::GroupMetadataPushName => "group-metadata-pushName",
            NameSource::GroupMetadataName => "group-metadata-name",
            NameSource::GroupMetadataNotify => "group-metadata-notify",
            NameSource::ContactsApi => "contacts-api",
            NameSource::Placeholder => "placeholder",
            NameSource::Manual => "manual",
        }
    }
}

impl std::fmt::Display for NameSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Voter row. Owned by the CRUD subsystem; this crate only creates rows and
/// rewrites `nome` / `name_source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoterRecord {
    pub phone: String,
    pub nome: String,
    pub name_source: NameSource,
    pub municipio: Option<String>,
    pub bairro: Option<String>,
    pub indicacao: Option<String>,
    pub collector_agent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Insert payload for a voter discovered by a collector agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewVoter {
    pub phone: String,
    pub nome: String,
    pub name_source: NameSource,
    pub municipio: Option<String>,
    pub bairro: Option<String>,
    pub indicacao: Option<String>,
    pub collector_agent_id: Option<String>,
}

impl NewVoter {
    pub(crate) fn into_record(self, now: DateTime<Utc>) -> VoterRecord {
        VoterRecord {
            phone: self.phone,
            nome: self.nome,
            name_source: self.name_source,
            municipio: self.municipio,
            bairro: self.bairro,
            indicacao: self.indicacao,
            collector_agent_id: self.collector_agent_id,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait::async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentCheckpoint>>;
    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()>;
    /// Manual reset: forget the cursor and `last_run_at`, keep `is_active`.
    async fn reset(&self, agent_id: &str) -> Result<()>;
    /// Operator switch. Creates nothing if the agent has never run.
    async fn set_active(&self, agent_id: &str, active: bool) -> Result<()>;
}

#[async_trait::async_trait]
pub trait ExecutionLog: Send + Sync {
    /// Append lines in order. Never rewrites earlier lines.
    async fn append(&self, agent_id: &str, entries: &[LogEntry]) -> Result<()>;
    async fn entries(&self, agent_id: &str) -> Result<Vec<LogEntry>>;
}

#[async_trait::async_trait]
pub trait VoterStore: Send + Sync {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<VoterRecord>>;
    async fn create(&self, voter: NewVoter) -> Result<VoterRecord>;
    /// Overwrite only `nome` and `name_source`.
    async fn update_name(&self, phone: &str, nome: &str, source: NameSource) -> Result<()>;
}

/// Reset helper shared by implementations.
pub(crate) fn reset_cursor(cp: &mut AgentCheckpoint) {
    cp.cursor = match cp.cursor {
        Cursor::Feed { .. } => Cursor::Feed { last_post_id: None },
        Cursor::Membership { .. } => Cursor::Membership {
            last_processed_member_ids: BTreeSet::new(),
        },
    };
    cp.last_run_at = None;
}

/// Keep at most `cap` newest lines.
pub(crate) fn cap_log(lines: &mut Vec<LogEntry>, cap: usize) {
    if lines.len() > cap {
        let excess = lines.len() - cap;
        lines.drain(0..excess);
    }
}
