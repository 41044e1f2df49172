// src/store/memory.rs
//! In-process store for tests and embedding. Same semantics as the file
//! store, nothing survives the process.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, bail, Result};
use chrono::Utc;

use super::{
    cap_log, reset_cursor, AgentCheckpoint, CheckpointStore, ExecutionLog, LogEntry, NameSource,
    NewVoter, VoterRecord, VoterStore, DEFAULT_LOG_CAP,
};

#[derive(Debug, Default)]
struct Inner {
    checkpoints: HashMap<String, AgentCheckpoint>,
    logs: HashMap<String, Vec<LogEntry>>,
    voters: HashMap<String, VoterRecord>,
}

#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    log_cap: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_log_cap(DEFAULT_LOG_CAP)
    }

    pub fn with_log_cap(cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            log_cap: cap.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory store mutex poisoned"))
    }

    /// Seed a voter directly, e.g. one entered manually in the dashboard.
    pub fn insert_voter(&self, voter: VoterRecord) -> Result<()> {
        self.lock()?.voters.insert(voter.phone.clone(), voter);
        Ok(())
    }

    pub fn voters(&self) -> Result<Vec<VoterRecord>> {
        let g = self.lock()?;
        let mut out: Vec<VoterRecord> = g.voters.values().cloned().collect();
        out.sort_by(|a, b| a.phone.cmp(&b.phone));
        Ok(out)
    }
}

#[async_trait::async_trait]
impl CheckpointStore for MemoryStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentCheckpoint>> {
        Ok(self.lock()?.checkpoints.get(agent_id).cloned())
    }

    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()> {
        self.lock()?
            .checkpoints
            .insert(checkpoint.agent_id.clone(), checkpoint.clone());
        Ok(())
    }

    async fn reset(&self, agent_id: &str) -> Result<()> {
        if let Some(cp) = self.lock()?.checkpoints.get_mut(agent_id) {
            reset_cursor(cp);
        }
        Ok(())
    }

    async fn set_active(&self, agent_id: &str, active: bool) -> Result<()> {
        if let Some(cp) = self.lock()?.checkpoints.get_mut(agent_id) {
            cp.is_active = active;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ExecutionLog for MemoryStore {
    async fn append(&self, agent_id: &str, entries: &[LogEntry]) -> Result<()> {
        let cap = self.log_cap;
        let mut g = self.lock()?;
        let lines = g.logs.entry(agent_id.to_string()).or_default();
        lines.extend_from_slice(entries);
        cap_log(lines, cap);
        Ok(())
    }

    async fn entries(&self, agent_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.lock()?.logs.get(agent_id).cloned().unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl VoterStore for MemoryStore {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<VoterRecord>> {
        Ok(self.lock()?.voters.get(phone).cloned())
    }

    async fn create(&self, voter: NewVoter) -> Result<VoterRecord> {
        let mut g = self.lock()?;
        if g.voters.contains_key(&voter.phone) {
            bail!("voter {} already exists", voter.phone);
        }
        let record = voter.into_record(Utc::now());
        g.voters.insert(record.phone.clone(), record.clone());
        Ok(record)
    }

    async fn update_name(&self, phone: &str, nome: &str, source: NameSource) -> Result<()> {
        let mut g = self.lock()?;
        let Some(v) = g.voters.get_mut(phone) else {
            bail!("voter {phone} not found");
        };
        v.nome = nome.to_string();
        v.name_source = source;
        v.updated_at = Utc::now();
        Ok(())
    }
}
