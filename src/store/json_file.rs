// src/store/json_file.rs
//! Single-document JSON store: checkpoints, execution logs and voters in one
//! file, rewritten through a synced temp file + rename on every mutation.
//!
//! A mutation is applied to a copy of the document and only becomes visible
//! once the rename succeeded, so a failed write never leaves the in-memory
//! view ahead of the disk.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::{fs, sync::Mutex};

use super::{
    cap_log, reset_cursor, AgentCheckpoint, CheckpointStore, ExecutionLog, LogEntry, NameSource,
    NewVoter, VoterRecord, VoterStore, DEFAULT_LOG_CAP,
};

pub const DEFAULT_STATE_PATH: &str = "state/sync_state.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StateDoc {
    #[serde(default)]
    checkpoints: BTreeMap<String, AgentCheckpoint>,
    #[serde(default)]
    logs: BTreeMap<String, Vec<LogEntry>>,
    #[serde(default)]
    voters: BTreeMap<String, VoterRecord>,
}

pub struct JsonFileStore {
    path: PathBuf,
    doc: Mutex<StateDoc>,
    log_cap: usize,
}

impl JsonFileStore {
    /// Open (or lazily create) the state file. A missing file is an empty
    /// store; an empty, truncated or unreadable one is an error, never
    /// silently reset.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read_to_string(&path).await {
            Ok(s) if s.trim().is_empty() => {
                bail!("state file {} exists but is empty", path.display())
            }
            Ok(s) => serde_json::from_str(&s)
                .with_context(|| format!("parsing state file {}", path.display()))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateDoc::default(),
            Err(e) => {
                return Err(e).with_context(|| format!("reading state file {}", path.display()))
            }
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
            log_cap: DEFAULT_LOG_CAP,
        })
    }

    pub fn with_log_cap(mut self, cap: usize) -> Self {
        self.log_cap = cap.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply `f` to a copy of the document, persist it, then publish it.
    async fn mutate<T: Send>(&self, f: impl FnOnce(&mut StateDoc) -> Result<T> + Send) -> Result<T> {
        let mut guard = self.doc.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        write_atomic(&self.path, &next).await?;
        *guard = next;
        Ok(out)
    }
}

async fn write_atomic(path: &Path, doc: &StateDoc) -> Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)
            .await
            .with_context(|| format!("creating state dir {}", dir.display()))?;
    }
    let bytes = serde_json::to_vec_pretty(doc).context("serializing state")?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp)
        .await
        .with_context(|| format!("creating {}", tmp.display()))?;
    file.write_all(&bytes)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    file.sync_all()
        .await
        .with_context(|| format!("syncing {}", tmp.display()))?;
    drop(file);
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming {} into place", tmp.display()))?;
    sync_parent_dir(path).await
}

/// Persist the rename itself. Directories cannot be opened for syncing on
/// every platform, so this is unix-only.
#[cfg(unix)]
async fn sync_parent_dir(path: &Path) -> Result<()> {
    let dir = match path.parent().filter(|d| !d.as_os_str().is_empty()) {
        Some(d) => d,
        None => Path::new("."),
    };
    fs::File::open(dir)
        .await
        .with_context(|| format!("opening state dir {}", dir.display()))?
        .sync_all()
        .await
        .with_context(|| format!("syncing state dir {}", dir.display()))
}

#[cfg(not(unix))]
async fn sync_parent_dir(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait::async_trait]
impl CheckpointStore for JsonFileStore {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentCheckpoint>> {
        Ok(self.doc.lock().await.checkpoints.get(agent_id).cloned())
    }

    async fn save(&self, checkpoint: &AgentCheckpoint) -> Result<()> {
        let cp = checkpoint.clone();
        self.mutate(move |d| {
            d.checkpoints.insert(cp.agent_id.clone(), cp);
            Ok(())
        })
        .await
    }

    async fn reset(&self, agent_id: &str) -> Result<()> {
        self.mutate(|d| {
            if let Some(cp) = d.checkpoints.get_mut(agent_id) {
                reset_cursor(cp);
            }
            Ok(())
        })
        .await
    }

    async fn set_active(&self, agent_id: &str, active: bool) -> Result<()> {
        self.mutate(|d| {
            if let Some(cp) = d.checkpoints.get_mut(agent_id) {
                cp.is_active = active;
            }
            Ok(())
        })
        .await
    }
}

#[async_trait::async_trait]
impl ExecutionLog for JsonFileStore {
    async fn append(&self, agent_id: &str, entries: &[LogEntry]) -> Result<()> {
        let cap = self.log_cap;
        self.mutate(|d| {
            let lines = d.logs.entry(agent_id.to_string()).or_default();
            lines.extend_from_slice(entries);
            cap_log(lines, cap);
            Ok(())
        })
        .await
    }

    async fn entries(&self, agent_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self
            .doc
            .lock()
            .await
            .logs
            .get(agent_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[async_trait::async_trait]
impl VoterStore for JsonFileStore {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<VoterRecord>> {
        Ok(self.doc.lock().await.voters.get(phone).cloned())
    }

    async fn create(&self, voter: NewVoter) -> Result<VoterRecord> {
        self.mutate(|d| {
            if d.voters.contains_key(&voter.phone) {
                bail!("voter {} already exists", voter.phone);
            }
            let record = voter.into_record(Utc::now());
            d.voters.insert(record.phone.clone(), record.clone());
            Ok(record)
        })
        .await
    }

    async fn update_name(&self, phone: &str, nome: &str, source: NameSource) -> Result<()> {
        self.mutate(|d| {
            let Some(v) = d.voters.get_mut(phone) else {
                bail!("voter {phone} not found");
            };
            v.nome = nome.to_string();
            v.name_source = source;
            v.updated_at = Utc::now();
            Ok(())
        })
        .await
    }
}
