// src/config.rs
//! Sync configuration: storage, gateway/OpenAI credentials, pacing, delivery
//! instances and the agent definitions the external timer drives.
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::SyncError;
use crate::feed::FeedAgent;
use crate::membership::contacts::DEFAULT_LOOKUP_BATCH;
use crate::membership::MembershipAgent;
use crate::store::json_file::DEFAULT_STATE_PATH;
use crate::store::DEFAULT_LOG_CAP;

pub const ENV_CONFIG_PATH: &str = "SYNC_CONFIG_PATH";
pub const ENV_GATEWAY_API_KEY: &str = "SYNC_GATEWAY_API_KEY";
pub const ENV_OPENAI_API_KEY: &str = "OPENAI_API_KEY";
/// Upper bound on `gateway.max_retries`.
pub const MAX_GATEWAY_RETRIES: u8 = 5;

fn default_true() -> bool {
    true
}
fn default_state_path() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_PATH)
}
fn default_log_cap() -> usize {
    DEFAULT_LOG_CAP
}
fn default_env_marker() -> String {
    "ENV".to_string()
}
fn default_gateway_timeout() -> u64 {
    15
}
fn default_gateway_retries() -> u8 {
    3
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_item_delay() -> u64 {
    3
}
fn default_batch_size() -> usize {
    5
}

/// A WhatsApp gateway session agents deliver through or collect from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryInstance {
    pub id: String,
    /// Instance name as known by the gateway (used in request paths).
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl DeliveryInstance {
    /// Precondition shared by both workflows: a bound, active instance.
    pub fn require_active<'a>(
        agent_id: &str,
        instance: Option<&'a DeliveryInstance>,
    ) -> std::result::Result<&'a DeliveryInstance, SyncError> {
        match instance {
            None => Err(SyncError::MissingInstance(agent_id.to_string())),
            Some(i) if !i.active => Err(SyncError::InactiveInstance(i.id.clone())),
            Some(i) => Ok(i),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_state_path")]
    pub state_path: PathBuf,
    #[serde(default = "default_log_cap")]
    pub log_cap: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: default_state_path(),
            log_cap: default_log_cap(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub base_url: String,
    /// "ENV" means: read from SYNC_GATEWAY_API_KEY
    #[serde(default = "default_env_marker")]
    pub api_key: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_gateway_retries")]
    pub max_retries: u8,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: default_env_marker(),
            timeout_secs: default_gateway_timeout(),
            max_retries: default_gateway_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    #[serde(default)]
    pub enabled: bool,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default = "default_env_marker")]
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_key: default_env_marker(),
            model: default_model(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Pause between two feed dispatches.
    #[serde(default = "default_item_delay")]
    pub item_delay_secs: u64,
    /// Concurrent contact lookups per batch, at most 5.
    #[serde(default = "default_batch_size")]
    pub lookup_batch_size: usize,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            item_delay_secs: default_item_delay(),
            lookup_batch_size: default_batch_size(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub instances: Vec<DeliveryInstance>,
    #[serde(default)]
    pub feed_agents: Vec<FeedAgent>,
    #[serde(default)]
    pub membership_agents: Vec<MembershipAgent>,
}

impl SyncConfig {
    /// Look up the instance an agent is bound to.
    pub fn instance(&self, id: Option<&str>) -> Option<&DeliveryInstance> {
        let id = id?;
        self.instances.iter().find(|i| i.id == id)
    }

    fn has_agents(&self) -> bool {
        !self.feed_agents.is_empty() || !self.membership_agents.is_empty()
    }
}

/// Load config from an explicit path. Supports TOML or JSON formats.
pub fn load_config_from(path: &Path) -> Result<SyncConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading sync config from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let mut cfg = parse_config(&content, ext.as_str())?;
    resolve_secrets(&mut cfg)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Load config using env var + fallbacks:
/// 1) $SYNC_CONFIG_PATH
/// 2) config/sync.toml
/// 3) config/sync.json
pub fn load_config_default() -> Result<SyncConfig> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_config_from(&pb);
        } else {
            return Err(anyhow!("SYNC_CONFIG_PATH points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sync.toml");
    if toml_p.exists() {
        return load_config_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sync.json");
    if json_p.exists() {
        return load_config_from(&json_p);
    }
    bail!("no sync config found (set SYNC_CONFIG_PATH or create config/sync.toml)")
}

fn parse_config(s: &str, hint_ext: &str) -> Result<SyncConfig> {
    if hint_ext == "json" {
        return serde_json::from_str(s).context("parsing sync config JSON");
    }
    if hint_ext == "toml" {
        return toml::from_str(s).context("parsing sync config TOML");
    }
    // Unknown extension: sniff JSON first, then TOML.
    if s.trim_start().starts_with('{') {
        if let Ok(v) = serde_json::from_str(s) {
            return Ok(v);
        }
    }
    toml::from_str(s).context("unsupported sync config format")
}

fn resolve_secrets(cfg: &mut SyncConfig) -> Result<()> {
    if cfg.gateway.api_key.trim().eq_ignore_ascii_case("env") {
        cfg.gateway.api_key = match std::env::var(ENV_GATEWAY_API_KEY) {
            Ok(k) => k,
            Err(_) if cfg.has_agents() => {
                bail!("Missing {ENV_GATEWAY_API_KEY} env var")
            }
            Err(_) => String::new(),
        };
    }
    if cfg.openai.api_key.trim().eq_ignore_ascii_case("env") {
        cfg.openai.api_key = match std::env::var(ENV_OPENAI_API_KEY) {
            Ok(k) => k,
            Err(_) if cfg.openai.enabled => bail!("Missing {ENV_OPENAI_API_KEY} env var"),
            Err(_) => String::new(),
        };
    }
    Ok(())
}

fn validate(cfg: &SyncConfig) -> Result<()> {
    let mut ids = HashSet::new();
    let agent_ids = cfg
        .feed_agents
        .iter()
        .map(|a| a.agent_id.as_str())
        .chain(cfg.membership_agents.iter().map(|a| a.agent_id.as_str()));
    for id in agent_ids {
        if id.trim().is_empty() {
            bail!("agent with empty agent_id");
        }
        if !ids.insert(id) {
            bail!("duplicate agent_id {id}");
        }
    }

    let known: HashSet<&str> = cfg.instances.iter().map(|i| i.id.as_str()).collect();
    let bound = cfg
        .feed_agents
        .iter()
        .map(|a| (a.agent_id.as_str(), a.instance_id.as_deref()))
        .chain(
            cfg.membership_agents
                .iter()
                .map(|a| (a.agent_id.as_str(), a.instance_id.as_deref())),
        );
    for (agent, instance) in bound {
        if let Some(inst) = instance {
            if !known.contains(inst) {
                bail!("agent {agent} refers to unknown instance {inst}");
            }
        }
    }

    if !(1..=DEFAULT_LOOKUP_BATCH).contains(&cfg.timing.lookup_batch_size) {
        bail!(
            "timing.lookup_batch_size must be between 1 and {DEFAULT_LOOKUP_BATCH}, got {}",
            cfg.timing.lookup_batch_size
        );
    }
    if cfg.gateway.max_retries > MAX_GATEWAY_RETRIES {
        bail!(
            "gateway.max_retries must be at most {MAX_GATEWAY_RETRIES}, got {}",
            cfg.gateway.max_retries
        );
    }
    Ok(())
}
