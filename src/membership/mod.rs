// src/membership/mod.rs
//! # Membership Differencing & Contact Enrichment
//! Diffs the current group roster against the phones already processed,
//! resolves a display name for every newcomer and upserts a voter row.
//!
//! Members who left the group are never detected or pruned. The processed
//! set is saved after every successful upsert; a member whose upsert failed
//! stays out of it and is retried on the next tick.

pub mod contacts;
pub mod names;
pub mod normalize;
pub mod voters;

use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::config::DeliveryInstance;
use crate::error::SyncError;
use crate::run_log::RunLog;
use crate::store::{AgentCheckpoint, CheckpointStore, ExecutionLog, VoterStore};

use self::contacts::{ContactCache, DEFAULT_LOOKUP_BATCH};
use self::names::{embedded_name, resolve_name};
use self::normalize::{to_members, GroupMember, RawParticipant};
use self::voters::{upsert_voter, UpsertOutcome};

/// Static definition of a collector agent bound to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipAgent {
    pub agent_id: String,
    /// Group JID, e.g. "120363...@g.us".
    pub group_id: String,
    #[serde(default)]
    pub instance_id: Option<String>,
    /// Copied onto every voter this agent creates.
    #[serde(default)]
    pub municipio: Option<String>,
    #[serde(default)]
    pub bairro: Option<String>,
    #[serde(default)]
    pub indicacao: Option<String>,
}

#[async_trait::async_trait]
pub trait GroupSnapshotSource: Send + Sync {
    async fn fetch_participants(
        &self,
        instance: &DeliveryInstance,
        group_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<RawParticipant>>;
}

#[async_trait::async_trait]
pub trait ContactLookup: Send + Sync {
    /// Display name saved for a phone, `None` when the gateway knows none.
    async fn lookup_name(&self, instance: &DeliveryInstance, phone: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MembershipRunResult {
    pub success: bool,
    /// New members handled successfully (created, updated or unchanged).
    pub members_processed: usize,
    pub voters_created: usize,
    pub voters_updated: usize,
    /// New members whose upsert failed; retried next tick.
    pub voters_failed: usize,
    pub error: Option<String>,
}

impl MembershipRunResult {
    fn failed(err: &SyncError) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            ..Self::default()
        }
    }
}

pub struct MembershipWorkflow {
    roster: Arc<dyn GroupSnapshotSource>,
    contacts: Arc<dyn ContactLookup>,
    checkpoints: Arc<dyn CheckpointStore>,
    voters: Arc<dyn VoterStore>,
    log: Arc<dyn ExecutionLog>,
    lookup_batch_size: usize,
}

impl MembershipWorkflow {
    pub fn new(
        roster: Arc<dyn GroupSnapshotSource>,
        contacts: Arc<dyn ContactLookup>,
        checkpoints: Arc<dyn CheckpointStore>,
        voters: Arc<dyn VoterStore>,
        log: Arc<dyn ExecutionLog>,
    ) -> Self {
        Self {
            roster,
            contacts,
            checkpoints,
            voters,
            log,
            lookup_batch_size: DEFAULT_LOOKUP_BATCH,
        }
    }

    /// Clamped to `1..=DEFAULT_LOOKUP_BATCH`.
    pub fn with_lookup_batch_size(mut self, n: usize) -> Self {
        self.lookup_batch_size = n.clamp(1, DEFAULT_LOOKUP_BATCH);
        self
    }

    /// Run one agent once. Every failure ends up in the execution log and
    /// the result; nothing propagates to the caller.
    pub async fn run(
        &self,
        agent: &MembershipAgent,
        instance: Option<&DeliveryInstance>,
    ) -> MembershipRunResult {
        crate::metrics::ensure_described();
        let mut log = RunLog::new(&agent.agent_id);

        let result = self.run_inner(agent, instance, &mut log).await;

        match &result.error {
            None => log.info(format!(
                "membership sync finished: {} processed, {} created, {} updated, {} failed",
                result.members_processed,
                result.voters_created,
                result.voters_updated,
                result.voters_failed
            )),
            Some(e) => log.error(format!("membership sync failed: {e}")),
        }
        log.flush(self.log.as_ref()).await;

        counter!("sync_runs_total", "workflow" => "membership").increment(1);
        gauge!("sync_last_run_ts").set(Utc::now().timestamp() as f64);
        result
    }

    async fn run_inner(
        &self,
        agent: &MembershipAgent,
        instance: Option<&DeliveryInstance>,
        log: &mut RunLog,
    ) -> MembershipRunResult {
        log.info(format!("membership sync started ({})", agent.group_id));

        // 1) Preconditions
        let instance = match DeliveryInstance::require_active(&agent.agent_id, instance) {
            Ok(i) => i,
            Err(e) => return MembershipRunResult::failed(&e),
        };
        let mut checkpoint = match self.checkpoints.load(&agent.agent_id).await {
            Ok(Some(cp)) => cp,
            Ok(None) => AgentCheckpoint::new_membership(&agent.agent_id),
            Err(e) => {
                return MembershipRunResult::failed(&SyncError::Checkpoint(SyncError::flatten(&e)))
            }
        };
        if !checkpoint.is_active {
            return MembershipRunResult::failed(&SyncError::InactiveAgent(agent.agent_id.clone()));
        }

        // 2) Snapshot, always fresh
        let raw = match self
            .roster
            .fetch_participants(instance, &agent.group_id, true)
            .await
        {
            Ok(r) => r,
            Err(e) => return MembershipRunResult::failed(&SyncError::Roster(SyncError::flatten(&e))),
        };
        let (members, skipped) = to_members(raw);
        if skipped > 0 {
            log.warn(format!("{skipped} participant(s) without a usable phone skipped"));
        }

        // 3) Delta
        let previous = checkpoint.member_ids();
        let snapshot = members.len();
        let fresh = new_members(members, &previous);
        log.info(format!(
            "{snapshot} member(s) in roster snapshot, {} new{}",
            fresh.len(),
            if previous.is_empty() { " (full import)" } else { "" }
        ));

        let mut result = MembershipRunResult {
            success: true,
            ..MembershipRunResult::default()
        };

        // 4) Names: contact lookups only for members the roster left unnamed
        let mut cache = ContactCache::new(self.lookup_batch_size);
        let unnamed = fresh
            .iter()
            .filter(|m| embedded_name(m).is_none())
            .map(|m| m.phone.as_str());
        let stats = cache.prefetch(self.contacts.as_ref(), instance, unnamed).await;
        if stats.looked_up > 0 {
            log.info(format!(
                "contact lookups: {} sent, {} named, {} failed",
                stats.looked_up, stats.found, stats.failed
            ));
        }

        // 5) Upsert one by one, checkpointing each success
        for member in &fresh {
            let resolved = resolve_name(member, &cache);
            match upsert_voter(self.voters.as_ref(), agent, &member.phone, &resolved).await {
                Ok(outcome) => {
                    tracing::debug!(target: "membership", agent = %agent.agent_id, phone = %member.phone, source = %resolved.source, ?outcome, "member upserted");
                    result.members_processed += 1;
                    match outcome {
                        UpsertOutcome::Created => {
                            result.voters_created += 1;
                            counter!("sync_voters_created_total").increment(1);
                        }
                        UpsertOutcome::Updated { .. } => {
                            result.voters_updated += 1;
                            counter!("sync_voters_updated_total").increment(1);
                        }
                        UpsertOutcome::Unchanged(_) => {}
                    }
                }
                Err(e) => {
                    result.voters_failed += 1;
                    log.warn(format!("voter upsert failed for {}: {e:#}", member.phone));
                    continue;
                }
            }

            checkpoint.record_member(&member.phone);
            if let Err(e) = self.checkpoints.save(&checkpoint).await {
                result.success = false;
                result.error = Some(SyncError::Checkpoint(SyncError::flatten(&e)).to_string());
                return result;
            }
        }

        // 6) Close the run
        checkpoint.last_run_at = Some(Utc::now());
        if let Err(e) = self.checkpoints.save(&checkpoint).await {
            result.success = false;
            result.error = Some(SyncError::Checkpoint(SyncError::flatten(&e)).to_string());
        }
        result
    }
}

/// Full import when nothing was processed yet, set difference otherwise.
/// Roster order is kept.
pub fn new_members(members: Vec<GroupMember>, previous: &BTreeSet<String>) -> Vec<GroupMember> {
    if previous.is_empty() {
        return members;
    }
    members
        .into_iter()
        .filter(|m| !previous.contains(&m.phone))
        .collect()
}
