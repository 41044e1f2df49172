// src/membership/voters.rs
//! Create-or-merge of a voter row keyed by canonical phone.

use anyhow::{Context, Result};

use super::names::ResolvedName;
use super::MembershipAgent;
use crate::merge::{should_replace, MergeDecision, MergeRule};
use crate::store::{NewVoter, VoterStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// Name overwritten; carries the name that was replaced.
    Updated { previous: String },
    /// Stored name kept; carries the rule that rejected the new one.
    Unchanged(MergeRule),
}

pub async fn upsert_voter(
    store: &dyn VoterStore,
    agent: &MembershipAgent,
    phone: &str,
    resolved: &ResolvedName,
) -> Result<UpsertOutcome> {
    let existing = store
        .find_by_phone(phone)
        .await
        .with_context(|| format!("looking up voter {phone}"))?;

    let Some(existing) = existing else {
        store
            .create(NewVoter {
                phone: phone.to_string(),
                nome: resolved.name.clone(),
                name_source: resolved.source,
                municipio: agent.municipio.clone(),
                bairro: agent.bairro.clone(),
                indicacao: agent.indicacao.clone(),
                collector_agent_id: Some(agent.agent_id.clone()),
            })
            .await
            .with_context(|| format!("creating voter {phone}"))?;
        return Ok(UpsertOutcome::Created);
    };

    match should_replace(&existing.nome, &resolved.name) {
        MergeDecision::Accept(rule) => {
            store
                .update_name(phone, &resolved.name, resolved.source)
                .await
                .with_context(|| format!("updating name of voter {phone}"))?;
            tracing::debug!(target: "membership", %phone, ?rule, from = %existing.nome, to = %resolved.name, "voter name replaced");
            Ok(UpsertOutcome::Updated {
                previous: existing.nome,
            })
        }
        MergeDecision::Reject(rule) => Ok(UpsertOutcome::Unchanged(rule)),
    }
}
