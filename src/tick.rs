// src/tick.rs
//! One scheduling pass: every configured agent runs once, one after
//! another, feed agents first. The timer that fires passes lives outside
//! this crate.

use serde::Serialize;

use crate::config::SyncConfig;
use crate::feed::{FeedRunResult, FeedSyncWorkflow};
use crate::membership::{MembershipRunResult, MembershipWorkflow};

#[derive(Debug, Clone, Default, Serialize)]
pub struct TickSummary {
    pub feed: Vec<(String, FeedRunResult)>,
    pub membership: Vec<(String, MembershipRunResult)>,
}

impl TickSummary {
    pub fn failures(&self) -> usize {
        self.feed.iter().filter(|(_, r)| !r.success).count()
            + self.membership.iter().filter(|(_, r)| !r.success).count()
    }
}

pub async fn run_once(
    cfg: &SyncConfig,
    feed: &FeedSyncWorkflow,
    membership: &MembershipWorkflow,
) -> TickSummary {
    let mut summary = TickSummary::default();

    for agent in &cfg.feed_agents {
        let instance = cfg.instance(agent.instance_id.as_deref());
        let res = feed.run(agent, instance).await;
        tracing::info!(
            target: "feed_sync",
            agent = %agent.agent_id,
            success = res.success,
            processed = res.posts_processed,
            last = ?res.last_processed_post_id,
            "feed agent done"
        );
        summary.feed.push((agent.agent_id.clone(), res));
    }

    for agent in &cfg.membership_agents {
        let instance = cfg.instance(agent.instance_id.as_deref());
        let res = membership.run(agent, instance).await;
        tracing::info!(
            target: "membership",
            agent = %agent.agent_id,
            success = res.success,
            processed = res.members_processed,
            created = res.voters_created,
            updated = res.voters_updated,
            "membership agent done"
        );
        summary.membership.push((agent.agent_id.clone(), res));
    }

    summary
}
