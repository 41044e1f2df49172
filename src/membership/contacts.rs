// src/membership/contacts.rs
//! # Contact Resolution Cache
//! Memoized display-name lookups for one membership run.
//!
//! - Each phone is looked up at most once per run, success or failure.
//! - Lookups go out in batches of `batch_size` concurrent calls; the next
//!   batch starts only after the whole current batch has settled.
//! - A failed lookup is cached as "no name" and never retried in the run.
//!
//! A cache lives exactly as long as the run that created it.

use std::collections::{HashMap, HashSet};

use metrics::counter;

use super::names::clean_name;
use super::ContactLookup;
use crate::config::DeliveryInstance;

/// Upper bound on concurrent lookups against one gateway.
pub const DEFAULT_LOOKUP_BATCH: usize = 5;

/// Counts from one [`ContactCache::prefetch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LookupStats {
    pub looked_up: usize,
    pub found: usize,
    pub failed: usize,
}

#[derive(Debug)]
pub struct ContactCache {
    entries: HashMap<String, Option<String>>,
    batch_size: usize,
}

impl ContactCache {
    /// `batch_size` is clamped to `1..=DEFAULT_LOOKUP_BATCH`.
    pub fn new(batch_size: usize) -> Self {
        Self {
            entries: HashMap::new(),
            batch_size: batch_size.clamp(1, DEFAULT_LOOKUP_BATCH),
        }
    }

    /// Cached non-empty name, if any.
    pub fn get(&self, phone: &str) -> Option<&str> {
        self.entries.get(phone).and_then(|n| n.as_deref())
    }

    pub fn is_cached(&self, phone: &str) -> bool {
        self.entries.contains_key(phone)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Look up every phone not yet cached, `batch_size` at a time.
    pub async fn prefetch<'p, I>(
        &mut self,
        lookup: &dyn ContactLookup,
        instance: &DeliveryInstance,
        phones: I,
    ) -> LookupStats
    where
        I: IntoIterator<Item = &'p str>,
    {
        let mut seen = HashSet::new();
        let pending: Vec<&str> = phones
            .into_iter()
            .filter(|p| !self.entries.contains_key(*p) && seen.insert(*p))
            .collect();

        let mut stats = LookupStats::default();
        for batch in pending.chunks(self.batch_size) {
            let calls = batch.iter().map(|phone| async move {
                let out = lookup.lookup_name(instance, phone).await;
                (*phone, out)
            });
            let outcomes = futures::future::join_all(calls).await;

            for (phone, outcome) in outcomes {
                stats.looked_up += 1;
                counter!("sync_contact_lookups_total").increment(1);
                let name = match outcome {
                    Ok(found) => found.as_deref().and_then(clean_name),
                    Err(e) => {
                        stats.failed += 1;
                        counter!("sync_contact_lookup_errors_total").increment(1);
                        let reason = format!("{e:#}");
                        tracing::warn!(target: "contacts", %phone, error = %reason, "contact lookup failed; caching empty");
                        None
                    }
                };
                if name.is_some() {
                    stats.found += 1;
                }
                self.entries.insert(phone.to_string(), name);
            }
        }
        stats
    }
}
