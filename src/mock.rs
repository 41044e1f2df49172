// src/mock.rs
//! In-process doubles for every external capability. Deterministic, no I/O;
//! used by the integration tests and for dry runs of the workflows.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::config::DeliveryInstance;
use crate::feed::caption::dedup_key;
use crate::feed::{CaptionTransformer, FeedSource, MediaDispatcher, MediaMessage, MediaPost};
use crate::membership::normalize::RawParticipant;
use crate::membership::{ContactLookup, GroupSnapshotSource};
use crate::store::{MemoryStore, NameSource, NewVoter, VoterRecord, VoterStore};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Feed returning a fixed snapshot, or a fixed error.
#[derive(Default)]
pub struct MockFeed {
    posts: Mutex<Vec<MediaPost>>,
    error: Mutex<Option<String>>,
    pub fetches: AtomicUsize,
}

impl MockFeed {
    pub fn new(posts: Vec<MediaPost>) -> Self {
        Self {
            posts: Mutex::new(posts),
            ..Self::default()
        }
    }

    pub fn set_posts(&self, posts: Vec<MediaPost>) {
        *lock(&self.posts) = posts;
    }

    pub fn fail_with(&self, msg: impl Into<String>) {
        *lock(&self.error) = Some(msg.into());
    }
}

#[async_trait]
impl FeedSource for MockFeed {
    async fn fetch_posts(&self, _feed_url: &str) -> Result<Vec<MediaPost>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = lock(&self.error).clone() {
            bail!(e);
        }
        Ok(lock(&self.posts).clone())
    }

    fn name(&self) -> &'static str {
        "mock-feed"
    }
}

/// Prefixes the caption so tests can tell it went through the transformer.
pub struct EchoTransformer;

#[async_trait]
impl CaptionTransformer for EchoTransformer {
    async fn transform(&self, text: &str, subject_name: &str) -> Result<String> {
        Ok(format!("{subject_name}: {text}"))
    }

    fn name(&self) -> &'static str {
        "echo"
    }
}

pub struct FailingTransformer;

#[async_trait]
impl CaptionTransformer for FailingTransformer {
    async fn transform(&self, _text: &str, _subject_name: &str) -> Result<String> {
        Err(anyhow!("caption generator unavailable"))
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Records every successful send in order; fails for chosen posts.
#[derive(Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<MediaMessage>>,
    fail_keys: Mutex<HashSet<String>>,
    pub attempts: AtomicUsize,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the send of `post_id` by `agent_id` fail.
    pub fn fail_on(&self, agent_id: &str, post_id: &str) {
        lock(&self.fail_keys).insert(dedup_key(agent_id, post_id));
    }

    pub fn clear_failures(&self) {
        lock(&self.fail_keys).clear();
    }

    pub fn sent(&self) -> Vec<MediaMessage> {
        lock(&self.sent).clone()
    }
}

#[async_trait]
impl MediaDispatcher for RecordingDispatcher {
    async fn send_media(&self, _instance: &DeliveryInstance, msg: &MediaMessage) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if lock(&self.fail_keys).contains(&msg.dedup_key) {
            bail!("gateway rejected media (HTTP 500)");
        }
        lock(&self.sent).push(msg.clone());
        Ok(())
    }
}

/// Roster returning a fixed participant list; records each call.
#[derive(Default)]
pub struct MockRoster {
    participants: Mutex<Vec<RawParticipant>>,
    error: Mutex<Option<String>>,
    calls: Mutex<Vec<(String, bool)>>,
}

impl MockRoster {
    pub fn new(participants: Vec<RawParticipant>) -> Self {
        Self {
            participants: Mutex::new(participants),
            ..Self::default()
        }
    }

    pub fn set_participants(&self, participants: Vec<RawParticipant>) {
        *lock(&self.participants) = participants;
    }

    pub fn fail_with(&self, msg: impl Into<String>) {
        *lock(&self.error) = Some(msg.into());
    }

    /// `(group_id, force_refresh)` per call.
    pub fn calls(&self) -> Vec<(String, bool)> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl GroupSnapshotSource for MockRoster {
    async fn fetch_participants(
        &self,
        _instance: &DeliveryInstance,
        group_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<RawParticipant>> {
        lock(&self.calls).push((group_id.to_string(), force_refresh));
        if let Some(e) = lock(&self.error).clone() {
            bail!(e);
        }
        Ok(lock(&self.participants).clone())
    }
}

/// Contact lookup with a fixed directory. Tracks the peak number of calls in
/// flight at once; `delay` keeps calls overlapping long enough to observe it.
#[derive(Default)]
pub struct CountingLookup {
    names: HashMap<String, String>,
    failing: HashSet<String>,
    delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    calls: Mutex<Vec<String>>,
}

impl CountingLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, phone: &str, name: &str) -> Self {
        self.names.insert(phone.to_string(), name.to_string());
        self
    }

    pub fn failing_for(mut self, phone: &str) -> Self {
        self.failing.insert(phone.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    pub fn peak(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContactLookup for CountingLookup {
    async fn lookup_name(&self, _instance: &DeliveryInstance, phone: &str) -> Result<Option<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        lock(&self.calls).push(phone.to_string());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(phone) {
            bail!("contacts endpoint timed out");
        }
        Ok(self.names.get(phone).cloned())
    }
}

/// Voter store that refuses writes for chosen phones and delegates the rest.
pub struct FlakyVoters {
    pub inner: MemoryStore,
    failing: HashSet<String>,
}

impl FlakyVoters {
    pub fn new(inner: MemoryStore, failing: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner,
            failing: failing.into_iter().collect(),
        }
    }
}

#[async_trait]
impl VoterStore for FlakyVoters {
    async fn find_by_phone(&self, phone: &str) -> Result<Option<VoterRecord>> {
        self.inner.find_by_phone(phone).await
    }

    async fn create(&self, voter: NewVoter) -> Result<VoterRecord> {
        if self.failing.contains(&voter.phone) {
            bail!("voter table unavailable");
        }
        self.inner.create(voter).await
    }

    async fn update_name(&self, phone: &str, nome: &str, source: NameSource) -> Result<()> {
        if self.failing.contains(phone) {
            bail!("voter table unavailable");
        }
        self.inner.update_name(phone, nome, source).await
    }
}
