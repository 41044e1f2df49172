// tests/feed_sync.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{bail, Result};
use campaign_sync::config::DeliveryInstance;
use campaign_sync::feed::{
    FeedAgent, FeedSyncWorkflow, MediaDispatcher, MediaMessage, MediaPost, MediaType,
    DEFAULT_ITEM_DELAY,
};
use campaign_sync::mock::{EchoTransformer, FailingTransformer, MockFeed, RecordingDispatcher};
use campaign_sync::store::{AgentCheckpoint, CheckpointStore, ExecutionLog, MemoryStore};
use chrono::{TimeZone, Utc};
use tokio::time::Instant;

fn post(id: &str, minute: u32) -> MediaPost {
    MediaPost {
        post_id: id.to_string(),
        caption: format!("Caminhada no bairro {id} #campanha"),
        media_url: format!("https://cdn.test/{id}.jpg"),
        media_type: MediaType::Image,
        timestamp: Utc.with_ymd_and_hms(2025, 6, 1, 9, minute, 0).unwrap(),
        pinned: false,
    }
}

fn agent() -> FeedAgent {
    FeedAgent {
        agent_id: "ig-maria".into(),
        feed_url: "https://feed.test/maria".into(),
        destination: "120363000000000000@g.us".into(),
        subject_name: "Maria Souza".into(),
        subject_handle: "mariasouza".into(),
        instance_id: Some("main".into()),
    }
}

fn instance() -> DeliveryInstance {
    DeliveryInstance {
        id: "main".into(),
        name: "campanha".into(),
        active: true,
    }
}

struct Harness {
    feed: Arc<MockFeed>,
    dispatcher: Arc<RecordingDispatcher>,
    store: Arc<MemoryStore>,
    workflow: FeedSyncWorkflow,
}

fn harness(posts: Vec<MediaPost>) -> Harness {
    let feed = Arc::new(MockFeed::new(posts));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = FeedSyncWorkflow::new(
        feed.clone(),
        Arc::new(EchoTransformer),
        dispatcher.clone(),
        store.clone(),
        store.clone(),
    )
    .with_item_delay(Duration::ZERO);
    Harness {
        feed,
        dispatcher,
        store,
        workflow,
    }
}

async fn seed_cursor(store: &MemoryStore, post_id: &str, minute: u32) {
    let mut cp = AgentCheckpoint::new_feed("ig-maria");
    cp.advance_feed(post_id, Utc.with_ymd_and_hms(2025, 6, 1, 9, minute, 0).unwrap());
    store.save(&cp).await.unwrap();
}

#[tokio::test]
async fn dispatches_new_posts_oldest_first() {
    let h = harness(vec![post("p3", 30), post("p1", 10), post("p2", 20), post("p0", 5)]);
    seed_cursor(&h.store, "p0", 5).await;

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(res.success, "{:?}", res.error);
    assert_eq!(res.posts_processed, 3);
    assert_eq!(res.last_processed_post_id.as_deref(), Some("p3"));

    let urls: Vec<String> = h.dispatcher.sent().into_iter().map(|m| m.media_url).collect();
    assert_eq!(
        urls,
        vec![
            "https://cdn.test/p1.jpg".to_string(),
            "https://cdn.test/p2.jpg".to_string(),
            "https://cdn.test/p3.jpg".to_string()
        ]
    );

    let cp = h.store.load("ig-maria").await.unwrap().unwrap();
    assert_eq!(cp.last_post_id(), Some("p3"));
}

#[tokio::test]
async fn second_run_without_new_posts_is_a_no_op() {
    let h = harness(vec![post("p1", 10), post("p2", 20)]);
    seed_cursor(&h.store, "p1", 10).await;

    let first = h.workflow.run(&agent(), Some(&instance())).await;
    assert_eq!(first.posts_processed, 1);
    let after_first = h.store.load("ig-maria").await.unwrap();

    for _ in 0..2 {
        let again = h.workflow.run(&agent(), Some(&instance())).await;
        assert!(again.success);
        assert_eq!(again.posts_processed, 0);
        assert_eq!(h.store.load("ig-maria").await.unwrap(), after_first);
    }
    assert_eq!(h.dispatcher.sent().len(), 1);
}

#[tokio::test]
async fn dispatch_failure_stops_and_keeps_partial_progress() {
    let h = harness(vec![post("p1", 10), post("p2", 20), post("p3", 30)]);
    seed_cursor(&h.store, "p0", 5).await;
    // p0 is not in the window; last_run_at = 09:05 picks up p1..p3
    h.dispatcher.fail_on("ig-maria", "p2");

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(!res.success);
    assert_eq!(res.posts_processed, 1);
    assert_eq!(res.last_processed_post_id.as_deref(), Some("p1"));
    assert!(res.error.as_deref().unwrap().contains("p2"));
    // p3 never attempted
    assert_eq!(h.dispatcher.attempts.load(std::sync::atomic::Ordering::SeqCst), 2);

    let cp = h.store.load("ig-maria").await.unwrap().unwrap();
    assert_eq!(cp.last_post_id(), Some("p1"));

    // Next tick resumes at p2
    h.dispatcher.clear_failures();
    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(res.success);
    assert_eq!(res.posts_processed, 2);
    assert_eq!(res.last_processed_post_id.as_deref(), Some("p3"));
}

#[tokio::test]
async fn first_run_sends_only_the_newest_post() {
    let h = harness(vec![post("p1", 10), post("p2", 20), post("p3", 30)]);

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(res.success);
    assert_eq!(res.posts_processed, 1);
    assert_eq!(res.last_processed_post_id.as_deref(), Some("p3"));
}

#[tokio::test]
async fn pinned_posts_are_skipped() {
    let mut pinned = post("old-pin", 1);
    pinned.pinned = true;
    let h = harness(vec![pinned, post("p1", 10)]);
    seed_cursor(&h.store, "p0", 5).await;

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert_eq!(res.posts_processed, 1);
    assert_eq!(h.dispatcher.sent()[0].media_url, "https://cdn.test/p1.jpg");
}

#[tokio::test]
async fn missing_instance_has_no_side_effects() {
    let h = harness(vec![post("p1", 10)]);

    let res = h.workflow.run(&agent(), None).await;
    assert!(!res.success);
    assert!(res.error.as_deref().unwrap().contains("no active instance"));
    assert_eq!(h.feed.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert!(h.store.load("ig-maria").await.unwrap().is_none());

    let mut off = instance();
    off.active = false;
    let res = h.workflow.run(&agent(), Some(&off)).await;
    assert!(res.error.as_deref().unwrap().contains("inactive"));
    assert!(h.dispatcher.sent().is_empty());
}

#[tokio::test]
async fn deactivated_agent_does_not_fetch() {
    let h = harness(vec![post("p1", 10)]);
    let mut cp = AgentCheckpoint::new_feed("ig-maria");
    cp.is_active = false;
    h.store.save(&cp).await.unwrap();

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(!res.success);
    assert_eq!(h.feed.fetches.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn feed_error_is_reported_and_logged() {
    let h = harness(vec![]);
    h.feed.fail_with("scraper returned 503");

    let res = h.workflow.run(&agent(), Some(&instance())).await;
    assert!(!res.success);
    assert!(res.error.as_deref().unwrap().contains("scraper returned 503"));

    let log = h.store.entries("ig-maria").await.unwrap();
    assert!(log.last().unwrap().message.starts_with("ERROR: feed sync failed"));
}

#[tokio::test]
async fn caption_is_transformed_and_signed_with_handle() {
    let h = harness(vec![post("p1", 10)]);

    h.workflow.run(&agent(), Some(&instance())).await;
    let msg = &h.dispatcher.sent()[0];
    assert_eq!(msg.caption, "Maria Souza: Caminhada no bairro p1\n\n@mariasouza");
    assert_eq!(msg.destination, "120363000000000000@g.us");
    assert_eq!(msg.dedup_key.len(), 64);
}

#[tokio::test]
async fn generator_failure_falls_back_to_original_caption() {
    let feed = Arc::new(MockFeed::new(vec![post("p1", 10)]));
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let store = Arc::new(MemoryStore::new());
    let workflow = FeedSyncWorkflow::new(
        feed,
        Arc::new(FailingTransformer),
        dispatcher.clone(),
        store.clone(),
        store.clone(),
    )
    .with_item_delay(Duration::ZERO);

    let res = workflow.run(&agent(), Some(&instance())).await;
    assert!(res.success);
    assert_eq!(
        dispatcher.sent()[0].caption,
        "Caminhada no bairro p1\n\n@mariasouza"
    );
    let log = store.entries("ig-maria").await.unwrap();
    assert!(log.iter().any(|e| e.message.starts_with("WARN: caption generator")));
}

/// Records the (virtual) instant of every send.
#[derive(Default)]
struct TimedDispatcher {
    sent_at: Mutex<Vec<Instant>>,
}

#[async_trait::async_trait]
impl MediaDispatcher for TimedDispatcher {
    async fn send_media(&self, _instance: &DeliveryInstance, _msg: &MediaMessage) -> Result<()> {
        self.sent_at.lock().unwrap().push(Instant::now());
        Ok(())
    }
}

#[tokio::test(start_paused = true)]
async fn sends_are_paced_with_no_pause_after_the_last() {
    let store = Arc::new(MemoryStore::new());
    seed_cursor(&store, "p0", 5).await;
    let dispatcher = Arc::new(TimedDispatcher::default());
    let workflow = FeedSyncWorkflow::new(
        Arc::new(MockFeed::new(vec![post("p0", 5), post("p1", 10), post("p2", 20), post("p3", 30)])),
        Arc::new(EchoTransformer),
        dispatcher.clone(),
        store.clone(),
        store.clone(),
    );
    assert_eq!(DEFAULT_ITEM_DELAY, Duration::from_secs(3));

    let start = Instant::now();
    let res = workflow.run(&agent(), Some(&instance())).await;
    let elapsed = start.elapsed();

    assert!(res.success, "{:?}", res.error);
    assert_eq!(res.posts_processed, 3);
    let offsets: Vec<Duration> = dispatcher
        .sent_at
        .lock()
        .unwrap()
        .iter()
        .map(|t| t.duration_since(start))
        .collect();
    assert_eq!(
        offsets,
        vec![Duration::ZERO, Duration::from_secs(3), Duration::from_secs(6)]
    );
    assert_eq!(elapsed, Duration::from_secs(6));
}

/// Loads from the wrapped store, fails every save.
struct SaveFails {
    inner: MemoryStore,
    saves: AtomicUsize,
}

#[async_trait::async_trait]
impl CheckpointStore for SaveFails {
    async fn load(&self, agent_id: &str) -> Result<Option<AgentCheckpoint>> {
        self.inner.load(agent_id).await
    }

    async fn save(&self, _checkpoint: &AgentCheckpoint) -> Result<()> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        bail!("disk full")
    }

    async fn reset(&self, agent_id: &str) -> Result<()> {
        self.inner.reset(agent_id).await
    }

    async fn set_active(&self, agent_id: &str, active: bool) -> Result<()> {
        self.inner.set_active(agent_id, active).await
    }
}

#[tokio::test]
async fn checkpoint_failure_after_send_stops_the_run() {
    let inner = MemoryStore::new();
    seed_cursor(&inner, "p0", 5).await;
    let checkpoints = Arc::new(SaveFails {
        inner,
        saves: AtomicUsize::new(0),
    });
    let log = Arc::new(MemoryStore::new());
    let dispatcher = Arc::new(RecordingDispatcher::new());
    let workflow = FeedSyncWorkflow::new(
        Arc::new(MockFeed::new(vec![post("p0", 5), post("p1", 10), post("p2", 20), post("p3", 30)])),
        Arc::new(EchoTransformer),
        dispatcher.clone(),
        checkpoints.clone(),
        log.clone(),
    )
    .with_item_delay(Duration::ZERO);

    let res = workflow.run(&agent(), Some(&instance())).await;

    assert!(!res.success);
    assert_eq!(res.posts_processed, 1);
    assert_eq!(res.last_processed_post_id.as_deref(), Some("p1"));
    let err = res.error.unwrap_or_default();
    assert!(err.contains("checkpoint"), "{err}");
    assert_eq!(dispatcher.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(checkpoints.saves.load(Ordering::SeqCst), 1);
    assert!(!log.entries("ig-maria").await.unwrap().is_empty());
}
