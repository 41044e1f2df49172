// tests/json_store.rs
use campaign_sync::store::{
    AgentCheckpoint, CheckpointStore, ExecutionLog, JsonFileStore, LogEntry, NameSource, NewVoter,
    VoterStore,
};
use chrono::{TimeZone, Utc};

fn line(msg: &str) -> LogEntry {
    LogEntry {
        at: Utc::now(),
        message: msg.to_string(),
    }
}

#[tokio::test]
async fn state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("sync_state.json");

    {
        let store = JsonFileStore::open(&path).await.unwrap();
        let mut cp = AgentCheckpoint::new_feed("ig-1");
        cp.advance_feed("p9", Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap());
        store.save(&cp).await.unwrap();

        let mut grp = AgentCheckpoint::new_membership("grp-1");
        grp.record_member("5511900000001");
        store.save(&grp).await.unwrap();

        store
            .create(NewVoter {
                phone: "5511900000001".into(),
                nome: "Contato 0001".into(),
                name_source: NameSource::Placeholder,
                municipio: Some("Sorocaba".into()),
                bairro: None,
                indicacao: None,
                collector_agent_id: Some("grp-1".into()),
            })
            .await
            .unwrap();
        store
            .update_name("5511900000001", "Lucas Prado", NameSource::ContactsApi)
            .await
            .unwrap();
        store.append("ig-1", &[line("a"), line("b")]).await.unwrap();
    }

    assert!(path.exists());
    assert!(!path.with_extension("json.tmp").exists());

    let store = JsonFileStore::open(&path).await.unwrap();
    let cp = store.load("ig-1").await.unwrap().unwrap();
    assert_eq!(cp.last_post_id(), Some("p9"));
    assert_eq!(
        store.load("grp-1").await.unwrap().unwrap().member_ids().len(),
        1
    );
    let v = store.find_by_phone("5511900000001").await.unwrap().unwrap();
    assert_eq!(v.nome, "Lucas Prado");
    assert_eq!(v.name_source, NameSource::ContactsApi);
    assert_eq!(v.municipio.as_deref(), Some("Sorocaba"));
    assert_eq!(store.entries("ig-1").await.unwrap().len(), 2);
}

#[tokio::test]
async fn reset_and_deactivate() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("s.json")).await.unwrap();

    // Never-run agent: nothing is created
    store.set_active("ghost", false).await.unwrap();
    assert!(store.load("ghost").await.unwrap().is_none());

    let mut cp = AgentCheckpoint::new_feed("ig-1");
    cp.advance_feed("p1", Utc::now());
    store.save(&cp).await.unwrap();
    store.set_active("ig-1", false).await.unwrap();
    store.reset("ig-1").await.unwrap();

    let cp = store.load("ig-1").await.unwrap().unwrap();
    assert!(!cp.is_active);
    assert_eq!(cp.last_post_id(), None);
    assert_eq!(cp.last_run_at, None);
}

#[tokio::test]
async fn log_is_capped_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("s.json"))
        .await
        .unwrap()
        .with_log_cap(3);

    let batch: Vec<LogEntry> = (0..5).map(|i| line(&format!("line {i}"))).collect();
    store.append("a", &batch).await.unwrap();
    let kept: Vec<String> = store
        .entries("a")
        .await
        .unwrap()
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert_eq!(kept, vec!["line 2", "line 3", "line 4"]);
}

#[tokio::test]
async fn corrupt_state_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(JsonFileStore::open(&path).await.is_err());
}

#[tokio::test]
async fn truncated_state_file_is_an_error_not_a_fresh_start() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.json");
    {
        let store = JsonFileStore::open(&path).await.unwrap();
        let mut cp = AgentCheckpoint::new_feed("ig-1");
        cp.advance_feed("p9", Utc.with_ymd_and_hms(2025, 7, 1, 8, 0, 0).unwrap());
        store.save(&cp).await.unwrap();
    }
    std::fs::write(&path, "").unwrap();

    let err = match JsonFileStore::open(&path).await {
        Ok(_) => panic!("empty state file must not open as an empty store"),
        Err(e) => e.to_string(),
    };
    assert!(err.contains("empty"), "{err}");
}

#[tokio::test]
async fn save_leaves_no_temp_file_behind() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("s.json");
    let store = JsonFileStore::open(&path).await.unwrap();
    store.save(&AgentCheckpoint::new_feed("ig-1")).await.unwrap();

    let names: Vec<String> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["s.json".to_string()]);
}

#[tokio::test]
async fn duplicate_create_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileStore::open(dir.path().join("s.json")).await.unwrap();
    let voter = NewVoter {
        phone: "5511900000002".into(),
        nome: "Rita".into(),
        name_source: NameSource::GroupMetadataName,
        municipio: None,
        bairro: None,
        indicacao: None,
        collector_agent_id: None,
    };
    store.create(voter.clone()).await.unwrap();
    assert!(store.create(voter).await.is_err());
}
