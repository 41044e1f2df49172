// tests/gateway_http.rs
use std::time::Duration;

use campaign_sync::config::DeliveryInstance;
use campaign_sync::feed::caption::dedup_key;
use campaign_sync::feed::{CaptionTransformer, FeedSource, MediaDispatcher, MediaMessage, MediaType};
use campaign_sync::membership::normalize::to_members;
use campaign_sync::membership::{ContactLookup, GroupSnapshotSource};
use campaign_sync::providers::{HttpFeedSource, HttpGateway, OpenAiCaptionTransformer};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn instance() -> DeliveryInstance {
    DeliveryInstance {
        id: "main".into(),
        name: "campanha".into(),
        active: true,
    }
}

fn gateway(server: &MockServer) -> HttpGateway {
    HttpGateway::new(server.uri(), "test-key", Duration::from_secs(5))
        .unwrap()
        .with_backoff(Duration::from_millis(1))
}

#[tokio::test]
async fn send_media_posts_once_with_idempotency_key() {
    let server = MockServer::start().await;
    let key = dedup_key("ig-1", "p1");
    Mock::given(method("POST"))
        .and(path("/message/sendMedia/campanha"))
        .and(header("apikey", "test-key"))
        .and(header("Idempotency-Key", key.as_str()))
        .and(body_partial_json(json!({
            "number": "120363000000000000@g.us",
            "mediatype": "video",
            "media": "https://cdn.test/p1.mp4",
            "caption": "Texto\n\n@maria"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"key": {"id": "X"}})))
        .expect(1)
        .mount(&server)
        .await;

    let msg = MediaMessage {
        destination: "120363000000000000@g.us".into(),
        media_type: MediaType::Video,
        media_url: "https://cdn.test/p1.mp4".into(),
        caption: "Texto\n\n@maria".into(),
        dedup_key: key.clone(),
    };
    gateway(&server).send_media(&instance(), &msg).await.unwrap();
}

#[tokio::test]
async fn send_media_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/message/sendMedia/campanha"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .expect(1)
        .mount(&server)
        .await;

    let msg = MediaMessage {
        destination: "5511999990000".into(),
        media_type: MediaType::Image,
        media_url: "https://cdn.test/p1.jpg".into(),
        caption: "x".into(),
        dedup_key: dedup_key("ig-1", "p1"),
    };
    let err = gateway(&server)
        .send_media(&instance(), &msg)
        .await
        .unwrap_err()
        .to_string();
    assert!(err.contains("500"), "{err}");
}

#[tokio::test]
async fn participants_force_refresh_and_both_shapes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/group/participants/campanha"))
        .and(query_param("groupJid", "120363000000000001@g.us"))
        .and(query_param("forceRefresh", "true"))
        .and(header_exists("apikey"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "participants": [
                { "id": "5511977776666@s.whatsapp.net", "admin": null },
                { "id": { "server": "c.us", "user": "5511977776666", "_serialized": "5511977776666@c.us" }, "pushName": "Tiago" },
                { "id": "88887777666655@lid", "phoneNumber": "5511955554444@s.whatsapp.net" }
            ]
        })))
        .mount(&server)
        .await;

    let raw = gateway(&server)
        .fetch_participants(&instance(), "120363000000000001@g.us", true)
        .await
        .unwrap();
    assert_eq!(raw.len(), 3);
    let (members, skipped) = to_members(raw);
    assert_eq!(skipped, 0);
    let phones: Vec<&str> = members.iter().map(|m| m.phone.as_str()).collect();
    assert_eq!(phones, vec!["5511977776666", "5511955554444"]);
    assert_eq!(members[0].candidate_names.profile_name.as_deref(), Some("Tiago"));
}

#[tokio::test]
async fn participant_reads_retry_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/group/participants/campanha"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/group/participants/campanha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let raw = gateway(&server)
        .fetch_participants(&instance(), "g@g.us", true)
        .await
        .unwrap();
    assert!(raw.is_empty());
}

#[tokio::test]
async fn contact_lookup_returns_first_name() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/findContacts/campanha"))
        .and(body_partial_json(json!({
            "where": { "remoteJid": "5511944443333@s.whatsapp.net" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "remoteJid": "5511944443333@s.whatsapp.net", "pushName": "  Helena Costa " }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/findContacts/campanha"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let gw = gateway(&server);
    assert_eq!(
        gw.lookup_name(&instance(), "5511944443333").await.unwrap().as_deref(),
        Some("Helena Costa")
    );
    assert_eq!(gw.lookup_name(&instance(), "5511900000000").await.unwrap(), None);
}

#[tokio::test]
async fn client_errors_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/findContacts/campanha"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    assert!(gateway(&server)
        .lookup_name(&instance(), "5511944443333")
        .await
        .is_err());
}

#[tokio::test]
async fn http_feed_source_decodes_dataset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/datasets/maria"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": [
                { "id": "3301", "caption": "Feira livre", "type": "Image",
                  "displayUrl": "https://cdn.test/1.jpg", "timestamp": "2025-05-01T10:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;

    let feed = HttpFeedSource::new(Duration::from_secs(5)).unwrap();
    let posts = feed
        .fetch_posts(&format!("{}/datasets/maria", server.uri()))
        .await
        .unwrap();
    assert_eq!(posts.len(), 1);
    assert_eq!(posts[0].caption, "Feira livre");
}

#[tokio::test]
async fn openai_transformer_sends_persona_prompt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("authorization", "Bearer sk-test"))
        .and(body_partial_json(json!({ "model": "gpt-4o-mini" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [ { "message": { "role": "assistant", "content": " Maria Souza visitou a feira. " } } ]
        })))
        .mount(&server)
        .await;

    let t = OpenAiCaptionTransformer::new("sk-test", "gpt-4o-mini")
        .unwrap()
        .with_endpoint(format!("{}/v1/chat/completions", server.uri()));
    let out = t.transform("feira hoje!", "Maria Souza").await.unwrap();
    assert_eq!(out, "Maria Souza visitou a feira.");

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert!(body["messages"][0]["content"]
        .as_str()
        .unwrap()
        .contains("Maria Souza"));
}
