// src/providers/gateway.rs
//! WhatsApp gateway REST client (Evolution-style API).
//!
//! One client serves three capabilities: media dispatch, group roster and
//! contact lookup. Reads retry with backoff; a media send is attempted
//! exactly once and carries an `Idempotency-Key` so a gateway that honors it
//! can drop a replay after a crash between send and checkpoint.

use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{send_with_retry, DEFAULT_BACKOFF, USER_AGENT};
use crate::config::{DeliveryInstance, GatewayConfig};
use crate::feed::{MediaDispatcher, MediaMessage};
use crate::membership::normalize::RawParticipant;
use crate::membership::{ContactLookup, GroupSnapshotSource};

pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

#[derive(Clone)]
pub struct HttpGateway {
    base_url: String,
    api_key: String,
    client: Client,
    max_retries: u8,
    backoff: Duration,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMediaBody<'a> {
    number: &'a str,
    mediatype: String,
    media: &'a str,
    caption: &'a str,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RosterBody {
    Wrapped { participants: Vec<RawParticipant> },
    Bare(Vec<RawParticipant>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct FindContactsBody {
    #[serde(rename = "where")]
    filter: ContactFilter,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ContactFilter {
    remote_jid: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContactRow {
    #[serde(default)]
    push_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .context("building gateway HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            client,
            max_retries: 3,
            backoff: DEFAULT_BACKOFF,
        })
    }

    pub fn from_config(cfg: &GatewayConfig) -> Result<Self> {
        if cfg.base_url.trim().is_empty() {
            return Err(anyhow!("gateway.base_url is empty"));
        }
        Ok(Self::new(&cfg.base_url, &cfg.api_key, Duration::from_secs(cfg.timeout_secs))?
            .with_retries(cfg.max_retries))
    }

    pub fn with_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_backoff(mut self, base: Duration) -> Self {
        self.backoff = base;
        self
    }

    fn url(&self, path: &str, instance: &DeliveryInstance) -> String {
        format!("{}/{path}/{}", self.base_url, instance.name)
    }
}

#[async_trait]
impl MediaDispatcher for HttpGateway {
    async fn send_media(&self, instance: &DeliveryInstance, msg: &MediaMessage) -> Result<()> {
        let body = SendMediaBody {
            number: &msg.destination,
            mediatype: msg.media_type.to_string(),
            media: &msg.media_url,
            caption: &msg.caption,
        };
        let rsp = self
            .client
            .post(self.url("message/sendMedia", instance))
            .header("apikey", &self.api_key)
            .header(IDEMPOTENCY_HEADER, &msg.dedup_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| anyhow!("gateway sendMedia request failed: {e}"))?;

        let status = rsp.status();
        if !status.is_success() {
            let detail = rsp.text().await.unwrap_or_default();
            return Err(anyhow!(
                "gateway sendMedia HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl GroupSnapshotSource for HttpGateway {
    async fn fetch_participants(
        &self,
        instance: &DeliveryInstance,
        group_id: &str,
        force_refresh: bool,
    ) -> Result<Vec<RawParticipant>> {
        let url = self.url("group/participants", instance);
        let refresh = if force_refresh { "true" } else { "false" };
        let rsp = send_with_retry("gateway participants", self.max_retries, self.backoff, || {
            self.client
                .get(&url)
                .header("apikey", &self.api_key)
                .query(&[("groupJid", group_id), ("forceRefresh", refresh)])
        })
        .await?;
        let body: RosterBody = rsp.json().await.context("decoding participants body")?;
        Ok(match body {
            RosterBody::Wrapped { participants } => participants,
            RosterBody::Bare(v) => v,
        })
    }
}

#[async_trait]
impl ContactLookup for HttpGateway {
    async fn lookup_name(&self, instance: &DeliveryInstance, phone: &str) -> Result<Option<String>> {
        let url = self.url("chat/findContacts", instance);
        let body = FindContactsBody {
            filter: ContactFilter {
                remote_jid: format!("{phone}@s.whatsapp.net"),
            },
        };
        let rsp = send_with_retry("gateway findContacts", self.max_retries, self.backoff, || {
            self.client
                .post(&url)
                .header("apikey", &self.api_key)
                .json(&body)
        })
        .await?;
        let rows: Vec<ContactRow> = rsp.json().await.context("decoding contacts body")?;
        Ok(rows
            .into_iter()
            .flat_map(|r| [r.push_name, r.name])
            .flatten()
            .map(|n| n.trim().to_string())
            .find(|n| !n.is_empty()))
    }
}
