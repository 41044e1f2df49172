// src/providers/openai.rs
//! Caption transformers: OpenAI Chat Completions, and a passthrough used
//! when AI is disabled (the workflow still sanitizes its output).

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::USER_AGENT;
use crate::config::OpenAiConfig;
use crate::feed::caption::persona_instruction;
use crate::feed::CaptionTransformer;

pub const OPENAI_CHAT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAiCaptionTransformer {
    http: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
}

#[derive(Serialize)]
struct Msg<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct Req<'a> {
    model: &'a str,
    messages: Vec<Msg<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct Resp {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMsg,
}

#[derive(Deserialize)]
struct ChoiceMsg {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiCaptionTransformer {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(4))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building OpenAI HTTP client")?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.into(),
            endpoint: OPENAI_CHAT_URL.to_string(),
        })
    }

    pub fn from_config(cfg: &OpenAiConfig) -> Result<Self> {
        Self::new(&cfg.api_key, &cfg.model)
    }

    pub fn with_endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = url.into();
        self
    }
}

#[async_trait]
impl CaptionTransformer for OpenAiCaptionTransformer {
    async fn transform(&self, text: &str, subject_name: &str) -> Result<String> {
        if self.api_key.is_empty() {
            bail!("OpenAI API key not configured");
        }
        let sys = persona_instruction(subject_name);
        let req = Req {
            model: &self.model,
            messages: vec![
                Msg {
                    role: "system",
                    content: &sys,
                },
                Msg {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.7,
            max_tokens: 400,
        };

        let resp = self
            .http
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await
            .map_err(|e| anyhow!("OpenAI request failed: {e}"))?;

        if !resp.status().is_success() {
            bail!("OpenAI HTTP {}", resp.status());
        }
        let body: Resp = resp.json().await.context("decoding OpenAI response")?;
        let content = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            bail!("OpenAI returned an empty completion");
        }
        Ok(content.trim().to_string())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Returns the input untouched.
pub struct PassthroughTransformer;

#[async_trait]
impl CaptionTransformer for PassthroughTransformer {
    async fn transform(&self, text: &str, _subject_name: &str) -> Result<String> {
        Ok(text.to_string())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}
