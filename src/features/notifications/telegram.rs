//! # Telegram Channel
//!
//! Sends reminder text through the Telegram Bot API `sendMessage` method.
//!
//! - **Version**: 1.0.0
//! - **Since**: 1.0.0

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use log::debug;
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use super::channel::NotificationChannel;

static USERNAME_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn is_channel_username(target: &str) -> bool {
    USERNAME_PATTERN
        .get_or_init(|| Regex::new(r"^@[A-Za-z][A-Za-z0-9_]{4,31}$").ok())
        .as_ref()
        .is_some_and(|re| re.is_match(target))
}

/// Subset of the Bot API response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Telegram Bot API client
#[derive(Clone)]
pub struct TelegramChannel {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramChannel {
    pub fn new(api_url: &str, token: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent("nudge/1.0")
            .build()?;

        Ok(Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn chat_id(target: &str) -> serde_json::Value {
        match target.trim().parse::<i64>() {
            Ok(id) => serde_json::Value::from(id),
            Err(_) => serde_json::Value::from(target.trim()),
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    /// Numeric chat IDs (non-zero, negative for groups) or `@channelname`
    fn validate_target(&self, target: &str) -> bool {
        let target = target.trim();
        match target.parse::<i64>() {
            Ok(id) => id != 0,
            Err(_) => is_channel_username(target),
        }
    }

    async fn send(&self, target: &str, text: &str) -> Result<()> {
        let url = format!("{}/bot{}/sendMessage", self.api_url, self.token);
        let body = serde_json::json!({
            "chat_id": Self::chat_id(target),
            "text": text,
        });

        let response = self.client.post(&url).json(&body).send().await.map_err(|e| {
            if e.is_timeout() {
                anyhow!("Telegram request timed out")
            } else if e.is_connect() {
                anyhow!("Could not connect to the Telegram API")
            } else {
                anyhow!("Telegram request failed: {}", e.without_url())
            }
        })?;

        let status = response.status();
        let envelope: ApiResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Telegram returned HTTP {status} with unreadable body: {e}"))?;

        if !status.is_success() || !envelope.ok {
            return Err(anyhow!(
                "Telegram rejected message (HTTP {status}): {}",
                envelope.description.unwrap_or_else(|| "no description".to_string())
            ));
        }

        debug!("Telegram message delivered to {target}");
        Ok(())
    }
}
