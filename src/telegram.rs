//! Notification sinks
//!
//! Telegram Bot API delivery, or plain log lines when no bot is configured.

use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

use crate::gateway::NotificationSink;

pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

#[derive(Debug, Serialize)]
struct SendMessageRequest<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Sends messages to one Telegram chat
pub struct TelegramNotifier {
    client: Client,
    base_url: String,
    token: String,
    chat_id: String,
}

impl TelegramNotifier {
    /// Build from `TELEGRAM_BOT_TOKEN` / `TELEGRAM_CHAT_ID`.
    ///
    /// Returns `Ok(None)` when either variable is unset or empty.
    pub fn from_env() -> Result<Option<Self>> {
        let token = std::env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let chat_id = std::env::var("TELEGRAM_CHAT_ID").unwrap_or_default();
        if token.trim().is_empty() || chat_id.trim().is_empty() {
            return Ok(None);
        }

        Self::new(TELEGRAM_API_URL.to_string(), token, chat_id).map(Some)
    }

    pub fn new(base_url: String, token: String, chat_id: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url,
            token,
            chat_id,
        })
    }

    async fn send_message(&self, text: &str) -> Result<()> {
        let response = self
            .client
            .post(format!("{}/bot{}/sendMessage", self.base_url, self.token))
            .json(&SendMessageRequest {
                chat_id: &self.chat_id,
                text,
            })
            .send()
            .await
            .context("Failed to reach Telegram")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("sendMessage failed ({}): {}", status, body));
        }
        Ok(())
    }
}

impl NotificationSink for TelegramNotifier {
    async fn send(&self, text: &str) {
        if let Err(e) = self.send_message(text).await {
            warn!("Telegram notification dropped: {:#}", e);
        }
    }
}

/// Writes notifications to the log
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    async fn send(&self, text: &str) {
        info!("NOTIFY: {}", text.replace('\n', " | "));
    }
}

/// Sink picked at startup
pub enum Notifier {
    Telegram(TelegramNotifier),
    Log(LogNotifier),
}

impl Notifier {
    /// Telegram when credentials are present, otherwise log-only
    pub fn from_env() -> Result<Self> {
        Ok(match TelegramNotifier::from_env()? {
            Some(telegram) => {
                info!("Notifications: Telegram chat {}", telegram.chat_id);
                Notifier::Telegram(telegram)
            }
            None => {
                info!("Notifications: log only (TELEGRAM_BOT_TOKEN / TELEGRAM_CHAT_ID not set)");
                Notifier::Log(LogNotifier)
            }
        })
    }
}

impl NotificationSink for Notifier {
    async fn send(&self, text: &str) {
        match self {
            Notifier::Telegram(t) => t.send(text).await,
            Notifier::Log(l) => l.send(text).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_body() {
        let body = serde_json::to_value(SendMessageRequest {
            chat_id: "42",
            text: "🚀 LONG BTC",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({"chat_id": "42", "text": "🚀 LONG BTC"}));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_swallowed() {
        // nothing listens on port 9 locally; send must still return
        let notifier =
            TelegramNotifier::new("http://127.0.0.1:9".to_string(), "t".to_string(), "c".to_string())
                .unwrap();
        notifier.send("hello").await;
        assert!(notifier.send_message("hello").await.is_err());
    }
}
