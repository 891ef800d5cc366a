//! Operator alerts.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use log::warn;
use serde::Serialize;

use crate::config::AlertSettings;

const TELEGRAM_API: &str = "https://api.telegram.org";

#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, message: &str) -> anyhow::Result<()>;
}

/// Writes alerts to the log. Used when no chat is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerter;

#[async_trait]
impl Alerter for LogAlerter {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        warn!("ALERT: {}", message);
        Ok(())
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
}

/// Posts alerts to a Telegram chat through the Bot API.
pub struct TelegramAlerter {
    client: reqwest::Client,
    endpoint: String,
    chat_id: String,
}

impl TelegramAlerter {
    pub fn new(bot_id: &str, chat_id: &str) -> anyhow::Result<Self> {
        Self::with_base_url(TELEGRAM_API, bot_id, chat_id)
    }

    pub fn with_base_url(base_url: &str, bot_id: &str, chat_id: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/bot{}/sendMessage", base_url.trim_end_matches('/'), bot_id),
            chat_id: chat_id.to_string(),
        })
    }
}

#[async_trait]
impl Alerter for TelegramAlerter {
    async fn send(&self, message: &str) -> anyhow::Result<()> {
        self.client
            .post(&self.endpoint)
            .json(&SendMessage {
                chat_id: &self.chat_id,
                text: message,
            })
            .send()
            .await
            .context("Failed to reach Telegram")?
            .error_for_status()
            .context("Telegram rejected the message")?;
        Ok(())
    }
}

/// Telegram when both ids are set, the log otherwise.
pub fn from_settings(settings: &AlertSettings) -> anyhow::Result<Box<dyn Alerter>> {
    if settings.telegram_bot_id.is_empty() || settings.telegram_chat_id.is_empty() {
        return Ok(Box::new(LogAlerter));
    }
    Ok(Box::new(TelegramAlerter::new(
        &settings.telegram_bot_id,
        &settings.telegram_chat_id,
    )?))
}
