//! Discord webhook notification channel.
//!
//! Retries on 429 responses respecting the Retry-After header.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::json;
use tracing::{debug, warn};
use url::Url;

use super::parse_webhook_url;
use crate::notification::{DISCORD, Message, MessageLevel, NotificationProvider};
use crate::provider::{ProviderConfig, optional_str, required_str};
use crate::utils::http_client;
use crate::{Error, Result};

/// Maximum number of retries for rate-limited requests.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

pub struct DiscordChannel {
    webhook_url: Url,
    username: Option<String>,
    avatar_url: Option<String>,
    client: Client,
}

impl DiscordChannel {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let webhook_url = parse_webhook_url("webhook_url", required_str(config, "webhook_url")?)?;
        Ok(Self {
            webhook_url,
            username: optional_str(config, "username")?.map(str::to_string),
            avatar_url: optional_str(config, "avatar_url")?.map(str::to_string),
            client: http_client::build_client(http_client::DEFAULT_REQUEST_TIMEOUT)?,
        })
    }

    /// Get the embed color for a level.
    fn get_color(level: MessageLevel) -> u32 {
        match level {
            MessageLevel::Debug => 0xeb459e,   // Fuchsia
            MessageLevel::Info => 0x3498db,    // Blue
            MessageLevel::Success => 0x57f287, // Green
            MessageLevel::Warning => 0xf1c40f, // Yellow
            MessageLevel::Error | MessageLevel::Fatal => 0xed4245, // Red
        }
    }

    fn build_payload(&self, message: &Message) -> serde_json::Value {
        let mut fields = vec![
            json!({ "name": "Level", "value": message.level.as_str(), "inline": true }),
            json!({ "name": "Extras", "value": message.extras_to_string(), "inline": false }),
        ];
        if let Some(error) = &message.error {
            fields.push(json!({ "name": "Error", "value": error, "inline": false }));
        }

        let embed = json!({
            "title": message.entity,
            "description": message.details_or_empty(),
            "color": Self::get_color(message.level),
            "timestamp": message.timestamp.to_rfc3339(),
            "fields": fields,
        });

        let mut payload = json!({
            "content": message.subject,
            "embeds": [embed],
        });

        if let Some(username) = &self.username {
            payload["username"] = json!(username);
        }
        if let Some(avatar_url) = &self.avatar_url {
            payload["avatar_url"] = json!(avatar_url);
        }

        payload
    }

    async fn send_with_retry(&self, payload: &serde_json::Value) -> Result<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            let response = self
                .client
                .post(self.webhook_url.clone())
                .json(payload)
                .send()
                .await
                .map_err(|e| Error::Notification(format!("Discord request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                return Ok(());
            }

            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = parse_retry_after(response.headers());

                if attempts >= MAX_RATE_LIMIT_RETRIES {
                    warn!(
                        retries = MAX_RATE_LIMIT_RETRIES,
                        ?retry_after,
                        "Discord rate limit: max retries exceeded"
                    );
                    return Err(Error::Notification(format!(
                        "Discord rate limit exceeded after {MAX_RATE_LIMIT_RETRIES} retries"
                    )));
                }

                let wait_duration = retry_after.unwrap_or(Duration::from_secs(1));
                debug!(
                    "Discord rate limited (429), waiting {:?} before retry (attempt {}/{})",
                    wait_duration, attempts, MAX_RATE_LIMIT_RETRIES
                );
                tokio::time::sleep(wait_duration).await;
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Discord webhook failed: {status} - {body}"
            )));
        }
    }
}

/// Parse the wait duration of a 429 response.
fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    ["Retry-After", "X-RateLimit-Reset-After"]
        .iter()
        .filter_map(|name| headers.get(*name))
        .filter_map(|value| value.to_str().ok()?.trim().parse::<f64>().ok())
        .find(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

#[async_trait]
impl NotificationProvider for DiscordChannel {
    fn kind(&self) -> &'static str {
        DISCORD
    }

    async fn send(&self, message: &Message) -> Result<()> {
        message.validate()?;

        let payload = self.build_payload(message);
        self.send_with_retry(&payload).await?;

        debug!(subject = %message.subject, "Discord notification sent");
        Ok(())
    }
}
