//! Slack incoming-webhook channel.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;
use url::Url;

use super::{parse_webhook_url, post_json};
use crate::Result;
use crate::notification::{Message, NotificationProvider, SLACK};
use crate::provider::{ProviderConfig, required_str};
use crate::utils::http_client;

pub struct SlackChannel {
    webhook_url: Url,
    client: Client,
}

impl SlackChannel {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let webhook_url = parse_webhook_url("webhook_url", required_str(config, "webhook_url")?)?;
        Ok(Self {
            webhook_url,
            client: http_client::build_client(http_client::DEFAULT_REQUEST_TIMEOUT)?,
        })
    }

    fn build_payload(message: &Message) -> serde_json::Value {
        let field = |label: &str, value: &dyn std::fmt::Display| {
            json!({ "type": "mrkdwn", "text": format!("*{label}:*\n{value}") })
        };
        let mut blocks = vec![
            json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*{}*", message.subject) }
            }),
            json!({
                "type": "section",
                "fields": [
                    field("Entity", &message.entity),
                    field("Location", &message.extras_to_string()),
                    field("Level", &message.level),
                    field("Details", &message.details_or_empty()),
                ]
            }),
        ];

        if let Some(error) = &message.error {
            blocks.push(json!({
                "type": "section",
                "text": { "type": "mrkdwn", "text": format!("*Error:*\n{error}") }
            }));
        }

        json!({ "blocks": blocks })
    }
}

#[async_trait]
impl NotificationProvider for SlackChannel {
    fn kind(&self) -> &'static str {
        SLACK
    }

    async fn send(&self, message: &Message) -> Result<()> {
        message.validate()?;

        let payload = Self::build_payload(message);
        post_json(&self.client, "Slack", &self.webhook_url, &payload).await?;

        debug!(subject = %message.subject, "Slack notification sent");
        Ok(())
    }
}
