//! Notification channels.
//!
//! - Slack incoming webhooks (block kit)
//! - Discord webhooks (embeds, rate-limit aware)
//! - Sentry store API

mod discord;
mod sentry;
mod slack;

pub use discord::DiscordChannel;
pub use sentry::SentryChannel;
pub use slack::SlackChannel;

use reqwest::{Client, Response};
use url::Url;

use crate::{Error, Result};

/// Parse and check a webhook URL setting.
fn parse_webhook_url(key: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|_| Error::invalid_setting(key, "a valid URL"))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        _ => Err(Error::invalid_setting(key, "an http(s) URL")),
    }
}

/// POST a JSON payload and turn non-2xx statuses into errors.
async fn post_json(
    client: &Client,
    channel: &str,
    url: &Url,
    payload: &serde_json::Value,
) -> Result<Response> {
    let response = client
        .post(url.clone())
        .json(payload)
        .send()
        .await
        .map_err(|e| Error::Notification(format!("{channel} request failed: {e}")))?;

    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(Error::Notification(format!(
        "{channel} request failed: {status} - {body}"
    )))
}
