//! Sentry channel speaking the store API directly over HTTP.

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::debug;
use url::Url;
use uuid::Uuid;

use crate::notification::{Message, MessageLevel, NotificationProvider, SENTRY};
use crate::provider::{ProviderConfig, optional_str, required_str};
use crate::utils::http_client;
use crate::{Error, Result};

const SENTRY_CLIENT: &str = concat!("harpo/", env!("CARGO_PKG_VERSION"));

/// Store endpoint and public key extracted from a DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Dsn {
    store_url: Url,
    public_key: String,
}

impl Dsn {
    /// Parse `{scheme}://{public_key}@{host}[:{port}]/{path/}{project_id}`.
    fn parse(raw: &str) -> Result<Self> {
        let invalid = || Error::invalid_setting("dsn", "a valid Sentry DSN");

        let url = Url::parse(raw).map_err(|_| invalid())?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid());
        }

        let public_key = url.username();
        if public_key.is_empty() {
            return Err(invalid());
        }

        let host = url.host_str().ok_or_else(invalid)?;
        let segments: Vec<&str> = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).collect())
            .unwrap_or_default();
        let Some((project_id, prefix)) = segments.split_last() else {
            return Err(invalid());
        };

        let mut base = format!("{}://{}", url.scheme(), host);
        if let Some(port) = url.port() {
            base.push_str(&format!(":{port}"));
        }
        for segment in prefix {
            base.push('/');
            base.push_str(segment);
        }

        let store_url =
            Url::parse(&format!("{base}/api/{project_id}/store/")).map_err(|_| invalid())?;

        Ok(Self {
            store_url,
            public_key: public_key.to_string(),
        })
    }

    fn auth_header(&self) -> String {
        format!(
            "Sentry sentry_version=7, sentry_key={}, sentry_client={}",
            self.public_key, SENTRY_CLIENT
        )
    }
}

pub struct SentryChannel {
    dsn: Dsn,
    environment: Option<String>,
    client: Client,
}

impl SentryChannel {
    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let dsn = Dsn::parse(required_str(config, "dsn")?)?;
        Ok(Self {
            dsn,
            environment: optional_str(config, "environment")?.map(str::to_string),
            client: http_client::build_client(http_client::DEFAULT_REQUEST_TIMEOUT)?,
        })
    }

    fn sentry_level(level: MessageLevel) -> &'static str {
        match level {
            MessageLevel::Debug => "debug",
            MessageLevel::Info | MessageLevel::Success => "info",
            MessageLevel::Warning => "warning",
            MessageLevel::Error => "error",
            MessageLevel::Fatal => "fatal",
        }
    }

    fn build_event(&self, message: &Message) -> serde_json::Value {
        let mut extra = json!({
            "entity": message.entity,
            "extras": message.extras_to_string(),
            "level": message.level.as_str(),
        });
        if let Some(error) = &message.error {
            extra["error"] = json!(error);
        }

        let value = message
            .details
            .as_deref()
            .or(message.error.as_deref())
            .unwrap_or_default();
        let mut event = json!({
            "event_id": Uuid::new_v4().simple().to_string(),
            "timestamp": message.timestamp.to_rfc3339(),
            "platform": "other",
            "logger": "harpo",
            "level": Self::sentry_level(message.level),
            "message": message.subject,
            "user": { "id": message.entity },
            "exception": {
                "values": [{
                    "type": message.subject,
                    "value": value,
                }]
            },
            "extra": extra,
        });

        if let Some(environment) = &self.environment {
            event["environment"] = json!(environment);
        }

        event
    }
}

#[async_trait]
impl NotificationProvider for SentryChannel {
    fn kind(&self) -> &'static str {
        SENTRY
    }

    async fn send(&self, message: &Message) -> Result<()> {
        message.validate()?;

        let event = self.build_event(message);
        let response = self
            .client
            .post(self.dsn.store_url.clone())
            .header("X-Sentry-Auth", self.dsn.auth_header())
            .json(&event)
            .send()
            .await
            .map_err(|e| Error::Notification(format!("Sentry request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Notification(format!(
                "Sentry request failed: {status} - {body}"
            )));
        }

        debug!(subject = %message.subject, "Sentry event sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dsn() {
        let dsn = Dsn::parse("https://abc123@o1.ingest.sentry.io/4505").unwrap();
        assert_eq!(
            dsn.store_url.as_str(),
            "https://o1.ingest.sentry.io/api/4505/store/"
        );
        assert_eq!(dsn.public_key, "abc123");
        assert!(dsn.auth_header().contains("sentry_key=abc123"));
    }

    #[test]
    fn test_parse_dsn_with_port_and_prefix() {
        let dsn = Dsn::parse("http://key@localhost:9000/sentry/7").unwrap();
        assert_eq!(
            dsn.store_url.as_str(),
            "http://localhost:9000/sentry/api/7/store/"
        );
    }

    #[test]
    fn test_parse_dsn_rejects_invalid() {
        assert!(Dsn::parse("https://sentry.io/1").is_err());
        assert!(Dsn::parse("https://key@sentry.io/").is_err());
        assert!(Dsn::parse("garbage").is_err());
    }

    #[test]
    fn test_build_event() {
        let config = json!({"dsn": "https://k@sentry.example.com/1", "environment": "prod"});
        let channel = SentryChannel::from_config(config.as_object().unwrap()).unwrap();
        let message = Message::new(
            "Harpo Backup",
            MessageLevel::Success,
            vec!["docs".to_string()],
            "Backup finished",
        );

        let event = channel.build_event(&message);

        assert_eq!(event["level"], "info");
        assert_eq!(event["message"], "Backup finished");
        assert_eq!(event["user"]["id"], "Harpo Backup");
        assert_eq!(event["extra"]["extras"], "docs");
        assert_eq!(event["extra"]["level"], "success");
        assert_eq!(event["environment"], "prod");
        assert_eq!(event["event_id"].as_str().unwrap().len(), 32);
    }
}
