//! Notification providers and fan-out.
//!
//! A [`NotificationProvider`] delivers a [`Message`] to one external channel.
//! Providers are built from a symbolic kind plus settings through
//! [`get_provider`] and are shared across backup runs. The [`Dispatcher`]
//! sends one message to many providers without making the caller wait.

pub mod channels;
mod dispatch;
mod message;

pub use dispatch::Dispatcher;
pub use message::{Message, MessageLevel};

use std::sync::Arc;

use async_trait::async_trait;

use crate::provider::ProviderConfig;
use crate::{Error, Result};

pub const SLACK: &str = "SLACK";
pub const DISCORD: &str = "DISCORD";
pub const SENTRY: &str = "SENTRY";

/// Notification kinds understood by [`get_provider`].
pub const KNOWN_KINDS: &[&str] = &[SLACK, DISCORD, SENTRY];

/// A channel able to deliver notifications.
///
/// Implementations must validate the message before sending anything.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    /// Symbolic kind of this provider (e.g. `"SLACK"`).
    fn kind(&self) -> &'static str;

    /// Deliver one message.
    async fn send(&self, message: &Message) -> Result<()>;

    /// Release resources held by the provider.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Build a notification provider. `kind` is case-sensitive.
pub fn get_provider(kind: &str, config: &ProviderConfig) -> Result<Arc<dyn NotificationProvider>> {
    let provider: Arc<dyn NotificationProvider> = match kind {
        SLACK => Arc::new(channels::SlackChannel::from_config(config)?),
        DISCORD => Arc::new(channels::DiscordChannel::from_config(config)?),
        SENTRY => Arc::new(channels::SentryChannel::from_config(config)?),
        other => return Err(Error::unsupported("notification", other)),
    };
    Ok(provider)
}
