//! Notification payload.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Severity of a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageLevel {
    Debug,
    Info,
    Warning,
    Error,
    Fatal,
    Success,
}

impl MessageLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
            Self::Success => "success",
        }
    }
}

impl fmt::Display for MessageLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A structured notification.
///
/// `extras` identifies what the message is about (e.g. the folder name), from
/// the most general item to the most specific one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub entity: String,
    pub level: MessageLevel,
    pub extras: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(
        entity: impl Into<String>,
        level: MessageLevel,
        extras: Vec<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            entity: entity.into(),
            level,
            extras,
            subject: subject.into(),
            details: None,
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_error(mut self, error: &dyn fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }

    /// Check the message can be delivered: a subject and at least one extra.
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(Error::InvalidMessage("no message subject provided"));
        }
        if self.extras.is_empty() {
            return Err(Error::InvalidMessage("no message extras provided"));
        }
        Ok(())
    }

    pub fn extras_to_string(&self) -> String {
        self.extras.join(" > ")
    }

    pub fn details_or_empty(&self) -> &str {
        self.details.as_deref().unwrap_or_default()
    }
}
