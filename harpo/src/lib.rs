//! Scheduled folder backups.
//!
//! Every configured folder is archived on its schedule, uploaded to each of
//! its storages concurrently and optionally cleared afterwards, with progress
//! reported to its notifiers.

pub mod archiving;
pub mod backup;
pub mod config;
pub mod error;
pub mod logging;
pub mod notification;
pub mod provider;
pub mod storage;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_utils;

pub use error::{Error, Result};
