//! Configuration file loading and validation.

mod folder;
mod settings;

pub use folder::FolderJob;
pub use settings::{EngineConfig, ProviderDecl, Settings};

/// Configuration file read when no path is given.
pub const DEFAULT_CONFIG_PATH: &str = "harpo.yml";
