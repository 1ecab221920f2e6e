use std::path::PathBuf;

use clap::{Parser, Subcommand};

use harpo::config::DEFAULT_CONFIG_PATH;

#[derive(Parser, Debug)]
#[command(name = "harpo", version, about = "Scheduled folder backups to remote storage")]
pub struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Also write daily rolling log files to this directory
    #[arg(long, global = true)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Schedule every folder and run until interrupted
    Run,
    /// Validate the configuration and test every storage
    Check,
    /// Back up one folder now
    Backup {
        /// Folder name
        folder: String,
    },
    /// Download the archive of a folder and unpack it
    Restore {
        /// Folder name
        folder: String,
        /// Storage to download from
        #[arg(short, long)]
        storage: String,
        /// Directory to unpack into
        #[arg(short, long)]
        into: PathBuf,
    },
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Run)
    }
}
