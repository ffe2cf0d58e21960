use super::cache_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "imgcache",
    version,
    about = "A two-tier memory and disk cache for remote images",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Disk cache directory.
    #[arg(long, value_name = "DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Maximum number of images kept in memory.
    #[arg(long)]
    pub memory_capacity: Option<usize>,

    /// Maximum decoded bytes kept in memory.
    #[arg(long, value_name = "BYTES")]
    pub memory_max_bytes: Option<u64>,

    /// Maximum bytes kept on disk.
    #[arg(long, value_name = "BYTES")]
    pub disk_max_bytes: Option<u64>,

    /// HTTP request timeout in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Operation to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Cache operations exposed on the command line.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fetch an image through memory, disk and network.
    Fetch {
        /// Image URL.
        url: String,
        /// Save the decoded image to this path.
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Read an image from disk only, never touching the network.
    Disk {
        /// Image URL.
        url: String,
    },
    /// Remove an image from both tiers.
    Remove {
        /// Image URL.
        url: String,
    },
    /// Print the disk path an image is cached under.
    Path {
        /// Image URL.
        url: String,
    },
    /// Print cache occupancy.
    Stats,
    /// Delete every cached image.
    Clear,
}
