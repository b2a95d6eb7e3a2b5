//! Command-line flags and the optional configuration file.
//!
//! Configuration is read from TOML:
//! - Linux: `~/.config/cowshare/config.toml`
//! - Windows: `%APPDATA%/cowshare/config.toml`
//!
//! A flag given on the command line wins over the file. The file is only
//! read, never created.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use cowshare_client::ClientConfig;
use cowshare_share::UploadOptions;
use cowshare_transfer::{
    DEFAULT_BLOCK_SIZE, DEFAULT_CONCURRENCY, RetryPolicy, TransferConfig, clamp_block_size,
};
use serde::Deserialize;

const DEFAULT_TIMEOUT_SECS: u64 = 15;

/// Upload files to a share or download shares by link.
#[derive(Parser, Debug, Default)]
#[command(name = "cowshare", version, about)]
pub struct Cli {
    /// Files or directories to upload, or share links (https://...) to download.
    pub inputs: Vec<String>,

    /// Auth code.
    #[arg(short = 'a', long = "auth")]
    pub auth_code: Option<String>,

    /// Account cookie.
    #[arg(short = 'c', long)]
    pub cookie: Option<String>,

    /// Parallel block transfers [default: 3].
    #[arg(short = 'p', long)]
    pub parallel: Option<usize>,

    /// Upload block size in bytes [default: 1200000].
    #[arg(short = 'b', long = "block")]
    pub block_size: Option<usize>,

    /// Request timeout in seconds [default: 15].
    #[arg(short = 't', long)]
    pub timeout: Option<u64>,

    /// Download directory or file name [default: .].
    #[arg(short = 'o', long)]
    pub prefix: Option<PathBuf>,

    /// Upload every file into one share.
    #[arg(short = 's', long)]
    pub single: bool,

    /// Debug logging.
    #[arg(short = 'v', long)]
    pub verbose: bool,

    /// Wait for Enter before exiting.
    #[arg(short = 'k', long)]
    pub keep: bool,

    /// Verify the MD5 of every uploaded block.
    #[arg(long)]
    pub hash: bool,

    /// Share passcode, set on upload and sent on download.
    #[arg(long = "password")]
    pub passcode: Option<String>,

    /// No progress lines.
    #[arg(long)]
    pub silent: bool,

    /// Days the share stays valid.
    #[arg(long = "valid")]
    pub valid_days: Option<u32>,

    /// Short download code to resolve and download.
    #[arg(long = "short")]
    pub short_code: Option<String>,

    /// Give up on a block after this many failures [default: never].
    #[arg(long)]
    pub max_attempts: Option<u32>,

    /// Configuration file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Contents of the configuration file. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub auth_code: Option<String>,
    pub cookie: Option<String>,
    pub parallel: Option<usize>,
    pub block_size: Option<usize>,
    pub timeout: Option<u64>,
    pub prefix: Option<PathBuf>,
    pub single: bool,
    pub hash: bool,
    pub silent: bool,
    pub keep: bool,
    pub passcode: Option<String>,
    pub valid_days: Option<u32>,
    pub max_attempts: Option<u32>,
}

impl FileConfig {
    /// Loads `explicit`, or the default file when it exists.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let path = config_path();
                if !path.exists() {
                    return Ok(Self::default());
                }
                path
            }
        };
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("cannot read {}: {e}", path.display()))?;
        let config: FileConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }
}

/// Effective settings after merging flags over the file.
#[derive(Debug, Clone)]
pub struct Settings {
    pub inputs: Vec<String>,
    pub transfer: TransferConfig,
    pub client: ClientConfig,
    pub upload: UploadOptions,
    pub prefix: PathBuf,
    pub passcode: String,
    pub short_code: Option<String>,
    pub keep: bool,
}

impl Settings {
    pub fn resolve(cli: Cli, file: FileConfig) -> Self {
        let block_size = clamp_block_size(
            cli.block_size
                .or(file.block_size)
                .unwrap_or(DEFAULT_BLOCK_SIZE),
        );
        let retry = match cli.max_attempts.or(file.max_attempts) {
            Some(attempts) => RetryPolicy::bounded(attempts),
            None => RetryPolicy::unbounded(),
        };
        let transfer = TransferConfig {
            block_size,
            concurrency: cli.parallel.or(file.parallel).unwrap_or(DEFAULT_CONCURRENCY),
            retry,
            verify_checksum: cli.hash || file.hash,
            ..TransferConfig::default()
        };

        let client = ClientConfig {
            timeout: Duration::from_secs(
                cli.timeout.or(file.timeout).unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            cookie: cli.cookie.or(file.cookie).unwrap_or_default(),
            auth_code: cli.auth_code.or(file.auth_code),
        };

        let passcode = cli.passcode.or(file.passcode).unwrap_or_default();
        let upload = UploadOptions {
            single_mode: cli.single || file.single,
            passcode: Some(passcode.clone()).filter(|p| !p.is_empty()),
            valid_days: cli.valid_days.or(file.valid_days),
            show_progress: !(cli.silent || file.silent),
        };

        Self {
            inputs: cli.inputs,
            transfer,
            client,
            upload,
            prefix: cli.prefix.or(file.prefix).unwrap_or_else(|| PathBuf::from(".")),
            passcode,
            short_code: cli.short_code.filter(|c| !c.is_empty()),
            keep: cli.keep || file.keep,
        }
    }
}

/// Returns the platform-specific configuration file path.
fn config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata).join("cowshare").join("config.toml")
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home)
            .join(".config")
            .join("cowshare")
            .join("config.toml")
    }
}
