use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Propagates registry image pushes into kustomization image tags.
#[derive(Debug, Parser)]
#[command(name = "image-updater", version, about)]
pub struct Cli {
    /// Registry rules file (YAML list)
    #[arg(long, env = "CONFIG_PATH")]
    pub config: PathBuf,

    /// Log filter, e.g. `info` or `image_updater=debug`
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,

    /// Base URL for repository paths that do not name a host
    #[arg(long, env = "GITHUB_BASE_URL", default_value = image_updater::config::settings::DEFAULT_GITHUB_BASE_URL)]
    pub github_base_url: String,

    /// GitHub REST API root, used for installation tokens
    #[arg(long, env = "GITHUB_API_URL", default_value = "https://api.github.com")]
    pub github_api_url: String,

    #[arg(long, env = "GITHUB_USERNAME", default_value = image_updater::credentials::DEFAULT_USERNAME)]
    pub github_username: String,

    /// Static token; prefer GITHUB_TOKEN_FILE outside of local testing
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    #[arg(long, env = "GITHUB_TOKEN_FILE")]
    pub github_token_file: Option<PathBuf>,

    /// GitHub App id; the app JWT is signed with GITHUB_CRT_PATH
    #[arg(long, env = "GITHUB_APPLICATION_ID", requires = "github_app_installation_id")]
    pub github_app_id: Option<u64>,

    #[arg(
        long,
        env = "GITHUB_INSTALLATION_ID",
        requires = "github_app_id",
        requires = "github_app_key_file"
    )]
    pub github_app_installation_id: Option<u64>,

    /// PEM private key of the GitHub App
    #[arg(long, env = "GITHUB_CRT_PATH", requires = "github_app_installation_id")]
    pub github_app_key_file: Option<PathBuf>,

    #[arg(long, env = "GIT_AUTHOR_NAME", default_value = "image-updater")]
    pub git_author_name: String,

    #[arg(long, env = "GIT_AUTHOR_EMAIL", default_value = "image-updater@users.noreply.github.com")]
    pub git_author_email: String,

    /// Registry host after `<account>.`; `{region}` is replaced
    #[arg(long, env = "REGISTRY_HOST_TEMPLATE", default_value = image_updater::config::settings::DEFAULT_REGISTRY_HOST_TEMPLATE)]
    pub registry_host_template: String,

    /// Parent directory for scratch clones (defaults to the system temp dir)
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Timeout for a single git command, in seconds
    #[arg(long, env = "GIT_TIMEOUT_SECS", default_value_t = 120)]
    pub git_timeout_secs: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Accept events over HTTP
    Serve {
        #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
        listen: SocketAddr,
    },
    /// Consume events from a spool directory
    Consume {
        #[arg(long, env = "SPOOL_DIR")]
        spool_dir: PathBuf,

        /// Seconds between polls
        #[arg(long, env = "INTERVAL_SECS", default_value_t = 10)]
        interval_secs: u64,

        #[arg(long, env = "MAX_CONCURRENT_UPDATES", default_value_t = 8)]
        max_concurrent_updates: usize,

        /// Receives before a transiently failing message is dead-lettered
        #[arg(long, env = "MAX_RECEIVE_COUNT", default_value_t = 5)]
        max_receive_count: u32,

        /// Seconds before a released message is retried, doubled per receive
        #[arg(long, env = "RELEASE_BACKOFF_SECS", default_value_t = 30)]
        release_backoff_secs: u64,
    },
}
