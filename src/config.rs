use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::http_client::ClientSettings;

/// TravelQuest API client
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Base URL of the TravelQuest API
    #[arg(
        short = 'u',
        long,
        env = "TRAVELQUEST_API_URL",
        default_value = "http://localhost:8080"
    )]
    pub api_url: String,

    /// Path to the session database
    #[arg(
        short = 's',
        long,
        env = "TRAVELQUEST_SESSION_DB",
        default_value = "~/.travelquest/session.sqlite3"
    )]
    pub session_db: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "300")]
    pub http_timeout: u64,

    /// Token refresh timeout in seconds
    #[arg(long, env = "TOKEN_REFRESH_TIMEOUT", default_value = "30")]
    pub refresh_timeout: u64,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Sign in and store the session
    Login {
        /// Account email
        email: String,

        /// Account password (prompted for when omitted)
        #[arg(long, env = "TRAVELQUEST_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },

    /// Forget the stored session
    Logout,

    /// Show whether a session is stored and who it belongs to
    Status,

    /// GET an API path and print the response body
    Get {
        /// API path, e.g. /api/trips
        path: String,
    },

    /// Send an arbitrary request and print the response body
    Send {
        /// HTTP method
        method: String,

        /// API path
        path: String,

        /// JSON request body
        #[arg(short, long)]
        data: Option<String>,
    },
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_url: String,

    // Session persistence
    pub session_db: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,
    pub token_refresh_timeout: u64,

    // Logging
    pub log_level: String,
}

impl Config {
    /// Build configuration with priority: CLI > ENV > defaults
    pub fn from_args(args: &CliArgs) -> Result<Self> {
        let config = Config {
            api_url: args.api_url.clone(),

            session_db: expand_tilde(&args.session_db),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(20),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),

            http_request_timeout: args.http_timeout,

            token_refresh_timeout: args.refresh_timeout,

            log_level: args.log_level.clone(),
        };

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let url = reqwest::Url::parse(&self.api_url)
            .with_context(|| format!("TRAVELQUEST_API_URL is not a valid URL: {}", self.api_url))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            anyhow::bail!(
                "TRAVELQUEST_API_URL must use http or https, got: {}",
                url.scheme()
            );
        }

        if self.token_refresh_timeout == 0 {
            anyhow::bail!("TOKEN_REFRESH_TIMEOUT must be greater than zero");
        }

        if self.http_request_timeout == 0 {
            anyhow::bail!("HTTP_REQUEST_TIMEOUT must be greater than zero");
        }

        Ok(())
    }

    /// Transport settings for the API client
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            max_connections: self.http_max_connections,
            connect_timeout: Duration::from_secs(self.http_connect_timeout),
            request_timeout: Duration::from_secs(self.http_request_timeout),
            refresh_timeout: Duration::from_secs(self.token_refresh_timeout),
        }
    }
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
