//! Configuration management

use anyhow::Result;
use std::path::PathBuf;

/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// X API bearer token (reads)
    pub x_bearer_token: Option<String>,

    /// X API OAuth user token (writes)
    pub x_access_token: Option<String>,

    /// OpenAI API key for reply generation
    pub openai_api_key: Option<String>,

    /// SQLite database path
    pub db_path: PathBuf,

    /// HTTP bind address
    pub bind_addr: String,

    /// HTTP port
    pub port: u16,

    /// Maximum successful replies per calendar day
    pub daily_reply_limit: u32,

    /// Jitter delay between replies, seconds
    pub reply_delay_min: u64,
    pub reply_delay_max: u64,

    /// Consecutive successes before a batch break
    pub batch_size: u32,

    /// Batch break duration, seconds
    pub batch_break_min: u64,
    pub batch_break_max: u64,

    /// Trailing window for history queries and cleanup, days
    pub history_days: i64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let x_bearer_token = std::env::var("X_BEARER_TOKEN").ok();
        let x_access_token = std::env::var("X_ACCESS_TOKEN").ok();
        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();

        let db_path = std::env::var("REPLYBOT_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("automation.db"));

        let bind_addr =
            std::env::var("REPLYBOT_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(Self {
            x_bearer_token,
            x_access_token,
            openai_api_key,
            db_path,
            bind_addr,
            port: env_parsed("PORT", 8000),
            daily_reply_limit: env_parsed("DAILY_REPLY_LIMIT", 50),
            reply_delay_min: env_parsed("REPLY_DELAY_MIN", 60),
            reply_delay_max: env_parsed("REPLY_DELAY_MAX", 180),
            batch_size: env_parsed("BATCH_SIZE", 10),
            batch_break_min: env_parsed("BATCH_BREAK_MIN", 600),
            batch_break_max: env_parsed("BATCH_BREAK_MAX", 900),
            history_days: env_parsed("HISTORY_DAYS", 3),
        })
    }

    /// Check that the credentials needed for live runs are present.
    ///
    /// The server still starts without them; sessions will fail at the first
    /// remote call instead.
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.x_bearer_token.is_none() {
            missing.push("X_BEARER_TOKEN");
        }
        if self.x_access_token.is_none() {
            missing.push("X_ACCESS_TOKEN");
        }
        if self.openai_api_key.is_none() {
            missing.push("OPENAI_API_KEY");
        }
        if missing.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )
        }
    }
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
