use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::time::Duration;

/// Bootstrap configuration loaded from environment variables
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub app_name: String,
    /// Upper bound on each dispose hook during shutdown
    pub shutdown_timeout: Duration,
    /// Whether the built-in event service wraps each trigger in a session
    pub session_per_trigger: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup; missing keys take defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        Ok(Self {
            app_name: lookup("COREKIT_APP_NAME").unwrap_or(defaults.app_name),
            shutdown_timeout: match lookup("COREKIT_SHUTDOWN_TIMEOUT_SECS") {
                Some(raw) => Duration::from_secs(
                    raw.trim()
                        .parse()
                        .context("COREKIT_SHUTDOWN_TIMEOUT_SECS must be a whole number of seconds")?,
                ),
                None => defaults.shutdown_timeout,
            },
            session_per_trigger: match lookup("COREKIT_SESSION_PER_TRIGGER") {
                Some(raw) => parse_flag(&raw)
                    .context("COREKIT_SESSION_PER_TRIGGER must be true or false")?,
                None => defaults.session_per_trigger,
            },
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "corekit".to_string(),
            shutdown_timeout: Duration::from_secs(30),
            session_per_trigger: true,
        }
    }
}

fn parse_flag(raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => anyhow::bail!("unrecognized flag value {other:?}"),
    }
}
