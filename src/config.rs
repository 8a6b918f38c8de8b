//! Configuration management
//!
//! Handles loading and validating channel configuration from TOML files,
//! plus the derivation of the socket endpoint from the REST base URL.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::backoff::RetryPolicy;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelConfig {
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server endpoint configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// REST base URL (`http[s]://host[:port][/api/v1]`)
    pub base_url: String,
    /// Handshake completion window in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl ServerConfig {
    /// Derive the socket endpoint from the REST base URL.
    ///
    /// `http` becomes `ws`, `https` becomes `wss`, and one trailing
    /// `/api/v1` path suffix is stripped if present.
    pub fn socket_url(&self) -> String {
        let url = self.base_url.trim_end_matches('/');
        let url = url.strip_suffix("/api/v1").unwrap_or(url);

        if let Some(rest) = url.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = url.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            url.to_string()
        }
    }

    /// Handshake window as a duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Credential lookup configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Token store key holding the credential
    #[serde(default = "default_token_key")]
    pub token_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_key: default_token_key(),
        }
    }
}

/// Reconnection policy configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// Maximum failed cycles before the channel gives up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Growth factor per failed cycle
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryConfig {
    /// Convert to the backoff policy.
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            multiplier: self.multiplier,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Output format: "json" or "pretty"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_connect_timeout_ms() -> u64 {
    5000
}

fn default_token_key() -> String {
    "auth_token".to_string()
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1000
}

fn default_multiplier() -> f64 {
    1.5
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl ChannelConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: ChannelConfig =
            toml::from_str(&contents).with_context(|| "Failed to parse config file")?;

        config.validate()?;
        Ok(config)
    }

    /// Build a configuration for a base URL with default knobs.
    pub fn for_url(base_url: impl Into<String>) -> Self {
        Self {
            server: ServerConfig {
                base_url: base_url.into(),
                ..ServerConfig::default()
            },
            ..Self::default()
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.server.base_url.is_empty() {
            anyhow::bail!("server.base_url must not be empty");
        }
        if !self.server.base_url.starts_with("http://")
            && !self.server.base_url.starts_with("https://")
        {
            anyhow::bail!("server.base_url must start with http:// or https://");
        }
        if self.server.connect_timeout_ms == 0 {
            anyhow::bail!("server.connect_timeout_ms must be > 0");
        }
        if self.retry.max_attempts == 0 {
            anyhow::bail!("retry.max_attempts must be > 0");
        }
        if self.retry.base_delay_ms == 0 {
            anyhow::bail!("retry.base_delay_ms must be > 0");
        }
        if self.retry.multiplier < 1.0 {
            anyhow::bail!("retry.multiplier must be >= 1.0");
        }
        Ok(())
    }
}
