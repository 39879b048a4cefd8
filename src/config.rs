use std::time::Duration;

use thiserror::Error;

use crate::constants::{
    API_BASE, DEFAULT_DELETE_DELAY_MS, DEFAULT_SEARCH_DELAY_MS, DM_GUILD,
};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Engine configuration loaded from environment variables.
///
/// Identifier formats (snowflake length, charset) are assumed to be validated
/// upstream; only structural problems are rejected here.
#[derive(Debug, Clone)]
pub struct Config {
    // Credentials and scope
    pub token: String,
    pub guild_id: String,
    pub channel_ids: Vec<String>,
    pub author_id: Option<String>,

    // Filters
    pub content: Option<String>,
    pub has_link: bool,
    pub has_file: bool,
    pub include_pinned: bool,
    pub pattern: Option<String>,

    // Pacing
    pub search_delay: Duration,
    pub delete_delay: Duration,
    pub max_attempts: u32,

    // Behavior
    pub confirm: bool,
    pub discover_threads: bool,
    pub api_base: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or
    /// invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            token: required_env("DISCORD_TOKEN")?,
            guild_id: env_or_default("GUILD_ID", DM_GUILD),
            channel_ids: parse_id_list(&required_env("CHANNEL_IDS")?),
            author_id: optional_env("AUTHOR_ID"),

            content: optional_env("CONTENT"),
            has_link: parse_env_bool("HAS_LINK", false)?,
            has_file: parse_env_bool("HAS_FILE", false)?,
            include_pinned: parse_env_bool("INCLUDE_PINNED", false)?,
            pattern: optional_env("PATTERN"),

            search_delay: Duration::from_millis(parse_env_u64(
                "SEARCH_DELAY_MS",
                DEFAULT_SEARCH_DELAY_MS,
            )?),
            delete_delay: Duration::from_millis(parse_env_u64(
                "DELETE_DELAY_MS",
                DEFAULT_DELETE_DELAY_MS,
            )?),
            max_attempts: parse_env_u32("MAX_DELETE_ATTEMPTS", 2)?,

            confirm: parse_env_bool("CONFIRM", true)?,
            discover_threads: parse_env_bool("DISCOVER_THREADS", true)?,
            api_base: env_or_default("API_BASE", API_BASE),
        })
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.token.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "DISCORD_TOKEN".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.channel_ids.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "CHANNEL_IDS".to_string(),
                message: "must list at least one channel".to_string(),
            });
        }
        if self.guild_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "GUILD_ID".to_string(),
                message: "cannot be empty".to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_DELETE_ATTEMPTS".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// A configuration suitable for tests: fast delays, no confirmation, no
    /// thread discovery.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            token: "test-token".to_string(),
            guild_id: "guild-1".to_string(),
            channel_ids: vec!["channel-1".to_string()],
            author_id: Some("author-1".to_string()),
            content: None,
            has_link: false,
            has_file: false,
            include_pinned: false,
            pattern: None,
            search_delay: Duration::from_millis(1),
            delete_delay: Duration::from_millis(1),
            max_attempts: 2,
            confirm: false,
            discover_threads: false,
            api_base: API_BASE.to_string(),
        }
    }
}

fn parse_id_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn required_env(name: &str) -> Result<String, ConfigError> {
    std::env::var(name).map_err(|_| ConfigError::MissingEnvVar(name.to_string()))
}

fn optional_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}
