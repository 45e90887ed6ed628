//! Client configuration from environment variables.

use std::time::Duration;

use snafu::prelude::*;

use crate::{
    client::{ReconnectPolicy, DEFAULT_POLL_INTERVAL},
    event::{ParseUpdateKindError, UpdateKind},
};

/// dashboard http api base url
pub const ENV_API_URL: &str = "CTI_API_URL";
/// websocket push url, polling only when unset
pub const ENV_PUSH_URL: &str = "CTI_PUSH_URL";
/// `1` when binary frames of push channel are compressed
pub const ENV_PUSH_COMPRESS: &str = "CTI_PUSH_COMPRESS";
/// max reconnect attempts
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "CTI_RECONNECT_MAX_ATTEMPTS";
/// delay between reconnect attempts, in milliseconds
pub const ENV_RECONNECT_DELAY_MS: &str = "CTI_RECONNECT_DELAY_MS";
/// polling interval, in milliseconds
pub const ENV_POLL_INTERVAL_MS: &str = "CTI_POLL_INTERVAL_MS";
/// comma separated data sets to poll, like `feed,report`
pub const ENV_POLL_KINDS: &str = "CTI_POLL_KINDS";

/// Default dashboard api url
pub const DEFAULT_API_URL: &str = "http://127.0.0.1:5000";

/// Error when read config
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)), module(config_error), context(suffix(false)))]
pub enum ConfigError {
    /// variable is not an unsigned number
    #[snafu(display("{name}={value} is not an unsigned number: {source}"))]
    InvalidNumber {
        /// variable name
        name: &'static str,
        /// variable value
        value: String,
        /// source error
        source: std::num::ParseIntError,
    },

    /// duration variable is zero
    #[snafu(display("{name} must be greater than zero"))]
    ZeroDuration {
        /// variable name
        name: &'static str,
    },

    /// variable has an unknown update kind
    #[snafu(display("{name} is invalid: {source}"))]
    InvalidPollKind {
        /// variable name
        name: &'static str,
        /// source error
        source: ParseUpdateKindError,
    },
}

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// dashboard http api base url
    pub api_url: String,
    /// websocket push url, `None` disables push channel
    pub push_url: Option<String>,
    /// binary frames of push channel are zlib compressed
    pub push_compress: bool,
    /// reconnect policy
    pub policy: ReconnectPolicy,
    /// polling fallback interval
    pub poll_interval: Duration,
    /// data sets fetched on each poll
    pub poll_kinds: Vec<UpdateKind>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            push_url: None,
            push_compress: false,
            policy: ReconnectPolicy::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_kinds: vec![UpdateKind::Feed],
        }
    }
}

fn parse_u64<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .context(config_error::InvalidNumber { name, value }),
        None => Ok(None),
    }
}

fn parse_millis<F>(lookup: &F, name: &'static str) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match parse_u64(lookup, name)? {
        Some(0) => config_error::ZeroDuration { name }.fail(),
        Some(ms) => Ok(Some(Duration::from_millis(ms))),
        None => Ok(None),
    }
}

impl Config {
    /// Read config from process environment, unset variables keep default value
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read config from a variable lookup function
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(url) = lookup(ENV_API_URL) {
            config.api_url = url;
        }

        config.push_url = lookup(ENV_PUSH_URL).filter(|url| !url.trim().is_empty());

        config.push_compress = lookup(ENV_PUSH_COMPRESS)
            .map(|val| val.trim() == "1")
            .unwrap_or_default();

        let max_attempts = match parse_u64(&lookup, ENV_RECONNECT_MAX_ATTEMPTS)? {
            Some(n) => n.min(u32::MAX as u64) as u32,
            None => config.policy.max_attempts(),
        };
        let delay = parse_millis(&lookup, ENV_RECONNECT_DELAY_MS)?
            .unwrap_or_else(|| config.policy.delay());
        config.policy = ReconnectPolicy::new(max_attempts, delay);

        if let Some(interval) = parse_millis(&lookup, ENV_POLL_INTERVAL_MS)? {
            config.poll_interval = interval;
        }

        if let Some(kinds) = lookup(ENV_POLL_KINDS) {
            config.poll_kinds = kinds
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(str::parse)
                .collect::<Result<Vec<_>, _>>()
                .context(config_error::InvalidPollKind {
                    name: ENV_POLL_KINDS,
                })?;
        }

        log::debug!("Loaded config: {:?}", config);

        Ok(config)
    }
}
