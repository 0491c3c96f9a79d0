use chrono::Duration;
use log::info;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} is invalid: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub bind: String,
    pub data_dir: PathBuf,
    pub cookie_key: Vec<u8>,
    pub secure_cookie: bool,
    /// How long a login stays valid, for both the cookie and the stored session.
    pub session_ttl: Duration,
    pub templates: String,
}

const MIN_COOKIE_KEY_LEN: usize = 32;

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        Config::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let or_default = |key: &str, default: &str| {
            lookup(key).unwrap_or_else(|| {
                info!("{} not set, using default: {}", key, default);
                default.to_owned()
            })
        };

        let api_url = lookup("CINEFLIX_API_URL").ok_or(ConfigError::Missing("CINEFLIX_API_URL"))?;
        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::Invalid {
                key: "CINEFLIX_API_URL",
                reason: "expected an http(s) URL".to_owned(),
            });
        }

        let cookie_key = lookup("CINEFLIX_COOKIE_KEY")
            .ok_or(ConfigError::Missing("CINEFLIX_COOKIE_KEY"))?
            .into_bytes();
        if cookie_key.len() < MIN_COOKIE_KEY_LEN {
            return Err(ConfigError::Invalid {
                key: "CINEFLIX_COOKIE_KEY",
                reason: format!("needs at least {} bytes", MIN_COOKIE_KEY_LEN),
            });
        }

        let secure_cookie = or_default("CINEFLIX_SECURE_COOKIE", "false")
            .parse()
            .map_err(|e: std::str::ParseBoolError| ConfigError::Invalid {
                key: "CINEFLIX_SECURE_COOKIE",
                reason: e.to_string(),
            })?;

        let session_ttl = or_default("CINEFLIX_SESSION_TTL_HOURS", "168")
            .parse::<i64>()
            .ok()
            .filter(|hours| *hours > 0)
            .map(Duration::hours)
            .ok_or_else(|| ConfigError::Invalid {
                key: "CINEFLIX_SESSION_TTL_HOURS",
                reason: "expected a positive number of hours".to_owned(),
            })?;

        Ok(Config {
            api_url,
            bind: or_default("CINEFLIX_BIND", "127.0.0.1:8080"),
            data_dir: or_default("CINEFLIX_DATA_DIR", "cineflix-data").into(),
            cookie_key,
            secure_cookie,
            session_ttl,
            templates: or_default(
                "CINEFLIX_TEMPLATES",
                concat!(env!("CARGO_MANIFEST_DIR"), "/templates/**/*"),
            ),
        })
    }
}
