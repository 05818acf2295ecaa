use std::env;
use std::num::NonZeroU32;

use thiserror::Error;

use crate::directcast::{DEFAULT_API_URL, DEFAULT_REQUESTS_PER_MINUTE};

pub const DEFAULT_ACCOUNT_ID: &str = "default";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got `{value}`")]
    NotPositive { name: &'static str, value: String },
}

/// Process configuration read from the environment (and `.env` via dotenv).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// DirectCast API url. Defaults to the public endpoint.
    pub directcast_api_url: String,
    pub directcast_api_key: Option<String>,
    pub account_id: String,
    pub requests_per_minute: NonZeroU32,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let present = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let directcast_api_url =
            present("DIRECTCAST_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let account_id =
            present("HEROCAST_ACCOUNT_ID").unwrap_or_else(|| DEFAULT_ACCOUNT_ID.to_string());
        let requests_per_minute = match present("DIRECTCAST_REQUESTS_PER_MINUTE") {
            Some(raw) => parse_positive("DIRECTCAST_REQUESTS_PER_MINUTE", &raw)?,
            None => DEFAULT_REQUESTS_PER_MINUTE,
        };

        Ok(Self {
            directcast_api_url,
            directcast_api_key: present("DIRECTCAST_API_KEY"),
            account_id,
            requests_per_minute,
            supabase_url: present("SUPABASE_URL"),
            supabase_anon_key: present("SUPABASE_ANON_KEY"),
        })
    }
}

pub fn parse_positive(name: &'static str, raw: &str) -> Result<NonZeroU32, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| ConfigError::NotPositive {
            name,
            value: raw.to_string(),
        })
}
