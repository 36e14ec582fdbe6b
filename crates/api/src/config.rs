//! Environment-driven configuration.

use std::net::SocketAddr;
use std::time::Duration;

use chrono::TimeDelta;
use thiserror::Error;

pub const DEFAULT_CSP: &str = "default-src 'self'; script-src 'self'; style-src 'self' 'unsafe-inline'; \
img-src 'self' data: https:; connect-src 'self' https:; frame-ancestors 'none'; base-uri 'self'; form-action 'self'";

/// Upper bound for every TTL and interval: one year.
pub const MAX_SECONDS: u64 = 366 * 24 * 60 * 60;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be between 1 and 31622400 seconds, got '{value}'")]
    InvalidSeconds { name: &'static str, value: String },

    #[error("{name} must be a socket address, got '{value}'")]
    InvalidAddr { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub bind_addr: SocketAddr,
    pub baas_url: String,
    pub baas_anon_key: String,
    pub geo_url: String,
    pub permission_ttl: TimeDelta,
    pub cache_cleanup_interval: Duration,
    pub alert_prune_interval: Duration,
    pub alert_max_age: TimeDelta,
    pub content_security_policy: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            baas_url: "http://localhost:54321".to_string(),
            baas_anon_key: String::new(),
            geo_url: "https://ipapi.co/json/".to_string(),
            permission_ttl: TimeDelta::minutes(5),
            cache_cleanup_interval: Duration::from_secs(300),
            alert_prune_interval: Duration::from_secs(300),
            alert_max_age: TimeDelta::hours(1),
            content_security_policy: DEFAULT_CSP.to_string(),
        }
    }
}

impl GateConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source; unset variables keep their
    /// defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("QUOTEGATE_BIND_ADDR") {
            config.bind_addr = value.parse().map_err(|_| ConfigError::InvalidAddr {
                name: "QUOTEGATE_BIND_ADDR",
                value,
            })?;
        }
        if let Some(value) = lookup("QUOTEGATE_BAAS_URL") {
            config.baas_url = value.trim_end_matches('/').to_string();
        }
        match lookup("QUOTEGATE_BAAS_ANON_KEY") {
            Some(value) => config.baas_anon_key = value,
            None => tracing::warn!("QUOTEGATE_BAAS_ANON_KEY not set; BaaS calls will be anonymous"),
        }
        if let Some(value) = lookup("QUOTEGATE_GEO_URL") {
            config.geo_url = value;
        }
        if let Some(value) = lookup("QUOTEGATE_CSP") {
            config.content_security_policy = value;
        }

        if let Some(ttl) = time_delta(&lookup, "QUOTEGATE_PERMISSION_TTL_SECS")? {
            config.permission_ttl = ttl;
        }
        if let Some(secs) = seconds(&lookup, "QUOTEGATE_CACHE_CLEANUP_SECS")? {
            config.cache_cleanup_interval = Duration::from_secs(secs);
        }
        if let Some(secs) = seconds(&lookup, "QUOTEGATE_ALERT_PRUNE_SECS")? {
            config.alert_prune_interval = Duration::from_secs(secs);
        }
        if let Some(age) = time_delta(&lookup, "QUOTEGATE_ALERT_MAX_AGE_SECS")? {
            config.alert_max_age = age;
        }

        Ok(config)
    }
}

fn seconds<F>(lookup: &F, name: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(value) = lookup(name) else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(secs) if (1..=MAX_SECONDS).contains(&secs) => Ok(Some(secs)),
        _ => Err(ConfigError::InvalidSeconds { name, value }),
    }
}

fn time_delta<F>(lookup: &F, name: &'static str) -> Result<Option<TimeDelta>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(secs) = seconds(lookup, name)? else {
        return Ok(None);
    };
    i64::try_from(secs)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidSeconds {
            name,
            value: secs.to_string(),
        })
}
