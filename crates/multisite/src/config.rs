//! Multisite configuration

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::SiteId;
use crate::error::MultisiteResult;
use crate::routing::{DomainCache, HostCache, NoopCache, RedisDomainCache};
use crate::suffix::{default_cache_file, DEFAULT_LIST_URL};

/// Default hosts that never get a cookie domain
pub const DEFAULT_LOCAL_HOSTS: &[&str] = &["localhost", "localhost.localdomain"];

/// Configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: Option<String>,
    pub database_max_connections: u32,

    // Redis
    pub redis_url: Option<String>,

    // Site context
    pub site_id: Option<i64>,

    // Host routing
    pub fallback: Option<String>,
    pub fallback_args: serde_json::Value,
    pub extra_hosts: Vec<String>,
    pub enforce_allowed_hosts: bool,
    pub development: bool,

    // Cookies
    pub cookie_domain_depth: i64,
    pub local_hosts: Vec<String>,

    // Public suffix list
    pub public_suffix_list_cache: PathBuf,
    pub public_suffix_list_url: String,

    // Host cache
    pub cache_backend: CacheBackend,
    pub cache_key_prefix: String,
}

/// Host cache backend selected by `CACHE_MULTISITE_ALIAS`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    Memory,
    Redis,
    Dummy,
}

impl FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "default" | "memory" => Ok(CacheBackend::Memory),
            "redis" => Ok(CacheBackend::Redis),
            "dummy" | "none" => Ok(CacheBackend::Dummy),
            other => Err(format!("unknown cache backend {other:?}")),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let cache_backend: CacheBackend = parse_var("CACHE_MULTISITE_ALIAS", CacheBackend::Memory)?;
        let redis_url = non_empty_var("REDIS_URL");
        if cache_backend == CacheBackend::Redis && redis_url.is_none() {
            return Err(ConfigError::Missing("REDIS_URL"));
        }

        Ok(Self {
            // Database
            database_url: non_empty_var("DATABASE_URL"),
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", 20)?,

            // Redis
            redis_url,

            // Site context
            site_id: match env::var("SITE_ID") {
                Ok(raw) => Some(
                    SiteId::parse_default(&raw)
                        .map_err(|e| ConfigError::invalid("SITE_ID", e))?
                        .default_value()
                        .ok_or_else(|| ConfigError::invalid("SITE_ID", "no value"))?,
                ),
                Err(_) => None,
            },

            // Host routing
            fallback: match env::var("MULTISITE_FALLBACK") {
                Ok(name) if name.trim().is_empty() => {
                    return Err(ConfigError::invalid(
                        "MULTISITE_FALLBACK",
                        "must name a fallback or be unset",
                    ))
                }
                Ok(name) => Some(name.trim().to_string()),
                Err(_) => None,
            },
            fallback_args: match env::var("MULTISITE_FALLBACK_ARGS") {
                Ok(raw) => serde_json::from_str(&raw)
                    .map_err(|e| ConfigError::invalid("MULTISITE_FALLBACK_ARGS", e))?,
                Err(_) => serde_json::json!({}),
            },
            extra_hosts: list_var("MULTISITE_EXTRA_HOSTS", &[]),
            enforce_allowed_hosts: parse_bool("MULTISITE_ENFORCE_ALLOWED_HOSTS", false)?,
            development: parse_bool("MULTISITE_DEVELOPMENT", false)?,

            // Cookies
            cookie_domain_depth: {
                let depth: i64 = parse_var("MULTISITE_COOKIE_DOMAIN_DEPTH", 0)?;
                if depth < 0 {
                    return Err(ConfigError::invalid(
                        "MULTISITE_COOKIE_DOMAIN_DEPTH",
                        "must be a non-negative integer",
                    ));
                }
                depth
            },
            local_hosts: list_var("MULTISITE_LOCAL_HOSTS", DEFAULT_LOCAL_HOSTS),

            // Public suffix list
            public_suffix_list_cache: non_empty_var("MULTISITE_PUBLIC_SUFFIX_LIST_CACHE")
                .map(PathBuf::from)
                .unwrap_or_else(default_cache_file),
            public_suffix_list_url: non_empty_var("MULTISITE_PUBLIC_SUFFIX_LIST_URL")
                .unwrap_or_else(|| DEFAULT_LIST_URL.to_string()),

            // Host cache
            cache_backend,
            cache_key_prefix: env::var("CACHE_MULTISITE_KEY_PREFIX").unwrap_or_default(),
        })
    }

    /// The default site context
    pub fn site_context(&self) -> SiteId {
        match self.site_id {
            Some(id) => SiteId::with_default(id),
            None => SiteId::new(),
        }
    }

    /// Connect the configured host cache backend
    pub async fn host_cache(&self) -> MultisiteResult<Arc<dyn HostCache>> {
        Ok(match self.cache_backend {
            CacheBackend::Memory => Arc::new(DomainCache::new()),
            CacheBackend::Dummy => Arc::new(NoopCache),
            CacheBackend::Redis => {
                let url = self.redis_url.as_deref().unwrap_or("redis://localhost:6379");
                Arc::new(RedisDomainCache::connect(url, &self.cache_key_prefix).await?)
            }
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse_var<T>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::invalid(name, e)),
        Err(_) => Ok(default),
    }
}

fn parse_bool(name: &'static str, default: bool) -> Result<bool, ConfigError> {
    match env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" | "" => Ok(false),
            other => Err(ConfigError::invalid(name, format!("{other:?} is not a boolean"))),
        },
        Err(_) => Ok(default),
    }
}

fn list_var(name: &str, default: &[&str]) -> Vec<String> {
    match env::var(name) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => default.iter().map(|item| item.to_string()).collect(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(var: &'static str, reason: impl std::fmt::Display) -> Self {
        ConfigError::Invalid {
            var,
            reason: reason.to_string(),
        }
    }
}
