//! Host-to-alias resolution
//!
//! Resolves incoming Host headers to the best-matching alias. Lookups go
//! through the host cache first; misses (including "no match") are resolved
//! by the alias engine and cached without expiry.

use std::net::Ipv6Addr;
use std::sync::Arc;

use multisite_shared::{Alias, AliasFilter};

use super::alias::AliasManager;
use super::cache::{cache_key, HostCache};
use crate::error::{MultisiteError, MultisiteResult};

/// Host resolver with caching
#[derive(Clone)]
pub struct HostResolver {
    aliases: AliasManager,
    cache: Arc<dyn HostCache>,
    key_prefix: String,
    development: Option<DevelopmentFallback>,
}

/// Serve single-label hosts (`localhost`, `testserver`) from a default site
#[derive(Debug, Clone, Copy, Default)]
pub struct DevelopmentFallback {
    /// Site whose canonical alias is used; the lowest-id site otherwise
    pub default_site: Option<i64>,
}

impl HostResolver {
    /// Create a resolver sharing the alias manager's cache
    pub fn new(aliases: AliasManager) -> Self {
        let cache = aliases.cache().clone();
        Self {
            aliases,
            cache,
            key_prefix: String::new(),
            development: None,
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_development(mut self, fallback: DevelopmentFallback) -> Self {
        self.development = Some(fallback);
        self
    }

    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    /// Resolve a netloc (`host[:port]`) to an alias
    ///
    /// Returns:
    /// - Ok(Some(alias)) for the most specific matching alias
    /// - Ok(None) if no alias matches
    /// - Err(InvalidHost) if the netloc is empty or malformed
    pub async fn resolve(&self, netloc: &str) -> MultisiteResult<Option<Alias>> {
        let (host, port) = parse_netloc(netloc)?;
        let key = cache_key(&self.key_prefix, &format_netloc(&host, port));

        // Check cache first
        match self.cache.get(&key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(host = %host, error = %e, "Host cache lookup failed"),
        }

        let mut alias = self.aliases.resolve(&host, port).await?;
        if alias.is_none() && !host.contains('.') {
            if let Some(fallback) = self.development {
                alias = self.development_alias(fallback).await?;
                if let Some(alias) = &alias {
                    tracing::debug!(host = %host, site_id = alias.site_id, "Using development site");
                }
            }
        }

        if let Err(e) = self.cache.set(&key, alias.as_ref()).await {
            tracing::warn!(host = %host, error = %e, "Failed to cache host lookup");
        }
        Ok(alias)
    }

    async fn development_alias(
        &self,
        fallback: DevelopmentFallback,
    ) -> MultisiteResult<Option<Alias>> {
        if let Some(site_id) = fallback.default_site {
            let canonical = self.aliases.canonical(&AliasFilter::for_site(site_id)).await?;
            if let Some(alias) = canonical.into_iter().next() {
                return Ok(Some(alias));
            }
        }
        let canonical = self.aliases.canonical(&AliasFilter::all()).await?;
        Ok(canonical.into_iter().min_by_key(|alias| alias.site_id))
    }

    /// Invalidate cache for a specific netloc
    pub async fn invalidate_host(&self, netloc: &str) {
        let Ok((host, port)) = parse_netloc(netloc) else {
            return;
        };
        let key = cache_key(&self.key_prefix, &format_netloc(&host, port));
        if let Err(e) = self.cache.delete(&key).await {
            tracing::warn!(host = %host, error = %e, "Failed to invalidate cached host");
        }
    }
}

/// Split and normalise a netloc into a lowercase host and optional port
///
/// Bracketed IPv6 literals keep their brackets. A trailing dot on the host
/// is dropped.
pub fn parse_netloc(netloc: &str) -> MultisiteResult<(String, Option<u16>)> {
    let invalid = || MultisiteError::InvalidHost(netloc.to_string());
    let netloc = netloc.trim();

    let (host, port) = if let Some(rest) = netloc.strip_prefix('[') {
        let (addr, after) = rest.split_once(']').ok_or_else(invalid)?;
        addr.parse::<Ipv6Addr>().map_err(|_| invalid())?;
        let port = match after {
            "" => None,
            after => Some(after.strip_prefix(':').ok_or_else(invalid)?),
        };
        (format!("[{}]", addr.to_lowercase()), port)
    } else {
        let (host, port) = match netloc.rsplit_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (netloc, None),
        };
        let host = host.strip_suffix('.').unwrap_or(host);
        let valid = !host.is_empty()
            && host
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
        if !valid {
            return Err(invalid());
        }
        (host.to_ascii_lowercase(), port)
    };

    let port = match port {
        Some(port) => Some(port.parse::<u16>().map_err(|_| invalid())?),
        None => None,
    };
    Ok((host, port))
}

/// Join a host and optional port back into a netloc
pub fn format_netloc(host: &str, port: Option<u16>) -> String {
    match port {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}
