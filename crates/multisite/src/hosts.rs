//! Allowed hosts
//!
//! Every alias is an allowed host. Extra patterns cover hosts served without
//! an alias (health checks, internal names).

use multisite_shared::AliasFilter;

use crate::error::MultisiteResult;
use crate::routing::AliasManager;

/// Allowed host patterns: configured extras plus one per alias
#[derive(Clone)]
pub struct AllowedHosts {
    extra: Vec<String>,
    aliases: AliasManager,
}

impl AllowedHosts {
    pub fn new(aliases: AliasManager, extra: Vec<String>) -> Self {
        let extra = extra
            .into_iter()
            .map(|pattern| pattern.trim().to_ascii_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        Self { extra, aliases }
    }

    pub fn extra(&self) -> &[String] {
        &self.extra
    }

    /// Whether `host` matches one of the extra patterns
    pub fn is_extra(&self, host: &str) -> bool {
        self.extra.iter().any(|pattern| host_matches(host, pattern))
    }

    /// All patterns, extras first, without duplicates
    pub async fn patterns(&self) -> MultisiteResult<Vec<String>> {
        let mut patterns = self.extra.clone();
        for alias in self.aliases.list(&AliasFilter::all()).await? {
            let pattern = alias_pattern(&alias.domain);
            if !patterns.contains(&pattern) {
                patterns.push(pattern);
            }
        }
        Ok(patterns)
    }
}

/// Allowed-host pattern for an alias domain
///
/// `*.example.com:8000` becomes `.example.com`, `*` stays `*`.
pub fn alias_pattern(domain: &str) -> String {
    let host = match domain.rsplit_once(':') {
        Some((host, port)) if port.parse::<u16>().is_ok() => host,
        _ => domain,
    };
    let host = host.to_ascii_lowercase();
    match host.strip_prefix('*') {
        Some("") => "*".to_string(),
        Some(rest) => rest.to_string(),
        None => host,
    }
}

/// Match a host against an allowed-host pattern
///
/// `*` matches everything. A leading dot matches the domain itself and every
/// subdomain. Anything else is a case-insensitive exact match.
pub fn host_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();
    if pattern == "*" {
        return true;
    }
    match pattern.strip_prefix('.') {
        Some(domain) => host == domain || host.ends_with(&pattern),
        None => host == pattern,
    }
}
