//! Host-based routing
//!
//! This module resolves incoming Host headers to sites through their
//! aliases:
//! - Exact hosts: www.example.com, www.example.com:8000
//! - Wildcards: *.example.com, *
//! - Canonical aliases mirroring each site's domain

mod alias;
mod cache;
mod host_resolver;

pub use alias::{expand_netloc, validate_pattern, AliasManager, MAX_DOMAIN_LENGTH};
pub use cache::{cache_key, CacheStats, DomainCache, HostCache, NoopCache, RedisDomainCache};
pub use host_resolver::{format_netloc, parse_netloc, DevelopmentFallback, HostResolver};
