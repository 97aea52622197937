//! Multisite host routing
//!
//! Serves many sites from one application. Each request's Host header is
//! matched against site aliases to pick the current site, redirect to its
//! canonical domain, or hand off to a fallback.

pub mod config;
pub mod context;
pub mod error;
pub mod hosts;
pub mod middleware;
pub mod registry;
pub mod routing;
pub mod stack;
pub mod store;
pub mod suffix;

pub use config::{Config, ConfigError};
pub use context::{request_scope, ContextError, OverrideGuard, SiteContext, SiteDomain, SiteId};
pub use error::{MultisiteError, MultisiteResult};
pub use hosts::AllowedHosts;
pub use middleware::{
    cookie_domain_middleware, dynamic_site_middleware, CookieDomain, CurrentSite, DynamicSite,
    Fallback, FallbackRegistry,
};
pub use registry::SiteRegistry;
pub use routing::{AliasManager, DomainCache, HostCache, HostResolver};
pub use stack::Multisite;
pub use store::{MemoryStore, PgSiteStore, SiteStore};
pub use suffix::PublicSuffixResolver;

pub use multisite_shared::{Alias, AliasFilter, NewAlias, NewSite, Site, SiteFilter};
