//! Middleware stack assembled from configuration

use std::sync::Arc;

use axum::{middleware::from_fn_with_state, Router};

use crate::config::Config;
use crate::context::SiteId;
use crate::error::MultisiteResult;
use crate::hosts::AllowedHosts;
use crate::middleware::{
    cookie_domain_middleware, dynamic_site_middleware, CookieDomain, DynamicSite, Fallback,
    FallbackRegistry,
};
use crate::registry::SiteRegistry;
use crate::routing::{AliasManager, DevelopmentFallback, HostResolver};
use crate::store::SiteStore;
use crate::suffix::PublicSuffixResolver;

/// Everything an application needs to serve multiple sites
#[derive(Clone)]
pub struct Multisite {
    pub aliases: AliasManager,
    pub registry: SiteRegistry,
    pub resolver: HostResolver,
    pub context: SiteId,
    pub suffixes: Arc<PublicSuffixResolver>,
    dynamic_site: Arc<DynamicSite>,
    cookie_domain: Arc<CookieDomain>,
}

impl Multisite {
    /// Build the stack over `store`
    ///
    /// Fails on an unknown fallback, bad fallback arguments or a negative
    /// cookie depth, or when the cache backend cannot be reached.
    pub async fn from_config(
        config: &Config,
        store: Arc<dyn SiteStore>,
        fallbacks: &FallbackRegistry,
    ) -> MultisiteResult<Self> {
        let cache = config.host_cache().await?;
        let aliases = AliasManager::new(store, cache);

        let mut resolver = HostResolver::new(aliases.clone()).with_key_prefix(&config.cache_key_prefix);
        if config.development {
            resolver = resolver.with_development(DevelopmentFallback {
                default_site: config.site_id,
            });
        }

        let context = config.site_context();
        let fallback = Fallback::from_setting(
            config.fallback.as_deref(),
            config.fallback_args.clone(),
            fallbacks,
        )?;
        let mut dynamic_site =
            DynamicSite::new(resolver.clone(), context.clone()).with_fallback(fallback)?;
        if config.enforce_allowed_hosts {
            dynamic_site = dynamic_site
                .with_allowed_hosts(AllowedHosts::new(aliases.clone(), config.extra_hosts.clone()));
        }

        let suffixes = Arc::new(PublicSuffixResolver::load(&config.public_suffix_list_cache));
        let cookie_domain = CookieDomain::new(config.cookie_domain_depth, suffixes.clone())?
            .with_local_hosts(config.local_hosts.clone());

        tracing::info!(
            cache = ?config.cache_backend,
            development = config.development,
            enforce_allowed_hosts = config.enforce_allowed_hosts,
            cookie_domain_depth = config.cookie_domain_depth,
            "Multisite configured"
        );

        Ok(Self {
            registry: SiteRegistry::new(aliases.clone()),
            aliases,
            resolver,
            context,
            suffixes,
            dynamic_site: Arc::new(dynamic_site),
            cookie_domain: Arc::new(cookie_domain),
        })
    }

    /// Wrap `router` in host routing and cookie scoping
    ///
    /// Host routing runs first, so redirects and fallback responses skip
    /// the cookie rewrite.
    pub fn apply<S>(&self, router: Router<S>) -> Router<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        router
            .layer(from_fn_with_state(self.cookie_domain.clone(), cookie_domain_middleware))
            .layer(from_fn_with_state(self.dynamic_site.clone(), dynamic_site_middleware))
    }
}
