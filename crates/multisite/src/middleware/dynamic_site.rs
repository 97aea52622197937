//! Host-routing middleware
//!
//! Resolves the request's Host header to an alias and either:
//! - serves the request with the site context set to the alias's site
//! - permanently redirects to the site's canonical domain
//! - hands the request to the fallback handler
//! - responds 404

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::{IntoResponse, Redirect, Response},
};
use multisite_shared::Alias;

use super::fallback::{Fallback, FallbackHandler};
use crate::context::{request_scope, SiteContext};
use crate::error::{MultisiteError, MultisiteResult};
use crate::hosts::AllowedHosts;
use crate::routing::{format_netloc, parse_netloc, HostResolver};

/// Request extension describing the site serving the request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrentSite {
    pub site_id: i64,
    /// The alias the Host header matched
    pub alias: Alias,
}

/// State for `dynamic_site_middleware`
pub struct DynamicSite {
    resolver: HostResolver,
    context: SiteContext,
    fallback: Option<FallbackHandler>,
    /// Present when disallowed hosts are rejected
    allowed_hosts: Option<AllowedHosts>,
}

impl DynamicSite {
    pub fn new(resolver: HostResolver, context: impl Into<SiteContext>) -> Self {
        Self {
            resolver,
            context: context.into(),
            fallback: None,
            allowed_hosts: None,
        }
    }

    /// Build and install the fallback for unknown hosts
    pub fn with_fallback(mut self, fallback: Fallback) -> MultisiteResult<Self> {
        self.fallback = fallback.build()?;
        Ok(self)
    }

    /// Reject hosts that match neither an alias nor an extra pattern
    pub fn with_allowed_hosts(mut self, hosts: AllowedHosts) -> Self {
        self.allowed_hosts = Some(hosts);
        self
    }

    pub fn context(&self) -> &SiteContext {
        &self.context
    }

    pub fn resolver(&self) -> &HostResolver {
        &self.resolver
    }

    async fn handle(&self, mut request: Request<Body>, next: Next) -> Response {
        let netloc = request_netloc(&request);

        let alias = match self.resolver.resolve(&netloc).await {
            Ok(alias) => alias,
            Err(e @ MultisiteError::InvalidHost(_)) => {
                // Empty or malformed hosts never reach the fallback
                tracing::debug!(host = %netloc, "Rejected malformed host");
                self.context.reset();
                return e.into_response();
            }
            Err(e) => return e.into_response(),
        };

        if alias.is_none() {
            if let Some(hosts) = &self.allowed_hosts {
                let host = parse_netloc(&netloc).map(|(host, _)| host).unwrap_or_default();
                if !hosts.is_extra(&host) {
                    tracing::warn!(host = %netloc, "Rejected disallowed host");
                    return MultisiteError::DisallowedHost(netloc).into_response();
                }
            }
        }

        let Some(alias) = alias else {
            self.context.reset();
            return match &self.fallback {
                Some(fallback) => {
                    tracing::debug!(host = %netloc, "No alias matches host, using fallback");
                    fallback(request).await
                }
                None => {
                    tracing::debug!(host = %netloc, "No alias matches host");
                    MultisiteError::NotFound(format!("no site matches host {netloc:?}"))
                        .into_response()
                }
            };
        };

        if alias.redirects() {
            // Owned copies; the body is not Sync and must not be borrowed across awaits
            let scheme = request_scheme(&request).to_string();
            let path = request
                .uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| "/".to_string());
            return self.redirect_to_canonical(&netloc, &alias, &scheme, &path).await;
        }

        tracing::debug!(host = %netloc, site_id = alias.site_id, "Serving site");
        self.context.set(alias.site_id);
        request.extensions_mut().insert(CurrentSite {
            site_id: alias.site_id,
            alias,
        });
        next.run(request).await
    }

    async fn redirect_to_canonical(
        &self,
        netloc: &str,
        alias: &Alias,
        scheme: &str,
        path: &str,
    ) -> Response {
        let site = match self.resolver.aliases().store().get_site(alias.site_id).await {
            Ok(Some(site)) if site.has_domain() => site,
            Ok(_) => {
                // Cached alias outlived its site
                self.resolver.invalidate_host(netloc).await;
                return MultisiteError::NotFound(format!("site {} no longer exists", alias.site_id))
                    .into_response();
            }
            Err(e) => return MultisiteError::from(e).into_response(),
        };

        let location = format!("{scheme}://{}{path}", site.domain);
        tracing::debug!(host = %netloc, site_id = site.id, location = %location, "Redirecting to canonical domain");
        Redirect::permanent(&location).into_response()
    }
}

/// Middleware that selects the site for each request from its Host header
///
/// Every request runs in its own site-context scope, so overrides never leak
/// between concurrent requests.
pub async fn dynamic_site_middleware(
    State(state): State<Arc<DynamicSite>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    request_scope(state.handle(request, next)).await
}

/// Netloc from the Host header, falling back to the URI authority
pub fn request_netloc(request: &Request<Body>) -> String {
    if let Some(host) = request
        .headers()
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
    {
        return host.trim().to_string();
    }
    match request.uri().host() {
        Some(host) => format_netloc(host, request.uri().port_u16()),
        None => String::new(),
    }
}

/// Scheme of the original request
pub fn request_scheme(request: &Request<Body>) -> &str {
    if let Some(scheme) = request.uri().scheme_str() {
        return scheme;
    }
    request
        .headers()
        .get("x-forwarded-proto")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|scheme| scheme.eq_ignore_ascii_case("https") || scheme.eq_ignore_ascii_case("http"))
        .unwrap_or("http")
}
