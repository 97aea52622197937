//! Cookie domain middleware
//!
//! Gives `Set-Cookie` headers without a `Domain` attribute a domain derived
//! from the request host, so cookies are shared across subdomains of a site.
//! Depth 0 uses the registrable domain (`.example.com`); each extra level of
//! depth keeps one more subdomain label.

use std::net::IpAddr;
use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use cookie::Cookie;

use super::dynamic_site::request_netloc;
use crate::config::DEFAULT_LOCAL_HOSTS;
use crate::error::{MultisiteError, MultisiteResult};
use crate::routing::parse_netloc;
use crate::suffix::PublicSuffixResolver;

/// State for `cookie_domain_middleware`
pub struct CookieDomain {
    depth: usize,
    suffixes: Arc<PublicSuffixResolver>,
    local_hosts: Vec<String>,
}

impl CookieDomain {
    pub fn new(depth: i64, suffixes: Arc<PublicSuffixResolver>) -> MultisiteResult<Self> {
        let depth = usize::try_from(depth).map_err(|_| {
            MultisiteError::Config(format!("cookie domain depth must not be negative, got {depth}"))
        })?;
        Ok(Self {
            depth,
            suffixes,
            local_hosts: DEFAULT_LOCAL_HOSTS.iter().map(|host| host.to_string()).collect(),
        })
    }

    /// Hosts whose cookies are never rewritten
    pub fn with_local_hosts(mut self, hosts: Vec<String>) -> Self {
        self.local_hosts = hosts
            .into_iter()
            .map(|host| host.trim().to_ascii_lowercase())
            .collect();
        self
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Cookie domain for a request netloc
    ///
    /// None for IP addresses, local hosts, unknown suffixes, public suffixes
    /// and hosts with fewer subdomain labels than the depth.
    pub fn cookie_domain(&self, netloc: &str) -> Option<String> {
        let (host, _) = parse_netloc(netloc).ok()?;
        let bare = host.trim_start_matches('[').trim_end_matches(']');
        if bare.parse::<IpAddr>().is_ok() {
            return None;
        }
        if self.local_hosts.iter().any(|local| *local == host) {
            return None;
        }

        let parts = self.suffixes.split(&host)?;
        let labels = parts.subdomain_labels();
        if labels.len() < self.depth {
            return None;
        }
        let kept = &labels[labels.len() - self.depth..];
        if kept.is_empty() {
            Some(format!(".{}", parts.domain))
        } else {
            Some(format!(".{}.{}", kept.join("."), parts.domain))
        }
    }

    /// Add a domain to every cookie that lacks one
    ///
    /// Returns the number of cookies changed. Headers that do not parse as
    /// cookies are kept as they are.
    pub fn rewrite(&self, netloc: &str, headers: &mut HeaderMap) -> usize {
        if !headers.contains_key(header::SET_COOKIE) {
            return 0;
        }
        let Some(domain) = self.cookie_domain(netloc) else {
            return 0;
        };

        let values: Vec<HeaderValue> = headers.get_all(header::SET_COOKIE).iter().cloned().collect();
        headers.remove(header::SET_COOKIE);

        let mut changed = 0;
        for value in values {
            match with_domain(&value, &domain) {
                Some(rewritten) => {
                    headers.append(header::SET_COOKIE, rewritten);
                    changed += 1;
                }
                None => {
                    headers.append(header::SET_COOKIE, value);
                }
            }
        }
        if changed > 0 {
            tracing::trace!(host = %netloc, domain = %domain, cookies = changed, "Set cookie domain");
        }
        changed
    }
}

/// The header with a `Domain` attribute appended, if it had none
fn with_domain(value: &HeaderValue, domain: &str) -> Option<HeaderValue> {
    let raw = value.to_str().ok()?;
    let cookie = Cookie::parse(raw).ok()?;
    if cookie.domain().is_some() {
        return None;
    }
    HeaderValue::from_str(&format!("{raw}; Domain={domain}")).ok()
}

/// Middleware that scopes cookies to the site's domain
pub async fn cookie_domain_middleware(
    State(state): State<Arc<CookieDomain>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let netloc = request_netloc(&request);
    let mut response = next.run(request).await;
    state.rewrite(&netloc, response.headers_mut());
    response
}
