//! Request middleware
//!
//! - `dynamic_site_middleware` picks the site from the Host header
//! - `cookie_domain_middleware` scopes response cookies to the site's domain
//!
//! Both take their state through `axum::middleware::from_fn_with_state`.

mod cookie_domain;
mod dynamic_site;
mod fallback;

pub use cookie_domain::{cookie_domain_middleware, CookieDomain};
pub use dynamic_site::{
    dynamic_site_middleware, request_netloc, request_scheme, CurrentSite, DynamicSite,
};
pub use fallback::{redirect_fallback, Fallback, FallbackFactory, FallbackHandler, FallbackRegistry};
