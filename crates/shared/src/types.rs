//! Records shared across the multisite crates

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// =============================================================================
// Sites
// =============================================================================

/// A site (tenant) served by the application
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Site {
    pub id: i64,
    /// Primary domain; blank when the site has no public host yet
    pub domain: String,
    pub name: String,
}

impl Site {
    /// Whether the site has a (non-blank) primary domain
    pub fn has_domain(&self) -> bool {
        !self.domain.trim().is_empty()
    }
}

/// Fields for inserting a new site
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewSite {
    pub domain: String,
    pub name: String,
}

impl NewSite {
    pub fn new(domain: impl Into<String>) -> Self {
        let domain = domain.into();
        Self {
            name: domain.clone(),
            domain,
        }
    }

    /// A site with no domain
    pub fn blank() -> Self {
        Self::default()
    }
}

/// Filter for selecting sites; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SiteFilter {
    pub ids: Option<Vec<i64>>,
    pub domain: Option<String>,
}

impl SiteFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: i64) -> Self {
        Self {
            ids: Some(vec![id]),
            domain: None,
        }
    }

    pub fn by_domain(domain: impl Into<String>) -> Self {
        Self {
            ids: None,
            domain: Some(domain.into()),
        }
    }

    pub fn matches(&self, site: &Site) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&site.id) {
                return false;
            }
        }
        match &self.domain {
            Some(domain) => site.domain == *domain,
            None => true,
        }
    }
}

// =============================================================================
// Aliases
// =============================================================================

/// A domain pattern routed to a site
///
/// `domain` is either an exact host (optionally with `:port`) or a wildcard
/// whose leftmost label is `*` (`*`, `*.example.com`, `*.example.com:8000`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Alias {
    pub id: i64,
    pub site_id: i64,
    pub domain: String,
    /// The canonical alias mirrors its site's domain; at most one per site
    pub is_canonical: bool,
    /// Permanently redirect requests to the canonical domain
    pub redirect_to_canonical: bool,
}

impl Alias {
    /// Whether a request matching this alias is redirected to the canonical domain
    pub fn redirects(&self) -> bool {
        !self.is_canonical && self.redirect_to_canonical
    }
}

/// Fields for inserting a new alias
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAlias {
    pub site_id: i64,
    pub domain: String,
    pub is_canonical: bool,
    pub redirect_to_canonical: bool,
}

impl NewAlias {
    /// A non-canonical alias that redirects to the canonical domain
    pub fn new(site_id: i64, domain: impl Into<String>) -> Self {
        Self {
            site_id,
            domain: domain.into(),
            is_canonical: false,
            redirect_to_canonical: true,
        }
    }

    /// The canonical alias for `site`
    pub fn canonical(site: &Site) -> Self {
        Self {
            site_id: site.id,
            domain: site.domain.clone(),
            is_canonical: true,
            redirect_to_canonical: true,
        }
    }

    pub fn with_redirect(mut self, redirect_to_canonical: bool) -> Self {
        self.redirect_to_canonical = redirect_to_canonical;
        self
    }
}

/// Filter for selecting aliases; unset fields match everything
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AliasFilter {
    pub site_id: Option<i64>,
    pub is_canonical: Option<bool>,
}

impl AliasFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_site(site_id: i64) -> Self {
        Self {
            site_id: Some(site_id),
            is_canonical: None,
        }
    }

    pub fn matches(&self, alias: &Alias) -> bool {
        self.site_id.map_or(true, |id| alias.site_id == id)
            && self.is_canonical.map_or(true, |c| alias.is_canonical == c)
    }
}
