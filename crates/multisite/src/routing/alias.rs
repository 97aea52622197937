//! Alias resolution and synchronisation
//!
//! Aliases map domain patterns to sites. A pattern is an exact host with an
//! optional port, or a wildcard whose leftmost label is `*`:
//! - `www.example.com`, `www.example.com:8000`
//! - `*.example.com`, `*.example.com:8000`
//! - `*`, `*:8000`
//!
//! Each site with a domain owns exactly one canonical alias mirroring that
//! domain. The `sync*` operations repair canonical aliases for sites written
//! without going through `SiteRegistry`.

use std::collections::HashMap;
use std::sync::Arc;

use multisite_shared::{Alias, AliasFilter, NewAlias, Site, SiteFilter, StoreError};

use super::cache::HostCache;
use crate::error::{MultisiteError, MultisiteResult};
use crate::store::SiteStore;

/// Maximum length of an alias domain, matching the column width
pub const MAX_DOMAIN_LENGTH: usize = 100;

/// Candidate patterns for a host, most specific first
///
/// `www.example.com` with port 8000 expands to `www.example.com:8000`,
/// `www.example.com`, `*.example.com:8000`, `*.example.com`, `*.com:8000`,
/// `*.com`, `*:8000`, `*`.
pub fn expand_netloc(host: &str, port: Option<u16>) -> MultisiteResult<Vec<String>> {
    if host.is_empty() {
        return Err(MultisiteError::InvalidHost(host.to_string()));
    }

    let mut candidates = Vec::new();
    let mut push = |pattern: String| {
        if let Some(port) = port {
            candidates.push(format!("{pattern}:{port}"));
        }
        candidates.push(pattern);
    };

    push(host.to_string());
    let labels: Vec<&str> = host.split('.').collect();
    for start in 1..labels.len() {
        push(format!("*.{}", labels[start..].join(".")));
    }
    push("*".to_string());

    Ok(candidates)
}

/// Check the shape of an alias pattern
pub fn validate_pattern(domain: &str) -> MultisiteResult<()> {
    if domain.is_empty() {
        return Err(MultisiteError::Validation("alias domain is required".to_string()));
    }
    if domain.chars().count() > MAX_DOMAIN_LENGTH {
        return Err(MultisiteError::Validation(format!(
            "alias domain is longer than {MAX_DOMAIN_LENGTH} characters"
        )));
    }
    if domain.chars().any(|c| c.is_whitespace() || c == '/') {
        return Err(MultisiteError::Validation(format!(
            "{domain:?} is not a valid host pattern"
        )));
    }

    let (host, port) = match domain.rsplit_once(':') {
        Some((host, port)) => (host, Some(port)),
        None => (domain, None),
    };
    if let Some(port) = port {
        if port.parse::<u16>().is_err() {
            return Err(MultisiteError::Validation(format!(
                "{domain:?} has an invalid port"
            )));
        }
    }
    if host.is_empty() {
        return Err(MultisiteError::Validation(format!(
            "{domain:?} has no host"
        )));
    }

    let rest = match host.strip_prefix('*') {
        Some("") => return Ok(()),
        Some(rest) => match rest.strip_prefix('.') {
            Some(rest) => rest,
            None => {
                return Err(MultisiteError::Validation(format!(
                    "{domain:?}: a wildcard must be a whole label"
                )))
            }
        },
        None => host,
    };
    if rest.contains('*') {
        return Err(MultisiteError::Validation(format!(
            "{domain:?}: only the leftmost label may be a wildcard"
        )));
    }
    if rest.split('.').any(str::is_empty) {
        return Err(MultisiteError::Validation(format!(
            "{domain:?} has an empty label"
        )));
    }
    Ok(())
}

/// Alias lookup, validated writes and canonical alias synchronisation
#[derive(Clone)]
pub struct AliasManager {
    store: Arc<dyn SiteStore>,
    cache: Arc<dyn HostCache>,
}

impl AliasManager {
    pub fn new(store: Arc<dyn SiteStore>, cache: Arc<dyn HostCache>) -> Self {
        Self { store, cache }
    }

    pub fn store(&self) -> &Arc<dyn SiteStore> {
        &self.store
    }

    pub fn cache(&self) -> &Arc<dyn HostCache> {
        &self.cache
    }

    /// Best-matching alias for a host
    ///
    /// All candidates are fetched in one query; the most specific one present
    /// wins. An empty host matches nothing.
    pub async fn resolve(&self, host: &str, port: Option<u16>) -> MultisiteResult<Option<Alias>> {
        if host.is_empty() {
            return Ok(None);
        }
        let candidates = expand_netloc(host, port)?;
        let found = self.store.find_aliases(&candidates).await?;

        Ok(candidates.iter().find_map(|candidate| {
            found
                .iter()
                .find(|alias| alias.domain.eq_ignore_ascii_case(candidate))
                .cloned()
        }))
    }

    // =========================================================================
    // Views
    // =========================================================================

    pub async fn get(&self, id: i64) -> MultisiteResult<Option<Alias>> {
        Ok(self.store.get_alias(id).await?)
    }

    pub async fn list(&self, filter: &AliasFilter) -> MultisiteResult<Vec<Alias>> {
        Ok(self.store.list_aliases(filter).await?)
    }

    /// Canonical aliases matching `filter`
    pub async fn canonical(&self, filter: &AliasFilter) -> MultisiteResult<Vec<Alias>> {
        let filter = AliasFilter {
            is_canonical: Some(true),
            ..*filter
        };
        self.list(&filter).await
    }

    /// Non-canonical aliases matching `filter`
    pub async fn non_canonical(&self, filter: &AliasFilter) -> MultisiteResult<Vec<Alias>> {
        let filter = AliasFilter {
            is_canonical: Some(false),
            ..*filter
        };
        self.list(&filter).await
    }

    // =========================================================================
    // Validated writes
    // =========================================================================

    pub async fn create(&self, alias: NewAlias) -> MultisiteResult<Alias> {
        let site = self.owning_site(alias.site_id).await?;
        self.validate(None, &site, &alias.domain, alias.is_canonical)
            .await?;
        self.insert(alias).await
    }

    pub async fn save(&self, alias: &Alias) -> MultisiteResult<Alias> {
        let site = self.owning_site(alias.site_id).await?;
        self.validate(Some(alias.id), &site, &alias.domain, alias.is_canonical)
            .await?;
        self.update(alias).await
    }

    pub async fn delete(&self, id: i64) -> MultisiteResult<bool> {
        let deleted = self.store.delete_alias(id).await?;
        if deleted {
            self.clear_cache().await;
        }
        Ok(deleted)
    }

    /// Check an alias against its site and every other alias
    ///
    /// `site` is taken as given, so a site whose domain is being changed can
    /// be validated before it is written.
    pub async fn validate(
        &self,
        id: Option<i64>,
        site: &Site,
        domain: &str,
        is_canonical: bool,
    ) -> MultisiteResult<()> {
        validate_pattern(domain)?;

        let clashing = self.store.find_aliases(&[domain.to_string()]).await?;
        if clashing.iter().any(|alias| Some(alias.id) != id) {
            return Err(MultisiteError::Validation(format!(
                "alias with domain {domain:?} already exists"
            )));
        }

        let sites = self.store.find_sites(domain).await?;
        if sites.iter().any(|other| other.id != site.id) {
            return Err(MultisiteError::Validation(format!(
                "{domain:?} is the domain of another site"
            )));
        }

        if is_canonical {
            if domain != site.domain {
                return Err(MultisiteError::Validation(format!(
                    "canonical alias {domain:?} does not match site domain {:?}",
                    site.domain
                )));
            }
            let existing = self.canonical(&AliasFilter::for_site(site.id)).await?;
            if existing.iter().any(|alias| Some(alias.id) != id) {
                return Err(MultisiteError::Validation(format!(
                    "site {} already has a canonical alias",
                    site.id
                )));
            }
        } else if domain.eq_ignore_ascii_case(&site.domain) {
            return Err(MultisiteError::Validation(format!(
                "{domain:?} is the site's own domain and must be its canonical alias"
            )));
        }
        Ok(())
    }

    // =========================================================================
    // Synchronisation
    // =========================================================================

    /// Bring the canonical alias of `site` in line with its domain
    ///
    /// A blank domain removes the canonical alias. With `force_insert` a new
    /// canonical alias is always inserted, which fails if one already exists.
    pub async fn sync(&self, site: &Site, force_insert: bool) -> MultisiteResult<Option<Alias>> {
        if !site.has_domain() {
            self.sync_blank_domain(site).await?;
            return Ok(None);
        }
        if force_insert {
            return self.insert_canonical(site).await.map(Some);
        }

        let existing = self.canonical(&AliasFilter::for_site(site.id)).await?;
        match existing.into_iter().next() {
            Some(alias) if alias.domain == site.domain => Ok(Some(alias)),
            Some(alias) => self.update_canonical(site, alias).await.map(Some),
            None => self.insert_canonical(site).await.map(Some),
        }
    }

    /// Remove the canonical alias of a site whose domain was cleared
    ///
    /// Fails with `Ambiguous` when the site has any alias other than a single
    /// canonical one; that state needs a manual fix.
    pub async fn sync_blank_domain(&self, site: &Site) -> MultisiteResult<()> {
        if site.has_domain() {
            return Err(MultisiteError::Validation(format!(
                "site {} still has domain {:?}",
                site.id, site.domain
            )));
        }

        let aliases = self.list(&AliasFilter::for_site(site.id)).await?;
        match aliases.as_slice() {
            [] => Ok(()),
            [alias] if alias.is_canonical => {
                self.store.delete_alias(alias.id).await?;
                tracing::info!(site_id = site.id, alias = %alias.domain, "Removed canonical alias");
                self.clear_cache().await;
                Ok(())
            }
            _ => Err(MultisiteError::Ambiguous(format!(
                "site {} has {} aliases; remove the extra aliases before clearing its domain",
                site.id,
                aliases.len()
            ))),
        }
    }

    /// Rewrite canonical aliases that no longer match their site's domain
    ///
    /// Sites without a domain or without a canonical alias are skipped.
    pub async fn sync_many(&self, filter: &SiteFilter) -> MultisiteResult<usize> {
        let sites = self.store.list_sites(filter).await?;
        let mut canonical: HashMap<i64, Alias> = self
            .canonical(&AliasFilter::all())
            .await?
            .into_iter()
            .map(|alias| (alias.site_id, alias))
            .collect();

        let mut updated = 0;
        for site in sites.iter().filter(|site| site.has_domain()) {
            if let Some(alias) = canonical.remove(&site.id) {
                if alias.domain != site.domain {
                    self.update_canonical(site, alias).await?;
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    /// Insert canonical aliases for sites with a domain and none yet
    pub async fn sync_missing(&self) -> MultisiteResult<usize> {
        let sites = self.store.list_sites(&SiteFilter::all()).await?;
        let canonical: Vec<i64> = self
            .canonical(&AliasFilter::all())
            .await?
            .into_iter()
            .map(|alias| alias.site_id)
            .collect();

        let mut inserted = 0;
        for site in sites
            .iter()
            .filter(|site| site.has_domain() && !canonical.contains(&site.id))
        {
            self.sync(site, false).await?;
            inserted += 1;
        }
        Ok(inserted)
    }

    pub async fn sync_all(&self) -> MultisiteResult<usize> {
        let updated = self.sync_many(&SiteFilter::all()).await?;
        let inserted = self.sync_missing().await?;
        Ok(updated + inserted)
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    async fn owning_site(&self, site_id: i64) -> MultisiteResult<Site> {
        self.store
            .get_site(site_id)
            .await?
            .ok_or_else(|| MultisiteError::Validation(format!("site {site_id} does not exist")))
    }

    async fn insert_canonical(&self, site: &Site) -> MultisiteResult<Alias> {
        self.validate(None, site, &site.domain, true).await?;
        let alias = self.insert(NewAlias::canonical(site)).await?;
        tracing::info!(site_id = site.id, alias = %alias.domain, "Inserted canonical alias");
        Ok(alias)
    }

    async fn update_canonical(&self, site: &Site, mut alias: Alias) -> MultisiteResult<Alias> {
        let previous = std::mem::replace(&mut alias.domain, site.domain.clone());
        self.validate(Some(alias.id), site, &alias.domain, true)
            .await?;
        let alias = self.update(&alias).await?;
        tracing::info!(
            site_id = site.id,
            from = %previous,
            to = %alias.domain,
            "Updated canonical alias"
        );
        Ok(alias)
    }

    async fn insert(&self, alias: NewAlias) -> MultisiteResult<Alias> {
        let alias = self.store.insert_alias(alias).await.map_err(conflict_to_validation)?;
        self.clear_cache().await;
        Ok(alias)
    }

    async fn update(&self, alias: &Alias) -> MultisiteResult<Alias> {
        let alias = self.store.update_alias(alias).await.map_err(conflict_to_validation)?;
        self.clear_cache().await;
        Ok(alias)
    }

    /// Drop every cached host lookup
    ///
    /// A failing cache backend must not fail the write that triggered this.
    pub async fn clear_cache(&self) {
        if let Err(e) = self.cache.clear().await {
            tracing::warn!(error = %e, "Failed to clear host cache");
        }
    }
}

fn conflict_to_validation(err: StoreError) -> MultisiteError {
    match err {
        StoreError::Conflict(msg) => MultisiteError::Validation(msg),
        other => MultisiteError::Store(other),
    }
}
