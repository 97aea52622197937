//! In-memory store
//!
//! Enforces the same constraints as the Postgres schema: unique non-blank
//! site domains, case-insensitively unique alias domains, one canonical alias
//! per site, and cascading deletes.

use std::collections::BTreeMap;

use async_trait::async_trait;
use multisite_shared::{
    Alias, AliasFilter, NewAlias, NewSite, Site, SiteFilter, StoreError, StoreResult,
};
use tokio::sync::RwLock;

use super::SiteStore;

#[derive(Default)]
struct Tables {
    sites: BTreeMap<i64, Site>,
    aliases: BTreeMap<i64, Alias>,
    last_site_id: i64,
    last_alias_id: i64,
}

impl Tables {
    fn check_site(&self, id: i64, domain: &str) -> StoreResult<()> {
        if domain.is_empty() {
            return Ok(());
        }
        if self
            .sites
            .values()
            .any(|site| site.id != id && site.domain == domain)
        {
            return Err(StoreError::Conflict(format!(
                "site domain {domain:?} already exists"
            )));
        }
        Ok(())
    }

    fn check_alias(
        &self,
        id: i64,
        site_id: i64,
        domain: &str,
        is_canonical: bool,
    ) -> StoreResult<()> {
        if !self.sites.contains_key(&site_id) {
            return Err(StoreError::NotFound(format!("site {site_id}")));
        }
        if self
            .aliases
            .values()
            .any(|alias| alias.id != id && alias.domain.eq_ignore_ascii_case(domain))
        {
            return Err(StoreError::Conflict(format!(
                "alias domain {domain:?} already exists"
            )));
        }
        if is_canonical
            && self
                .aliases
                .values()
                .any(|alias| alias.id != id && alias.site_id == site_id && alias.is_canonical)
        {
            return Err(StoreError::Conflict(format!(
                "site {site_id} already has a canonical alias"
            )));
        }
        Ok(())
    }
}

/// Store backed by process memory
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SiteStore for MemoryStore {
    async fn get_site(&self, id: i64) -> StoreResult<Option<Site>> {
        Ok(self.tables.read().await.sites.get(&id).cloned())
    }

    async fn site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>> {
        Ok(self
            .tables
            .read()
            .await
            .sites
            .values()
            .find(|site| site.domain == domain)
            .cloned())
    }

    async fn list_sites(&self, filter: &SiteFilter) -> StoreResult<Vec<Site>> {
        Ok(self
            .tables
            .read()
            .await
            .sites
            .values()
            .filter(|site| filter.matches(site))
            .cloned()
            .collect())
    }

    async fn find_sites(&self, domain: &str) -> StoreResult<Vec<Site>> {
        Ok(self
            .tables
            .read()
            .await
            .sites
            .values()
            .filter(|site| site.domain.eq_ignore_ascii_case(domain))
            .cloned()
            .collect())
    }

    async fn insert_site(&self, site: NewSite) -> StoreResult<Site> {
        let mut tables = self.tables.write().await;
        tables.check_site(0, &site.domain)?;
        tables.last_site_id += 1;
        let site = Site {
            id: tables.last_site_id,
            domain: site.domain,
            name: site.name,
        };
        tables.sites.insert(site.id, site.clone());
        Ok(site)
    }

    async fn update_site(&self, site: &Site) -> StoreResult<Site> {
        let mut tables = self.tables.write().await;
        if !tables.sites.contains_key(&site.id) {
            return Err(StoreError::NotFound(format!("site {}", site.id)));
        }
        tables.check_site(site.id, &site.domain)?;
        tables.sites.insert(site.id, site.clone());
        Ok(site.clone())
    }

    async fn delete_site(&self, id: i64) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let existed = tables.sites.remove(&id).is_some();
        tables.aliases.retain(|_, alias| alias.site_id != id);
        Ok(existed)
    }

    async fn get_alias(&self, id: i64) -> StoreResult<Option<Alias>> {
        Ok(self.tables.read().await.aliases.get(&id).cloned())
    }

    async fn list_aliases(&self, filter: &AliasFilter) -> StoreResult<Vec<Alias>> {
        Ok(self
            .tables
            .read()
            .await
            .aliases
            .values()
            .filter(|alias| filter.matches(alias))
            .cloned()
            .collect())
    }

    async fn find_aliases(&self, domains: &[String]) -> StoreResult<Vec<Alias>> {
        Ok(self
            .tables
            .read()
            .await
            .aliases
            .values()
            .filter(|alias| {
                domains
                    .iter()
                    .any(|domain| alias.domain.eq_ignore_ascii_case(domain))
            })
            .cloned()
            .collect())
    }

    async fn insert_alias(&self, alias: NewAlias) -> StoreResult<Alias> {
        let mut tables = self.tables.write().await;
        tables.check_alias(0, alias.site_id, &alias.domain, alias.is_canonical)?;
        tables.last_alias_id += 1;
        let alias = Alias {
            id: tables.last_alias_id,
            site_id: alias.site_id,
            domain: alias.domain,
            is_canonical: alias.is_canonical,
            redirect_to_canonical: alias.redirect_to_canonical,
        };
        tables.aliases.insert(alias.id, alias.clone());
        Ok(alias)
    }

    async fn update_alias(&self, alias: &Alias) -> StoreResult<Alias> {
        let mut tables = self.tables.write().await;
        if !tables.aliases.contains_key(&alias.id) {
            return Err(StoreError::NotFound(format!("alias {}", alias.id)));
        }
        tables.check_alias(alias.id, alias.site_id, &alias.domain, alias.is_canonical)?;
        tables.aliases.insert(alias.id, alias.clone());
        Ok(alias.clone())
    }

    async fn delete_alias(&self, id: i64) -> StoreResult<bool> {
        Ok(self.tables.write().await.aliases.remove(&id).is_some())
    }
}
