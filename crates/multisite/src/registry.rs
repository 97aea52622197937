//! Site writes with canonical alias bookkeeping
//!
//! `SiteRegistry` is the write path for sites. Each write keeps the site's
//! canonical alias in step with its domain and clears the host cache.

use std::sync::Arc;

use multisite_shared::{NewSite, Site};

use crate::error::{MultisiteError, MultisiteResult};
use crate::routing::AliasManager;
use crate::store::SiteStore;

#[derive(Clone)]
pub struct SiteRegistry {
    store: Arc<dyn SiteStore>,
    aliases: AliasManager,
}

impl SiteRegistry {
    pub fn new(aliases: AliasManager) -> Self {
        Self {
            store: aliases.store().clone(),
            aliases,
        }
    }

    pub fn aliases(&self) -> &AliasManager {
        &self.aliases
    }

    pub async fn get_site(&self, id: i64) -> MultisiteResult<Option<Site>> {
        Ok(self.store.get_site(id).await?)
    }

    /// Insert a site and its canonical alias
    ///
    /// The site is removed again if the alias cannot be created.
    pub async fn create_site(&self, site: NewSite) -> MultisiteResult<Site> {
        let site = self.store.insert_site(site).await?;
        if !site.has_domain() {
            tracing::info!(site_id = site.id, "Created site without domain");
            return Ok(site);
        }

        if let Err(e) = self.aliases.sync(&site, true).await {
            tracing::warn!(site_id = site.id, domain = %site.domain, error = %e, "Canonical alias rejected, removing site");
            if let Err(cleanup) = self.store.delete_site(site.id).await {
                tracing::error!(site_id = site.id, error = %cleanup, "Failed to remove site after alias error");
            }
            return Err(e);
        }

        tracing::info!(site_id = site.id, domain = %site.domain, "Created site");
        Ok(site)
    }

    /// Save changes to a site
    ///
    /// The canonical alias is synced first so an invalid domain is rejected
    /// before the site changes. If the site write then fails the alias is
    /// synced back to the stored site.
    pub async fn update_site(&self, site: &Site) -> MultisiteResult<Site> {
        let original = self
            .store
            .get_site(site.id)
            .await?
            .ok_or_else(|| MultisiteError::NotFound(format!("site {} does not exist", site.id)))?;

        self.aliases.sync(site, false).await?;

        match self.store.update_site(site).await {
            Ok(updated) => {
                self.aliases.clear_cache().await;
                if updated.domain != original.domain {
                    tracing::info!(
                        site_id = updated.id,
                        from = %original.domain,
                        to = %updated.domain,
                        "Changed site domain"
                    );
                }
                Ok(updated)
            }
            Err(e) => {
                if let Err(resync) = self.aliases.sync(&original, false).await {
                    tracing::error!(site_id = site.id, error = %resync, "Failed to restore canonical alias");
                }
                Err(e.into())
            }
        }
    }

    /// Delete a site and its aliases
    pub async fn delete_site(&self, id: i64) -> MultisiteResult<bool> {
        let deleted = self.store.delete_site(id).await?;
        if deleted {
            tracing::info!(site_id = id, "Deleted site");
            self.aliases.clear_cache().await;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{DomainCache, HostCache};
    use crate::store::MemoryStore;
    use multisite_shared::{AliasFilter, NewAlias};

    fn registry() -> (SiteRegistry, Arc<MemoryStore>, Arc<DomainCache>) {
        let store = Arc::new(MemoryStore::new());
        let cache = Arc::new(DomainCache::new());
        let registry = SiteRegistry::new(AliasManager::new(store.clone(), cache.clone()));
        (registry, store, cache)
    }

    async fn canonical(registry: &SiteRegistry, site_id: i64) -> Vec<String> {
        registry
            .aliases()
            .canonical(&AliasFilter::for_site(site_id))
            .await
            .unwrap()
            .into_iter()
            .map(|alias| alias.domain)
            .collect()
    }

    #[tokio::test]
    async fn test_create_site() {
        let (registry, _, _) = registry();
        let site = registry.create_site(NewSite::new("example.com")).await.unwrap();
        assert_eq!(canonical(&registry, site.id).await, vec!["example.com"]);

        let blank = registry.create_site(NewSite::blank()).await.unwrap();
        assert!(canonical(&registry, blank.id).await.is_empty());
        assert_eq!(registry.get_site(blank.id).await.unwrap(), Some(blank));
    }

    #[tokio::test]
    async fn test_create_site_rolls_back() {
        let (registry, store, _) = registry();
        let site = registry.create_site(NewSite::new("example.com")).await.unwrap();
        registry
            .aliases()
            .create(NewAlias::new(site.id, "example.org"))
            .await
            .unwrap();

        let result = registry.create_site(NewSite::new("example.org")).await;
        assert!(matches!(result, Err(MultisiteError::Validation(_))));
        assert_eq!(store.site_by_domain("example.org").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_site_domain() {
        let (registry, _, cache) = registry();
        let mut site = registry.create_site(NewSite::new("example.com")).await.unwrap();
        cache.set("stale", None).await.unwrap();

        site.domain = "example.org".to_string();
        let updated = registry.update_site(&site).await.unwrap();
        assert_eq!(updated.domain, "example.org");
        assert_eq!(canonical(&registry, site.id).await, vec!["example.org"]);
        assert_eq!(cache.stats().total_entries, 0);

        site.domain = String::new();
        registry.update_site(&site).await.unwrap();
        assert!(canonical(&registry, site.id).await.is_empty());

        site.domain = "example.net".to_string();
        registry.update_site(&site).await.unwrap();
        assert_eq!(canonical(&registry, site.id).await, vec!["example.net"]);
    }

    #[tokio::test]
    async fn test_update_site_rejected() {
        let (registry, store, _) = registry();
        let first = registry.create_site(NewSite::new("example.com")).await.unwrap();
        let mut second = registry.create_site(NewSite::new("example.org")).await.unwrap();

        second.domain = "EXAMPLE.com".to_string();
        let result = registry.update_site(&second).await;
        assert!(matches!(result, Err(MultisiteError::Validation(_))));
        assert_eq!(
            store.get_site(second.id).await.unwrap().map(|site| site.domain),
            Some("example.org".to_string())
        );
        assert_eq!(canonical(&registry, second.id).await, vec!["example.org"]);
        assert_eq!(canonical(&registry, first.id).await, vec!["example.com"]);
    }

    #[tokio::test]
    async fn test_clear_domain_with_extra_aliases() {
        let (registry, _, _) = registry();
        let mut site = registry.create_site(NewSite::new("example.com")).await.unwrap();
        registry
            .aliases()
            .create(NewAlias::new(site.id, "www.example.com"))
            .await
            .unwrap();

        site.domain = String::new();
        let result = registry.update_site(&site).await;
        assert!(matches!(result, Err(MultisiteError::Ambiguous(_))));
        assert_eq!(canonical(&registry, site.id).await, vec!["example.com"]);
    }

    #[tokio::test]
    async fn test_update_missing_site() {
        let (registry, _, _) = registry();
        let site = Site {
            id: 42,
            domain: "example.com".to_string(),
            name: "example.com".to_string(),
        };
        assert!(matches!(
            registry.update_site(&site).await,
            Err(MultisiteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_site() {
        let (registry, _, cache) = registry();
        let site = registry.create_site(NewSite::new("example.com")).await.unwrap();
        registry
            .aliases()
            .create(NewAlias::new(site.id, "www.example.com"))
            .await
            .unwrap();
        cache.set("stale", None).await.unwrap();

        assert!(registry.delete_site(site.id).await.unwrap());
        assert!(registry
            .aliases()
            .list(&AliasFilter::all())
            .await
            .unwrap()
            .is_empty());
        assert_eq!(cache.stats().total_entries, 0);
        assert!(!registry.delete_site(site.id).await.unwrap());
    }
}
