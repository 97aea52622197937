//! Site and alias persistence
//!
//! `SiteStore` is raw CRUD with no side effects. Validation, canonical alias
//! synchronisation and cache invalidation live in `AliasManager` and
//! `SiteRegistry`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSiteStore;

use async_trait::async_trait;
use multisite_shared::{Alias, AliasFilter, NewAlias, NewSite, Site, SiteFilter, StoreResult};

#[async_trait]
pub trait SiteStore: Send + Sync {
    async fn get_site(&self, id: i64) -> StoreResult<Option<Site>>;

    /// Exact (case-sensitive) lookup by primary domain
    async fn site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>>;

    /// Sites matching `filter`, ordered by id
    async fn list_sites(&self, filter: &SiteFilter) -> StoreResult<Vec<Site>>;

    /// Sites whose domain equals `domain`, ignoring case
    async fn find_sites(&self, domain: &str) -> StoreResult<Vec<Site>>;

    async fn insert_site(&self, site: NewSite) -> StoreResult<Site>;

    async fn update_site(&self, site: &Site) -> StoreResult<Site>;

    /// Delete a site and its aliases; returns whether the site existed
    async fn delete_site(&self, id: i64) -> StoreResult<bool>;

    async fn get_alias(&self, id: i64) -> StoreResult<Option<Alias>>;

    /// Aliases matching `filter`, ordered by id
    async fn list_aliases(&self, filter: &AliasFilter) -> StoreResult<Vec<Alias>>;

    /// Aliases whose domain equals any of `domains`, ignoring case
    async fn find_aliases(&self, domains: &[String]) -> StoreResult<Vec<Alias>>;

    async fn insert_alias(&self, alias: NewAlias) -> StoreResult<Alias>;

    async fn update_alias(&self, alias: &Alias) -> StoreResult<Alias>;

    async fn delete_alias(&self, id: i64) -> StoreResult<bool>;
}
