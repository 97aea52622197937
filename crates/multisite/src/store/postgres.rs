//! Postgres store
//!
//! Tables are created by `migrations/0001_sites_and_aliases.sql`.

use async_trait::async_trait;
use multisite_shared::{
    Alias, AliasFilter, NewAlias, NewSite, Site, SiteFilter, StoreError, StoreResult,
};
use sqlx::PgPool;

use super::SiteStore;

const SITE_COLUMNS: &str = "id, domain, name";
const ALIAS_COLUMNS: &str = "id, site_id, domain, is_canonical, redirect_to_canonical";

#[derive(Clone)]
pub struct PgSiteStore {
    pool: PgPool,
}

impl PgSiteStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl SiteStore for PgSiteStore {
    async fn get_site(&self, id: i64) -> StoreResult<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(site)
    }

    async fn site_by_domain(&self, domain: &str) -> StoreResult<Option<Site>> {
        let site = sqlx::query_as::<_, Site>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE domain = $1"
        ))
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;
        Ok(site)
    }

    async fn list_sites(&self, filter: &SiteFilter) -> StoreResult<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>(&format!(
            r#"
            SELECT {SITE_COLUMNS}
            FROM sites
            WHERE ($1::bigint[] IS NULL OR id = ANY($1))
              AND ($2::text IS NULL OR domain = $2)
            ORDER BY id
            "#
        ))
        .bind(filter.ids.as_deref())
        .bind(filter.domain.as_deref())
        .fetch_all(&self.pool)
        .await?;
        Ok(sites)
    }

    async fn find_sites(&self, domain: &str) -> StoreResult<Vec<Site>> {
        let sites = sqlx::query_as::<_, Site>(&format!(
            "SELECT {SITE_COLUMNS} FROM sites WHERE lower(domain) = lower($1) ORDER BY id"
        ))
        .bind(domain)
        .fetch_all(&self.pool)
        .await?;
        Ok(sites)
    }

    async fn insert_site(&self, site: NewSite) -> StoreResult<Site> {
        let site = sqlx::query_as::<_, Site>(&format!(
            "INSERT INTO sites (domain, name) VALUES ($1, $2) RETURNING {SITE_COLUMNS}"
        ))
        .bind(&site.domain)
        .bind(&site.name)
        .fetch_one(&self.pool)
        .await?;
        Ok(site)
    }

    async fn update_site(&self, site: &Site) -> StoreResult<Site> {
        let updated = sqlx::query_as::<_, Site>(&format!(
            "UPDATE sites SET domain = $2, name = $3 WHERE id = $1 RETURNING {SITE_COLUMNS}"
        ))
        .bind(site.id)
        .bind(&site.domain)
        .bind(&site.name)
        .fetch_optional(&self.pool)
        .await?;
        updated.ok_or_else(|| StoreError::NotFound(format!("site {}", site.id)))
    }

    async fn delete_site(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM sites WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_alias(&self, id: i64) -> StoreResult<Option<Alias>> {
        let alias = sqlx::query_as::<_, Alias>(&format!(
            "SELECT {ALIAS_COLUMNS} FROM aliases WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(alias)
    }

    async fn list_aliases(&self, filter: &AliasFilter) -> StoreResult<Vec<Alias>> {
        let aliases = sqlx::query_as::<_, Alias>(&format!(
            r#"
            SELECT {ALIAS_COLUMNS}
            FROM aliases
            WHERE ($1::bigint IS NULL OR site_id = $1)
              AND ($2::boolean IS NULL OR is_canonical = $2)
            ORDER BY id
            "#
        ))
        .bind(filter.site_id)
        .bind(filter.is_canonical)
        .fetch_all(&self.pool)
        .await?;
        Ok(aliases)
    }

    async fn find_aliases(&self, domains: &[String]) -> StoreResult<Vec<Alias>> {
        let lowered: Vec<String> = domains.iter().map(|d| d.to_lowercase()).collect();
        let aliases = sqlx::query_as::<_, Alias>(&format!(
            "SELECT {ALIAS_COLUMNS} FROM aliases WHERE lower(domain) = ANY($1) ORDER BY id"
        ))
        .bind(&lowered)
        .fetch_all(&self.pool)
        .await?;
        Ok(aliases)
    }

    async fn insert_alias(&self, alias: NewAlias) -> StoreResult<Alias> {
        let inserted = sqlx::query_as::<_, Alias>(&format!(
            r#"
            INSERT INTO aliases (site_id, domain, is_canonical, redirect_to_canonical)
            VALUES ($1, $2, $3, $4)
            RETURNING {ALIAS_COLUMNS}
            "#
        ))
        .bind(alias.site_id)
        .bind(&alias.domain)
        .bind(alias.is_canonical)
        .bind(alias.redirect_to_canonical)
        .fetch_one(&self.pool)
        .await?;
        Ok(inserted)
    }

    async fn update_alias(&self, alias: &Alias) -> StoreResult<Alias> {
        let updated = sqlx::query_as::<_, Alias>(&format!(
            r#"
            UPDATE aliases
            SET site_id = $2, domain = $3, is_canonical = $4, redirect_to_canonical = $5
            WHERE id = $1
            RETURNING {ALIAS_COLUMNS}
            "#
        ))
        .bind(alias.id)
        .bind(alias.site_id)
        .bind(&alias.domain)
        .bind(alias.is_canonical)
        .bind(alias.redirect_to_canonical)
        .fetch_optional(&self.pool)
        .await?;
        updated.ok_or_else(|| StoreError::NotFound(format!("alias {}", alias.id)))
    }

    async fn delete_alias(&self, id: i64) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM aliases WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
