//! Multisite operator commands
//!
//! Usage:
//!   multisite update-public-suffix-list [--cache-file PATH] [--url URL]
//!   multisite sync-aliases [--missing | --all | --domain DOMAIN | --site ID]
//!   multisite allowed-hosts
//!
//! Settings come from the environment; a `.env` file is loaded first.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use multisite::suffix::update_cache_file;
use multisite::{AliasManager, AllowedHosts, Config, PgSiteStore, SiteFilter};
use multisite_shared::db::{create_pool, run_migrations};

#[derive(Parser)]
#[command(name = "multisite", version, about = "Multisite host routing operations")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download the public suffix list into the cache file
    UpdatePublicSuffixList {
        /// Cache file (defaults to MULTISITE_PUBLIC_SUFFIX_LIST_CACHE)
        #[arg(long)]
        cache_file: Option<PathBuf>,
        /// List source (defaults to MULTISITE_PUBLIC_SUFFIX_LIST_URL)
        #[arg(long)]
        url: Option<String>,
    },
    /// Bring canonical aliases in line with their sites' domains
    SyncAliases(SyncArgs),
    /// Print the allowed host patterns
    AllowedHosts,
}

#[derive(Args)]
#[group(multiple = false)]
struct SyncArgs {
    /// Only insert canonical aliases that are missing
    #[arg(long)]
    missing: bool,
    /// Update existing and insert missing canonical aliases (default)
    #[arg(long)]
    all: bool,
    /// Only the site with this domain
    #[arg(long)]
    domain: Option<String>,
    /// Only the site with this id
    #[arg(long)]
    site: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("invalid multisite configuration")?;

    match cli.command {
        Command::UpdatePublicSuffixList { cache_file, url } => {
            let path = cache_file.unwrap_or_else(|| config.public_suffix_list_cache.clone());
            let url = url.unwrap_or_else(|| config.public_suffix_list_url.clone());
            println!("Updating {}", path.display());
            let bytes = update_cache_file(&url, &path).await?;
            println!("Wrote {bytes} bytes to {}", path.display());
        }
        Command::SyncAliases(args) => {
            let aliases = alias_manager(&config).await?;
            let count = if args.missing {
                aliases.sync_missing().await?
            } else if let Some(domain) = args.domain {
                aliases.sync_many(&SiteFilter::by_domain(domain)).await?
            } else if let Some(id) = args.site {
                aliases.sync_many(&SiteFilter::by_id(id)).await?
            } else {
                tracing::debug!(explicit = args.all, "Syncing all sites");
                aliases.sync_all().await?
            };
            println!("Synced {count} canonical aliases");
        }
        Command::AllowedHosts => {
            let aliases = alias_manager(&config).await?;
            let hosts = AllowedHosts::new(aliases, config.extra_hosts.clone());
            for pattern in hosts.patterns().await? {
                println!("{pattern}");
            }
        }
    }

    Ok(())
}

async fn alias_manager(config: &Config) -> Result<AliasManager> {
    let url = config
        .database_url
        .as_deref()
        .context("DATABASE_URL is required for this command")?;
    let pool = create_pool(url, config.database_max_connections)
        .await
        .context("failed to connect to database")?;
    run_migrations(&pool).await.context("failed to run migrations")?;

    let cache = config.host_cache().await?;
    Ok(AliasManager::new(Arc::new(PgSiteStore::new(pool)), cache))
}
