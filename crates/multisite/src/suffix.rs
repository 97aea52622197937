//! Public suffix lookups
//!
//! Splits hostnames into subdomain, registrable domain and public suffix.
//! The list compiled into the `addr` crate is used until a list is loaded
//! from the cache file, which `update_cache_file` refreshes out-of-band.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use publicsuffix::{List, Psl};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::error::{MultisiteError, MultisiteResult};

/// Published Mozilla list
pub const DEFAULT_LIST_URL: &str = "https://publicsuffix.org/list/public_suffix_list.dat";

/// Cache file name inside the temp directory
pub const DEFAULT_CACHE_FILE_NAME: &str = "multisite_tld.dat";

/// Maximum retry attempts for transient download failures
const MAX_RETRIES: usize = 3;

/// Base delay for exponential backoff
const RETRY_BASE_DELAY: Duration = Duration::from_millis(100);

/// Maximum delay between retries
const RETRY_MAX_DELAY: Duration = Duration::from_secs(5);

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

pub fn default_cache_file() -> PathBuf {
    std::env::temp_dir().join(DEFAULT_CACHE_FILE_NAME)
}

/// A hostname split at its public suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostParts {
    /// Labels left of the registrable domain, if any
    pub subdomain: Option<String>,
    /// Registrable domain, including the suffix
    pub domain: String,
    pub suffix: String,
}

impl HostParts {
    /// Subdomain labels, leftmost first
    pub fn subdomain_labels(&self) -> Vec<&str> {
        self.subdomain
            .as_deref()
            .map(|sub| sub.split('.').collect())
            .unwrap_or_default()
    }
}

/// Public suffix resolver with a swappable list
#[derive(Default)]
pub struct PublicSuffixResolver {
    /// None means the list bundled with `addr`
    list: RwLock<Option<Arc<List>>>,
}

impl PublicSuffixResolver {
    /// Resolver using the bundled list
    pub fn bundled() -> Self {
        Self::default()
    }

    /// Resolver using a list file
    pub fn from_file(path: &Path) -> MultisiteResult<Self> {
        let resolver = Self::bundled();
        resolver.reload(path)?;
        Ok(resolver)
    }

    /// Use the cache file when present, the bundled list otherwise
    pub fn load(cache_file: &Path) -> Self {
        if !cache_file.exists() {
            tracing::debug!(path = %cache_file.display(), "No public suffix cache file, using bundled list");
            return Self::bundled();
        }
        match Self::from_file(cache_file) {
            Ok(resolver) => resolver,
            Err(e) => {
                tracing::warn!(path = %cache_file.display(), error = %e, "Ignoring public suffix cache file");
                Self::bundled()
            }
        }
    }

    /// Replace the list with the contents of `path`
    pub fn reload(&self, path: &Path) -> MultisiteResult<()> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            MultisiteError::SuffixList(format!("failed to read {}: {e}", path.display()))
        })?;
        let list = parse_list(&text)?;
        if let Ok(mut current) = self.list.write() {
            *current = Some(Arc::new(list));
        }
        tracing::info!(path = %path.display(), "Loaded public suffix list");
        Ok(())
    }

    pub fn is_bundled(&self) -> bool {
        self.list.read().map(|list| list.is_none()).unwrap_or(true)
    }

    /// Split a lowercase hostname
    ///
    /// Returns None when the suffix is unknown or the host is itself a
    /// public suffix.
    pub fn split(&self, host: &str) -> Option<HostParts> {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        if host.is_empty() {
            return None;
        }
        let list = self.list.read().ok().and_then(|list| list.clone());
        match list {
            Some(list) => split_with_list(&list, &host),
            None => split_bundled(&host),
        }
    }
}

fn split_bundled(host: &str) -> Option<HostParts> {
    let name = addr::parse_domain_name(host).ok()?;
    if !name.has_known_suffix() {
        return None;
    }
    let root = name.root()?;
    Some(HostParts {
        subdomain: name.prefix().map(str::to_string),
        domain: root.to_string(),
        suffix: name.suffix().to_string(),
    })
}

fn split_with_list(list: &List, host: &str) -> Option<HostParts> {
    let suffix = list.suffix(host.as_bytes())?;
    if !suffix.is_known() {
        return None;
    }
    let domain = list.domain(host.as_bytes())?;
    let suffix = std::str::from_utf8(suffix.as_bytes()).ok()?.to_string();
    let domain = std::str::from_utf8(domain.as_bytes()).ok()?.to_string();
    let subdomain = host
        .strip_suffix(domain.as_str())
        .and_then(|rest| rest.strip_suffix('.'))
        .filter(|rest| !rest.is_empty())
        .map(str::to_string);
    Some(HostParts {
        subdomain,
        domain,
        suffix,
    })
}

/// Parse list text, rejecting anything that does not know `.com`
fn parse_list(text: &str) -> MultisiteResult<List> {
    let list: List = text
        .parse()
        .map_err(|e| MultisiteError::SuffixList(format!("failed to parse list: {e}")))?;
    let knows_com = list
        .suffix(b"example.com")
        .map(|suffix| suffix.is_known())
        .unwrap_or(false);
    if !knows_com {
        return Err(MultisiteError::SuffixList(
            "list does not look like a public suffix list".to_string(),
        ));
    }
    Ok(list)
}

/// Download the list from `url` and atomically replace `path`
///
/// Transient failures (network errors, 5xx) are retried with exponential
/// backoff. Returns the number of bytes written.
pub async fn update_cache_file(url: &str, path: &Path) -> MultisiteResult<usize> {
    let client = reqwest::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .map_err(|e| MultisiteError::SuffixList(format!("failed to build HTTP client: {e}")))?;

    let retry_strategy = ExponentialBackoff::from_millis(RETRY_BASE_DELAY.as_millis() as u64)
        .max_delay(RETRY_MAX_DELAY)
        .take(MAX_RETRIES)
        .map(jitter);

    let text = Retry::spawn(retry_strategy, || async {
        let result = download(&client, url).await;
        match &result {
            Ok(_) => Ok(result),
            Err(Download::Transient(e)) => {
                tracing::debug!(url = %url, error = %e, "Transient error - will retry");
                Err(result)
            }
            Err(Download::Permanent(e)) => {
                tracing::debug!(url = %url, error = %e, "Permanent error - will not retry");
                Ok(result)
            }
        }
    })
    .await
    .unwrap_or_else(|e| e)
    .map_err(|e| MultisiteError::SuffixList(e.to_string()))?;

    parse_list(&text)?;

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            MultisiteError::SuffixList(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    let tmp = path.with_extension("tmp");
    tokio::fs::write(&tmp, text.as_bytes())
        .await
        .map_err(|e| MultisiteError::SuffixList(format!("failed to write {}: {e}", tmp.display())))?;
    tokio::fs::rename(&tmp, path).await.map_err(|e| {
        MultisiteError::SuffixList(format!("failed to replace {}: {e}", path.display()))
    })?;

    tracing::info!(url = %url, path = %path.display(), bytes = text.len(), "Updated public suffix list");
    Ok(text.len())
}

#[derive(Debug, thiserror::Error)]
enum Download {
    #[error("{0}")]
    Transient(String),
    #[error("{0}")]
    Permanent(String),
}

async fn download(client: &reqwest::Client, url: &str) -> Result<String, Download> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Download::Transient(format!("request to {url} failed: {e}")))?;

    let status = response.status();
    if status.is_server_error() {
        return Err(Download::Transient(format!("{url} returned {status}")));
    }
    if !status.is_success() {
        return Err(Download::Permanent(format!("{url} returned {status}")));
    }

    response
        .text()
        .await
        .map_err(|e| Download::Transient(format!("failed to read body from {url}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_LIST: &str = "\
// ===BEGIN ICANN DOMAINS===
com
ai
com.ai
co.uk
// ===END ICANN DOMAINS===
";

    fn parts(subdomain: Option<&str>, domain: &str, suffix: &str) -> HostParts {
        HostParts {
            subdomain: subdomain.map(str::to_string),
            domain: domain.to_string(),
            suffix: suffix.to_string(),
        }
    }

    #[test]
    fn test_split_bundled() {
        let resolver = PublicSuffixResolver::bundled();
        assert!(resolver.is_bundled());
        assert_eq!(
            resolver.split("foo.bar.extrahost.com"),
            Some(parts(Some("foo.bar"), "extrahost.com", "com"))
        );
        assert_eq!(
            resolver.split("Example.co.uk"),
            Some(parts(None, "example.co.uk", "co.uk"))
        );
        assert_eq!(
            resolver.split("nic.com.ai"),
            Some(parts(None, "nic.com.ai", "com.ai"))
        );
        assert_eq!(resolver.split("ai"), None);
        assert_eq!(resolver.split("com.ai"), None);
        assert_eq!(resolver.split("com"), None);
        assert_eq!(resolver.split("example.notarealtld"), None);
        assert_eq!(resolver.split(""), None);
    }

    #[test]
    fn test_subdomain_labels() {
        let split = parts(Some("new.app"), "example.com", "com");
        assert_eq!(split.subdomain_labels(), vec!["new", "app"]);
        assert!(parts(None, "example.com", "com").subdomain_labels().is_empty());
    }

    #[test]
    fn test_split_with_loaded_list() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("list.dat");
        std::fs::write(&path, SMALL_LIST).unwrap();

        let resolver = PublicSuffixResolver::from_file(&path).unwrap();
        assert!(!resolver.is_bundled());
        assert_eq!(
            resolver.split("app.test.example.com"),
            Some(parts(Some("app.test"), "example.com", "com"))
        );
        assert_eq!(
            resolver.split("www.ai"),
            Some(parts(None, "www.ai", "ai"))
        );
        assert_eq!(resolver.split("com.ai"), None);
        // Not in the small list
        assert_eq!(resolver.split("example.org"), None);
    }

    #[test]
    fn test_load_falls_back_to_bundled() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.dat");
        assert!(PublicSuffixResolver::load(&missing).is_bundled());

        let garbage = dir.path().join("garbage.dat");
        std::fs::write(&garbage, "<html>not a list</html>").unwrap();
        assert!(PublicSuffixResolver::load(&garbage).is_bundled());
        assert!(PublicSuffixResolver::from_file(&garbage).is_err());
    }

    #[tokio::test]
    async fn test_update_cache_file() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/list.dat")
            .with_status(200)
            .with_body(SMALL_LIST)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("multisite_tld.dat");
        let url = format!("{}/list.dat", server.url());

        let written = update_cache_file(&url, &path).await.unwrap();
        assert_eq!(written, SMALL_LIST.len());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), SMALL_LIST);
        mock.assert_async().await;

        let resolver = PublicSuffixResolver::bundled();
        resolver.reload(&path).unwrap();
        assert!(!resolver.is_bundled());
    }

    #[tokio::test]
    async fn test_update_rejects_invalid_list() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/list.dat")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("multisite_tld.dat");
        let url = format!("{}/list.dat", server.url());

        assert!(matches!(
            update_cache_file(&url, &path).await,
            Err(MultisiteError::SuffixList(_))
        ));
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_update_does_not_retry_client_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/list.dat")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/list.dat", server.url());
        assert!(update_cache_file(&url, &dir.path().join("list.dat"))
            .await
            .is_err());
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_update_retries_server_errors() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/list.dat")
            .with_status(503)
            .expect(MAX_RETRIES + 1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let url = format!("{}/list.dat", server.url());
        assert!(update_cache_file(&url, &dir.path().join("list.dat"))
            .await
            .is_err());
        mock.assert_async().await;
    }
}
