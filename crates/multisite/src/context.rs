//! Current-site context
//!
//! `SiteId` is the "which site is this request for" value the rest of the
//! application reads. It has a default bound at construction and an override
//! that the host-routing middleware sets per request.
//!
//! Overrides never live in process-global state. Inside [`request_scope`]
//! or [`SiteId::scope`] they are stored in a tokio task-local map, so
//! concurrent tasks cannot observe each other. Code running off the runtime
//! (startup, synchronous tests) falls back to a thread-local map; async code
//! outside a task scope should use [`SiteId::scope`] rather than
//! `override_with`, since tasks sharing a worker thread share that map.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use multisite_shared::{Site, StoreError};

use crate::store::SiteStore;

tokio::task_local! {
    static TASK_OVERRIDES: RefCell<HashMap<u64, i64>>;
}

thread_local! {
    static THREAD_OVERRIDES: RefCell<HashMap<u64, i64>> = RefCell::new(HashMap::new());
}

static NEXT_KEY: AtomicU64 = AtomicU64::new(1);

fn in_task_scope() -> bool {
    TASK_OVERRIDES.try_with(|_| ()).is_ok()
}

fn with_overrides<R>(f: impl FnOnce(&mut HashMap<u64, i64>) -> R) -> R {
    if in_task_scope() {
        TASK_OVERRIDES.with(|cell| f(&mut cell.borrow_mut()))
    } else {
        THREAD_OVERRIDES.with(|cell| f(&mut cell.borrow_mut()))
    }
}

fn read_override(key: u64) -> Option<i64> {
    with_overrides(|map| map.get(&key).copied())
}

fn write_override(key: u64, value: Option<i64>) {
    if !in_task_scope() && tokio::runtime::Handle::try_current().is_ok() {
        tracing::warn!(
            "Site override written outside a task scope; tasks on this worker thread share it. \
             Use request_scope or SiteId::scope"
        );
    }
    with_overrides(|map| match value {
        Some(value) => {
            map.insert(key, value);
        }
        None => {
            map.remove(&key);
        }
    });
}

/// Run `fut` with a fresh, empty override context
///
/// Every request handled by the host-routing middleware runs inside one of
/// these, so overrides set while serving it disappear when it completes.
/// Tasks spawned from inside the scope do not inherit it.
pub async fn request_scope<F: Future>(fut: F) -> F::Output {
    TASK_OVERRIDES.scope(RefCell::new(HashMap::new()), fut).await
}

/// Run `fut` with `key` overridden, inheriting the caller's other overrides
async fn scoped_override<F: Future>(key: u64, site_id: i64, fut: F) -> F::Output {
    let mut overrides = with_overrides(|map| map.clone());
    overrides.insert(key, site_id);
    TASK_OVERRIDES.scope(RefCell::new(overrides), fut).await
}

/// Errors raised while reading the site context
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("No site matches domain {0:?}")]
    DoesNotExist(String),
    #[error("Invalid default: {0}")]
    InvalidDefault(String),
    #[error("Site context has no override and no default")]
    Unset,
    #[error(transparent)]
    Store(#[from] StoreError),
}

// =============================================================================
// SiteId
// =============================================================================

/// The current site, by identifier
///
/// Clones share the same override slot.
#[derive(Clone)]
pub struct SiteId {
    key: u64,
    default: Option<i64>,
}

impl SiteId {
    /// A context with no default
    pub fn new() -> Self {
        Self {
            key: NEXT_KEY.fetch_add(1, AtomicOrdering::Relaxed),
            default: None,
        }
    }

    pub fn with_default(default: i64) -> Self {
        Self {
            default: Some(default),
            ..Self::new()
        }
    }

    /// Build from a configuration value such as `SITE_ID=1`
    pub fn parse_default(raw: &str) -> Result<Self, ContextError> {
        let default = raw.trim().parse::<i64>().map_err(|_| {
            ContextError::InvalidDefault(format!("{raw:?} is not an integer site id"))
        })?;
        Ok(Self::with_default(default))
    }

    pub fn default_value(&self) -> Option<i64> {
        self.default
    }

    /// The override in effect for the current execution context
    pub fn current_override(&self) -> Option<i64> {
        read_override(self.key)
    }

    /// The override if one is set, otherwise the default
    pub fn get(&self) -> Option<i64> {
        self.current_override().or(self.default)
    }

    pub fn value(&self) -> Result<i64, ContextError> {
        self.get().ok_or(ContextError::Unset)
    }

    pub fn set(&self, site_id: i64) {
        write_override(self.key, Some(site_id));
    }

    pub fn set_site(&self, site: &Site) {
        self.set(site.id);
    }

    /// Clear the override, falling back to the default
    pub fn reset(&self) {
        write_override(self.key, None);
    }

    /// Override the site until the returned guard is dropped
    ///
    /// The previous override is restored on every exit path, including early
    /// returns and panics. Guards nest.
    pub fn override_with(&self, site_id: i64) -> OverrideGuard {
        let previous = self.current_override();
        self.set(site_id);
        OverrideGuard {
            key: self.key,
            previous,
        }
    }

    /// Override the site while `fut` runs
    ///
    /// The override lives in the future's own task-local context, so it is
    /// safe to hold across awaits and invisible to every other task.
    pub async fn scope<F: Future>(&self, site_id: i64, fut: F) -> F::Output {
        scoped_override(self.key, site_id, fut).await
    }
}

impl Default for SiteId {
    fn default() -> Self {
        Self::new()
    }
}

/// Restores the previous override when dropped
#[must_use = "the override is reverted as soon as the guard is dropped"]
pub struct OverrideGuard {
    key: u64,
    previous: Option<i64>,
}

impl Drop for OverrideGuard {
    fn drop(&mut self) {
        write_override(self.key, self.previous);
    }
}

impl fmt::Debug for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteId")
            .field("default", &self.default)
            .field("override", &self.current_override())
            .finish()
    }
}

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.get() {
            Some(value) => write!(f, "{value}"),
            None => f.write_str("None"),
        }
    }
}

/// Hashes like the bare id, so a `SiteId` can stand in for one as a key
impl Hash for SiteId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        if let Some(value) = self.get() {
            value.hash(state);
        }
    }
}

impl PartialEq for SiteId {
    fn eq(&self, other: &Self) -> bool {
        self.get() == other.get()
    }
}

impl Eq for SiteId {}

impl PartialOrd for SiteId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.get().cmp(&other.get()))
    }
}

impl PartialEq<i64> for SiteId {
    fn eq(&self, other: &i64) -> bool {
        self.get() == Some(*other)
    }
}

impl PartialEq<SiteId> for i64 {
    fn eq(&self, other: &SiteId) -> bool {
        other == self
    }
}

impl PartialOrd<i64> for SiteId {
    fn partial_cmp(&self, other: &i64) -> Option<Ordering> {
        self.get().map(|value| value.cmp(other))
    }
}

impl PartialOrd<SiteId> for i64 {
    fn partial_cmp(&self, other: &SiteId) -> Option<Ordering> {
        other.get().map(|value| self.cmp(&value))
    }
}

// A site id never equals a string and always sorts before one.
macro_rules! impl_str_ordering {
    ($($ty:ty),*) => {$(
        impl PartialEq<$ty> for SiteId {
            fn eq(&self, _other: &$ty) -> bool {
                false
            }
        }

        impl PartialEq<SiteId> for $ty {
            fn eq(&self, _other: &SiteId) -> bool {
                false
            }
        }

        impl PartialOrd<$ty> for SiteId {
            fn partial_cmp(&self, _other: &$ty) -> Option<Ordering> {
                Some(Ordering::Less)
            }
        }

        impl PartialOrd<SiteId> for $ty {
            fn partial_cmp(&self, _other: &SiteId) -> Option<Ordering> {
                Some(Ordering::Greater)
            }
        }
    )*};
}

impl_str_ordering!(str, &str, String);

// =============================================================================
// SiteDomain
// =============================================================================

/// The current site, defaulting to whichever site owns a domain
///
/// The domain is looked up on every read, so a site created after startup is
/// picked up without a restart.
#[derive(Clone)]
pub struct SiteDomain {
    id: SiteId,
    domain: String,
    store: Arc<dyn SiteStore>,
}

impl SiteDomain {
    pub fn new(domain: impl Into<String>, store: Arc<dyn SiteStore>) -> Result<Self, ContextError> {
        let domain = domain.into();
        if domain.trim().is_empty() {
            return Err(ContextError::InvalidDefault(
                "site domain must not be blank".to_string(),
            ));
        }
        Ok(Self {
            id: SiteId::new(),
            domain,
            store,
        })
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// The id of the site owning the bound domain
    pub async fn default_value(&self) -> Result<i64, ContextError> {
        self.store
            .site_by_domain(&self.domain)
            .await?
            .map(|site| site.id)
            .ok_or_else(|| ContextError::DoesNotExist(self.domain.clone()))
    }

    pub fn current_override(&self) -> Option<i64> {
        self.id.current_override()
    }

    pub async fn value(&self) -> Result<i64, ContextError> {
        match self.current_override() {
            Some(site_id) => Ok(site_id),
            None => self.default_value().await,
        }
    }

    pub fn set(&self, site_id: i64) {
        self.id.set(site_id);
    }

    pub fn reset(&self) {
        self.id.reset();
    }

    pub fn override_with(&self, site_id: i64) -> OverrideGuard {
        self.id.override_with(site_id)
    }

    pub async fn scope<F: Future>(&self, site_id: i64, fut: F) -> F::Output {
        self.id.scope(site_id, fut).await
    }
}

impl fmt::Debug for SiteDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteDomain")
            .field("domain", &self.domain)
            .field("override", &self.current_override())
            .finish()
    }
}

// =============================================================================
// SiteContext
// =============================================================================

/// Either kind of site context accepted by the host-routing middleware
#[derive(Debug, Clone)]
pub enum SiteContext {
    Id(SiteId),
    Domain(SiteDomain),
}

impl SiteContext {
    pub fn set(&self, site_id: i64) {
        match self {
            SiteContext::Id(id) => id.set(site_id),
            SiteContext::Domain(domain) => domain.set(site_id),
        }
    }

    pub fn reset(&self) {
        match self {
            SiteContext::Id(id) => id.reset(),
            SiteContext::Domain(domain) => domain.reset(),
        }
    }

    pub fn current_override(&self) -> Option<i64> {
        match self {
            SiteContext::Id(id) => id.current_override(),
            SiteContext::Domain(domain) => domain.current_override(),
        }
    }

    pub fn override_with(&self, site_id: i64) -> OverrideGuard {
        match self {
            SiteContext::Id(id) => id.override_with(site_id),
            SiteContext::Domain(domain) => domain.override_with(site_id),
        }
    }

    pub async fn scope<F: Future>(&self, site_id: i64, fut: F) -> F::Output {
        match self {
            SiteContext::Id(id) => id.scope(site_id, fut).await,
            SiteContext::Domain(domain) => domain.scope(site_id, fut).await,
        }
    }

    pub async fn default_value(&self) -> Result<Option<i64>, ContextError> {
        match self {
            SiteContext::Id(id) => Ok(id.default_value()),
            SiteContext::Domain(domain) => domain.default_value().await.map(Some),
        }
    }

    pub async fn value(&self) -> Result<i64, ContextError> {
        match self {
            SiteContext::Id(id) => id.value(),
            SiteContext::Domain(domain) => domain.value().await,
        }
    }
}

impl From<SiteId> for SiteContext {
    fn from(id: SiteId) -> Self {
        SiteContext::Id(id)
    }
}

impl From<SiteDomain> for SiteContext {
    fn from(domain: SiteDomain) -> Self {
        SiteContext::Domain(domain)
    }
}
