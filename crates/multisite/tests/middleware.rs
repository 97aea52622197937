//! Integration tests for the host-routing and cookie-domain middleware
//!
//! Each test builds an axum `Router` over a `MemoryStore` and drives it with
//! `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    middleware::from_fn_with_state,
    response::{AppendHeaders, IntoResponse, Response},
    Extension, Router,
};
use tower::ServiceExt;

use multisite::middleware::{cookie_domain_middleware, CookieDomain, CurrentSite, DynamicSite};
use multisite::routing::{DevelopmentFallback, DomainCache, HostResolver};
use multisite::{
    AliasManager, AllowedHosts, Fallback, MemoryStore, NewAlias, NewSite, PublicSuffixResolver,
    SiteContext, SiteDomain, SiteId, SiteRegistry, SiteStore,
};

// ============================================================================
// Test Utilities
// ============================================================================

struct Fixture {
    store: Arc<MemoryStore>,
    registry: SiteRegistry,
    resolver: HostResolver,
}

impl Fixture {
    fn new() -> Self {
        let store = Arc::new(MemoryStore::new());
        let aliases = AliasManager::new(store.clone(), Arc::new(DomainCache::new()));
        Self {
            store,
            registry: SiteRegistry::new(aliases.clone()),
            resolver: HostResolver::new(aliases),
        }
    }

    fn aliases(&self) -> &AliasManager {
        self.registry.aliases()
    }
}

/// Router whose handler reports the current site as `"<extension>:<context>"`
fn app(site: DynamicSite, context: SiteId) -> Router {
    let handler = move |Extension(current): Extension<CurrentSite>| {
        let context = context.clone();
        async move { format!("{}:{:?}", current.site_id, context.get()) }
    };
    Router::new()
        .fallback(handler)
        .layer(from_fn_with_state(Arc::new(site), multisite::dynamic_site_middleware))
}

fn request(host: &str, path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// ============================================================================
// Host routing
// ============================================================================

#[tokio::test]
async fn serves_matching_site() {
    let fixture = Fixture::new();
    let site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    let context = SiteId::with_default(0);
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context.clone());

    let response = app.oneshot(request("Example.COM", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, format!("{}:Some({})", site.id, site.id));

    // The override does not outlive the request
    assert_eq!(context.get(), Some(0));
}

#[tokio::test]
async fn wildcard_and_port_aliases() {
    let fixture = Fixture::new();
    let first = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    let second = fixture
        .registry
        .create_site(NewSite::new("example.org"))
        .await
        .unwrap();
    fixture
        .aliases()
        .create(NewAlias::new(first.id, "*.example.com").with_redirect(false))
        .await
        .unwrap();
    fixture
        .aliases()
        .create(NewAlias::new(second.id, "www.example.com:8000").with_redirect(false))
        .await
        .unwrap();

    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("www.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, format!("{}:Some({})", first.id, first.id));

    let response = app
        .oneshot(request("www.example.com:8000", "/"))
        .await
        .unwrap();
    assert_eq!(body_text(response).await, format!("{}:Some({})", second.id, second.id));
}

#[tokio::test]
async fn redirects_to_canonical_domain() {
    let fixture = Fixture::new();
    let site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    fixture
        .aliases()
        .create(NewAlias::new(site.id, "www.example.com"))
        .await
        .unwrap();

    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("www.example.com", "/path?q=1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(
        response.headers()[header::LOCATION],
        "http://example.com/path?q=1"
    );

    let secure = Request::builder()
        .uri("/path")
        .header(header::HOST, "www.example.com")
        .header("X-Forwarded-Proto", "https")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(secure).await.unwrap();
    assert_eq!(
        response.headers()[header::LOCATION],
        "https://example.com/path"
    );
}

#[tokio::test]
async fn unknown_host_is_not_found() {
    let fixture = Fixture::new();
    fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();

    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("example.net", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // Malformed hosts are rejected outright
    let response = app.oneshot(request(":8000", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fallback_sees_reset_context() {
    let fixture = Fixture::new();
    let context = SiteId::with_default(7);
    let observed = context.clone();
    let fallback = Fallback::handler(move |_request: Request<Body>| {
        let observed = observed.clone();
        async move { (StatusCode::IM_A_TEAPOT, format!("{:?}", observed.get())).into_response() }
    });

    let site = DynamicSite::new(fixture.resolver.clone(), context.clone())
        .with_fallback(fallback)
        .unwrap();
    let response = app(site, context).oneshot(request("example.net", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_text(response).await, "Some(7)");
}

#[tokio::test]
async fn malformed_hosts_skip_fallback_and_enforcement() {
    let fixture = Fixture::new();
    fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    let teapot = || {
        Fallback::handler(|_request: Request<Body>| async {
            StatusCode::IM_A_TEAPOT.into_response()
        })
    };

    let context = SiteId::with_default(7);
    let site = DynamicSite::new(fixture.resolver.clone(), context.clone())
        .with_fallback(teapot())
        .unwrap();
    let app = app(site, context.clone());
    for host in [":8000", "exa mple.com", "example.com:99999"] {
        let response = app.clone().oneshot(request(host, "/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{host}");
    }
    assert_eq!(context.get(), Some(7));

    // Well-formed unknown hosts still reach the fallback
    let response = app.oneshot(request("example.net", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);

    // Rejected before allowed-host enforcement turns them into 400s
    let hosts = AllowedHosts::new(fixture.aliases().clone(), Vec::new());
    let site = DynamicSite::new(fixture.resolver.clone(), context.clone())
        .with_fallback(teapot())
        .unwrap()
        .with_allowed_hosts(hosts);
    let response = crate::app(site, context).oneshot(request(":8000", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejects_disallowed_hosts() {
    let fixture = Fixture::new();
    fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();

    let hosts = AllowedHosts::new(fixture.aliases().clone(), vec![".internal".to_string()]);
    let context = SiteId::new();
    let site = DynamicSite::new(fixture.resolver.clone(), context.clone()).with_allowed_hosts(hosts);
    let app = app(site, context);

    let response = app
        .clone()
        .oneshot(request("example.net", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Extra hosts pass through to the usual not-found handling
    let response = app
        .clone()
        .oneshot(request("health.internal", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(request("example.com", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn domain_change_clears_cached_hosts() {
    let fixture = Fixture::new();
    let mut site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("example.org", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    site.domain = "example.org".to_string();
    fixture.registry.update_site(&site).await.unwrap();

    let response = app
        .clone()
        .oneshot(request("example.org", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = app.oneshot(request("example.com", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn redirect_for_deleted_site_drops_cache_entry() {
    let fixture = Fixture::new();
    let site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    fixture
        .aliases()
        .create(NewAlias::new(site.id, "www.example.com"))
        .await
        .unwrap();
    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("www.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);

    // Bypass the registry so the cached alias goes stale
    fixture.store.delete_site(site.id).await.unwrap();

    let response = app
        .clone()
        .oneshot(request("www.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.oneshot(request("www.example.com", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn development_fallback_serves_single_label_hosts() {
    let fixture = Fixture::new();
    fixture
        .registry
        .create_site(NewSite::new("example.org"))
        .await
        .unwrap();
    let site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();

    let resolver = fixture
        .resolver
        .clone()
        .with_development(DevelopmentFallback {
            default_site: Some(site.id),
        });
    let context = SiteId::new();
    let app = app(DynamicSite::new(resolver, context.clone()), context);

    let response = app
        .clone()
        .oneshot(request("testserver", "/"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, format!("{}:Some({})", site.id, site.id));

    let response = app.oneshot(request("unknown.test", "/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn domain_context_resolves_default_lazily() {
    let fixture = Fixture::new();
    let context = SiteDomain::new("example.com", fixture.store.clone()).unwrap();
    let site_context = SiteContext::from(context.clone());
    let middleware = DynamicSite::new(fixture.resolver.clone(), site_context);

    let site = fixture
        .registry
        .create_site(NewSite::new("example.com"))
        .await
        .unwrap();
    assert_eq!(middleware.context().value().await.unwrap(), site.id);

    let handler = {
        let context = context.clone();
        move |Extension(current): Extension<CurrentSite>| {
            let context = context.clone();
            async move { format!("{}:{:?}", current.site_id, context.current_override()) }
        }
    };
    let app = Router::new()
        .fallback(handler)
        .layer(from_fn_with_state(Arc::new(middleware), multisite::dynamic_site_middleware));

    let response = app.oneshot(request("example.com", "/")).await.unwrap();
    assert_eq!(body_text(response).await, format!("{}:Some({})", site.id, site.id));
    assert_eq!(context.current_override(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_isolated() {
    let fixture = Fixture::new();
    let mut sites = Vec::new();
    for domain in ["a.example.com", "b.example.com", "c.example.com"] {
        sites.push(
            fixture
                .registry
                .create_site(NewSite::new(domain))
                .await
                .unwrap(),
        );
    }

    let context = SiteId::new();
    let app = app(DynamicSite::new(fixture.resolver.clone(), context.clone()), context);

    let mut handles = Vec::new();
    for round in 0..30 {
        let site = sites[round % sites.len()].clone();
        let app = app.clone();
        handles.push(tokio::spawn(async move {
            let response = app.oneshot(request(&site.domain, "/")).await.unwrap();
            (site.id, body_text(response).await)
        }));
    }
    for handle in handles {
        let (site_id, body) = handle.await.unwrap();
        assert_eq!(body, format!("{site_id}:Some({site_id})"));
    }
}

// ============================================================================
// Cookie domain
// ============================================================================

fn cookie_app(depth: i64) -> Router {
    let cookies =
        CookieDomain::new(depth, Arc::new(PublicSuffixResolver::bundled())).unwrap();
    Router::new()
        .fallback(|| async {
            (
                AppendHeaders([
                    (header::SET_COOKIE, "a=a; Path=/"),
                    (header::SET_COOKIE, "b=b; Domain=.example.org"),
                ]),
                "ok",
            )
        })
        .layer(from_fn_with_state(Arc::new(cookies), cookie_domain_middleware))
}

fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| value.to_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn cookie_domain_is_added() {
    let response = cookie_app(0)
        .oneshot(request("foo.bar.extrahost.com", "/"))
        .await
        .unwrap();
    assert_eq!(
        set_cookies(&response),
        vec!["a=a; Path=/; Domain=.extrahost.com", "b=b; Domain=.example.org"]
    );

    let response = cookie_app(1)
        .oneshot(request("app.test1.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(
        set_cookies(&response)[0],
        "a=a; Path=/; Domain=.test1.example.com"
    );
}

#[tokio::test]
async fn cookie_domain_skips_local_hosts() {
    for host in ["localhost", "192.0.43.10", "com.ai"] {
        let response = cookie_app(0).oneshot(request(host, "/")).await.unwrap();
        assert_eq!(
            set_cookies(&response),
            vec!["a=a; Path=/", "b=b; Domain=.example.org"],
            "host {host}"
        );
    }
}
