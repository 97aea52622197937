//! Fallback handlers for requests that match no alias
//!
//! A fallback is resolved once, when the host-routing middleware is built.
//! Named factories come from a `FallbackRegistry`; `redirect` is built in.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, HeaderValue, Request, StatusCode},
    response::{IntoResponse, Response},
};
use futures::future::{BoxFuture, FutureExt};
use serde::Deserialize;

use crate::error::{MultisiteError, MultisiteResult};

/// Produces the response for a request with an unknown host
pub type FallbackHandler = Arc<dyn Fn(Request<Body>) -> BoxFuture<'static, Response> + Send + Sync>;

/// Builds a handler from JSON arguments
pub type FallbackFactory = fn(&serde_json::Value) -> MultisiteResult<FallbackHandler>;

/// How unknown hosts are handled
#[derive(Clone, Default)]
pub enum Fallback {
    /// Respond 404
    #[default]
    None,
    /// Build a handler from a factory at startup
    Factory {
        factory: FallbackFactory,
        args: serde_json::Value,
    },
    /// Use a ready handler
    Handler(FallbackHandler),
}

impl Fallback {
    /// Wrap an async function as a fallback
    pub fn handler<F, Fut>(f: F) -> Self
    where
        F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response> + Send + 'static,
    {
        Fallback::Handler(Arc::new(move |request: Request<Body>| f(request).boxed()))
    }

    /// Resolve a configured factory name
    ///
    /// An unset name means no fallback; an empty or unknown one is a
    /// configuration error.
    pub fn from_setting(
        name: Option<&str>,
        args: serde_json::Value,
        registry: &FallbackRegistry,
    ) -> MultisiteResult<Self> {
        let Some(name) = name else {
            return Ok(Fallback::None);
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(MultisiteError::Config(
                "fallback name must not be empty".to_string(),
            ));
        }
        let factory = registry.get(name).ok_or_else(|| {
            MultisiteError::Config(format!("unknown fallback {name:?}"))
        })?;
        Ok(Fallback::Factory { factory, args })
    }

    /// Build the handler, if any
    pub fn build(self) -> MultisiteResult<Option<FallbackHandler>> {
        match self {
            Fallback::None => Ok(None),
            Fallback::Factory { factory, args } => factory(&args).map(Some),
            Fallback::Handler(handler) => Ok(Some(handler)),
        }
    }
}

impl fmt::Debug for Fallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fallback::None => f.write_str("Fallback::None"),
            Fallback::Factory { args, .. } => {
                f.debug_struct("Fallback::Factory").field("args", args).finish()
            }
            Fallback::Handler(_) => f.write_str("Fallback::Handler"),
        }
    }
}

/// Named fallback factories
#[derive(Clone)]
pub struct FallbackRegistry {
    factories: HashMap<String, FallbackFactory>,
}

impl Default for FallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackRegistry {
    /// Registry with the built-in factories
    pub fn new() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register("redirect", redirect_fallback);
        registry
    }

    pub fn register(&mut self, name: impl Into<String>, factory: FallbackFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn get(&self, name: &str) -> Option<FallbackFactory> {
        self.factories.get(name).copied()
    }
}

#[derive(Debug, Deserialize)]
struct RedirectArgs {
    url: String,
    #[serde(default = "default_permanent")]
    permanent: bool,
}

fn default_permanent() -> bool {
    true
}

/// Redirect every unknown host to one URL
///
/// Arguments: `{"url": "...", "permanent": true}`. Responds 301, or 302 when
/// `permanent` is false.
pub fn redirect_fallback(args: &serde_json::Value) -> MultisiteResult<FallbackHandler> {
    let args: RedirectArgs = serde_json::from_value(args.clone())
        .map_err(|e| MultisiteError::Config(format!("invalid redirect fallback arguments: {e}")))?;
    let location = HeaderValue::from_str(&args.url)
        .map_err(|_| MultisiteError::Config(format!("invalid redirect URL {:?}", args.url)))?;
    let status = if args.permanent {
        StatusCode::MOVED_PERMANENTLY
    } else {
        StatusCode::FOUND
    };

    Ok(Arc::new(move |_request: Request<Body>| {
        let response = (status, [(header::LOCATION, location.clone())]).into_response();
        async move { response }.boxed()
    }))
}
