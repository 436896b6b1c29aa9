//! # Interceptors
//!
//! Path-scoped middleware wrapping the dispatch chain.
//!
//! An interceptor receives `next`, the rest of the chain. It may run code
//! before and after `next.run()`, inspect or convert the result, or return
//! without calling `next` at all (e.g. redirect to a sign-in page).
//!
//! `build_chain` nests one layer per interceptor around a terminal invocable.
//! The first interceptor supplied is the outermost: it runs first and unwinds
//! last. A layer whose path predicate does not match the current request path
//! forwards straight to `next`. Layers hold no per-call state, so one built
//! chain serves every request concurrently.

use crate::context;
use crate::error::{Error, Result};
use crate::response::Reply;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tracing::trace;

/// A callable step of the chain
pub trait Invocable: Send + Sync {
    /// Run this step and everything inside it
    fn invoke(&self) -> BoxFuture<'static, Result<Reply>>;
}

/// Handle to the inner part of the chain
#[derive(Clone)]
pub struct Next {
    inner: Arc<dyn Invocable>,
}

impl Next {
    /// Wrap an invocable
    #[must_use]
    pub fn new(inner: Arc<dyn Invocable>) -> Self {
        Self { inner }
    }

    /// Run the rest of the chain
    pub async fn run(self) -> Result<Reply> {
        self.inner.invoke().await
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Next(..)")
    }
}

/// Middleware body
pub trait Interceptor: Send + Sync {
    /// Handle the request, delegating to `next` or short-circuiting
    fn intercept(&self, next: Next) -> BoxFuture<'static, Result<Reply>>;

    /// Name for logging
    fn name(&self) -> &str {
        "interceptor"
    }
}

/// Interceptor built from an async closure
pub struct FnInterceptor<F> {
    name: String,
    f: F,
}

/// Build an interceptor from `Fn(Next) -> Future`
pub fn interceptor_fn<F, Fut>(name: impl Into<String>, f: F) -> FnInterceptor<F>
where
    F: Fn(Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    FnInterceptor {
        name: name.into(),
        f,
    }
}

impl<F, Fut> Interceptor for FnInterceptor<F>
where
    F: Fn(Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    fn intercept(&self, next: Next) -> BoxFuture<'static, Result<Reply>> {
        Box::pin((self.f)(next))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Invocable built from an async closure, used as a chain terminal
pub struct Endpoint<F>(pub F);

impl<F, Fut> Invocable for Endpoint<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    fn invoke(&self) -> BoxFuture<'static, Result<Reply>> {
        Box::pin((self.0)())
    }
}

/// When an interceptor applies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathPredicate {
    /// Path starts with the prefix
    StartsWith(String),
    /// Path ends with the suffix
    EndsWith(String),
}

impl PathPredicate {
    /// Parse an interceptor pattern
    ///
    /// - `/manage/*` or `/manage/` → starts with `/manage/`
    /// - `*.json` → ends with `.json`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an empty pattern, a `?`, more than one `*`,
    /// or a `*` anywhere but the first or last position.
    pub fn parse(pattern: &str) -> Result<Self> {
        let invalid = || Error::Config(format!("invalid interceptor pattern '{pattern}'"));

        if pattern.contains('?') {
            return Err(invalid());
        }
        if let Some(suffix) = pattern.strip_prefix('*') {
            if suffix.is_empty() || suffix.contains('*') {
                return Err(invalid());
            }
            return Ok(Self::EndsWith(suffix.to_string()));
        }
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        if prefix.is_empty() || prefix.contains('*') {
            return Err(invalid());
        }
        Ok(Self::StartsWith(prefix.to_string()))
    }

    /// Whether the predicate accepts a path
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        match self {
            Self::StartsWith(prefix) => path.starts_with(prefix.as_str()),
            Self::EndsWith(suffix) => path.ends_with(suffix.as_str()),
        }
    }
}

/// Registered interceptor with its predicate
#[derive(Clone)]
pub struct InterceptorEntry {
    /// Path predicate
    pub predicate: PathPredicate,
    /// Interceptor body
    pub interceptor: Arc<dyn Interceptor>,
}

impl InterceptorEntry {
    /// Pair an interceptor with a pattern
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the pattern is invalid.
    pub fn new(pattern: &str, interceptor: impl Interceptor + 'static) -> Result<Self> {
        Ok(Self {
            predicate: PathPredicate::parse(pattern)?,
            interceptor: Arc::new(interceptor),
        })
    }
}

impl fmt::Debug for InterceptorEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptorEntry")
            .field("name", &self.interceptor.name())
            .field("predicate", &self.predicate)
            .finish()
    }
}

/// One nesting level of the chain
struct Layer {
    predicate: Arc<PathPredicate>,
    interceptor: Arc<dyn Interceptor>,
    next: Arc<dyn Invocable>,
}

impl Invocable for Layer {
    fn invoke(&self) -> BoxFuture<'static, Result<Reply>> {
        let predicate = Arc::clone(&self.predicate);
        let interceptor = Arc::clone(&self.interceptor);
        let next = Arc::clone(&self.next);
        Box::pin(async move {
            let applies =
                context::try_current().is_some_and(|ctx| predicate.matches(ctx.request().path()));
            if applies {
                trace!(interceptor = interceptor.name(), "enter interceptor");
                interceptor.intercept(Next::new(next)).await
            } else {
                next.invoke().await
            }
        })
    }
}

/// Compose interceptors around a terminal; the first entry is outermost
#[must_use]
pub fn build_chain(
    terminal: Arc<dyn Invocable>,
    interceptors: &[InterceptorEntry],
) -> Arc<dyn Invocable> {
    interceptors.iter().rev().fold(terminal, |next, entry| {
        Arc::new(Layer {
            predicate: Arc::new(entry.predicate.clone()),
            interceptor: Arc::clone(&entry.interceptor),
            next,
        })
    })
}
