//! # Request Context
//!
//! Per-request ambient state: the request view, the response in progress and
//! an optional authenticated principal.
//!
//! The context lives in a tokio task-local slot. `RequestContext::scope`
//! installs it for the duration of one future and removes it when that future
//! finishes, fails or panics, so concurrently running requests (one task each)
//! never see each other's fields. Inside the scope, `current()` reaches the
//! context from anywhere without threading it through call signatures.

use crate::error::{Error, Result};
use crate::request::RequestView;
use crate::response::ResponseBuilder;
use std::any::Any;
use std::future::Future;
use std::sync::{Arc, Mutex};

tokio::task_local! {
    static CURRENT: Arc<RequestContext>;
}

type Principal = Arc<dyn Any + Send + Sync>;

/// State of one logical request
pub struct RequestContext {
    request: RequestView,
    response: Mutex<ResponseBuilder>,
    principal: Mutex<Option<Principal>>,
}

impl RequestContext {
    /// Create a context around a request with a fresh response
    #[must_use]
    pub fn new(request: RequestView) -> Self {
        Self {
            request,
            response: Mutex::new(ResponseBuilder::new()),
            principal: Mutex::new(None),
        }
    }

    /// Run `fut` with this context installed as the current one
    pub async fn scope<F: Future>(self: Arc<Self>, fut: F) -> F::Output {
        CURRENT.scope(self, fut).await
    }

    /// The incoming request
    #[must_use]
    pub const fn request(&self) -> &RequestView {
        &self.request
    }

    /// Read or mutate the response in progress
    pub fn with_response<R>(&self, f: impl FnOnce(&mut ResponseBuilder) -> R) -> R {
        let mut response = self.response.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut response)
    }

    /// Take the response out, leaving a fresh one behind
    pub fn take_response(&self) -> ResponseBuilder {
        self.with_response(std::mem::take)
    }

    /// Bind the authenticated principal for this request
    pub fn set_principal<T: Send + Sync + 'static>(&self, principal: T) {
        let mut slot = self.principal.lock().unwrap_or_else(|e| e.into_inner());
        *slot = Some(Arc::new(principal));
    }

    /// Authenticated principal, if one of type `T` is bound
    #[must_use]
    pub fn principal<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let slot = self.principal.lock().unwrap_or_else(|e| e.into_inner());
        slot.clone().and_then(|p| p.downcast::<T>().ok())
    }

    /// Unbind the principal
    pub fn clear_principal(&self) {
        let mut slot = self.principal.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("method", &self.request.method())
            .field("path", &self.request.path())
            .finish_non_exhaustive()
    }
}

/// Context of the request running on this task
///
/// # Errors
///
/// Returns `Error::Internal` when called outside a request scope.
pub fn current() -> Result<Arc<RequestContext>> {
    try_current().ok_or_else(|| Error::Internal("no request context is active".to_string()))
}

/// Context of the request running on this task, if any
#[must_use]
pub fn try_current() -> Option<Arc<RequestContext>> {
    CURRENT.try_with(Arc::clone).ok()
}

/// Mutate the current response
///
/// # Errors
///
/// Returns `Error::Internal` when called outside a request scope.
pub fn with_response<R>(f: impl FnOnce(&mut ResponseBuilder) -> R) -> Result<R> {
    Ok(current()?.with_response(f))
}
