//! # JSON API
//!
//! Wrapper turning a handler that returns any serializable value into a JSON
//! endpoint. Failures never leave the wrapper as error pages: an `ApiError`
//! becomes `{"error", "data", "message"}` and any other error becomes the
//! same shape with `error` set to `internalerror`. Redirects pass through.
//!
//! ## Example
//!
//! ```ignore
//! dispatcher.get("/api/users/:id", api(|args: Vec<String>| async move {
//!     let user = find_user(&args[0])
//!         .await?
//!         .ok_or_else(|| ApiError::not_found("id", "user does not exist"))?;
//!     Ok(user)
//! }))?;
//! ```

use crate::error::{Error, Result};
use crate::response::Reply;
use crate::route::Handler;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use tracing::{error, info};

/// Business error reported to API clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{error}: {message}")]
pub struct ApiError {
    /// Machine-readable code, e.g. `value:invalid`
    pub error: String,
    /// Offending field or resource
    pub data: String,
    /// Human-readable message
    pub message: String,
}

impl ApiError {
    /// Error with an arbitrary code
    pub fn new(
        error: impl Into<String>,
        data: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            error: error.into(),
            data: data.into(),
            message: message.into(),
        }
    }

    /// `value:invalid` for an input field
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("value:invalid", field, message)
    }

    /// `value:notfound` for a missing resource
    pub fn not_found(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new("value:notfound", field, message)
    }

    /// `permission:forbidden`
    pub fn permission(message: impl Into<String>) -> Self {
        Self::new("permission:forbidden", "permission", message)
    }
}

/// Wrap a handler returning `T: Serialize` as a JSON API endpoint
pub fn api<F, Fut, T>(handler: F) -> impl Handler
where
    F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
    T: Serialize + Send + 'static,
{
    move |args: Vec<String>| {
        let fut = handler(args);
        async move { api_reply(fut.await) }
    }
}

fn api_reply<T: Serialize>(outcome: Result<T>) -> Result<Reply> {
    let failure = match outcome.and_then(|value| Ok(serde_json::to_value(value)?)) {
        Ok(value) => return Ok(Reply::Json(value)),
        Err(e) => e,
    };

    match failure {
        redirect @ Error::Redirect { .. } => Err(redirect),
        Error::Api(e) => {
            info!(error = %e, "api error");
            Ok(Reply::Json(serde_json::to_value(e)?))
        }
        e => {
            error!(error = %e, "api call failed");
            Ok(Reply::Json(json!({
                "error": "internalerror",
                "data": e.kind(),
                "message": e.to_string(),
            })))
        }
    }
}

/// Pagination window for list endpoints
///
/// Serializes to the fields clients page with; `offset` and `limit` are for
/// the query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Page {
    /// Total number of items
    pub item_count: usize,
    /// Current page, 1-based
    pub page_index: usize,
    /// Number of pages
    pub page_count: usize,
    /// Whether a later page exists
    pub has_next: bool,
    /// Whether an earlier page exists
    pub has_previous: bool,
    /// Items per page
    #[serde(skip)]
    pub page_size: usize,
    /// First item of the page
    #[serde(skip)]
    pub offset: usize,
    /// Items to fetch; 0 for an empty or out-of-range page
    #[serde(skip)]
    pub limit: usize,
}

impl Page {
    /// Window for `page_index` over `item_count` items
    ///
    /// An out-of-range index yields page 1 with nothing to fetch.
    #[must_use]
    pub fn new(item_count: usize, page_index: usize, page_size: usize) -> Self {
        let page_size = page_size.max(1);
        let page_count = item_count.div_ceil(page_size);
        let (page_index, offset, limit) =
            if item_count == 0 || page_index < 1 || page_index > page_count {
                (1, 0, 0)
            } else {
                (page_index, page_size * (page_index - 1), page_size)
            };
        Self {
            item_count,
            page_index,
            page_count,
            has_next: page_index < page_count,
            has_previous: page_index > 1,
            page_size,
            offset,
            limit,
        }
    }
}
