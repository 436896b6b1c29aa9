//! # Warpgate Core
//!
//! Core runtime library for the warpgate web framework.
//! Matches requests to handlers, runs them inside composable interceptors and
//! gives each request a correctly scoped database connection and transaction.
//!
//! ## Architecture
//!
//! Each inbound request is dispatched on its own tokio task. The request
//! context and the database connection context are task-local, so handlers
//! reach them from anywhere without threading them through signatures.
//!
//! ## Modules
//!
//! - `dispatcher` - Registration API and request dispatch
//! - `api` - JSON API wrapper, API errors and pagination
//! - `static_files` - Debug-mode static file serving
//! - `pattern` - Path templates with `:name` placeholders
//! - `route` - Route metadata and handler abstraction
//! - `router` - Static table plus ordered dynamic routes
//! - `interceptor` - Path-scoped middleware chain
//! - `context` - Per-request ambient state
//! - `request` - Request descriptor and read-only view
//! - `response` - Response builder, cookies and reply values
//! - `database` - Engine and connection interfaces, SQLite engine
//! - `transaction` - Nested connection and transaction scopes
//! - `server` - HTTP gateway built on Hyper
//! - `config` - Typed configuration
//! - `error` - Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod api;
pub mod config;
pub mod context;
pub mod database;
pub mod dispatcher;
pub mod error;
pub mod interceptor;
pub mod pattern;
pub mod request;
pub mod response;
pub mod route;
pub mod router;
pub mod server;
pub mod static_files;
pub mod transaction;

pub use api::{api, ApiError, Page};
pub use config::{AppConfig, DatabaseConfig, ServerConfig};
pub use context::RequestContext;
pub use database::{Connection, DbValue, Engine, Row, SqliteEngine};
pub use dispatcher::{Dispatcher, TemplateEngine};
pub use error::{Error, Result};
pub use interceptor::{interceptor_fn, Interceptor, Next};
pub use request::{RawRequest, RequestView};
pub use response::{CookieOptions, RawResponse, Reply, ResponseBuilder};
pub use route::{Handler, Method, RouteDef, RouteModule};
pub use server::Server;
pub use static_files::StaticFiles;

use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install the JSON tracing subscriber
///
/// Honours `RUST_LOG` and logs this crate at `info` by default. Calling it
/// again, or after another subscriber was installed, does nothing.
pub fn init_tracing() {
    let mut filter = EnvFilter::from_default_env();
    if let Ok(directive) = "warpgate_core=info".parse() {
        filter = filter.add_directive(directive);
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .try_init();
}
