//! # Dispatcher
//!
//! Entry point tying the runtime together: owns the route registry and the
//! interceptor list, builds the chain once, and turns each `RawRequest` into a
//! `RawResponse`.
//!
//! ## Lifecycle
//!
//! 1. Register routes, modules, interceptors and the template engine.
//! 2. The first call to `handle` closes registration; any later registration
//!    fails with `Error::Config`.
//!
//! In debug mode (`AppConfig::debug`) `GET /static/...` requests that match no
//! route are served from the document root.
//!
//! ## Outcome mapping
//!
//! | Outcome                  | Response                                   |
//! |--------------------------|--------------------------------------------|
//! | `Ok(reply)`              | status/headers from the context, body      |
//! | `Error::Redirect`        | redirect status + `Location`, empty body   |
//! | declared HTTP error      | its status + minimal HTML page             |
//! | anything else, or panic  | logged, generic 500 page                   |

use crate::config::AppConfig;
use crate::context::{self, RequestContext};
use crate::error::{status_line, Error, Result};
use crate::interceptor::{build_chain, Interceptor, InterceptorEntry, Invocable};
use crate::request::{RawRequest, RequestView};
use crate::response::{Bytes, RawResponse, Reply, ResponseBuilder};
use crate::route::{Handler, Method, RouteDef, RouteModule};
use crate::router::RouteRegistry;
use crate::static_files::StaticFiles;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, error, info};

/// Renders `Reply::Template` values
pub trait TemplateEngine: Send + Sync {
    /// Render the named template with `model`
    ///
    /// # Errors
    ///
    /// Any error is treated as an undeclared failure (500).
    fn render(&self, name: &str, model: &serde_json::Value) -> Result<String>;
}

/// Chain terminal: resolve the route and call its handler
struct RouteTerminal {
    registry: Arc<RouteRegistry>,
    static_files: Option<Arc<StaticFiles>>,
}

impl Invocable for RouteTerminal {
    fn invoke(&self) -> BoxFuture<'static, Result<Reply>> {
        let registry = Arc::clone(&self.registry);
        let static_files = self.static_files.clone();
        Box::pin(async move {
            let ctx = context::current()?;
            let request = ctx.request();
            let (handler, args) = match registry.resolve(request.method(), request.path()) {
                Ok(resolved) => {
                    debug!(route = ?resolved.route, "dispatch");
                    (Arc::clone(&resolved.route.handler), resolved.args)
                }
                Err(Error::RouteNotFound { path }) => match static_files {
                    Some(files)
                        if request.method() == "GET" && StaticFiles::handles(request.path()) =>
                    {
                        return files.serve(request.path()).await;
                    }
                    _ => return Err(Error::RouteNotFound { path }),
                },
                Err(e) => return Err(e),
            };
            handler.call(args).await
        })
    }
}

/// Request dispatcher
pub struct Dispatcher {
    registry: Arc<RouteRegistry>,
    interceptors: Vec<InterceptorEntry>,
    templates: Option<Arc<dyn TemplateEngine>>,
    static_files: Option<Arc<StaticFiles>>,
    debug: bool,
    running: AtomicBool,
    chain: OnceLock<Arc<dyn Invocable>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("routes", &self.registry.len())
            .field("interceptors", &self.interceptors)
            .field("debug", &self.debug)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create an empty dispatcher
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Arc::new(RouteRegistry::new()),
            interceptors: Vec::new(),
            templates: None,
            static_files: None,
            debug: false,
            running: AtomicBool::new(false),
            chain: OnceLock::new(),
        }
    }

    /// Create a dispatcher honouring `config.debug`
    ///
    /// Debug mode also serves `/static/` from `config.document_root`.
    #[must_use]
    pub fn from_config(config: &AppConfig) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.debug = config.debug;
        if config.debug {
            dispatcher.static_files = Some(Arc::new(StaticFiles::new(&config.document_root)));
        }
        dispatcher
    }

    /// Serve unmatched `GET /static/...` requests from `root`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` once running.
    pub fn serve_static(&mut self, root: impl Into<std::path::PathBuf>) -> Result<()> {
        self.check_open("serve static files")?;
        let files = StaticFiles::new(root);
        info!(root = %files.root().display(), "serve static files");
        self.static_files = Some(Arc::new(files));
        Ok(())
    }

    /// Include failure details in 500 pages
    pub fn set_debug(&mut self, debug: bool) {
        self.debug = debug;
    }

    /// Whether dispatching has begun
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of registered routes
    #[must_use]
    pub fn route_count(&self) -> usize {
        self.registry.len()
    }

    fn check_open(&self, what: &str) -> Result<()> {
        if self.is_running() {
            return Err(Error::Config(format!(
                "cannot {what} after dispatching has begun"
            )));
        }
        Ok(())
    }

    fn registry_mut(&mut self) -> Result<&mut RouteRegistry> {
        self.check_open("add routes")?;
        Arc::get_mut(&mut self.registry)
            .ok_or_else(|| Error::Config("route registry is already shared".to_string()))
    }

    /// Register a route
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid template or once running.
    pub fn add_route(
        &mut self,
        method: Method,
        path: &str,
        handler: impl Handler + 'static,
    ) -> Result<()> {
        self.add_route_def(RouteDef::new(method, path, handler))
    }

    /// Register a GET route
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid template or once running.
    pub fn get(&mut self, path: &str, handler: impl Handler + 'static) -> Result<()> {
        self.add_route(Method::Get, path, handler)
    }

    /// Register a POST route
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid template or once running.
    pub fn post(&mut self, path: &str, handler: impl Handler + 'static) -> Result<()> {
        self.add_route(Method::Post, path, handler)
    }

    /// Register a prepared route declaration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid template or once running.
    pub fn add_route_def(&mut self, def: RouteDef) -> Result<()> {
        self.registry_mut()?.add_route(def)
    }

    /// Register every route a module declares, in order
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid template or once running. Routes
    /// registered before the failing one stay registered.
    pub fn add_module(&mut self, module: &dyn RouteModule) -> Result<()> {
        info!(module = module.name(), "add module");
        for def in module.routes() {
            self.add_route_def(def)?;
        }
        Ok(())
    }

    /// Register an interceptor for paths matching `pattern`
    ///
    /// Interceptors run in registration order, the first one outermost.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` for an invalid pattern or once running.
    pub fn add_interceptor(
        &mut self,
        pattern: &str,
        interceptor: impl Interceptor + 'static,
    ) -> Result<()> {
        self.check_open("add interceptors")?;
        let entry = InterceptorEntry::new(pattern, interceptor)?;
        info!(interceptor = ?entry, "add interceptor");
        self.interceptors.push(entry);
        Ok(())
    }

    /// Install the engine rendering `Reply::Template`
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` once running.
    pub fn set_template_engine(&mut self, engine: impl TemplateEngine + 'static) -> Result<()> {
        self.check_open("set the template engine")?;
        self.templates = Some(Arc::new(engine));
        Ok(())
    }

    fn chain(&self) -> Arc<dyn Invocable> {
        let chain = self.chain.get_or_init(|| {
            let terminal = Arc::new(RouteTerminal {
                registry: Arc::clone(&self.registry),
                static_files: self.static_files.clone(),
            });
            build_chain(terminal, &self.interceptors)
        });
        Arc::clone(chain)
    }

    /// Dispatch one request
    ///
    /// Never fails: every outcome, including a panic in a handler or
    /// interceptor, becomes a response.
    pub async fn handle(&self, raw: RawRequest) -> RawResponse {
        self.running.store(true, Ordering::Release);
        let chain = self.chain();
        let ctx = Arc::new(RequestContext::new(RequestView::from_raw(raw)));

        let outcome = Arc::clone(&ctx)
            .scope(AssertUnwindSafe(chain.invoke()).catch_unwind())
            .await
            .unwrap_or_else(|panic| Err(Error::Internal(panic_message(panic.as_ref()))));

        self.respond(&ctx, outcome)
    }

    fn respond(&self, ctx: &RequestContext, outcome: Result<Reply>) -> RawResponse {
        let mut response = ctx.take_response();

        let failure = match outcome.and_then(|reply| self.render(&mut response, reply)) {
            Ok(body) => return response.into_raw(body),
            Err(e) => e,
        };

        let request = ctx.request();
        match failure {
            Error::Redirect { status, location } => {
                info!(status, location = %location, "redirect");
                force_status(&mut response, status);
                response.set_header("Location", location);
                response.into_raw(Bytes::new())
            }
            e if e.is_declared() => {
                info!(
                    method = request.method(),
                    path = request.path(),
                    error = %e,
                    "declared http error"
                );
                force_status(&mut response, e.status());
                response.set_content_type("text/html; charset=utf-8");
                let page = error_page(response.status(), None);
                response.into_raw(Bytes::from(page))
            }
            e => {
                error!(
                    method = request.method(),
                    path = request.path(),
                    error = %e,
                    "unhandled error"
                );
                let detail = self.debug.then(|| format!("{e:?}"));
                let mut response = ResponseBuilder::new();
                force_status(&mut response, 500);
                response.into_raw(Bytes::from(error_page(500, detail.as_deref())))
            }
        }
    }

    fn render(&self, response: &mut ResponseBuilder, reply: Reply) -> Result<Bytes> {
        let body = match reply {
            Reply::Empty => Bytes::new(),
            Reply::Html(s) => Bytes::from(s),
            Reply::Text(s) => {
                response.set_content_type("text/plain; charset=utf-8");
                Bytes::from(s)
            }
            Reply::Bytes(b) => b,
            Reply::Json(value) => {
                response.set_content_type("application/json");
                Bytes::from(serde_json::to_vec(&value)?)
            }
            Reply::Stream(chunks) => {
                let mut body = Vec::new();
                for chunk in chunks {
                    body.extend_from_slice(&chunk);
                }
                Bytes::from(body)
            }
            Reply::Template { name, model } => {
                let engine = self
                    .templates
                    .as_ref()
                    .ok_or_else(|| Error::Internal("no template engine configured".to_string()))?;
                Bytes::from(engine.render(&name, &model)?)
            }
        };
        Ok(body)
    }
}

/// Set a status that came from an error value, falling back to 500
fn force_status(response: &mut ResponseBuilder, status: u16) {
    if response.set_status(status).is_err() {
        response.set_status(500).ok();
    }
}

/// `<html><body><h1>404 Not Found</h1></body></html>`, with an optional
/// escaped detail block
fn error_page(status: u16, detail: Option<&str>) -> String {
    let detail = detail
        .map(|d| format!("<pre>{}</pre>", escape_html(d)))
        .unwrap_or_default();
    format!(
        "<html><body><h1>{}</h1>{detail}</body></html>",
        status_line(status)
    )
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(c),
        }
    }
    out
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    let message = panic
        .downcast_ref::<&str>()
        .map(ToString::to_string)
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("handler panicked: {message}")
}
