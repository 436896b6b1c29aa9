//! # Route Metadata
//!
//! Single-responsibility module for route information: the HTTP methods the
//! runtime dispatches, the handler abstraction, and compiled routes.

use crate::error::Result;
use crate::pattern::PathPattern;
use crate::response::Reply;
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// HTTP methods supported by the router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// HTTP GET
    Get,
    /// HTTP POST
    Post,
}

impl Method {
    /// Parse a request method; anything but GET and POST is unsupported
    #[must_use]
    pub fn parse(method: &str) -> Option<Self> {
        if method.eq_ignore_ascii_case("GET") {
            Some(Self::Get)
        } else if method.eq_ignore_ascii_case("POST") {
            Some(Self::Post)
        } else {
            None
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
        }
    }
}

/// Request handler
///
/// Receives the captured placeholder values in declaration order. Request
/// data is read from the request context, not passed in.
pub trait Handler: Send + Sync {
    /// Invoke the handler
    fn call(&self, args: Vec<String>) -> BoxFuture<'static, Result<Reply>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Vec<String>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply>> + Send + 'static,
{
    fn call(&self, args: Vec<String>) -> BoxFuture<'static, Result<Reply>> {
        Box::pin(self(args))
    }
}

/// Shared handler pointer
pub type BoxedHandler = Arc<dyn Handler>;

/// Uncompiled route declaration, as produced by a `RouteModule`
#[derive(Clone)]
pub struct RouteDef {
    /// HTTP method
    pub method: Method,
    /// Path template (e.g. `/blog/:id`)
    pub path: String,
    /// Handler
    pub handler: BoxedHandler,
}

impl RouteDef {
    /// Declare a route
    pub fn new(method: Method, path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self {
            method,
            path: path.into(),
            handler: Arc::new(handler),
        }
    }

    /// Declare a GET route
    pub fn get(path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::new(Method::Get, path, handler)
    }

    /// Declare a POST route
    pub fn post(path: impl Into<String>, handler: impl Handler + 'static) -> Self {
        Self::new(Method::Post, path, handler)
    }
}

impl fmt::Debug for RouteDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteDef({} {})", self.method, self.path)
    }
}

/// Bulk route source, used by business layers to register a group of handlers
pub trait RouteModule {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Routes to register, in order
    fn routes(&self) -> Vec<RouteDef>;
}

/// Compiled route, immutable after registration
#[derive(Clone)]
pub struct Route {
    /// HTTP method
    pub method: Method,
    /// Compiled template
    pub pattern: PathPattern,
    /// Handler
    pub handler: BoxedHandler,
}

impl Route {
    /// Compile a route declaration
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the template is invalid.
    pub fn compile(def: RouteDef) -> Result<Self> {
        Ok(Self {
            method: def.method,
            pattern: PathPattern::compile(&def.path)?,
            handler: def.handler,
        })
    }

    /// Whether the route has no placeholders
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.pattern.is_static()
    }

    /// Source template
    #[must_use]
    pub fn path(&self) -> &str {
        self.pattern.template()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_static() { "static" } else { "dynamic" };
        write!(f, "Route({kind},{},path={})", self.method, self.path())
    }
}
