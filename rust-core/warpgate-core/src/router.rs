//! # Router
//!
//! Method-indexed route registry with two tables:
//!
//! - an exact-match table for static paths, looked up first
//! - an ordered list per method for templates with placeholders
//!
//! Dynamic routes are tried in registration order and the first match wins.
//! There is no specificity ranking: registering `/:a/:b` before `/:a/edit`
//! means `/post/edit` is served by `/:a/:b`. A static path always beats the
//! templates.

use crate::error::{Error, Result};
use crate::route::{Method, Route, RouteDef};
use std::collections::HashMap;
use tracing::{debug, info};

/// Route matched for a request, with its captured arguments
#[derive(Debug)]
pub struct Resolved<'a> {
    /// Matched route
    pub route: &'a Route,
    /// Captured placeholder values, in declaration order
    pub args: Vec<String>,
}

/// Route registry
#[derive(Clone, Default)]
pub struct RouteRegistry {
    statics: HashMap<(Method, String), Route>,
    dynamics: HashMap<Method, Vec<Route>>,
}

impl RouteRegistry {
    /// Create a new empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a route
    ///
    /// A static path registered twice for the same method replaces the
    /// earlier handler.
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` if the template is invalid.
    pub fn add_route(&mut self, def: RouteDef) -> Result<()> {
        let route = Route::compile(def)?;
        info!(route = ?route, "add route");

        if route.is_static() {
            self.statics
                .insert((route.method, route.path().to_string()), route);
        } else {
            self.dynamics.entry(route.method).or_default().push(route);
        }
        Ok(())
    }

    /// Resolve a request to a route
    ///
    /// # Errors
    ///
    /// - `Error::BadRequest` if the method is not GET or POST
    /// - `Error::RouteNotFound` if nothing matches
    pub fn resolve(&self, method: &str, path: &str) -> Result<Resolved<'_>> {
        let method = Method::parse(method)
            .ok_or_else(|| Error::bad_request(format!("unsupported method {method}")))?;

        if let Some(route) = self.statics.get(&(method, path.to_string())) {
            debug!(%method, path, "static route hit");
            return Ok(Resolved {
                route,
                args: Vec::new(),
            });
        }

        self.dynamics
            .get(&method)
            .into_iter()
            .flatten()
            .find_map(|route| {
                route
                    .pattern
                    .matches(path)
                    .map(|args| Resolved { route, args })
            })
            .ok_or_else(|| Error::RouteNotFound {
                path: path.to_string(),
            })
    }

    /// Number of registered routes
    #[must_use]
    pub fn len(&self) -> usize {
        self.statics.len() + self.dynamics.values().map(Vec::len).sum::<usize>()
    }

    /// Whether no route is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::Reply;

    fn named(name: &'static str) -> impl crate::route::Handler {
        move |_args: Vec<String>| async move { Ok::<_, Error>(Reply::from(name)) }
    }

    async fn name_of(resolved: &Resolved<'_>) -> String {
        match resolved.route.handler.call(resolved.args.clone()).await.unwrap() {
            Reply::Html(s) => s,
            other => panic!("unexpected reply {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_basic_routing() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/", named("root"))).unwrap();
        router.add_route(RouteDef::get("/users", named("list"))).unwrap();
        router.add_route(RouteDef::post("/users", named("create"))).unwrap();
        assert_eq!(router.len(), 3);

        let m = router.resolve("GET", "/").unwrap();
        assert_eq!(name_of(&m).await, "root");
        let m = router.resolve("GET", "/users").unwrap();
        assert_eq!(name_of(&m).await, "list");
        let m = router.resolve("POST", "/users").unwrap();
        assert_eq!(name_of(&m).await, "create");
    }

    #[tokio::test]
    async fn test_path_parameters() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/users/:id", named("user"))).unwrap();
        router
            .add_route(RouteDef::get("/users/:user_id/posts/:post_id", named("post")))
            .unwrap();

        let m = router.resolve("GET", "/users/123").unwrap();
        assert_eq!(m.args, vec!["123"]);

        let m = router.resolve("GET", "/users/456/posts/789").unwrap();
        assert_eq!(m.args, vec!["456", "789"]);
        assert_eq!(name_of(&m).await, "post");
    }

    #[tokio::test]
    async fn test_static_table_checked_before_dynamic_list() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/:page", named("page"))).unwrap();
        router.add_route(RouteDef::get("/about", named("about"))).unwrap();

        let m = router.resolve("GET", "/about").unwrap();
        assert_eq!(name_of(&m).await, "about");
    }

    #[tokio::test]
    async fn test_first_dynamic_match_wins() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/:a/:b", named("first"))).unwrap();
        router.add_route(RouteDef::get("/blog/:id", named("second"))).unwrap();

        let m = router.resolve("GET", "/blog/42").unwrap();
        assert_eq!(name_of(&m).await, "first");
        assert_eq!(m.args, vec!["blog", "42"]);
    }

    #[tokio::test]
    async fn test_earlier_template_shadows_later_one() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/:a/:b", named("pair"))).unwrap();
        router.add_route(RouteDef::get("/:a/edit", named("edit"))).unwrap();

        let m = router.resolve("GET", "/post/edit").unwrap();
        assert_eq!(name_of(&m).await, "pair");
        assert_eq!(m.args, vec!["post", "edit"]);
    }

    #[test]
    fn test_route_not_found() {
        let router = RouteRegistry::new();
        let result = router.resolve("GET", "/nonexistent");
        assert!(matches!(result, Err(Error::RouteNotFound { .. })));
    }

    #[test]
    fn test_method_mismatch_is_not_found() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/users", named("list"))).unwrap();

        let result = router.resolve("POST", "/users");
        assert!(matches!(result, Err(Error::RouteNotFound { .. })));
    }

    #[test]
    fn test_unsupported_method_is_bad_request() {
        let mut router = RouteRegistry::new();
        router.add_route(RouteDef::get("/users", named("list"))).unwrap();

        let result = router.resolve("DELETE", "/users");
        assert!(matches!(result, Err(Error::BadRequest { .. })));
    }

    #[test]
    fn test_invalid_template_rejected() {
        let mut router = RouteRegistry::new();
        let result = router.add_route(RouteDef::get("/:a:b", named("x")));
        assert!(matches!(result, Err(Error::Config(_))));
        assert!(router.is_empty());
    }
}
