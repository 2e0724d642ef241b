use crate::{
    dispatch::{Config, Dispatcher, Inner},
    error::{ErrorRegistry, RegistrationError},
    middleware::{MiddlewareRegistry, PreMiddleware},
    request::Request,
    response::{Outcome, Response},
    router::{Handler, Router},
};
use anyhow::Result;
use http::Method;
use std::sync::Arc;

/// Per-route registration options.
#[derive(Default)]
pub struct RouteOptions {
    /// Pre-route middleware run after the global pre chain, in the order
    /// given.
    pub middleware: Vec<PreMiddleware>,
    /// Replace an existing `(method, pattern)` registration instead of
    /// failing with `DuplicateRoute`.
    pub overwrite: bool,
}

/// The application builder. Routes, middleware, and error handlers are
/// published here during single-threaded startup; [`App::freeze`] produces
/// the immutable [`Dispatcher`] and every later mutation fails with
/// [`RegistrationError::RegistryFrozen`].
pub struct App {
    router: Router,
    middleware: MiddlewareRegistry,
    errors: ErrorRegistry,
    config: Config,
    frozen: bool,
}

/// A pre-built group of routes merged into an [`App`] under a path prefix.
pub struct RouteGroup {
    prefix: String,
    routes: Vec<PendingRoute>,
}

struct PendingRoute {
    method: Method,
    pattern: String,
    handler: Handler,
    middleware: Vec<PreMiddleware>,
    overwrite: bool,
}

// === impl App ===

impl App {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            router: Router::default(),
            middleware: MiddlewareRegistry::default(),
            errors: ErrorRegistry::default(),
            config,
            frozen: false,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn route<T, H>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
    ) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route_with(method, pattern, handler, RouteOptions::default())
    }

    pub fn route_with<T, H>(
        &mut self,
        method: Method,
        pattern: &str,
        handler: H,
        options: RouteOptions,
    ) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        let handler: Handler = Arc::new(move |request| handler(request).map(Into::into));
        self.router
            .insert(method, pattern, handler, options.middleware, options.overwrite)
    }

    pub fn get<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, pattern, handler)
    }

    pub fn patch<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::PATCH, pattern, handler)
    }

    pub fn head<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::HEAD, pattern, handler)
    }

    pub fn options<T, H>(&mut self, pattern: &str, handler: H) -> Result<(), RegistrationError>
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::OPTIONS, pattern, handler)
    }

    /// Registers a global pre-route middleware. Lower priorities run
    /// earlier; ties break by registration order.
    pub fn register_pre<M>(
        &mut self,
        priority: i32,
        name: Option<&str>,
        middleware: M,
    ) -> Result<(), RegistrationError>
    where
        M: Fn(&mut Request) -> Result<Option<Response>> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        self.middleware
            .register_pre(Arc::new(middleware), priority, name.map(str::to_string));
        Ok(())
    }

    /// Registers a global post-route middleware.
    pub fn register_post<M>(
        &mut self,
        priority: i32,
        name: Option<&str>,
        middleware: M,
    ) -> Result<(), RegistrationError>
    where
        M: Fn(&mut Request, &mut Response) -> Result<()> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        self.middleware
            .register_post(Arc::new(middleware), priority, name.map(str::to_string));
        Ok(())
    }

    /// Registers an error handler for a concrete error type.
    pub fn on_error<E, F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&mut Request, &E) -> Result<Response> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        self.errors.on(handler);
        Ok(())
    }

    pub fn set_not_found<F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(&mut Request) -> Result<Response> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        self.errors.set_not_found(handler);
        Ok(())
    }

    pub fn set_internal_error<F>(&mut self, handler: F) -> Result<(), RegistrationError>
    where
        F: Fn(&mut Request, &anyhow::Error) -> Result<Response> + Send + Sync + 'static,
    {
        self.ensure_unfrozen()?;
        self.errors.set_internal_error(handler);
        Ok(())
    }

    /// Merges a group's routes, prefixing each pattern with the group's
    /// prefix.
    pub fn include(&mut self, group: RouteGroup) -> Result<(), RegistrationError> {
        self.ensure_unfrozen()?;
        let RouteGroup { prefix, routes } = group;
        for pending in routes {
            let pattern = join_prefix(&prefix, &pending.pattern);
            self.router.insert(
                pending.method,
                &pattern,
                pending.handler,
                pending.middleware,
                pending.overwrite,
            )?;
        }
        Ok(())
    }

    /// All registered `(method, pattern)` pairs.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.router.routes()
    }

    /// Freezes the registries and produces the dispatcher. Serving-time
    /// state is immutable and lock-free; any registration attempted after
    /// this fails with `RegistryFrozen`.
    pub fn freeze(&mut self) -> Result<Dispatcher, RegistrationError> {
        self.ensure_unfrozen()?;
        self.frozen = true;
        Ok(Dispatcher::new(Inner {
            router: std::mem::take(&mut self.router),
            middleware: std::mem::take(&mut self.middleware),
            errors: std::mem::take(&mut self.errors),
            config: self.config.clone(),
        }))
    }

    fn ensure_unfrozen(&self) -> Result<(), RegistrationError> {
        if self.frozen {
            Err(RegistrationError::RegistryFrozen)
        } else {
            Ok(())
        }
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

// === impl RouteGroup ===

impl RouteGroup {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            routes: Vec::new(),
        }
    }

    /// Queues a route. Patterns are validated when the group is included.
    pub fn route<T, H>(mut self, method: Method, pattern: &str, handler: H) -> Self
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.routes.push(PendingRoute {
            method,
            pattern: pattern.to_string(),
            handler: Arc::new(move |request| handler(request).map(Into::into)),
            middleware: Vec::new(),
            overwrite: false,
        });
        self
    }

    pub fn get<T, H>(self, pattern: &str, handler: H) -> Self
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::GET, pattern, handler)
    }

    pub fn post<T, H>(self, pattern: &str, handler: H) -> Self
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::POST, pattern, handler)
    }

    pub fn put<T, H>(self, pattern: &str, handler: H) -> Self
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::PUT, pattern, handler)
    }

    pub fn delete<T, H>(self, pattern: &str, handler: H) -> Self
    where
        T: Into<Outcome>,
        H: Fn(&mut Request) -> Result<T> + Send + Sync + 'static,
    {
        self.route(Method::DELETE, pattern, handler)
    }
}

fn join_prefix(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    if pattern == "/" {
        if prefix.is_empty() {
            "/".to_string()
        } else {
            prefix.to_string()
        }
    } else {
        format!("{prefix}{pattern}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frozen_registry_rejects_mutation() {
        let mut app = App::new();
        app.get("/x", |_req| Ok(())).expect("should register");
        let _dispatcher = app.freeze().expect("should freeze");

        let err = app.get("/y", |_req| Ok(())).expect_err("should fail");
        assert!(matches!(err, RegistrationError::RegistryFrozen));

        let err = app
            .register_pre(0, None, |_req| Ok(None))
            .expect_err("should fail");
        assert!(matches!(err, RegistrationError::RegistryFrozen));

        let err = app.freeze().expect_err("should fail");
        assert!(matches!(err, RegistrationError::RegistryFrozen));
    }

    #[test]
    fn prefix_joining() {
        assert_eq!(join_prefix("/api", "/users"), "/api/users");
        assert_eq!(join_prefix("/api/", "/users"), "/api/users");
        assert_eq!(join_prefix("/api", "/"), "/api");
        assert_eq!(join_prefix("", "/users"), "/users");
    }

    #[test]
    fn included_group_routes_carry_the_prefix() {
        use bytes::Bytes;
        use http::{HeaderMap, StatusCode};

        let group = RouteGroup::new("/api")
            .get("/users", |_req| Ok("users"))
            .post("/users", |_req| Ok(()));

        let mut app = App::new();
        app.include(group).expect("should include");
        assert_eq!(
            app.routes(),
            vec![
                (Method::GET, "/api/users".to_string()),
                (Method::POST, "/api/users".to_string()),
            ],
        );

        let dispatcher = app.freeze().expect("should freeze");
        let response = dispatcher.handle(Method::GET, "/api/users", HeaderMap::new(), Bytes::new());
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"users");

        let response = dispatcher.handle(Method::GET, "/users", HeaderMap::new(), Bytes::new());
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn registration_failures_surface() {
        let mut app = App::new();
        app.get("/users/{id}", |_req| Ok(())).expect("should register");

        let err = app
            .get("/users/{id}", |_req| Ok(()))
            .expect_err("should fail");
        assert!(matches!(err, RegistrationError::DuplicateRoute { .. }));

        let err = app.get("bad", |_req| Ok(())).expect_err("should fail");
        assert!(matches!(err, RegistrationError::InvalidPattern { .. }));
    }
}
