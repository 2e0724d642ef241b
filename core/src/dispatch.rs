use crate::{
    error::{self, ErrorRegistry},
    middleware::MiddlewareRegistry,
    request::Request,
    response::Response,
    router::{Route, RouteMatch, Router},
};
use anyhow::Result;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use std::sync::Arc;
use tracing::{debug, trace};

/// Construction-time options. Fixed once the application is frozen.
#[derive(Clone, Debug)]
pub struct Config {
    /// Terse JSON error bodies when true; detail bodies and the
    /// `X-Error-Detail` header when false.
    pub production: bool,

    /// When true (the default), `/x` and `/x/` are distinct paths.
    pub strict_trailing_slash: bool,

    /// Content type of default error bodies in production mode.
    pub default_error_content_type: String,
}

/// Request body media types accepted by the content-type gate.
const ALLOWED_CONTENT_TYPES: [&str; 4] = [
    "application/json",
    "application/x-www-form-urlencoded",
    "text/plain",
    "multipart/form-data",
];

/// The frozen per-request pipeline: match, pre-route middleware, handler,
/// normalization, post-route middleware, with every failure diverted to the
/// error resolver.
///
/// Cheap to clone; the registries behind it are immutable, so dispatch
/// takes no locks.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish()
    }
}

pub(crate) struct Inner {
    pub(crate) router: Router,
    pub(crate) middleware: MiddlewareRegistry,
    pub(crate) errors: ErrorRegistry,
    pub(crate) config: Config,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            production: false,
            strict_trailing_slash: true,
            default_error_content_type: "application/json".to_string(),
        }
    }
}

// === impl Dispatcher ===

impl Dispatcher {
    pub(crate) fn new(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// All registered `(method, pattern)` pairs.
    pub fn routes(&self) -> Vec<(Method, String)> {
        self.inner.router.routes()
    }

    /// The I/O-boundary entry point: builds the request from raw parts
    /// (splitting the query string off the raw path) and dispatches it.
    pub fn handle(&self, method: Method, raw_path: &str, headers: HeaderMap, body: Bytes) -> Response {
        let mut request = Request::new(method, raw_path, headers, body);
        self.dispatch(&mut request)
    }

    /// Runs one request to completion. Always produces a response.
    pub fn dispatch(&self, request: &mut Request) -> Response {
        let Inner {
            router,
            middleware,
            errors,
            config,
        } = &*self.inner;

        let path = self.effective_path(request.path());
        match router.at(request.method(), &path) {
            RouteMatch::NotFound => {
                trace!(method = %request.method(), %path, "No route");
                self.not_found(request)
            }
            RouteMatch::MethodNotAllowed { allow } => {
                trace!(method = %request.method(), %path, ?allow, "Method not allowed");
                self.method_not_allowed(request, &allow)
            }
            RouteMatch::Match { route, params } => {
                debug!(
                    method = %request.method(),
                    %path,
                    pattern = route.pattern(),
                    "Matched route"
                );
                request.set_params(params);

                if let Some(rejection) = self.check_content_type(request) {
                    return rejection;
                }

                match self.run(route, request) {
                    Ok(mut response) => {
                        for entry in middleware.post() {
                            if let Err(error) = (entry.func())(request, &mut response) {
                                trace!(
                                    name = entry.name().unwrap_or("<unnamed>"),
                                    "Post-route middleware failed"
                                );
                                // The post chain is not re-run against the
                                // error response.
                                return errors.resolve(request, &error, config);
                            }
                        }
                        response
                    }
                    Err(error) => errors.resolve(request, &error, config),
                }
            }
        }
    }

    /// The pre-route chain, the handler, and normalization. A
    /// short-circuiting middleware response skips the rest of the chain and
    /// the handler but still flows into the caller's post-route phase.
    fn run(&self, route: &Route, request: &mut Request) -> Result<Response> {
        for entry in self.inner.middleware.pre() {
            if let Some(response) = (entry.func())(request)? {
                debug!(
                    name = entry.name().unwrap_or("<unnamed>"),
                    "Pre-route middleware short-circuited"
                );
                return Ok(response);
            }
        }
        for func in route.middleware() {
            if let Some(response) = func(request)? {
                debug!(pattern = route.pattern(), "Route middleware short-circuited");
                return Ok(response);
            }
        }

        let outcome = (route.handler())(request)?;
        Ok(outcome.into_response()?)
    }

    fn effective_path(&self, path: &str) -> String {
        if self.inner.config.strict_trailing_slash {
            return path.to_string();
        }
        let folded = path.trim_end_matches('/');
        if folded.is_empty() {
            "/".to_string()
        } else {
            folded.to_string()
        }
    }

    /// Rejects bodies outside the media-type allow-list before any
    /// middleware runs. An absent content type passes for bodyless methods
    /// and for empty bodies.
    fn check_content_type(&self, request: &Request) -> Option<Response> {
        let config = &self.inner.config;
        match request.content_type() {
            Some(content_type) => {
                let media_type = content_type.to_ascii_lowercase();
                if ALLOWED_CONTENT_TYPES.contains(&media_type.as_str()) {
                    None
                } else {
                    debug!(%content_type, "Rejecting unsupported media type");
                    Some(error::default_response(
                        StatusCode::UNSUPPORTED_MEDIA_TYPE,
                        "Unsupported media type",
                        &format!("Unsupported media type: {content_type}"),
                        config,
                    ))
                }
            }
            None if is_bodyless(request.method()) || request.body().is_empty() => None,
            None => Some(error::default_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "Unsupported media type",
                "Missing Content-Type for a request body",
                config,
            )),
        }
    }

    fn not_found(&self, request: &mut Request) -> Response {
        let Inner { errors, config, .. } = &*self.inner;
        if let Some(response) = errors.not_found_response(request, config) {
            return response;
        }
        if config.production {
            error::default_response(StatusCode::NOT_FOUND, "Not found", "Not found", config)
        } else {
            let body = format!("Not Found: {} {}", request.method(), request.path());
            let mut response = Response::text(body).with_status(StatusCode::NOT_FOUND);
            insert_str_header(&mut response, "x-error-path", request.path());
            response
        }
    }

    fn method_not_allowed(&self, request: &mut Request, allow: &[Method]) -> Response {
        let config = &self.inner.config;
        let mut response = if config.production {
            error::default_response(
                StatusCode::METHOD_NOT_ALLOWED,
                "Method not allowed",
                "Method not allowed",
                config,
            )
        } else {
            let body = format!(
                "Method Not Allowed: {} {}",
                request.method(),
                request.path()
            );
            let mut response = Response::text(body).with_status(StatusCode::METHOD_NOT_ALLOWED);
            insert_str_header(&mut response, "x-error-path", request.path());
            response
        };
        let allow = allow
            .iter()
            .map(Method::as_str)
            .collect::<Vec<_>>()
            .join(", ");
        if let Ok(value) = HeaderValue::from_str(&allow) {
            response.insert_header(header::ALLOW, value);
        }
        response
    }
}

fn is_bodyless(method: &Method) -> bool {
    matches!(
        method.as_str(),
        "GET" | "HEAD" | "OPTIONS" | "DELETE"
    )
}

fn insert_str_header(response: &mut Response, name: &'static str, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        response.insert_header(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        app::{App, RouteOptions},
        middleware::PreMiddleware,
        response::Outcome,
    };
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, thiserror::Error)]
    #[error("invalid value")]
    struct InvalidValue;

    fn production_config() -> Config {
        Config {
            production: true,
            ..Config::default()
        }
    }

    fn send(dispatcher: &Dispatcher, method: Method, path: &str) -> Response {
        dispatcher.handle(method, path, HeaderMap::new(), Bytes::new())
    }

    fn get(dispatcher: &Dispatcher, path: &str) -> Response {
        send(dispatcher, Method::GET, path)
    }

    fn post_with(
        dispatcher: &Dispatcher,
        path: &str,
        content_type: Option<&str>,
        body: &'static [u8],
    ) -> Response {
        let mut headers = HeaderMap::new();
        if let Some(content_type) = content_type {
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_str(content_type).expect("valid header"),
            );
        }
        dispatcher.handle(Method::POST, path, headers, Bytes::from_static(body))
    }

    #[test]
    fn typed_route_end_to_end() {
        let mut app = App::new();
        app.get("/users/{id:int}", |req| {
            let id = req.params().get("id").unwrap_or_default().to_string();
            Ok(serde_json::json!({ "id": id }))
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/users/42");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), br#"{"id":"42"}"#);

        let response = get(&dispatcher, "/users/abc");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = send(&dispatcher, Method::POST, "/users/42");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).map(|v| v.as_bytes()),
            Some(&b"GET"[..]),
        );
    }

    #[test]
    fn allow_header_lists_methods_sorted() {
        let mut app = App::with_config(production_config());
        app.get("/m", |_req| Ok(())).expect("should register");
        app.post("/m", |_req| Ok(())).expect("should register");
        app.delete("/m", |_req| Ok(())).expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = send(&dispatcher, Method::PUT, "/m");
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(
            response.headers().get(header::ALLOW).map(|v| v.as_bytes()),
            Some(&b"DELETE, GET, POST"[..]),
        );
        assert_eq!(
            response.body().as_ref(),
            br#"{"error":"Method not allowed"}"#
        );
    }

    #[test]
    fn global_middleware_runs_in_priority_order() {
        let mut app = App::new();
        app.register_pre(10, Some("m1"), |req| {
            req.context_mut().insert("x", "1".to_string());
            Ok(None)
        })
        .expect("should register");
        app.register_pre(5, Some("m2"), |req| {
            req.context_mut().insert("x", "2".to_string());
            Ok(None)
        })
        .expect("should register");
        app.get("/ctx", |req| {
            let x = req
                .context()
                .get::<String>("x")
                .cloned()
                .unwrap_or_default();
            Ok(x)
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        // m2 (priority 5) runs first; m1 (priority 10) overwrites.
        let response = get(&dispatcher, "/ctx");
        assert_eq!(response.body().as_ref(), b"1");
    }

    #[test]
    fn short_circuit_skips_handler_but_not_post_chain() {
        let handler_ran = Arc::new(AtomicBool::new(false));
        let observed_status = Arc::new(AtomicUsize::new(0));

        let mut app = App::new();
        app.register_post(0, Some("observe"), {
            let observed_status = observed_status.clone();
            move |_req, response| {
                observed_status.store(response.status().as_u16() as usize, Ordering::SeqCst);
                response.insert_header(
                    HeaderName::from_static("x-observed"),
                    HeaderValue::from_static("yes"),
                );
                Ok(())
            }
        })
        .expect("should register");

        let deny: PreMiddleware =
            Arc::new(|_req| Ok(Some(Response::text("denied").with_status(StatusCode::UNAUTHORIZED))));
        app.route_with(
            Method::GET,
            "/private",
            {
                let handler_ran = handler_ran.clone();
                move |_req| {
                    handler_ran.store(true, Ordering::SeqCst);
                    Ok(())
                }
            },
            RouteOptions {
                middleware: vec![deny],
                overwrite: false,
            },
        )
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/private");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(!handler_ran.load(Ordering::SeqCst));
        assert_eq!(observed_status.load(Ordering::SeqCst), 401);
        assert!(response.headers().contains_key("x-observed"));
    }

    #[test]
    fn typed_error_handler_maps_status() {
        let mut app = App::new();
        app.get("/boom", |_req| -> anyhow::Result<Outcome> {
            Err(anyhow::Error::new(InvalidValue))
        })
        .expect("should register");
        app.on_error::<InvalidValue, _>(|_req, _error| {
            Ok(Response::json(&serde_json::json!({"error": "invalid"}))?
                .with_status(StatusCode::BAD_REQUEST))
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/boom");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unregistered_error_shape_depends_on_mode() {
        for production in [true, false] {
            let mut app = App::with_config(Config {
                production,
                ..Config::default()
            });
            app.get("/boom", |_req| -> anyhow::Result<Outcome> {
                Err(anyhow::Error::new(InvalidValue))
            })
            .expect("should register");
            let dispatcher = app.freeze().expect("should freeze");

            let response = get(&dispatcher, "/boom");
            assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
            if production {
                assert_eq!(
                    response.body().as_ref(),
                    br#"{"error":"Internal server error"}"#
                );
                assert!(!response.headers().contains_key("x-error-detail"));
            } else {
                assert_eq!(
                    response
                        .headers()
                        .get("x-error-detail")
                        .map(|v| v.as_bytes()),
                    Some(&b"invalid value"[..]),
                );
            }
        }
    }

    #[test]
    fn wildcard_binds_remainder() {
        let mut app = App::new();
        app.get("/files/*rest", |req| {
            Ok(req.params().get("rest").unwrap_or_default().to_string())
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/files/a/b/c.txt");
        assert_eq!(response.body().as_ref(), b"a/b/c.txt");
    }

    #[test]
    fn content_type_gate_runs_before_middleware() {
        let pre_ran = Arc::new(AtomicBool::new(false));

        let mut app = App::with_config(production_config());
        app.register_pre(0, Some("flag"), {
            let pre_ran = pre_ran.clone();
            move |_req| {
                pre_ran.store(true, Ordering::SeqCst);
                Ok(None)
            }
        })
        .expect("should register");
        app.post("/upload", |_req| Ok(())).expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = post_with(&dispatcher, "/upload", Some("application/xml"), b"<x/>");
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        assert_eq!(
            response.body().as_ref(),
            br#"{"error":"Unsupported media type"}"#
        );
        assert!(!pre_ran.load(Ordering::SeqCst));

        // Parameters are ignored and the comparison is case-insensitive.
        let response = post_with(
            &dispatcher,
            "/upload",
            Some("Application/JSON; charset=utf-8"),
            b"{}",
        );
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(pre_ran.load(Ordering::SeqCst));
    }

    #[test]
    fn absent_content_type_rules() {
        let mut app = App::new();
        app.post("/upload", |_req| Ok(())).expect("should register");
        app.get("/page", |_req| Ok(())).expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        // Bodyless method without a content type.
        let response = get(&dispatcher, "/page");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        // Body-carrying method: an empty body passes, a non-empty body
        // without a content type is rejected.
        let response = post_with(&dispatcher, "/upload", None, b"");
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = post_with(&dispatcher, "/upload", None, b"payload");
        assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }

    #[test]
    fn failing_post_middleware_does_not_rerun_post_chain() {
        let later_ran = Arc::new(AtomicUsize::new(0));

        let mut app = App::with_config(production_config());
        app.register_post(0, Some("boom"), |_req, _response| {
            Err(anyhow::anyhow!("post failed"))
        })
        .expect("should register");
        app.register_post(1, Some("later"), {
            let later_ran = later_ran.clone();
            move |_req, _response| {
                later_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .expect("should register");
        app.get("/x", |_req| Ok(())).expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/x");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(later_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn handler_error_skips_post_chain() {
        let post_ran = Arc::new(AtomicUsize::new(0));

        let mut app = App::with_config(production_config());
        app.register_post(0, Some("count"), {
            let post_ran = post_ran.clone();
            move |_req, _response| {
                post_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        })
        .expect("should register");
        app.get("/boom", |_req| -> anyhow::Result<Outcome> {
            Err(anyhow::anyhow!("handler failed"))
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/boom");
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(post_ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn trailing_slash_strictness() {
        let mut app = App::new();
        app.get("/x", |_req| Ok("ok")).expect("should register");
        let strict = app.freeze().expect("should freeze");
        assert_eq!(get(&strict, "/x").status(), StatusCode::OK);
        assert_eq!(get(&strict, "/x/").status(), StatusCode::NOT_FOUND);

        let mut app = App::with_config(Config {
            strict_trailing_slash: false,
            ..Config::default()
        });
        app.get("/x", |_req| Ok("ok")).expect("should register");
        let lax = app.freeze().expect("should freeze");
        assert_eq!(get(&lax, "/x").status(), StatusCode::OK);
        assert_eq!(get(&lax, "/x/").status(), StatusCode::OK);
    }

    #[test]
    fn custom_not_found_handler() {
        let mut app = App::new();
        app.set_not_found(|req| {
            Ok(Response::json(&serde_json::json!({
                "error": "not found",
                "path": req.path(),
            }))?
            .with_status(StatusCode::NOT_FOUND))
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/missing");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.body().as_ref(),
            br#"{"error":"not found","path":"/missing"}"#
        );
    }

    #[test]
    fn failing_not_found_handler_falls_back() {
        let mut app = App::with_config(production_config());
        app.set_not_found(|_req| Err(anyhow::anyhow!("404 handler broke")))
            .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/missing");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.body().as_ref(), br#"{"error":"Not found"}"#);
    }

    #[test]
    fn query_string_split_from_path() {
        let mut app = App::new();
        app.get("/echo", |req| {
            let pairs = req
                .query_params()
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(";");
            Ok(pairs)
        })
        .expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/echo?a=1&b=two%20words");
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.body().as_ref(), b"a=1;b=two words");
    }

    #[test]
    fn debug_not_found_carries_path_header() {
        let mut app = App::new();
        app.get("/x", |_req| Ok(())).expect("should register");
        let dispatcher = app.freeze().expect("should freeze");

        let response = get(&dispatcher, "/missing");
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get("x-error-path").map(|v| v.as_bytes()),
            Some(&b"/missing"[..]),
        );
        assert_eq!(response.body().as_ref(), b"Not Found: GET /missing");
    }
}
