use crate::{dispatch::Config, request::Request, response::Response};
use anyhow::Result;
use http::{HeaderName, HeaderValue, Method, StatusCode};
use tracing::warn;

pub use crate::pattern::InvalidPattern;

/// Startup-fatal registration failures.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("duplicate route: {method} {pattern}")]
    DuplicateRoute { method: Method, pattern: String },

    #[error("invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: InvalidPattern,
    },

    #[error("wildcard name {new:?} conflicts with {existing:?} registered at the same path")]
    ConflictingWildcard { existing: String, new: String },

    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(Method),

    #[error("registry is frozen; routes and middleware must be registered before serving")]
    RegistryFrozen,
}

/// A request-scoped error carrying an HTTP status.
///
/// Raised by handlers and middleware for protocol-shaped failures; the
/// resolver's default shaping honors the status anywhere in the cause
/// chain.
#[derive(Clone, Debug, thiserror::Error)]
#[error("{message}")]
pub struct HttpError {
    pub status: StatusCode,
    pub message: String,
}

/// A handler return value that could not be normalized into a response.
#[derive(Debug, thiserror::Error)]
#[error("handler return value could not be serialized: {0}")]
pub struct UnsupportedReturnType(#[from] serde_json::Error);

type HandlerResult = Result<Response>;
type TypedFn =
    Box<dyn Fn(&mut Request, &(dyn std::error::Error + 'static)) -> Option<HandlerResult> + Send + Sync>;
type NotFoundFn = Box<dyn Fn(&mut Request) -> HandlerResult + Send + Sync>;
type InternalFn = Box<dyn Fn(&mut Request, &anyhow::Error) -> HandlerResult + Send + Sync>;

struct TypedHandler {
    type_name: &'static str,
    try_call: TypedFn,
}

/// Error handlers selected by error kind, plus the two distinguished
/// slots. Populated during startup, read-only once serving begins.
#[derive(Default)]
pub struct ErrorRegistry {
    typed: Vec<TypedHandler>,
    not_found: Option<NotFoundFn>,
    internal_error: Option<InternalFn>,
}

// === impl HttpError ===

impl HttpError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, message)
    }
}

// === impl ErrorRegistry ===

impl ErrorRegistry {
    /// Registers a handler for a concrete error type. During resolution the
    /// raised error's cause chain is walked outermost-first and each cause
    /// is matched by downcast, so the most specific registered cause wins.
    pub fn on<E, F>(&mut self, handler: F)
    where
        E: std::error::Error + Send + Sync + 'static,
        F: Fn(&mut Request, &E) -> HandlerResult + Send + Sync + 'static,
    {
        self.typed.push(TypedHandler {
            type_name: std::any::type_name::<E>(),
            try_call: Box::new(move |request, cause| {
                cause.downcast_ref::<E>().map(|error| handler(request, error))
            }),
        });
    }

    pub fn set_not_found<F>(&mut self, handler: F)
    where
        F: Fn(&mut Request) -> HandlerResult + Send + Sync + 'static,
    {
        self.not_found = Some(Box::new(handler));
    }

    pub fn set_internal_error<F>(&mut self, handler: F)
    where
        F: Fn(&mut Request, &anyhow::Error) -> HandlerResult + Send + Sync + 'static,
    {
        self.internal_error = Some(Box::new(handler));
    }

    /// Resolves a request error to a response. Never fails: every fallback
    /// tier ends in the production-aware default.
    pub fn resolve(&self, request: &mut Request, error: &anyhow::Error, config: &Config) -> Response {
        for cause in error.chain() {
            for entry in &self.typed {
                if let Some(result) = (entry.try_call)(request, cause) {
                    match result {
                        Ok(response) => return response,
                        Err(handler_error) => {
                            warn!(
                                %handler_error,
                                handler = entry.type_name,
                                "Error handler failed"
                            );
                            return self.internal_or_default(request, error, config);
                        }
                    }
                }
            }
        }
        self.internal_or_default(request, error, config)
    }

    /// The custom not-found response, if a handler is registered. A failing
    /// handler falls back to the production-aware default.
    pub(crate) fn not_found_response(
        &self,
        request: &mut Request,
        config: &Config,
    ) -> Option<Response> {
        let handler = self.not_found.as_ref()?;
        let response = match handler(request) {
            Ok(response) => response,
            Err(handler_error) => {
                warn!(%handler_error, "Not-found handler failed");
                if config.production {
                    default_response(StatusCode::NOT_FOUND, "Not found", "Not found", config)
                } else {
                    default_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "Internal server error",
                        &format!("404 handler failed: {handler_error:#}"),
                        config,
                    )
                }
            }
        };
        Some(response)
    }

    fn internal_or_default(
        &self,
        request: &mut Request,
        error: &anyhow::Error,
        config: &Config,
    ) -> Response {
        if let Some(handler) = &self.internal_error {
            match handler(request, error) {
                Ok(response) => return response,
                Err(handler_error) => {
                    warn!(%handler_error, "Internal error handler failed");
                }
            }
        }
        default_for(error, config)
    }
}

/// The last-resort shaping for an unhandled error. An [`HttpError`]
/// anywhere in the chain supplies the status and short message; anything
/// else is a 500.
pub(crate) fn default_for(error: &anyhow::Error, config: &Config) -> Response {
    let (status, message) = match error
        .chain()
        .find_map(|cause| cause.downcast_ref::<HttpError>())
    {
        Some(HttpError { status, message }) => (*status, message.clone()),
        None => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error".to_string(),
        ),
    };
    tracing::error!(error = ?error, "Request failed");
    default_response(status, &message, &format!("{error:#}"), config)
}

/// Shapes a default error response. Production mode: terse JSON
/// `{"error": message}` in the configured content type. Debug mode: a
/// plain-text body carrying `detail` with an `X-Error-Detail` header.
pub(crate) fn default_response(
    status: StatusCode,
    message: &str,
    detail: &str,
    config: &Config,
) -> Response {
    if config.production {
        let mut response = match Response::json(&serde_json::json!({ "error": message })) {
            Ok(response) => response,
            Err(_) => Response::text(message.to_string()),
        };
        response.set_status(status);
        response.set_content_type(&config.default_error_content_type);
        response
    } else {
        let mut response = Response::text(detail.to_string()).with_status(status);
        if let Ok(value) = HeaderValue::from_str(detail) {
            response.insert_header(HeaderName::from_static("x-error-detail"), value);
        }
        response
    }
}
