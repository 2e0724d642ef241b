use crate::error::UnsupportedReturnType;
use bytes::Bytes;
use http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

/// The canonical response consumed by the I/O boundary.
///
/// The content type is carried as an ordinary header so the map stays the
/// single source of truth for the wire.
#[derive(Clone, Debug)]
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

/// The polymorphic value a handler may return.
///
/// Normalization into a [`Response`] happens after the handler and before
/// post-route middleware, so post-route middleware always observes the
/// canonical shape.
#[derive(Debug)]
pub enum Outcome {
    /// Used unchanged.
    Response(Response),
    /// Serialized to a JSON response, status 200.
    Json(serde_json::Value),
    /// An HTML response, status 200.
    Html(String),
    /// Raw bytes, status 200, `application/octet-stream`.
    Bytes(Bytes),
    /// An empty 204 response.
    Empty,
}

// === impl Response ===

impl Response {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// A JSON response. Serialization failure surfaces as
    /// [`UnsupportedReturnType`] and is routed to the error resolver.
    pub fn json<T: Serialize>(body: &T) -> Result<Self, UnsupportedReturnType> {
        let bytes = serde_json::to_vec(body)?;
        Ok(Self::with_body(
            StatusCode::OK,
            HeaderValue::from_static("application/json"),
            bytes.into(),
        ))
    }

    pub fn html(body: impl Into<String>) -> Self {
        Self::with_body(
            StatusCode::OK,
            HeaderValue::from_static("text/html; charset=utf-8"),
            body.into().into(),
        )
    }

    pub fn text(body: impl Into<String>) -> Self {
        Self::with_body(
            StatusCode::OK,
            HeaderValue::from_static("text/plain"),
            body.into().into(),
        )
    }

    pub fn bytes(body: impl Into<Bytes>) -> Self {
        Self::with_body(
            StatusCode::OK,
            HeaderValue::from_static("application/octet-stream"),
            body.into(),
        )
    }

    pub fn empty() -> Self {
        Self::new(StatusCode::NO_CONTENT)
    }

    fn with_body(status: StatusCode, content_type: HeaderValue, body: Bytes) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, content_type);
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = status;
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn insert_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replaces the content type, ignoring values that are not legal header
    /// text.
    pub fn set_content_type(&mut self, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(header::CONTENT_TYPE, value);
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(header::CONTENT_TYPE)?.to_str().ok()
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_parts(self) -> (StatusCode, HeaderMap, Bytes) {
        (self.status, self.headers, self.body)
    }
}

// === impl Outcome ===

impl Outcome {
    /// Normalizes the handler's raw return value.
    ///
    /// | Outcome | Response |
    /// |---|---|
    /// | `Response` | unchanged |
    /// | `Json` | 200, `application/json` |
    /// | `Html` | 200, `text/html; charset=utf-8` |
    /// | `Bytes` | 200, `application/octet-stream` |
    /// | `Empty` | 204, empty body |
    pub fn into_response(self) -> Result<Response, UnsupportedReturnType> {
        match self {
            Outcome::Response(response) => Ok(response),
            Outcome::Json(value) => Response::json(&value),
            Outcome::Html(body) => Ok(Response::html(body)),
            Outcome::Bytes(body) => Ok(Response::bytes(body)),
            Outcome::Empty => Ok(Response::empty()),
        }
    }
}

impl From<Response> for Outcome {
    fn from(response: Response) -> Self {
        Outcome::Response(response)
    }
}

impl From<serde_json::Value> for Outcome {
    fn from(value: serde_json::Value) -> Self {
        Outcome::Json(value)
    }
}

impl From<String> for Outcome {
    fn from(body: String) -> Self {
        Outcome::Html(body)
    }
}

impl From<&str> for Outcome {
    fn from(body: &str) -> Self {
        Outcome::Html(body.to_string())
    }
}

impl From<Bytes> for Outcome {
    fn from(body: Bytes) -> Self {
        Outcome::Bytes(body)
    }
}

impl From<Vec<u8>> for Outcome {
    fn from(body: Vec<u8>) -> Self {
        Outcome::Bytes(body.into())
    }
}

impl From<()> for Outcome {
    fn from(_: ()) -> Self {
        Outcome::Empty
    }
}
