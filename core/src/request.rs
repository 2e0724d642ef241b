use crate::context::Context;
use ahash::AHashMap as HashMap;
use bytes::Bytes;
use http::{header, header::AsHeaderName, HeaderMap, Method};
use serde::de::DeserializeOwned;

/// Path parameters bound by the router during matching.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PathParams(HashMap<String, String>);

/// A single in-flight request.
///
/// Constructed by the dispatcher from the I/O boundary's raw parts and
/// discarded once the response is sent. The body is kept as raw bytes and
/// parsed on demand.
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    query: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    params: PathParams,
    context: Context,
}

// === impl PathParams ===

impl PathParams {
    pub(crate) fn new(pairs: Vec<(String, String)>) -> Self {
        Self(pairs.into_iter().collect())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

// === impl Request ===

impl Request {
    /// Builds a request from raw parts, splitting the query string off the
    /// raw path.
    pub fn new(method: Method, raw_path: &str, headers: HeaderMap, body: Bytes) -> Self {
        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (raw_path.to_string(), None),
        };
        Self {
            method,
            path,
            query,
            headers,
            body,
            params: PathParams::default(),
            context: Context::default(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// The raw query string, without the leading `?`.
    pub fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// A header value as a string. Lookup is case-insensitive.
    pub fn header(&self, name: impl AsHeaderName) -> Option<&str> {
        self.headers.get(name)?.to_str().ok()
    }

    /// The body's media type with any parameters (e.g. `charset`) stripped.
    pub fn content_type(&self) -> Option<&str> {
        let value = self.headers.get(header::CONTENT_TYPE)?.to_str().ok()?;
        Some(value.split(';').next().unwrap_or(value).trim())
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Decoded query parameters, parsed on demand.
    pub fn query_params(&self) -> Vec<(String, String)> {
        match &self.query {
            Some(query) => form_urlencoded::parse(query.as_bytes())
                .into_owned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Deserializes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }

    /// Decodes the body as a urlencoded form.
    pub fn form(&self) -> Vec<(String, String)> {
        form_urlencoded::parse(&self.body).into_owned().collect()
    }

    pub fn params(&self) -> &PathParams {
        &self.params
    }

    pub(crate) fn set_params(&mut self, params: PathParams) {
        self.params = params;
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }
}
