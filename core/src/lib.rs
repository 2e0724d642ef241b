#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The native request-dispatch engine: a compiled path trie, a two-phase
//! priority-ordered middleware pipeline, response normalization, and a
//! layered error-handling policy. The engine is synchronous and lock-free
//! at dispatch time; the I/O boundary lives in `peregrine-runtime`.

mod app;
mod context;
mod dispatch;
mod error;
mod middleware;
mod pattern;
mod request;
mod response;
mod router;

pub use self::{
    app::{App, RouteGroup, RouteOptions},
    context::{keys, Context},
    dispatch::{Config, Dispatcher},
    error::{ErrorRegistry, HttpError, RegistrationError, UnsupportedReturnType},
    middleware::{MiddlewareEntry, MiddlewareRegistry, Phase, PostMiddleware, PreMiddleware},
    pattern::{InvalidPattern, ParamTag, Segment},
    request::{PathParams, Request},
    response::{Outcome, Response},
    router::{Handler, Route, RouteMatch, Router},
};
pub use http::{
    header::{HeaderName, HeaderValue},
    HeaderMap, Method, StatusCode,
};
