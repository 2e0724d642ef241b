#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

//! The I/O boundary for `peregrine-core`: a tokio/hyper HTTP/1 server that
//! collects request bodies, dispatches each request on a blocking worker
//! thread, and writes the canonical response back, with drain-based
//! graceful shutdown.

pub use peregrine_core as core;

mod args;
mod server;

pub use self::{
    args::Args,
    server::{serve, CoreService, Error},
};
