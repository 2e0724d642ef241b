use bytes::Bytes;
use futures::future;
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, http, Request, Response};
use hyper_util::{rt::TokioIo, service::TowerToHyperService};
use peregrine_core::Dispatcher;
use std::net::SocketAddr;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{debug, info};

type Body = Full<Bytes>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Body(#[source] hyper::Error),

    #[error("dispatch worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Bridges hyper connections to the core dispatcher.
///
/// The body is collected up front and each request is handed to a blocking
/// worker thread, where it runs to completion; the core itself never
/// suspends.
#[derive(Clone)]
pub struct CoreService {
    dispatcher: Dispatcher,
}

// === impl CoreService ===

impl CoreService {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl tower::Service<Request<Incoming>> for CoreService {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Incoming>) -> Self::Future {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let body = body.collect().await.map_err(Error::Body)?.to_bytes();
            let raw_path = parts
                .uri
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_else(|| parts.uri.path().to_string());

            let response = tokio::task::spawn_blocking(move || {
                dispatcher.handle(parts.method, &raw_path, parts.headers, body)
            })
            .await?;
            Ok(into_http(response))
        })
    }
}

/// Serves HTTP/1 connections until `drain` fires. In-flight connections are
/// shut down gracefully and released once they complete.
pub async fn serve(
    addr: SocketAddr,
    dispatcher: Dispatcher,
    drain: drain::Watch,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");
    for (method, pattern) in dispatcher.routes() {
        info!(%method, %pattern, "Route registered");
    }

    let service = TowerToHyperService::new(CoreService::new(dispatcher));
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "Accepted connection");
                let service = service.clone();
                let watch = drain.clone();
                tokio::spawn(async move {
                    let conn = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service);
                    tokio::pin!(conn);
                    tokio::select! {
                        result = &mut conn => {
                            if let Err(error) = result {
                                debug!(%error, %peer, "Connection closed");
                            }
                        }
                        shutdown = watch.signaled() => {
                            conn.as_mut().graceful_shutdown();
                            if let Err(error) = shutdown.release_after(conn).await {
                                debug!(%error, %peer, "Connection closed during shutdown");
                            }
                        }
                    }
                });
            }
            shutdown = drain.clone().signaled() => {
                info!("Shutdown signaled; no longer accepting connections");
                drop(shutdown);
                return Ok(());
            }
        }
    }
}

/// Converts the canonical response into wire form. The content length is
/// set explicitly from the body.
fn into_http(response: peregrine_core::Response) -> Response<Body> {
    let (status, headers, body) = response.into_parts();
    let content_length = body.len();

    let mut rsp = Response::new(Full::new(body));
    *rsp.status_mut() = status;
    *rsp.headers_mut() = headers;
    rsp.headers_mut().insert(
        http::header::CONTENT_LENGTH,
        http::HeaderValue::from(content_length),
    );
    rsp
}
