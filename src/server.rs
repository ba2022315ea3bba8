//! HTTP transport and graceful shutdown.
//!
//! The server is the pipeline's outer collaborator: it turns each hyper
//! request into a [`Context`], awaits [`Pipeline::dispatch_context`], and
//! writes the [`Outcome`](crate::Outcome) back as a wire response.
//! Unresolved dispatches become `500 internal error`. Bodies larger than
//! the configured limit are answered with `413` before dispatch.
//!
//! # Graceful shutdown
//!
//! On **SIGTERM** or **Ctrl-C** the server:
//! 1. Stops `listener.accept()` — no new connections.
//! 2. Lets every in-flight connection task run to completion.
//! 3. Returns from [`Server::serve`].
//!
//! When a client disconnects mid-request hyper drops the dispatch future,
//! so the chain stops at its next `.await` without finalizing.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::context::Context;
use crate::error::Error;
use crate::method::Method;
use crate::pipeline::Pipeline;
use crate::response::Response;

/// Environment variable read by [`Server::from_env`].
pub const ADDR_ENV: &str = "BATON_ADDR";

const DEFAULT_ADDR: &str = "0.0.0.0:3000";

/// Default cap on a request body: 2 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// The HTTP server.
#[derive(Debug)]
pub struct Server {
    addr: SocketAddr,
    body_limit: usize,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// ```rust
    /// use baton::Server;
    ///
    /// assert!(Server::bind("127.0.0.1:3000").is_ok());
    /// assert!(Server::bind("not an address").is_err());
    /// ```
    pub fn bind(addr: &str) -> Result<Self, Error> {
        let parsed = addr.parse().map_err(|source| Error::Addr { addr: addr.to_owned(), source })?;
        Ok(Self { addr: parsed, body_limit: DEFAULT_BODY_LIMIT })
    }

    /// Binds to `$BATON_ADDR`, or `0.0.0.0:3000` when it is unset.
    pub fn from_env() -> Result<Self, Error> {
        match std::env::var(ADDR_ENV) {
            Ok(addr) => Self::bind(&addr),
            Err(_) => Self::bind(DEFAULT_ADDR),
        }
    }

    /// Caps request bodies at `bytes`. Larger bodies get `413` and never
    /// reach the pipeline.
    pub fn body_limit(mut self, bytes: usize) -> Self {
        self.body_limit = bytes;
        self
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Starts accepting connections and dispatching them through `pipeline`.
    ///
    /// Returns only after a full graceful shutdown.
    pub async fn serve(self, pipeline: Pipeline) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        serve_listener(listener, pipeline, self.body_limit, shutdown_signal()).await
    }
}

/// Accept loop over an already-bound listener. Stops accepting when
/// `shutdown` resolves, then drains in-flight connections.
pub(crate) async fn serve_listener(
    listener: TcpListener,
    pipeline: Pipeline,
    body_limit: usize,
    shutdown: impl std::future::Future<Output = ()>,
) -> Result<(), Error> {
    let pipeline = Arc::new(pipeline);
    let addr = listener.local_addr()?;

    info!(%addr, routes = pipeline.router().len(), "baton listening");

    let mut tasks = tokio::task::JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            // Shutdown first, so a queued backlog cannot delay it.
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let pipeline = Arc::clone(&pipeline);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    // Called once per request on the connection.
                    let svc = service_fn(move |req| {
                        let pipeline = Arc::clone(&pipeline);
                        async move { handle(&pipeline, req, body_limit).await }
                    });

                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("baton stopped");
    Ok(())
}

// ── Request translation ───────────────────────────────────────────────────────

/// Translates one wire request into a dispatch and the outcome back into a
/// wire response. Never fails: hyper only ever sees a response.
async fn handle(
    pipeline: &Pipeline,
    req: hyper::Request<hyper::body::Incoming>,
    body_limit: usize,
) -> Result<http::Response<Full<Bytes>>, std::convert::Infallible> {
    let Ok(method) = Method::try_from(req.method()) else {
        return Ok(Response::status(StatusCode::METHOD_NOT_ALLOWED).into_http());
    };
    let path = req.uri().path().to_owned();
    let (parts, body) = req.into_parts();

    let payload = match Limited::new(body, body_limit).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(%method, path, limit = body_limit, "request body too large");
            return Ok(Response::status(StatusCode::PAYLOAD_TOO_LARGE).into_http());
        }
        Err(e) => {
            warn!(%method, path, "failed to read request body: {e}");
            return Ok(Response::status(StatusCode::BAD_REQUEST).into_http());
        }
    };

    let ctx = Context::new(method, path, payload).with_headers(parts.headers);
    Ok(pipeline.dispatch_context(ctx).await.into_response().into_http())
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on SIGTERM or Ctrl-C. If a handler cannot be installed that arm
/// never resolves and a warning is logged.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to install Ctrl-C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => { sig.recv().await; }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c   => {}
        () = sigterm  => {}
    }
}
