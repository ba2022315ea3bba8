//! The dispatch pipeline.
//!
//! ```text
//! START ─ lookup ─┬─ unmatched ─ fallback ───────────────────────────── END
//!                 └─ matched ─ stage[0] ─┬─ send  ─────────────────────── END
//!                                        ├─ next  ─ stage[1] ─ …
//!                                        │          (past last) ─ END(chain exhausted)
//!                                        ├─ 2nd send ──────────────────── END(double finalize)
//!                                        └─ Err ─ error stage ─┬─ sent ── END
//!                                                              └─ not ─── END(unresolved)
//! ```
//!
//! Every stage call runs under `catch_unwind`. A panicking route stage is
//! a failure like any other and goes to the error stage. A panicking error
//! stage or fallback ends the dispatch as unresolved.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use http::StatusCode;
use tracing::{debug, error, warn};

use crate::context::Context;
use crate::error::{DispatchError, Panicked, StageError};
use crate::method::Method;
use crate::middleware;
use crate::response::Response;
use crate::router::{Route, Router};
use crate::sink::Sink;
use crate::stage::{BoxedErrorStage, BoxedStage, ErrorStage, Next, Stage, Step};

/// How a dispatch ended.
#[derive(Debug)]
pub enum Outcome {
    /// Exactly one response was finalized.
    Finalized(Response),
    /// No usable response was produced.
    Unresolved(DispatchError),
}

impl Outcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized(_))
    }

    /// The finalized response, or a plain `500 internal error` for an
    /// unresolved dispatch.
    pub fn into_response(self) -> Response {
        match self {
            Self::Finalized(response) => response,
            Self::Unresolved(_) => Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .text("internal error"),
        }
    }
}

/// Owns a route table, a fallback stage and an error stage, and runs
/// dispatches against them.
///
/// Build it once, wrap it in an `Arc`, and dispatch from as many tasks as
/// you like: dispatch only needs `&self`.
///
/// ```rust
/// use baton::{Context, Method, Next, Outcome, Pipeline, Router, Sink, StageResult};
///
/// async fn log(_: Context, _: Sink, next: Next) -> StageResult { Ok(next.run()) }
/// async fn hello(_: Context, sink: Sink, _: Next) -> StageResult { sink.send("hello") }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let pipeline = Pipeline::new(Router::new().get("/", (log, hello)));
///
/// match pipeline.dispatch(Method::Get, "/", "").await {
///     Outcome::Finalized(res) => assert_eq!(res.text_body(), Some("hello")),
///     Outcome::Unresolved(e) => panic!("{e}"),
/// }
/// # }
/// ```
pub struct Pipeline {
    router: Router,
    fallback: BoxedStage,
    on_error: BoxedErrorStage,
}

impl Pipeline {
    /// Takes ownership of `router`. The default fallback answers `404`;
    /// the default error stage logs and answers with the error's status.
    pub fn new(router: Router) -> Self {
        Self {
            router,
            fallback: middleware::not_found.into_boxed_stage(),
            on_error: middleware::report.into_boxed_error_stage(),
        }
    }

    /// Replaces the stage run when no route matches.
    pub fn fallback(mut self, stage: impl Stage) -> Self {
        self.fallback = stage.into_boxed_stage();
        self
    }

    /// Replaces the stage run when a matched route's stage fails.
    pub fn on_error(mut self, stage: impl ErrorStage) -> Self {
        self.on_error = stage.into_boxed_error_stage();
        self
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    /// Dispatches one request with no headers.
    pub async fn dispatch(&self, method: Method, path: &str, payload: impl Into<Bytes>) -> Outcome {
        self.dispatch_context(Context::new(method, path, payload)).await
    }

    /// Dispatches one request described by `ctx`.
    pub async fn dispatch_context(&self, ctx: Context) -> Outcome {
        let outcome = match self.router.lookup(ctx.method(), ctx.path()) {
            Some(route) => self.run_route(route, ctx).await,
            None => {
                debug!(method = %ctx.method(), path = ctx.path(), "no route, running fallback");
                self.run_fallback(ctx).await
            }
        };
        if let Outcome::Unresolved(e) = &outcome {
            error!("dispatch unresolved: {e}");
        }
        outcome
    }

    async fn run_route(&self, route: &Route, mut ctx: Context) -> Outcome {
        let sink = Sink::new();
        let total = route.stages.len();

        for (index, stage) in route.stages.iter().enumerate() {
            let result = guarded(async { stage.call(ctx.clone(), sink.clone(), Next::new()).await }).await;

            if sink.violated() {
                return Outcome::Unresolved(DispatchError::DoubleFinalize);
            }

            match result {
                Ok(flow) => match flow.0 {
                    Step::Halt => {
                        debug!(path = ctx.path(), stage = index, "stage finalized");
                        return finish(&sink, index + 1);
                    }
                    Step::Continue(attached) => {
                        debug!(path = ctx.path(), stage = index, "stage continued");
                        ctx.absorb(attached);
                    }
                },
                Err(err) => {
                    debug!(path = ctx.path(), stage = index, "stage failed: {err}");
                    return self.run_error_stage(err, ctx, sink).await;
                }
            }
        }

        finish(&sink, total)
    }

    async fn run_error_stage(&self, err: StageError, ctx: Context, sink: Sink) -> Outcome {
        let original = err.clone();

        let result = guarded(async { self.on_error.call(err, ctx, sink.clone()).await }).await;
        if let Err(e) = result {
            if e.is_double_finalize() {
                return Outcome::Unresolved(DispatchError::DoubleFinalize);
            }
            if e.downcast_ref::<Panicked>().is_some() {
                return Outcome::Unresolved(DispatchError::Unresolved(original));
            }
            warn!("error stage failed: {e}");
        }
        if sink.violated() {
            return Outcome::Unresolved(DispatchError::DoubleFinalize);
        }
        match sink.take() {
            Some(response) => Outcome::Finalized(response),
            None => Outcome::Unresolved(DispatchError::Unresolved(original)),
        }
    }

    async fn run_fallback(&self, ctx: Context) -> Outcome {
        let sink = Sink::new();
        let result = guarded(async { self.fallback.call(ctx, sink.clone(), Next::new()).await }).await;

        if sink.violated() {
            return Outcome::Unresolved(DispatchError::DoubleFinalize);
        }
        match result {
            Ok(_) => finish(&sink, 1),
            Err(err) => Outcome::Unresolved(DispatchError::Unresolved(err)),
        }
    }
}

fn finish(sink: &Sink, stages: usize) -> Outcome {
    match sink.take() {
        Some(response) => Outcome::Finalized(response),
        None => Outcome::Unresolved(DispatchError::ChainExhausted { stages }),
    }
}

/// Awaits `call`, turning a panic into a [`Panicked`] stage error.
async fn guarded<T>(call: impl Future<Output = Result<T, StageError>>) -> Result<T, StageError> {
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let message = panic_message(&*payload);
            error!(panic = %message, "stage panicked");
            Err(Panicked(message).into())
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
