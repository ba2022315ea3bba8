use std::marker::PhantomData;
use std::sync::Arc;

use http::StatusCode;

use crate::response::{IntoResponse, Response};
use crate::stage::{BoxFuture, BoxedStage, ErasedStage, IntoStages, Stage, StageResult, private};
use crate::{Context, Next, Sink};

/// Why a request failed validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    /// `400 Bad Request`.
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    /// `401 Unauthorized`.
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, message)
    }

    /// `422 Unprocessable Content`.
    pub fn unprocessable(message: impl Into<String>) -> Self {
        Self::new(StatusCode::UNPROCESSABLE_ENTITY, message)
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn message(&self) -> &str { &self.message }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        Response::builder().status(self.status).text(self.message)
    }
}

/// Builds a validation stage from `check`.
///
/// On `Ok(value)` the stage attaches `value` to the context and continues;
/// later stages read it back with [`Context::get`]. On `Err(rejection)` it
/// finalizes with the rejection and the chain stops. It never does both.
///
/// ```rust
/// use baton::middleware::{Rejection, validate};
/// use baton::{Context, Next, Router, Sink, StageResult};
///
/// #[derive(Clone)]
/// struct Token(String);
///
/// async fn me(ctx: Context, sink: Sink, _: Next) -> StageResult {
///     let token = ctx.get::<Token>().map(|t| t.0.clone()).unwrap_or_default();
///     sink.send(format!("hello {token}"))
/// }
///
/// let auth = validate(|ctx: &Context| match ctx.header("x-token") {
///     Some(t) => Ok(Token(t.to_owned())),
///     None => Err(Rejection::unauthorized("missing token")),
/// });
///
/// let router = Router::new().get("/me", (auth, me));
/// ```
pub fn validate<F, T>(check: F) -> Validate<F, T>
where
    F: Fn(&Context) -> Result<T, Rejection> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    Validate { check, _output: PhantomData }
}

/// A validation stage. Created by [`validate`]; register it like any other
/// stage, or hand it to [`Pipeline::fallback`](crate::Pipeline::fallback).
pub struct Validate<F, T> {
    check: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> ErasedStage for Validate<F, T>
where
    F: Fn(&Context) -> Result<T, Rejection> + Send + Sync,
    T: Clone + Send + Sync + 'static,
{
    fn call(&self, ctx: Context, sink: Sink, next: Next) -> BoxFuture<StageResult> {
        let verdict = (self.check)(&ctx);
        Box::pin(async move {
            match verdict {
                Ok(value) => Ok(next.with(value).run()),
                Err(rejection) => sink.send(rejection),
            }
        })
    }
}

impl<F, T> private::SealedStage for Validate<F, T>
where
    F: Fn(&Context) -> Result<T, Rejection> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
}

impl<F, T> Stage for Validate<F, T>
where
    F: Fn(&Context) -> Result<T, Rejection> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn into_boxed_stage(self) -> BoxedStage {
        Arc::new(self)
    }
}

impl<F, T> IntoStages for Validate<F, T>
where
    F: Fn(&Context) -> Result<T, Rejection> + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn flatten_into(self, out: &mut Vec<BoxedStage>) {
        out.push(self.into_boxed_stage());
    }
}
