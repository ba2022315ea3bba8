//! # baton
//!
//! Ordered middleware chains with explicit continuation.
//!
//! ## The contract
//!
//! A route is an exact `(method, path)` pair and an ordered list of
//! stages. A dispatch runs the stages in order, and each one does exactly
//! one thing:
//!
//! - **finalize** with `sink.send(response)`; the chain stops,
//! - **continue** with `Ok(next.run())`; the next stage runs,
//! - **fail** with `Err(StageError)`; the error stage runs, once.
//!
//! Nothing is implicit. Continuing past the last stage without a response
//! is an observable [`DispatchError::ChainExhausted`], not a hung request.
//! Finalizing twice is a [`DispatchError::DoubleFinalize`], not a second
//! response on the wire. Requests no route matches go to a fallback stage.
//!
//! A stage that panics is treated like a stage that failed: the panic is
//! caught and the error stage sees a [`Panicked`] error.
//!
//! What baton does not do: path templates, TLS. The proxy in front of you
//! already does those. Request bodies are capped by
//! [`Server::body_limit`].
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use baton::middleware::{self, Rejection, validate};
//! use baton::{Context, Next, Pipeline, Response, Router, Server, Sink, StageResult};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), baton::Error> {
//!     let require_body = validate(|ctx: &Context| {
//!         if ctx.payload().is_empty() {
//!             Err(Rejection::bad_request("empty body"))
//!         } else {
//!             Ok(())
//!         }
//!     });
//!
//!     let app = Router::new()
//!         .get("/user", (middleware::trace, get_user))
//!         .post("/users", (middleware::trace, require_body, create_user));
//!
//!     Server::bind("0.0.0.0:3000")?.serve(Pipeline::new(app)).await
//! }
//!
//! async fn get_user(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
//!     sink.send(Response::json(br#"{"id":1}"#.to_vec()))
//! }
//!
//! async fn create_user(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
//!     sink.send((http::StatusCode::CREATED, "created"))
//! }
//! ```

mod context;
mod error;
mod method;
mod pipeline;
mod response;
mod router;
mod server;
mod sink;
mod stage;

pub mod health;
pub mod middleware;

pub use context::Context;
pub use error::{DispatchError, DoubleFinalize, Error, Panicked, StageError};
pub use method::{Method, UnknownMethod};
pub use pipeline::{Outcome, Pipeline};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{OnDuplicate, Router};
pub use server::{ADDR_ENV, DEFAULT_BODY_LIMIT, Server};
pub use sink::Sink;
pub use stage::{Chain, ErrorStage, Flow, IntoStages, Next, Stage, StageResult};
