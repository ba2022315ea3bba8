//! Middleware-chain walkthrough.
//!
//! Run with:
//!   RUST_LOG=debug cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/user        # one stage
//!   curl http://localhost:3000/user1       # first stage finalizes, second never runs
//!   curl http://localhost:3000/nextUser1   # sends, then continues: double finalize → 500
//!   curl http://localhost:3000/chain       # continue, continue, finalize
//!   curl -X POST http://localhost:3000/users -d '{"name":"ada"}'
//!   curl -X POST http://localhost:3000/users                       # 400 from validation
//!   curl http://localhost:3000/broken      # error stage
//!   curl http://localhost:3000/anything    # fallback

use baton::middleware::{self, Rejection, validate};
use baton::{
    Chain, Context, Next, Pipeline, Response, Router, Server, Sink, StageError, StageResult, health,
};
use http::StatusCode;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), baton::Error> {
    tracing_subscriber::fmt::init();

    let require_body = validate(|ctx: &Context| {
        if ctx.payload().is_empty() {
            Err(Rejection::bad_request("body required"))
        } else {
            Ok(BodyLen(ctx.payload().len()))
        }
    });

    // A shared prefix, flattened into each route that uses it.
    let logged = Chain::of((middleware::trace, announce));

    let app = Router::new()
        .get("/user", user)
        .get("/user1", (handling_1, handling_2))
        .get("/nextUser1", (handling_1_then_next, handling_2))
        .get("/chain", (logged.clone(), vec![Chain::of(announce)], handling_2))
        .post("/users", (logged, require_body, create_user))
        .get("/broken", broken)
        .get("/healthz", health::liveness)
        .get("/readyz", health::readiness);

    let pipeline = Pipeline::new(app).fallback(everything_else).on_error(on_error);

    Server::from_env()?.serve(pipeline).await
}

#[derive(Clone)]
struct BodyLen(usize);

async fn user(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    sink.send("Hello World from server12")
}

async fn handling_1(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    info!("handling req 1");
    sink.send("Hello World from server1")
}

async fn handling_1_then_next(_ctx: Context, sink: Sink, next: Next) -> StageResult {
    info!("handling req 1");
    sink.send("Hello World from server1")?;
    Ok(next.run())
}

async fn handling_2(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    info!("handling req 2");
    sink.send("Hello World from server2")
}

async fn announce(ctx: Context, _sink: Sink, next: Next) -> StageResult {
    info!(path = ctx.path(), "passing control on");
    Ok(next.run())
}

async fn create_user(ctx: Context, sink: Sink, _next: Next) -> StageResult {
    let len = ctx.get::<BodyLen>().map_or(0, |b| b.0);
    sink.send(
        Response::builder()
            .status(StatusCode::CREATED)
            .header("location", "/users/99")
            .json(format!(r#"{{"id":"99","received":{len}}}"#)),
    )
}

async fn broken(_ctx: Context, _sink: Sink, _next: Next) -> StageResult {
    Err(StageError::new("database unreachable").with_status(StatusCode::SERVICE_UNAVAILABLE))
}

async fn everything_else(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    sink.send("Hello World from server")
}

async fn on_error(err: StageError, ctx: Context, sink: Sink) -> Result<(), StageError> {
    tracing::error!(path = ctx.path(), "{err}");
    if !sink.is_finalized() {
        sink.send((err.status(), "Something broke!"))?;
    }
    Ok(())
}
