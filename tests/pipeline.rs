use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use baton::{
    Chain, Context, DispatchError, DoubleFinalize, Method, Next, OnDuplicate, Outcome, Panicked,
    Pipeline, Router, Sink, StageError, StageResult,
};
use http::StatusCode;

type Fut = Pin<Box<dyn Future<Output = StageResult> + Send>>;

/// Records which stages ran, in order.
#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<&'static str>>>);

impl Log {
    fn push(&self, label: &'static str) {
        self.0.lock().unwrap().push(label);
    }

    fn seen(&self) -> Vec<&'static str> {
        self.0.lock().unwrap().clone()
    }
}

fn cont(log: &Log, label: &'static str) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    let log = log.clone();
    move |_: Context, _: Sink, next: Next| -> Fut {
        log.push(label);
        Box::pin(async move { Ok::<_, StageError>(next.run()) })
    }
}

fn finalize(
    log: &Log,
    label: &'static str,
    body: &'static str,
) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    let log = log.clone();
    move |_: Context, sink: Sink, _: Next| -> Fut {
        log.push(label);
        Box::pin(async move { sink.send(body) })
    }
}

fn send_and_continue(log: &Log, label: &'static str, body: &'static str) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    let log = log.clone();
    move |_: Context, sink: Sink, next: Next| -> Fut {
        log.push(label);
        Box::pin(async move {
            sink.send(body)?;
            Ok::<_, StageError>(next.run())
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("stage {0} broke")]
struct Broke(&'static str);

fn fail(log: &Log, label: &'static str) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    let log = log.clone();
    move |_: Context, _: Sink, _: Next| -> Fut {
        log.push(label);
        Box::pin(async move { Err(StageError::from(Broke(label))) })
    }
}

fn body(outcome: Outcome) -> String {
    match outcome {
        Outcome::Finalized(res) => res.text_body().unwrap_or_default().to_owned(),
        Outcome::Unresolved(e) => panic!("expected a finalized response, got: {e}"),
    }
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn continue_then_finalize() {
    let log = Log::default();
    let pipeline = Pipeline::new(
        Router::new().get("/a", (cont(&log, "S0"), finalize(&log, "S1", "X"))),
    );

    assert_eq!(body(pipeline.dispatch(Method::Get, "/a", "").await), "X");
    assert_eq!(log.seen(), ["S0", "S1"]);
}

#[tokio::test]
async fn finalize_stops_the_chain() {
    let log = Log::default();
    let pipeline = Pipeline::new(
        Router::new().get("/b", (finalize(&log, "S0", "Y"), finalize(&log, "S1", "Z"))),
    );

    assert_eq!(body(pipeline.dispatch(Method::Get, "/b", "").await), "Y");
    assert_eq!(log.seen(), ["S0"]);
}

#[tokio::test]
async fn failing_stage_reaches_error_stage() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/c", fail(&log, "S0")))
        .on_error(|_: StageError, _: Context, sink: Sink| async move {
            sink.send("E")?;
            Ok::<(), StageError>(())
        });

    assert_eq!(body(pipeline.dispatch(Method::Get, "/c", "").await), "E");
}

#[tokio::test]
async fn unmatched_request_runs_fallback_only() {
    let log = Log::default();
    let pipeline = Pipeline::new(
        Router::new()
            .get("/a", finalize(&log, "route", "A"))
            .post("/unknown", finalize(&log, "post-route", "P")),
    )
    .fallback(finalize(&log, "fallback", "nothing here"));

    assert_eq!(body(pipeline.dispatch(Method::Get, "/unknown", "").await), "nothing here");
    assert_eq!(log.seen(), ["fallback"]);
}

#[tokio::test]
async fn default_fallback_is_404() {
    let pipeline = Pipeline::new(Router::new());
    match pipeline.dispatch(Method::Get, "/missing", "").await {
        Outcome::Finalized(res) => assert_eq!(res.status_code(), StatusCode::NOT_FOUND),
        Outcome::Unresolved(e) => panic!("{e}"),
    }
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn continuing_past_last_stage_is_chain_exhausted() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/d", (cont(&log, "S0"), cont(&log, "S1"))));

    let outcome = pipeline.dispatch(Method::Get, "/d", "").await;
    assert!(matches!(outcome, Outcome::Unresolved(DispatchError::ChainExhausted { stages: 2 })));
    assert_eq!(log.seen(), ["S0", "S1"]);
    assert_eq!(outcome.into_response().status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn error_stage_runs_once_with_original_error_at_any_position() {
    for position in 0..3 {
        let log = Log::default();
        let mut stages = Chain::new();
        for i in 0..3 {
            stages = if i == position {
                stages.then(fail(&log, "failing"))
            } else {
                stages.then(cont(&log, "ok"))
            };
        }
        stages = stages.then(finalize(&log, "tail", "unreachable"));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&errors);
        let pipeline = Pipeline::new(Router::new().get("/p", stages)).on_error(
            move |err: StageError, _: Context, sink: Sink| {
                seen.lock().unwrap().push(err.downcast_ref::<Broke>().map(|b| b.0));
                async move {
                    sink.send((err.status(), "handled"))?;
                    Ok::<(), StageError>(())
                }
            },
        );

        let outcome = pipeline.dispatch(Method::Get, "/p", "").await;
        assert_eq!(body(outcome), "handled");
        assert_eq!(*errors.lock().unwrap(), [Some("failing")], "position {position}");
        assert_eq!(log.seen().len(), position + 1);
        assert!(!log.seen().contains(&"tail"));
    }
}

#[tokio::test]
async fn error_stage_sees_context_accumulated_before_failure() {
    #[derive(Clone)]
    struct Tag(&'static str);

    async fn tag(_: Context, _: Sink, next: Next) -> StageResult {
        Ok(next.with(Tag("validated")).run())
    }

    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/t", (tag, fail(&log, "S1"))))
        .on_error(|_: StageError, ctx: Context, sink: Sink| async move {
            let tag = ctx.get::<Tag>().map_or("none", |t| t.0);
            sink.send(tag)?;
            Ok::<(), StageError>(())
        });

    assert_eq!(body(pipeline.dispatch(Method::Get, "/t", "").await), "validated");
}

#[tokio::test]
async fn error_stage_that_does_not_finalize_is_unresolved() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/u", fail(&log, "S0")))
        .on_error(|_: StageError, _: Context, _: Sink| async move { Ok::<(), StageError>(()) });

    match pipeline.dispatch(Method::Get, "/u", "").await {
        Outcome::Unresolved(DispatchError::Unresolved(err)) => {
            assert_eq!(err.downcast_ref::<Broke>().map(|b| b.0), Some("S0"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn default_error_stage_uses_error_status() {
    async fn forbidden(_: Context, _: Sink, _: Next) -> StageResult {
        Err(StageError::new("no entry").with_status(StatusCode::FORBIDDEN))
    }

    let pipeline = Pipeline::new(Router::new().get("/f", forbidden));
    match pipeline.dispatch(Method::Get, "/f", "").await {
        Outcome::Finalized(res) => {
            assert_eq!(res.status_code(), StatusCode::FORBIDDEN);
            assert_eq!(res.text_body(), Some("Forbidden"));
        }
        Outcome::Unresolved(e) => panic!("{e}"),
    }
}

#[tokio::test]
async fn send_then_continue_into_another_send_is_double_finalize() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get(
        "/nextUser1",
        (
            send_and_continue(&log, "S0", "server1"),
            finalize(&log, "S1", "server2"),
            finalize(&log, "S2", "never"),
        ),
    ));

    let outcome = pipeline.dispatch(Method::Get, "/nextUser1", "").await;
    assert!(matches!(outcome, Outcome::Unresolved(DispatchError::DoubleFinalize)));
    assert_eq!(log.seen(), ["S0", "S1"]);
}

#[tokio::test]
async fn send_then_continue_off_the_end_keeps_the_response() {
    let log = Log::default();
    let pipeline = Pipeline::new(
        Router::new().get("/s", (send_and_continue(&log, "S0", "sent"), cont(&log, "S1"))),
    );

    assert_eq!(body(pipeline.dispatch(Method::Get, "/s", "").await), "sent");
    assert_eq!(log.seen(), ["S0", "S1"]);
}

#[tokio::test]
async fn second_send_error_carries_double_finalize() {
    async fn twice(_: Context, sink: Sink, _: Next) -> StageResult {
        sink.send("one")?;
        match sink.send("two") {
            Err(e) if e.downcast_ref::<DoubleFinalize>().is_some() => Err(e),
            _ => panic!("second send must fail"),
        }
    }

    let pipeline = Pipeline::new(Router::new().get("/twice", twice));
    assert!(matches!(
        pipeline.dispatch(Method::Get, "/twice", "").await,
        Outcome::Unresolved(DispatchError::DoubleFinalize)
    ));
}

#[tokio::test]
async fn fallback_that_continues_is_chain_exhausted() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new()).fallback(cont(&log, "fallback"));
    assert!(matches!(
        pipeline.dispatch(Method::Get, "/x", "").await,
        Outcome::Unresolved(DispatchError::ChainExhausted { stages: 1 })
    ));
}

#[tokio::test]
async fn fallback_that_fails_is_unresolved_and_skips_error_stage() {
    let log = Log::default();
    let calls = Log::default();
    let recorded = calls.clone();
    let pipeline = Pipeline::new(Router::new())
        .fallback(fail(&log, "fallback"))
        .on_error(move |_: StageError, _: Context, sink: Sink| {
            recorded.push("on_error");
            async move {
                sink.send("handled")?;
                Ok::<(), StageError>(())
            }
        });

    match pipeline.dispatch(Method::Get, "/missing", "").await {
        Outcome::Unresolved(DispatchError::Unresolved(err)) => {
            assert_eq!(err.downcast_ref::<Broke>().map(|b| b.0), Some("fallback"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(log.seen(), ["fallback"]);
    assert!(calls.seen().is_empty());
}

#[tokio::test]
async fn error_stage_sending_after_finalize_is_double_finalize() {
    async fn send_then_fail(_: Context, sink: Sink, _: Next) -> StageResult {
        sink.send("first")?;
        Err(StageError::new("late failure"))
    }

    // Propagates the second send's error.
    let pipeline = Pipeline::new(Router::new().get("/late", send_then_fail))
        .on_error(|_: StageError, _: Context, sink: Sink| async move {
            sink.send("second")?;
            Ok::<(), StageError>(())
        });
    assert!(matches!(
        pipeline.dispatch(Method::Get, "/late", "").await,
        Outcome::Unresolved(DispatchError::DoubleFinalize)
    ));

    // Swallows it.
    let pipeline = Pipeline::new(Router::new().get("/late", send_then_fail))
        .on_error(|_: StageError, _: Context, sink: Sink| async move {
            let _ = sink.send("second");
            Ok::<(), StageError>(())
        });
    assert!(matches!(
        pipeline.dispatch(Method::Get, "/late", "").await,
        Outcome::Unresolved(DispatchError::DoubleFinalize)
    ));
}

#[tokio::test]
async fn default_error_stage_keeps_response_sent_before_failure() {
    async fn send_then_fail(_: Context, sink: Sink, _: Next) -> StageResult {
        sink.send("first")?;
        Err(StageError::new("late failure"))
    }

    let pipeline = Pipeline::new(Router::new().get("/late", send_then_fail));
    assert_eq!(body(pipeline.dispatch(Method::Get, "/late", "").await), "first");
}

// ── Panics ───────────────────────────────────────────────────────────────────

async fn out_of_bounds(_: Context, _: Sink, _: Next) -> StageResult {
    let empty: Vec<u32> = Vec::new();
    Err(StageError::new(format!("read {}", empty[3])))
}

fn panics_before_future(log: &Log, label: &'static str) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    let log = log.clone();
    move |_: Context, _: Sink, _: Next| -> Fut {
        log.push(label);
        panic!("{label} gave up")
    }
}

#[tokio::test]
async fn panicking_stage_reaches_error_stage() {
    let log = Log::default();
    let pipeline = Pipeline::new(
        Router::new().get("/p", (cont(&log, "S0"), out_of_bounds, finalize(&log, "S2", "unreachable"))),
    )
    .on_error(|err: StageError, _: Context, sink: Sink| async move {
        let message = err.downcast_ref::<Panicked>().map(|p| p.0.clone()).unwrap_or_default();
        sink.send((err.status(), message))?;
        Ok::<(), StageError>(())
    });

    match pipeline.dispatch(Method::Get, "/p", "").await {
        Outcome::Finalized(res) => {
            assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
            assert!(res.text_body().unwrap_or_default().contains("index out of bounds"));
        }
        Outcome::Unresolved(e) => panic!("{e}"),
    }
    assert_eq!(log.seen(), ["S0"]);
}

#[tokio::test]
async fn panic_outside_the_future_is_caught_too() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/p", panics_before_future(&log, "S0")));

    match pipeline.dispatch(Method::Get, "/p", "").await {
        Outcome::Finalized(res) => assert_eq!(res.status_code(), StatusCode::INTERNAL_SERVER_ERROR),
        Outcome::Unresolved(e) => panic!("{e}"),
    }
    assert_eq!(log.seen(), ["S0"]);
}

#[tokio::test]
async fn panicking_fallback_is_unresolved() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new()).fallback(panics_before_future(&log, "fallback"));

    match pipeline.dispatch(Method::Get, "/missing", "").await {
        Outcome::Unresolved(DispatchError::Unresolved(err)) => {
            assert_eq!(err.downcast_ref::<Panicked>().map(|p| p.0.as_str()), Some("fallback gave up"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn panicking_error_stage_is_unresolved_with_original_error() {
    let log = Log::default();
    let pipeline = Pipeline::new(Router::new().get("/e", fail(&log, "S0")))
        .on_error(|_: StageError, _: Context, _: Sink| async move {
            let empty: Vec<u32> = Vec::new();
            Err::<(), StageError>(StageError::new(format!("read {}", empty[1])))
        });

    match pipeline.dispatch(Method::Get, "/e", "").await {
        Outcome::Unresolved(DispatchError::Unresolved(err)) => {
            assert_eq!(err.downcast_ref::<Broke>().map(|b| b.0), Some("S0"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
}

#[tokio::test]
async fn panicking_dispatch_in_spawned_task_still_yields_outcome() {
    let pipeline = Arc::new(Pipeline::new(Router::new().get("/p", out_of_bounds)));
    let task = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.dispatch(Method::Get, "/p", "").await })
    };
    let outcome = task.await.expect("dispatch must not unwind");
    assert_eq!(outcome.into_response().status_code(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn nested_registration_matches_flat_registration() {
    let nested_log = Log::default();
    let flat_log = Log::default();

    let nested = (
        cont(&nested_log, "a"),
        vec![Chain::of(cont(&nested_log, "b")), Chain::of((cont(&nested_log, "c"), cont(&nested_log, "d")))],
        finalize(&nested_log, "e", "done"),
    );
    let flat = (
        cont(&flat_log, "a"),
        cont(&flat_log, "b"),
        cont(&flat_log, "c"),
        cont(&flat_log, "d"),
        finalize(&flat_log, "e", "done"),
    );

    let pipeline = Pipeline::new(Router::new().get("/nested", nested).get("/flat", flat));

    assert_eq!(body(pipeline.dispatch(Method::Get, "/nested", "").await), "done");
    assert_eq!(body(pipeline.dispatch(Method::Get, "/flat", "").await), "done");
    assert_eq!(nested_log.seen(), flat_log.seen());
    assert_eq!(nested_log.seen(), ["a", "b", "c", "d", "e"]);
}

#[tokio::test]
async fn duplicate_registration_policies() {
    let log = Log::default();

    let mut replace = Router::new();
    replace.register(Method::Get, "/dup", finalize(&log, "first", "1")).unwrap();
    replace.register(Method::Get, "/dup", finalize(&log, "second", "2")).unwrap();
    let pipeline = Pipeline::new(replace);
    assert_eq!(body(pipeline.dispatch(Method::Get, "/dup", "").await), "2");

    let mut reject = Router::with_policy(OnDuplicate::Reject);
    reject.register(Method::Get, "/dup", finalize(&log, "first", "1")).unwrap();
    let err = reject.register(Method::Get, "/dup", finalize(&log, "second", "2")).unwrap_err();
    assert_eq!(err.to_string(), "duplicate route: GET /dup");
    let pipeline = Pipeline::new(reject);
    assert_eq!(body(pipeline.dispatch(Method::Get, "/dup", "").await), "1");
}

// ── Concurrency ──────────────────────────────────────────────────────────────

#[derive(Clone)]
struct Trail(Vec<&'static str>);

fn step(label: &'static str) -> impl Fn(Context, Sink, Next) -> Fut + Send + Sync + use<> {
    move |ctx: Context, _: Sink, next: Next| -> Fut {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            let mut trail = ctx.get::<Trail>().cloned().unwrap_or(Trail(Vec::new()));
            trail.0.push(label);
            Ok::<_, StageError>(next.with(trail).run())
        })
    }
}

async fn summarize(ctx: Context, sink: Sink, _: Next) -> StageResult {
    let trail = ctx.get::<Trail>().map(|t| t.0.join(">")).unwrap_or_default();
    sink.send(format!("{}:{trail}", ctx.path()))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_dispatches_keep_their_own_order() {
    let pipeline = Arc::new(Pipeline::new(
        Router::new()
            .get("/left", (step("l1"), step("l2"), step("l3"), summarize))
            .get("/right", (step("r1"), step("r2"), summarize)),
    ));

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..64 {
        let pipeline = Arc::clone(&pipeline);
        let path = if i % 2 == 0 { "/left" } else { "/right" };
        tasks.spawn(async move { (path, body(pipeline.dispatch(Method::Get, path, "").await)) });
    }

    while let Some(joined) = tasks.join_next().await {
        let (path, got) = joined.unwrap();
        let want = match path {
            "/left" => "/left:l1>l2>l3",
            _ => "/right:r1>r2",
        };
        assert_eq!(got, want);
    }
}
