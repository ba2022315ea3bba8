//! Stage traits, continuation and type erasure.
//!
//! # Roles
//!
//! A route is an ordered list of **stages**. Each stage ends with exactly
//! one of three moves, and the return type enforces it:
//!
//! ```text
//! async fn stage(ctx: Context, sink: Sink, next: Next) -> Result<Flow, StageError>
//!
//!   sink.send(response)    → Ok(Flow)  finalize, the chain stops here
//!   Ok(next.run())         → Ok(Flow)  continue with the next stage
//!   Err(StageError)        → Err       fail, the error stage takes over
//! ```
//!
//! A [`Flow`] has no public constructor, so the only way to return `Ok` is
//! through the sink or the continuation token.
//!
//! The **error stage** is a different role with a different signature:
//!
//! ```text
//! async fn on_error(err: StageError, ctx: Context, sink: Sink) -> Result<(), StageError>
//! ```
//!
//! Roles are told apart by type, never by counting arguments at runtime.
//!
//! # Storage
//!
//! Like route handlers in most async frameworks, stages of different
//! concrete types live side by side in one `Vec`, so they are erased behind
//! `Arc<dyn ErasedStage>`. The per-stage cost at dispatch time is one
//! virtual call and one boxed future.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Extensions;

use crate::context::Context;
use crate::error::StageError;
use crate::sink::Sink;

/// Result of running one stage.
pub type StageResult = Result<Flow, StageError>;

// ── Flow and Next ─────────────────────────────────────────────────────────────

/// Proof that a stage either finalized or continued.
///
/// Obtained from [`Sink::send`] or [`Next::run`]; cannot be built directly.
#[derive(Debug)]
pub struct Flow(pub(crate) Step);

#[derive(Debug)]
pub(crate) enum Step {
    Halt,
    Continue(Extensions),
}

impl Flow {
    pub(crate) fn halt() -> Self {
        Self(Step::Halt)
    }
}

/// Continuation token for one stage. Consumed by [`run`](Next::run), so a
/// stage can pass control forward at most once.
#[derive(Default)]
pub struct Next {
    attached: Extensions,
}

impl Next {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Attaches `value` to the context seen by every later stage and by the
    /// error stage.
    pub fn with<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.attached.insert(value);
        self
    }

    /// Passes control to the next stage.
    pub fn run(self) -> Flow {
        Flow(Step::Continue(self.attached))
    }
}

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Send + 'static` so dispatches can run on any tokio worker.
pub(crate) type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Internal dispatch interface for regular stages.
#[doc(hidden)]
pub trait ErasedStage {
    fn call(&self, ctx: Context, sink: Sink, next: Next) -> BoxFuture<StageResult>;
}

#[doc(hidden)]
pub type BoxedStage = Arc<dyn ErasedStage + Send + Sync + 'static>;

/// Internal dispatch interface for the error stage.
#[doc(hidden)]
pub trait ErasedErrorStage {
    fn call(&self, err: StageError, ctx: Context, sink: Sink) -> BoxFuture<Result<(), StageError>>;
}

#[doc(hidden)]
pub type BoxedErrorStage = Arc<dyn ErasedErrorStage + Send + Sync + 'static>;

// ── Public traits ─────────────────────────────────────────────────────────────

/// Implemented for every valid regular stage:
///
/// ```text
/// async fn name(ctx: Context, sink: Sink, next: Next) -> Result<Flow, StageError>
/// ```
///
/// Sealed; only the blanket impl below satisfies it.
pub trait Stage: private::SealedStage + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_stage(self) -> BoxedStage;
}

/// Implemented for every valid error stage:
///
/// ```text
/// async fn name(err: StageError, ctx: Context, sink: Sink) -> Result<(), StageError>
/// ```
///
/// The error stage is expected to finalize through `sink`. Returning without
/// doing so leaves the dispatch unresolved.
pub trait ErrorStage: private::SealedErrorStage + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_error_stage(self) -> BoxedErrorStage;
}

/// Seals: external crates cannot name these, so they cannot implement
/// `Stage` or `ErrorStage` on their own types.
pub(crate) mod private {
    pub trait SealedStage {}
    pub trait SealedErrorStage {}
}

// ── Blanket implementations ───────────────────────────────────────────────────

struct FnStage<F>(F);

impl<F, Fut> private::SealedStage for F
where
    F: Fn(Context, Sink, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
}

impl<F, Fut> Stage for F
where
    F: Fn(Context, Sink, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    fn into_boxed_stage(self) -> BoxedStage {
        Arc::new(FnStage(self))
    }
}

impl<F, Fut> ErasedStage for FnStage<F>
where
    F: Fn(Context, Sink, Next) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    fn call(&self, ctx: Context, sink: Sink, next: Next) -> BoxFuture<StageResult> {
        Box::pin((self.0)(ctx, sink, next))
    }
}

struct FnErrorStage<F>(F);

impl<F, Fut> private::SealedErrorStage for F
where
    F: Fn(StageError, Context, Sink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
}

impl<F, Fut> ErrorStage for F
where
    F: Fn(StageError, Context, Sink) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    fn into_boxed_error_stage(self) -> BoxedErrorStage {
        Arc::new(FnErrorStage(self))
    }
}

impl<F, Fut> ErasedErrorStage for FnErrorStage<F>
where
    F: Fn(StageError, Context, Sink) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), StageError>> + Send + 'static,
{
    fn call(&self, err: StageError, ctx: Context, sink: Sink) -> BoxFuture<Result<(), StageError>> {
        Box::pin((self.0)(err, ctx, sink))
    }
}

// ── Stage lists ───────────────────────────────────────────────────────────────

/// Anything that can be registered as a route's stage list.
///
/// Nested lists are flattened once, at registration, preserving order:
/// `(a, (b, c))`, `vec![Chain::of(a), Chain::of(b).then(c)]` and
/// `(a, b, c)` all register the same three stages.
pub trait IntoStages {
    #[doc(hidden)]
    fn flatten_into(self, out: &mut Vec<BoxedStage>);
}

impl<F, Fut> IntoStages for F
where
    F: Fn(Context, Sink, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    fn flatten_into(self, out: &mut Vec<BoxedStage>) {
        out.push(self.into_boxed_stage());
    }
}

impl<T: IntoStages> IntoStages for Vec<T> {
    fn flatten_into(self, out: &mut Vec<BoxedStage>) {
        for item in self {
            item.flatten_into(out);
        }
    }
}

macro_rules! impl_into_stages_for_tuple {
    ($($name:ident),+) => {
        impl<$($name: IntoStages),+> IntoStages for ($($name,)+) {
            #[allow(non_snake_case)]
            fn flatten_into(self, out: &mut Vec<BoxedStage>) {
                let ($($name,)+) = self;
                $($name.flatten_into(out);)+
            }
        }
    };
}

impl_into_stages_for_tuple!(A, B);
impl_into_stages_for_tuple!(A, B, C);
impl_into_stages_for_tuple!(A, B, C, D);
impl_into_stages_for_tuple!(A, B, C, D, E);
impl_into_stages_for_tuple!(A, B, C, D, E, G);
impl_into_stages_for_tuple!(A, B, C, D, E, G, H);
impl_into_stages_for_tuple!(A, B, C, D, E, G, H, I);

/// A reusable, already-erased stage sequence.
///
/// Useful when a group of stages is shared between routes or built at
/// runtime:
///
/// ```rust
/// use baton::{Chain, Context, Next, Sink, StageResult};
///
/// async fn audit(_: Context, _: Sink, next: Next) -> StageResult { Ok(next.run()) }
/// async fn greet(_: Context, sink: Sink, _: Next) -> StageResult { sink.send("hi") }
///
/// let common = Chain::of(audit);
/// let full = common.clone().then(greet);
/// assert_eq!(full.len(), 2);
/// ```
#[derive(Clone, Default)]
pub struct Chain {
    stages: Vec<BoxedStage>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of(stages: impl IntoStages) -> Self {
        Self::new().then(stages)
    }

    /// Appends `stages`, flattening nested lists.
    pub fn then(mut self, stages: impl IntoStages) -> Self {
        stages.flatten_into(&mut self.stages);
        self
    }

    pub fn len(&self) -> usize { self.stages.len() }
    pub fn is_empty(&self) -> bool { self.stages.is_empty() }
}

impl IntoStages for Chain {
    fn flatten_into(self, out: &mut Vec<BoxedStage>) {
        out.extend(self.stages);
    }
}

pub(crate) fn flatten(stages: impl IntoStages) -> Vec<BoxedStage> {
    let mut out = Vec::new();
    stages.flatten_into(&mut out);
    out
}
