use std::time::Instant;

use tracing::info;

use crate::{Context, Next, Sink, StageResult};

/// When the request entered the chain. Attached by [`trace`].
#[derive(Clone, Copy, Debug)]
pub struct Started(pub Instant);

/// Logs method and path at `info` and passes control on. Put it first in a
/// route's stage list.
///
/// Attaches [`Started`] so later stages can measure latency.
pub async fn trace(ctx: Context, _sink: Sink, next: Next) -> StageResult {
    info!(method = %ctx.method(), path = ctx.path(), bytes = ctx.payload().len(), "handling request");
    Ok(next.with(Started(Instant::now())).run())
}
