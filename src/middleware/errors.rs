use http::StatusCode;
use tracing::error;

use crate::{Context, Next, Response, Sink, StageError, StageResult};

/// Default fallback: `404 Not Found`.
pub async fn not_found(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    sink.send(StatusCode::NOT_FOUND)
}

/// Default error stage.
///
/// Logs the failure and answers with the error's status and a generic
/// reason phrase. Internal error text never reaches the client. If a
/// response was already finalized before the stage failed, that response
/// stands.
pub async fn report(err: StageError, ctx: Context, sink: Sink) -> Result<(), StageError> {
    error!(method = %ctx.method(), path = ctx.path(), status = err.status().as_u16(), "stage failed: {err}");
    if sink.is_finalized() {
        return Ok(());
    }
    let status = err.status();
    let reason = status.canonical_reason().unwrap_or("error");
    sink.send(Response::builder().status(status).text(reason))?;
    Ok(())
}
