//! Built-in health-check stages.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? |
//! | **Readiness** | `/readyz` | Can it serve traffic? |
//!
//! Both are ordinary stages, so they compose with the rest of a chain:
//!
//! ```rust
//! use baton::{Router, health, middleware};
//!
//! let app = Router::new()
//!     .get("/healthz", health::liveness)
//!     .get("/readyz", (middleware::trace, health::readiness));
//! ```

use crate::{Context, Next, Sink, StageResult};

/// Always finalizes `200 OK` with body `"ok"`.
pub async fn liveness(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    sink.send("ok")
}

/// Finalizes `200 OK` with body `"ready"`. Put a validation stage in front
/// of it, or register your own stage, to gate on dependencies.
pub async fn readiness(_ctx: Context, sink: Sink, _next: Next) -> StageResult {
    sink.send("ready")
}
