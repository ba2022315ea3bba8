//! Error types.
//!
//! Three layers, three types:
//!
//! - [`Error`] — registration and infrastructure failures, surfaced
//!   synchronously to whoever builds the router or starts the server.
//! - [`StageError`] — a business failure raised by a stage. The pipeline
//!   always catches it and hands it to the error stage; it never escapes
//!   [`Pipeline::dispatch`](crate::Pipeline::dispatch). Neither does a
//!   panic: it is caught and wrapped as [`Panicked`].
//! - [`DispatchError`] — why a dispatch ended without a finalized response.
//!   Carried by [`Outcome::Unresolved`](crate::Outcome::Unresolved).

use std::fmt;
use std::sync::Arc;

use http::StatusCode;

use crate::method::Method;

/// The error type returned by baton's fallible setup operations.
///
/// Application-level failures (404, 422, etc.) are expressed as
/// [`Response`](crate::Response) values, not as `Error`s.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A route for this `(method, path)` already exists and the router is
    /// configured with [`OnDuplicate::Reject`](crate::OnDuplicate::Reject).
    #[error("duplicate route: {method} {path}")]
    DuplicateRoute { method: Method, path: String },

    /// A route was registered with no stages at all.
    #[error("route {method} {path} has no stages")]
    EmptyRoute { method: Method, path: String },

    #[error("invalid socket address `{addr}`: {source}")]
    Addr {
        addr: String,
        #[source]
        source: std::net::AddrParseError,
    },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a dispatch produced no finalized response.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The last stage continued and nobody finalized the response.
    #[error("chain exhausted after {stages} stage(s) without finalization")]
    ChainExhausted { stages: usize },

    /// A stage finalized a response that was already finalized.
    #[error("response finalized more than once")]
    DoubleFinalize,

    /// A stage failed and the error stage left the response unfinalized.
    /// Holds the original stage error.
    #[error("unresolved error: {0}")]
    Unresolved(StageError),
}

/// Returned (wrapped in a [`StageError`]) by a second
/// [`Sink::send`](crate::Sink::send) within one dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("response already finalized")]
pub struct DoubleFinalize;

/// A stage panicked. The pipeline catches the unwind and carries the panic
/// message in a [`StageError`] with status `500`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage panicked: {0}")]
pub struct Panicked(pub String);

/// A failure raised by a stage.
///
/// Wraps any error type plus the HTTP status the default error stage
/// should answer with (`500` unless overridden). Any
/// `std::error::Error + Send + Sync` converts via `?`. Cloning is cheap
/// and keeps the original error reachable through [`downcast_ref`](StageError::downcast_ref).
///
/// ```rust
/// use baton::StageError;
/// use http::StatusCode;
///
/// let err = StageError::new("quota exceeded").with_status(StatusCode::TOO_MANY_REQUESTS);
/// assert_eq!(err.status(), StatusCode::TOO_MANY_REQUESTS);
/// assert_eq!(err.to_string(), "quota exceeded");
/// ```
#[derive(Clone)]
pub struct StageError {
    status: StatusCode,
    inner: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl StageError {
    pub fn new(err: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, inner: Arc::from(err.into()) }
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn status(&self) -> StatusCode { self.status }

    /// The wrapped error.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }

    /// Recovers the original error type, if it is an `E`.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    pub(crate) fn is_double_finalize(&self) -> bool {
        self.downcast_ref::<DoubleFinalize>().is_some()
    }
}

impl<E> From<E> for StageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn from(err: E) -> Self {
        Self::new(err)
    }
}

impl fmt::Debug for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageError")
            .field("status", &self.status)
            .field("error", &self.inner)
            .finish()
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}
