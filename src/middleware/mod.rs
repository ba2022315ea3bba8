//! Reusable stages.
//!
//! - [`trace`] — logs each request as it passes and continues.
//! - [`validate`] — the validation pattern: check, then continue with the
//!   result attached, or finalize with a rejection.
//! - [`not_found`] — the default fallback stage.
//! - [`report`] — the default error stage.

mod errors;
mod trace;
mod validate;

pub use errors::{not_found, report};
pub use trace::{Started, trace};
pub use validate::{Rejection, Validate, validate};
