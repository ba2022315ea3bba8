//! Exact-path route table.
//!
//! One map per method, keyed on the exact path string. No templates, no
//! wildcards. You register a path, you get a chain of stages.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::error::Error;
use crate::method::Method;
use crate::stage::{BoxedStage, IntoStages, flatten};

/// What to do when a `(method, path)` pair is registered twice.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OnDuplicate {
    /// The later registration replaces the earlier one and a warning is
    /// logged.
    #[default]
    Replace,
    /// The later registration fails with [`Error::DuplicateRoute`] and the
    /// earlier one stays in place.
    Reject,
}

/// A registered route: its stages, flattened and frozen.
pub(crate) struct Route {
    pub(crate) stages: Box<[BoxedStage]>,
}

/// The route table.
///
/// Build it once at startup, then hand it to
/// [`Pipeline::new`](crate::Pipeline::new). The pipeline only ever reads it,
/// so registration can never race with dispatch.
pub struct Router {
    routes: HashMap<Method, HashMap<String, Route>>,
    on_duplicate: OnDuplicate,
}

impl Router {
    pub fn new() -> Self {
        Self::with_policy(OnDuplicate::default())
    }

    pub fn with_policy(on_duplicate: OnDuplicate) -> Self {
        Self { routes: HashMap::new(), on_duplicate }
    }

    /// Registers `stages` for an exact `(method, path)` pair.
    ///
    /// Nested stage lists are flattened here, once, in order.
    ///
    /// ```rust
    /// use baton::{Context, Method, Next, OnDuplicate, Router, Sink, StageResult};
    ///
    /// async fn hello(_: Context, sink: Sink, _: Next) -> StageResult { sink.send("hello") }
    ///
    /// let mut router = Router::with_policy(OnDuplicate::Reject);
    /// router.register(Method::Get, "/hello", hello).unwrap();
    /// assert!(router.register(Method::Get, "/hello", hello).is_err());
    /// ```
    pub fn register(
        &mut self,
        method: Method,
        path: &str,
        stages: impl IntoStages,
    ) -> Result<(), Error> {
        let stages = flatten(stages);
        if stages.is_empty() {
            return Err(Error::EmptyRoute { method, path: path.to_owned() });
        }

        let table = self.routes.entry(method).or_default();
        if table.contains_key(path) {
            match self.on_duplicate {
                OnDuplicate::Reject => {
                    return Err(Error::DuplicateRoute { method, path: path.to_owned() });
                }
                OnDuplicate::Replace => {
                    warn!(%method, path, "route registered twice, replacing earlier stages");
                }
            }
        }

        debug!(%method, path, stages = stages.len(), "route registered");
        table.insert(path.to_owned(), Route { stages: stages.into_boxed_slice() });
        Ok(())
    }

    /// Registers a route and returns `self` for chaining.
    ///
    /// # Panics
    ///
    /// Panics if [`register`](Router::register) fails. Route tables are
    /// built at startup, where a bad table should stop the process.
    pub fn on(mut self, method: Method, path: &str, stages: impl IntoStages) -> Self {
        if let Err(e) = self.register(method, path, stages) {
            panic!("invalid route `{method} {path}`: {e}");
        }
        self
    }

    pub fn get(self, path: &str, stages: impl IntoStages) -> Self {
        self.on(Method::Get, path, stages)
    }

    pub fn post(self, path: &str, stages: impl IntoStages) -> Self {
        self.on(Method::Post, path, stages)
    }

    pub fn put(self, path: &str, stages: impl IntoStages) -> Self {
        self.on(Method::Put, path, stages)
    }

    pub fn patch(self, path: &str, stages: impl IntoStages) -> Self {
        self.on(Method::Patch, path, stages)
    }

    pub fn delete(self, path: &str, stages: impl IntoStages) -> Self {
        self.on(Method::Delete, path, stages)
    }

    /// Number of registered routes across all methods.
    pub fn len(&self) -> usize {
        self.routes.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn lookup(&self, method: Method, path: &str) -> Option<&Route> {
        self.routes.get(&method)?.get(path)
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}
