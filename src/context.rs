//! Request context seen by every stage of one dispatch.

use bytes::Bytes;
use http::{Extensions, HeaderMap};

use crate::method::Method;

/// Immutable view of the request being dispatched.
///
/// Each stage receives its own clone. Data a stage wants to hand downstream
/// is attached with [`Next::with`](crate::Next::with) and becomes visible
/// through [`Context::get`] from the next stage on.
#[derive(Clone, Debug)]
pub struct Context {
    method: Method,
    path: String,
    headers: HeaderMap,
    payload: Bytes,
    data: Extensions,
}

impl Context {
    pub fn new(method: Method, path: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            payload: payload.into(),
            data: Extensions::new(),
        }
    }

    /// Sets the request headers. Used by transports before dispatch.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn payload(&self) -> &Bytes { &self.payload }

    /// Header value as a string, if present and visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Data of type `T` attached by an earlier stage.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.data.get::<T>()
    }

    pub(crate) fn absorb(&mut self, attached: Extensions) {
        self.data.extend(attached);
    }
}
