//! Middleware layer.
//!
//! Middleware intercepts requests and responses and is the right place for
//! cross-cutting concerns. Every service starts with three built-in stages,
//! in this order:
//!
//! - [`Bottom`]: request id, tracing span, access log, panic recovery, metrics
//! - [`Negotiator`]: picks the response representation from `Accept`
//! - [`VersionHandler`]: resolves the API version into the context
//!
//! User handlers follow, and the router is always last.

mod bottom;
mod negotiator;
mod version;

use std::sync::Arc;

pub use bottom::{Bottom, REQUEST_ID_HEADER};
pub use negotiator::Negotiator;
pub use version::{VersionHandler, VersionSource};

use crate::context::Context;
use crate::handler::{BoxFuture, BoxedHandler, Next};
use crate::request::Request;

/// A composed, immutable middleware pipeline.
///
/// Built from an ordered handler list; rebuilding produces a new chain and
/// leaves any in-flight clone of the old one untouched.
#[derive(Clone)]
pub struct Chain {
    handlers: Arc<[BoxedHandler]>,
}

impl Chain {
    /// Composes `handlers` so that running the chain runs `handlers[0]`
    /// first and each handler's `next` runs the one after it.
    pub fn build(handlers: &[BoxedHandler]) -> Self {
        Self { handlers: handlers.iter().cloned().collect() }
    }

    /// Runs the whole chain for one request.
    pub fn call(&self, ctx: Context, req: Request) -> BoxFuture {
        Next::new(Arc::clone(&self.handlers)).run(ctx, req)
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
