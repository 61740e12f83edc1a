//! Middleware handler trait, the `Next` continuation and type erasure.
//!
//! # How a request moves through the chain
//!
//! A chain is an ordered `Arc<[BoxedHandler]>`. Running it hands the first
//! handler a [`Next`] that points at the second one, and so on:
//!
//! ```text
//! handlers[0].handle(ctx, req, next→1)
//!     ├─ may return early            ← short-circuit: nothing below runs
//!     └─ next.run(ctx', req)
//!          handlers[1].handle(ctx', req, next→2)
//!               └─ …
//!                    next.run past the end → empty 404 (terminal)
//!     ◄─ response comes back up; each handler may edit it on the way out
//! ```
//!
//! The chain itself never catches panics. That is the bottom handler's job,
//! and it only works because [`Next::run`] defers the next handler's call
//! into the returned future, so a panic in the synchronous part of
//! `handle` still unwinds inside a future the bottom handler is polling.
//!
//! The only runtime cost per stage is **one Arc clone** + **one boxed
//! future**.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

/// A heap-allocated, type-erased future that resolves to a [`Response`].
///
/// `Pin<Box<…>>` is required because the async runtime must be able to poll
/// the future in-place. `Send + 'static` let tokio move the future across
/// threads safely.
pub type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send + 'static>>;

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn Handler>;

/// One stage of the request-processing chain.
///
/// Implement it on a struct for configurable middleware, or pass a closure:
///
/// ```rust
/// use luddite::{Context, Next, Request};
///
/// let timing = |ctx: Context, req: Request, next: Next| async move {
///     let start = std::time::Instant::now();
///     let mut res = next.run(ctx, req).await;
///     res.set_header("x-elapsed-us", &start.elapsed().as_micros().to_string());
///     res
/// };
/// # let _ = timing;
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Processes one request. Run `next` to continue down the chain, or
    /// return a response without running it to short-circuit.
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture;
}

impl<F, Fut> Handler for F
where
    F: Fn(Context, Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        Box::pin(self(ctx, req, next))
    }
}

/// Continuation to the rest of the chain.
///
/// Consumed by [`run`](Next::run), so a stage can continue the chain at most
/// once.
pub struct Next {
    chain: Arc<[BoxedHandler]>,
    index: usize,
}

impl Next {
    pub(crate) fn new(chain: Arc<[BoxedHandler]>) -> Self {
        Self { chain, index: 0 }
    }

    /// Runs the remaining handlers. Past the last one the chain is terminal
    /// and yields an empty `404 Not Found`.
    pub fn run(self, ctx: Context, req: Request) -> BoxFuture {
        Box::pin(async move {
            match self.chain.get(self.index).cloned() {
                Some(handler) => {
                    let next = Next { chain: self.chain, index: self.index + 1 };
                    handler.handle(ctx, req, next).await
                }
                None => Response::status(Status::NotFound),
            }
        })
    }
}
