//! Radix-tree request router and endpoint type erasure.
//!
//! One tree per HTTP method. O(path-length) lookup. A literal segment always
//! wins over a `{param}` segment at the same position, whatever order the
//! routes were registered in.
//!
//! # How endpoints are stored
//!
//! The router holds endpoints of *different* closure types in one
//! `HashMap<Method, Tree>`, so each one is erased behind a trait object:
//!
//! ```text
//! |ctx, req| async { … }                    ← resource layer / collaborator
//!        ↓ router.add(Method::Get, "/widgets/{id}", f)
//! f.into_boxed_endpoint()                   ← Endpoint blanket impl
//!        ↓
//! Arc::new(FnEndpoint(f))                   ← stored as BoxedEndpoint
//!        ↓
//! endpoint.call(ctx, req) at request time   ← one vtable dispatch
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::codec::render_error;
use crate::context::Context;
use crate::error::{Error, Result};
use crate::handler::BoxFuture;
use crate::method::Method;
use crate::request::Request;
use crate::response::IntoResponse;
use crate::status::Status;

// ── Endpoint erasure ──────────────────────────────────────────────────────────

/// Internal dispatch interface.
///
/// `#[doc(hidden)] pub` rather than `pub(crate)` because it appears in the
/// return type of the public `Endpoint` trait's `into_boxed_endpoint` method.
#[doc(hidden)]
pub trait ErasedEndpoint {
    fn call(&self, ctx: Context, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedEndpoint = Arc<dyn ErasedEndpoint + Send + Sync + 'static>;

/// Implemented for every valid route endpoint.
///
/// You never implement this yourself. It is automatically satisfied for any
/// function or closure with the shape:
///
/// ```text
/// async fn name(ctx: Context, req: Request) -> impl IntoResponse
/// ```
///
/// The trait is **sealed**: only the blanket impl below can satisfy it.
pub trait Endpoint: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_endpoint(self) -> BoxedEndpoint;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Endpoint for F
where
    F: Fn(Context, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_endpoint(self) -> BoxedEndpoint {
        Arc::new(FnEndpoint(self))
    }
}

/// Newtype bridging a concrete endpoint `F` to [`ErasedEndpoint`].
struct FnEndpoint<F>(F);

impl<F, Fut, R> ErasedEndpoint for FnEndpoint<F>
where
    F: Fn(Context, Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, ctx: Context, req: Request) -> BoxFuture {
        let fut = (self.0)(ctx, req);
        Box::pin(async move { fut.await.into_response() })
    }
}

// ── Router ────────────────────────────────────────────────────────────────────

/// The route table.
///
/// Filled during service setup, then frozen behind an `Arc` and run as the
/// last stage of the middleware chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Route>>,
}

/// A bound endpoint. Unimplemented routes are matched (so the path is known
/// and the request gets `405`, not `404`) but never advertised in `Allow`.
struct Route {
    endpoint: BoxedEndpoint,
    implemented: bool,
}

/// Result of resolving a method + path.
pub(crate) enum Lookup {
    Found(BoxedEndpoint, Vec<(String, String)>),
    /// The path exists under other methods.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers an endpoint for a method + path pair.
    ///
    /// Path parameters use `{name}` syntax; they reach the endpoint through
    /// both `req.param("name")` and `ctx.param("name")`.
    pub fn add(&mut self, method: Method, path: &str, endpoint: impl Endpoint) -> Result<()> {
        self.insert(method, path, endpoint.into_boxed_endpoint(), true)
    }

    /// Binds `method` + `path` to a `405` error. The path counts as known,
    /// but `method` is left out of its `Allow` header.
    pub(crate) fn add_unimplemented(&mut self, method: Method, path: &str) -> Result<()> {
        let endpoint = |ctx: Context, req: Request| async move {
            let message = format!("{} is not supported on this resource", req.method());
            render_error(&ctx, Status::MethodNotAllowed, "method_not_allowed", &message, None)
        };
        self.insert(method, path, endpoint.into_boxed_endpoint(), false)
    }

    fn insert(&mut self, method: Method, path: &str, endpoint: BoxedEndpoint, implemented: bool) -> Result<()> {
        self.routes
            .entry(method)
            .or_default()
            .insert(path, Route { endpoint, implemented })
            .map_err(|source| Error::Route { path: path.to_owned(), source })
    }

    pub(crate) fn lookup(&self, method: &http::Method, path: &str) -> Lookup {
        let matched = Method::try_from(method).ok()
            .and_then(|m| self.routes.get(&m))
            .and_then(|tree| tree.at(path).ok());

        if let Some(matched) = matched {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), urlencoding::decode(v).map_or_else(|_| v.to_owned(), |d| d.into_owned())))
                .collect();
            return Lookup::Found(Arc::clone(&matched.value.endpoint), params);
        }

        if self.routes.values().any(|tree| tree.at(path).is_ok()) {
            Lookup::MethodNotAllowed(self.allowed(path))
        } else {
            Lookup::NotFound
        }
    }

    /// Implemented methods with a route matching `path`, sorted.
    pub(crate) fn allowed(&self, path: &str) -> Vec<Method> {
        let mut methods: Vec<Method> = self.routes.iter()
            .filter(|(_, tree)| tree.at(path).is_ok_and(|m| m.value.implemented))
            .map(|(method, _)| *method)
            .collect();
        methods.sort();
        methods
    }

    /// Runs the endpoint bound to the request's method and path.
    ///
    /// Unknown paths get `404`; known paths under another method get `405`
    /// with an `Allow` header listing the implemented methods. An endpoint
    /// answering `405` itself gets the same header, minus the refused
    /// method.
    pub fn dispatch(self: &Arc<Self>, mut ctx: Context, mut req: Request) -> BoxFuture {
        match self.lookup(req.method(), req.path()) {
            Lookup::Found(endpoint, params) => {
                for (name, value) in params {
                    ctx = ctx.with_param(name.clone(), value.clone());
                    req.params.insert(name, value);
                }
                let router = Arc::clone(self);
                let path = req.path().to_owned();
                let refused = Method::try_from(req.method()).ok();
                let fut = endpoint.call(ctx, req);
                Box::pin(async move {
                    let mut res = fut.await;
                    if res.status_code() == u16::from(Status::MethodNotAllowed) && res.header("allow").is_none() {
                        let mut allowed = router.allowed(&path);
                        allowed.retain(|m| Some(*m) != refused);
                        res.set_header("allow", &allow_header(&allowed));
                    }
                    res
                })
            }
            Lookup::MethodNotAllowed(allowed) => {
                let mut res = render_error(
                    &ctx,
                    Status::MethodNotAllowed,
                    "method_not_allowed",
                    &format!("{} is not supported on this resource", req.method()),
                    None,
                );
                res.set_header("allow", &allow_header(&allowed));
                Box::pin(async move { res })
            }
            Lookup::NotFound => {
                let res = render_error(&ctx, Status::NotFound, "not_found", "no such resource", None);
                Box::pin(async move { res })
            }
        }
    }
}

impl Default for Router {
    fn default() -> Self { Self::new() }
}

fn allow_header(methods: &[Method]) -> String {
    methods.iter().map(|m| m.as_str()).collect::<Vec<_>>().join(", ")
}
