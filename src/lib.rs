//! # luddite
//!
//! A small framework for RESTful HTTP services.
//!
//! - **Middleware chain**: ordered [`Handler`]s, each able to act before and
//!   after the rest of the chain or to short-circuit it.
//! - **Context**: an immutable, request-scoped value bag ([`Context`]) that
//!   carries the API version, path params, request id and negotiated codec.
//! - **Representations**: JSON, XML and HTML out of the box, picked from
//!   `Accept`; more through [`ServiceBuilder::codec`].
//! - **Resources**: implement [`Resource`] and register it as a singleton or
//!   a collection; the conventional routes are bound for you.
//! - **Standard stages**: panic recovery, request ids, access log and
//!   metrics; content negotiation (`406`); API version resolution (`400`).
//! - **Server**: hyper, HTTP/1.1 and HTTP/2, optional TLS, graceful
//!   shutdown on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use luddite::{Context, Operation, Query, Resource, ResourceError, Service, ServiceConfig};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Widget { id: String, name: String }
//!
//! struct Widgets;
//!
//! impl Resource for Widgets {
//!     type Item = Widget;
//!     const OPERATIONS: &'static [Operation] = &[Operation::List, Operation::Get];
//!
//!     async fn list(&self, _ctx: &Context, _query: &Query) -> Result<Vec<Widget>, ResourceError> {
//!         Ok(vec![Widget { id: "1".into(), name: "gear".into() }])
//!     }
//!
//!     async fn get(&self, _ctx: &Context, id: Option<&str>) -> Result<Widget, ResourceError> {
//!         Err(ResourceError::not_found(format!("no widget {}", id.unwrap_or_default())))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> luddite::Result<()> {
//!     let mut service = Service::new(ServiceConfig::default())?;
//!     service.add_collection_resource("/widgets", Widgets)?;
//!     service.run().await
//! }
//! ```

mod codec;
mod config;
mod context;
mod error;
mod handler;
mod method;
mod request;
mod resource;
mod response;
mod router;
mod schema;
mod server;
mod service;
mod stats;
mod status;

pub mod logging;
pub mod middleware;

pub use codec::{Codec, CodecError, Codecs, HtmlCodec, JsonCodec, XmlCodec};
pub use config::{
    LogConfig, LogFormat, MetricsConfig, SchemaConfig, ServiceConfig, TransportConfig, VersionConfig,
};
pub use context::Context;
pub use error::{Error, Result};
pub use handler::{BoxFuture, BoxedHandler, Handler, Next};
pub use method::Method;
pub use request::{Query, Request};
pub use resource::{ErrorKind, Operation, Resource, ResourceError};
pub use response::{IntoResponse, Response, ResponseBuilder};
pub use router::{Endpoint, Router};
pub use server::Server;
pub use service::{Pipeline, Service, ServiceBuilder};
pub use stats::{MetricsStats, NullStats, Stats, Tags};
pub use status::Status;
