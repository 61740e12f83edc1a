//! Request-scoped, immutable context.
//!
//! A [`Context`] is created when a request enters the pipeline and threaded
//! by value through every middleware stage and into resource operations.
//! It is append-only: each `with_*` call returns a *new* context layered on
//! top of the old one, which stays valid and unchanged. Layers are shared
//! behind `Arc`, so deriving a context is one allocation and cloning one is
//! one atomic increment.
//!
//! ```text
//!   Context::new()
//!        │ with_request_id("9f..")        (bottom)
//!        │ with_negotiated(json, json)    (negotiator)
//!        │ with_version(2)                (version handler)
//!        │ with_param("id", "42")         (router)
//!        ▼
//!   ctx seen by Resource::get
//! ```
//!
//! Reading a key that was never set yields `None`; there are no defaults.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use crate::codec::Codec;

/// Immutable key/value association scoped to one in-flight request.
#[derive(Clone, Default)]
pub struct Context {
    head: Option<Arc<Layer>>,
}

struct Layer {
    key: Key,
    value: Arc<dyn Any + Send + Sync>,
    parent: Option<Arc<Layer>>,
}

enum Key {
    Typed(TypeId),
    Param(String),
}

/// API version resolved by the version handler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ApiVersion(u32);

/// Identifier of the request, taken from `x-request-id` or generated.
#[derive(Clone, Debug)]
struct RequestId(String);

/// Codecs chosen by the negotiator.
#[derive(Clone)]
struct Negotiated {
    response: Arc<dyn Codec>,
    request: Arc<dyn Codec>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, key: Key, value: Arc<dyn Any + Send + Sync>) -> Self {
        Self {
            head: Some(Arc::new(Layer { key, value, parent: self.head.clone() })),
        }
    }

    fn layers(&self) -> impl Iterator<Item = &Layer> {
        std::iter::successors(self.head.as_deref(), |layer| layer.parent.as_deref())
    }

    // ── generic typed values ─────────────────────────────────────────────────

    /// Layers a value keyed by its type. A later value of the same type
    /// shadows earlier ones.
    pub fn with_value<T: Send + Sync + 'static>(&self, value: T) -> Self {
        self.push(Key::Typed(TypeId::of::<T>()), Arc::new(value))
    }

    /// Most recent value of type `T`.
    pub fn value<T: Send + Sync + 'static>(&self) -> Option<&T> {
        let wanted = TypeId::of::<T>();
        self.layers()
            .find(|layer| matches!(layer.key, Key::Typed(id) if id == wanted))
            .and_then(|layer| layer.value.downcast_ref::<T>())
    }

    // ── route parameters ─────────────────────────────────────────────────────

    pub fn with_param(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(Key::Param(key.into()), Arc::new(value.into()))
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.layers()
            .find(|layer| matches!(&layer.key, Key::Param(name) if name == key))
            .and_then(|layer| layer.value.downcast_ref::<String>())
            .map(String::as_str)
    }

    // ── well-known keys ──────────────────────────────────────────────────────

    pub fn with_version(&self, version: u32) -> Self {
        self.with_value(ApiVersion(version))
    }

    /// The negotiated API version. Always present once the version handler
    /// has run.
    pub fn version(&self) -> Option<u32> {
        self.value::<ApiVersion>().map(|v| v.0)
    }

    pub fn with_request_id(&self, id: impl Into<String>) -> Self {
        self.with_value(RequestId(id.into()))
    }

    pub fn request_id(&self) -> Option<&str> {
        self.value::<RequestId>().map(|id| id.0.as_str())
    }

    pub fn with_span(&self, span: tracing::Span) -> Self {
        self.with_value(span)
    }

    /// The per-request tracing span opened by the bottom handler.
    pub fn span(&self) -> Option<&tracing::Span> {
        self.value::<tracing::Span>()
    }

    /// Records the codecs used to encode the response and to decode the
    /// request body.
    pub fn with_negotiated(&self, response: Arc<dyn Codec>, request: Arc<dyn Codec>) -> Self {
        self.with_value(Negotiated { response, request })
    }

    /// Codec for the response representation.
    pub fn codec(&self) -> Option<&Arc<dyn Codec>> {
        self.value::<Negotiated>().map(|n| &n.response)
    }

    /// Codec for the request body.
    pub fn request_codec(&self) -> Option<&Arc<dyn Codec>> {
        self.value::<Negotiated>().map(|n| &n.request)
    }

    /// Negotiated response content type.
    pub fn content_type(&self) -> Option<&str> {
        self.codec().map(|c| c.content_type())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("version", &self.version())
            .field("request_id", &self.request_id())
            .field("content_type", &self.content_type())
            .field("layers", &self.layers().count())
            .finish()
    }
}
