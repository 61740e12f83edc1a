//! Resources and their mapping onto routes.
//!
//! A [`Resource`] implements any subset of six operations. Registering it
//! binds every conventional route up front:
//!
//! | Shape      | Method + path               | Operation                       |
//! |------------|-----------------------------|---------------------------------|
//! | singleton  | `GET base`                  | `get(ctx, None)`                |
//! | singleton  | `PUT base`                  | `update(ctx, None, item)`       |
//! | singleton  | `POST base/{action}`        | `action(ctx, None, action, ..)` |
//! | collection | `GET base`                  | `list(ctx, query)`              |
//! | collection | `GET base/{id}`             | `get(ctx, Some(id))`            |
//! | collection | `POST base`                 | `create(ctx, item)`             |
//! | collection | `PUT base/{id}`             | `update(ctx, Some(id), item)`   |
//! | collection | `DELETE base`               | `delete(ctx, None)`             |
//! | collection | `DELETE base/{id}`          | `delete(ctx, Some(id))`         |
//! | collection | `POST base/{id}/{action}`   | `action(ctx, Some(id), ..)`     |
//!
//! Every route is bound, but only the operations listed in
//! [`Resource::OPERATIONS`] reach the resource. The others answer
//! `405 Method Not Allowed` before the body is read, with an `Allow` header
//! naming the methods that are implemented at that path.

use std::future::Future;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::codec::{render, render_error, Codec, JsonCodec};
use crate::context::Context;
use crate::error::Result;
use crate::method::Method;
use crate::request::{Query, Request};
use crate::response::Response;
use crate::router::{Endpoint, Router};
use crate::status::Status;

// ── errors ────────────────────────────────────────────────────────────────────

/// What went wrong in a resource operation. Decides the response status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was understood but its content is unacceptable.
    Validation,
    NotFound,
    /// The operation clashes with the current state, e.g. a duplicate id.
    Conflict,
    /// The resource does not provide this operation.
    NotImplemented,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> Status {
        match self {
            ErrorKind::Validation     => Status::BadRequest,
            ErrorKind::NotFound       => Status::NotFound,
            ErrorKind::Conflict       => Status::Conflict,
            ErrorKind::NotImplemented => Status::MethodNotAllowed,
            ErrorKind::Internal       => Status::InternalServerError,
        }
    }

    /// Machine-readable `code` of the error body.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation     => "validation_failed",
            ErrorKind::NotFound       => "not_found",
            ErrorKind::Conflict       => "conflict",
            ErrorKind::NotImplemented => "method_not_allowed",
            ErrorKind::Internal       => "internal_error",
        }
    }
}

/// Error returned by [`Resource`] operations.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct ResourceError {
    kind: ErrorKind,
    message: String,
}

impl ResourceError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    /// Logged server-side; clients only see a generic message.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn not_implemented() -> Self {
        Self::new(ErrorKind::NotImplemented, "operation not supported")
    }

    pub fn kind(&self) -> ErrorKind { self.kind }
    pub fn message(&self) -> &str { &self.message }

    fn into_response(self, ctx: &Context) -> Response {
        let status = self.kind.status();
        if self.kind == ErrorKind::Internal {
            error!(error = %self.message, "resource operation failed");
            return render_error(ctx, status, self.kind.code(), "internal server error", None);
        }
        render_error(ctx, status, self.kind.code(), &self.message, None)
    }
}

// ── the trait ─────────────────────────────────────────────────────────────────

/// The operations a [`Resource`] can provide.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Operation {
    List,
    Get,
    Create,
    Update,
    /// `DELETE` on one item.
    Delete,
    /// `DELETE` on the whole collection.
    DeleteAll,
    Action,
}

/// A REST resource.
///
/// Override the operations the resource supports and list them in
/// [`OPERATIONS`](Resource::OPERATIONS). Implementations may use
/// `async fn`.
///
/// ```rust
/// use luddite::{Context, Operation, Query, Resource, ResourceError};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Widget { id: String }
///
/// struct Widgets;
///
/// impl Resource for Widgets {
///     type Item = Widget;
///     const OPERATIONS: &'static [Operation] = &[Operation::List];
///
///     async fn list(&self, _ctx: &Context, _query: &Query) -> Result<Vec<Widget>, ResourceError> {
///         Ok(vec![Widget { id: "1".into() }])
///     }
/// }
/// ```
pub trait Resource: Send + Sync + 'static {
    /// Representation exchanged with clients.
    type Item: Serialize + DeserializeOwned + Send + 'static;

    /// Operations this resource implements. Requests for any other answer
    /// `405` without calling the resource.
    const OPERATIONS: &'static [Operation];

    /// Id of an item, used for the `Location` header of a created item.
    fn id(&self, _item: &Self::Item) -> Option<String> {
        None
    }

    fn list(
        &self,
        _ctx: &Context,
        _query: &Query,
    ) -> impl Future<Output = Result<Vec<Self::Item>, ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }

    /// `id` is `None` for a singleton.
    fn get(
        &self,
        _ctx: &Context,
        _id: Option<&str>,
    ) -> impl Future<Output = Result<Self::Item, ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }

    fn create(
        &self,
        _ctx: &Context,
        _item: Self::Item,
    ) -> impl Future<Output = Result<Self::Item, ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }

    fn update(
        &self,
        _ctx: &Context,
        _id: Option<&str>,
        _item: Self::Item,
    ) -> impl Future<Output = Result<Self::Item, ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }

    /// `id` is `None` for `DELETE` on the collection itself.
    fn delete(
        &self,
        _ctx: &Context,
        _id: Option<&str>,
    ) -> impl Future<Output = Result<(), ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }

    /// Named, non-CRUD operation. Returning `Value::Null` answers `204`.
    fn action(
        &self,
        _ctx: &Context,
        _id: Option<&str>,
        _action: &str,
        _body: Value,
    ) -> impl Future<Output = Result<Value, ResourceError>> + Send {
        async { Err(ResourceError::not_implemented()) }
    }
}

// ── registration ──────────────────────────────────────────────────────────────

fn supports<R: Resource>(op: Operation) -> bool {
    R::OPERATIONS.contains(&op)
}

/// Binds `endpoint` when `R` implements `op`, a `405` otherwise.
fn bind<R: Resource>(router: &mut Router, op: Operation, method: Method, path: &str, endpoint: impl Endpoint) -> Result<()> {
    if supports::<R>(op) {
        router.add(method, path, endpoint)
    } else {
        router.add_unimplemented(method, path)
    }
}

/// Binds `GET base`, `PUT base` and `POST base/{action}`.
pub(crate) fn register_singleton<R: Resource>(router: &mut Router, base: &str, resource: Arc<R>) -> Result<()> {
    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::Get, Method::Get, &route(base, ""), move |ctx: Context, _req: Request| {
        let r = Arc::clone(&r);
        async move { reply(&ctx, Status::Ok, r.get(&ctx, None).await) }
    })?;

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::Update, Method::Put, &route(base, ""), move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move {
            match decode_item(&ctx, &req) {
                Ok(item) => reply(&ctx, Status::Ok, r.update(&ctx, None, item).await),
                Err(e) => e.into_response(&ctx),
            }
        }
    })?;

    let r = resource;
    bind::<R>(router, Operation::Action, Method::Post, &route(base, "/{action}"), move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move { run_action(&*r, &ctx, &req, None).await }
    })
}

/// Binds the seven collection routes.
pub(crate) fn register_collection<R: Resource>(router: &mut Router, base: &str, resource: Arc<R>) -> Result<()> {
    let collection = route(base, "");
    let item_path = route(base, "/{id}");

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::List, Method::Get, &collection, move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move { reply(&ctx, Status::Ok, r.list(&ctx, &req.query()).await) }
    })?;

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::Get, Method::Get, &item_path, move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move { reply(&ctx, Status::Ok, r.get(&ctx, req.param("id")).await) }
    })?;

    let r = Arc::clone(&resource);
    let base_path = collection.clone();
    bind::<R>(router, Operation::Create, Method::Post, &collection, move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        let base_path = base_path.clone();
        async move {
            let item = match decode_item(&ctx, &req) {
                Ok(item) => item,
                Err(e) => return e.into_response(&ctx),
            };
            match r.create(&ctx, item).await {
                Ok(created) => {
                    let location = r.id(&created).map(|id| location(&base_path, &id));
                    let mut res = render(&ctx, Status::Created, &created);
                    if let Some(location) = location {
                        res.set_header("location", &location);
                    }
                    res
                }
                Err(e) => e.into_response(&ctx),
            }
        }
    })?;

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::Update, Method::Put, &item_path, move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move {
            match decode_item(&ctx, &req) {
                Ok(item) => reply(&ctx, Status::Ok, r.update(&ctx, req.param("id"), item).await),
                Err(e) => e.into_response(&ctx),
            }
        }
    })?;

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::DeleteAll, Method::Delete, &collection, move |ctx: Context, _req: Request| {
        let r = Arc::clone(&r);
        async move { deleted(&ctx, r.delete(&ctx, None).await) }
    })?;

    let r = Arc::clone(&resource);
    bind::<R>(router, Operation::Delete, Method::Delete, &item_path, move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move { deleted(&ctx, r.delete(&ctx, req.param("id")).await) }
    })?;

    let r = resource;
    bind::<R>(router, Operation::Action, Method::Post, &route(base, "/{id}/{action}"), move |ctx: Context, req: Request| {
        let r = Arc::clone(&r);
        async move { run_action(&*r, &ctx, &req, req.param("id")).await }
    })
}

async fn run_action<R: Resource>(r: &R, ctx: &Context, req: &Request, id: Option<&str>) -> Response {
    let action = req.param("action").unwrap_or_default();
    let body = match decode_document(ctx, req) {
        Ok(body) => body,
        Err(e) => return e.into_response(ctx),
    };
    match r.action(ctx, id, action, body).await {
        Ok(Value::Null) => Response::status(Status::NoContent),
        Ok(value) => render(ctx, Status::Ok, &value),
        Err(e) => e.into_response(ctx),
    }
}

// ── helpers ───────────────────────────────────────────────────────────────────

fn reply<T: Serialize>(ctx: &Context, status: Status, result: std::result::Result<T, ResourceError>) -> Response {
    match result {
        Ok(value) => render(ctx, status, &value),
        Err(e) => e.into_response(ctx),
    }
}

fn deleted(ctx: &Context, result: std::result::Result<(), ResourceError>) -> Response {
    match result {
        Ok(()) => Response::status(Status::NoContent),
        Err(e) => e.into_response(ctx),
    }
}

/// Decodes the request body with the negotiated request codec. An empty
/// body is `null`.
fn decode_document(ctx: &Context, req: &Request) -> std::result::Result<Value, ResourceError> {
    if req.body().is_empty() {
        return Ok(Value::Null);
    }
    let decoded = match ctx.request_codec() {
        Some(codec) => codec.decode(req.body()),
        None => JsonCodec.decode(req.body()),
    };
    decoded.map_err(|e| ResourceError::validation(format!("malformed request body: {}", e.message)))
}

fn decode_item<T: DeserializeOwned>(ctx: &Context, req: &Request) -> std::result::Result<T, ResourceError> {
    let doc = decode_document(ctx, req)?;
    serde_json::from_value(doc).map_err(|e| ResourceError::validation(format!("invalid request body: {e}")))
}

/// `base` + `tail`, with `base` normalised to a leading and no trailing
/// slash.
fn route(base: &str, tail: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = format!("{base}{tail}");
    match path.as_str() {
        "" => "/".to_owned(),
        p if p.starts_with('/') => path,
        _ => format!("/{path}"),
    }
}

fn location(collection: &str, id: &str) -> String {
    let collection = collection.trim_end_matches('/');
    format!("{collection}/{}", urlencoding::encode(id))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use bytes::Bytes;
    use serde::Deserialize;
    use serde_json::json;

    use super::*;

    #[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
    struct Widget {
        id: String,
        name: String,
    }

    /// List, get, create and delete; no update or action.
    #[derive(Default)]
    struct Widgets {
        items: Mutex<BTreeMap<String, Widget>>,
    }

    impl Resource for Widgets {
        type Item = Widget;
        const OPERATIONS: &'static [Operation] =
            &[Operation::List, Operation::Get, Operation::Create, Operation::Delete];

        fn id(&self, item: &Widget) -> Option<String> {
            Some(item.id.clone())
        }

        async fn list(&self, _ctx: &Context, query: &Query) -> std::result::Result<Vec<Widget>, ResourceError> {
            let items = self.items.lock().unwrap();
            Ok(items.values()
                .filter(|w| query.get("name").is_none_or(|n| n == w.name))
                .cloned()
                .collect())
        }

        async fn get(&self, _ctx: &Context, id: Option<&str>) -> std::result::Result<Widget, ResourceError> {
            let id = id.ok_or_else(ResourceError::not_implemented)?;
            self.items.lock().unwrap().get(id).cloned()
                .ok_or_else(|| ResourceError::not_found(format!("no widget {id}")))
        }

        async fn create(&self, _ctx: &Context, item: Widget) -> std::result::Result<Widget, ResourceError> {
            if item.name.is_empty() {
                return Err(ResourceError::validation("name must not be empty"));
            }
            let mut items = self.items.lock().unwrap();
            if items.contains_key(&item.id) {
                return Err(ResourceError::conflict(format!("widget {} exists", item.id)));
            }
            items.insert(item.id.clone(), item.clone());
            Ok(item)
        }

        async fn delete(&self, _ctx: &Context, id: Option<&str>) -> std::result::Result<(), ResourceError> {
            let id = id.ok_or_else(ResourceError::not_implemented)?;
            match self.items.lock().unwrap().remove(id) {
                Some(_) => Ok(()),
                None => Err(ResourceError::internal("storage lost track of a widget")),
            }
        }
    }

    /// Get and update only, plus one action.
    struct Settings {
        value: Mutex<Value>,
    }

    impl Resource for Settings {
        type Item = Value;
        const OPERATIONS: &'static [Operation] = &[Operation::Get, Operation::Update, Operation::Action];

        async fn get(&self, _ctx: &Context, _id: Option<&str>) -> std::result::Result<Value, ResourceError> {
            Ok(self.value.lock().unwrap().clone())
        }

        async fn update(&self, _ctx: &Context, _id: Option<&str>, item: Value) -> std::result::Result<Value, ResourceError> {
            *self.value.lock().unwrap() = item.clone();
            Ok(item)
        }

        async fn action(
            &self,
            _ctx: &Context,
            _id: Option<&str>,
            action: &str,
            body: Value,
        ) -> std::result::Result<Value, ResourceError> {
            match action {
                "reset" => {
                    *self.value.lock().unwrap() = json!({});
                    Ok(Value::Null)
                }
                "echo" => Ok(body),
                _ => Err(ResourceError::not_found(format!("no action {action}"))),
            }
        }
    }

    fn router() -> Arc<Router> {
        let mut router = Router::new();
        register_collection(&mut router, "/widgets/", Arc::new(Widgets::default())).unwrap();
        register_singleton(&mut router, "/settings", Arc::new(Settings { value: Mutex::new(json!({"a": 1})) })).unwrap();
        Arc::new(router)
    }

    async fn call(router: &Arc<Router>, method: &str, uri: &str, body: &str) -> Response {
        let req = http::Request::builder()
            .method(method)
            .uri(uri)
            .body(Bytes::from(body.to_owned()))
            .unwrap();
        router.dispatch(Context::new(), req.into()).await
    }

    fn json_body(res: &Response) -> Value {
        serde_json::from_slice(res.body()).unwrap()
    }

    #[test]
    fn normalises_route_paths() {
        assert_eq!(route("/widgets/", "/{id}"), "/widgets/{id}");
        assert_eq!(route("widgets", ""), "/widgets");
        assert_eq!(route("/", ""), "/");
        assert_eq!(route("/", "/{action}"), "/{action}");
        assert_eq!(location("/widgets", "a b/c"), "/widgets/a%20b%2Fc");
    }

    #[tokio::test]
    async fn collection_crud() {
        let router = router();

        let res = call(&router, "POST", "/widgets", r#"{"id":"w1","name":"gear"}"#).await;
        assert_eq!(res.status_code(), 201);
        assert_eq!(res.header("location"), Some("/widgets/w1"));
        assert_eq!(json_body(&res)["name"], "gear");

        let res = call(&router, "POST", "/widgets", r#"{"id":"w1","name":"gear"}"#).await;
        assert_eq!(res.status_code(), 409);

        let res = call(&router, "GET", "/widgets/w1", "").await;
        assert_eq!(res.status_code(), 200);
        assert_eq!(json_body(&res), json!({"id": "w1", "name": "gear"}));

        let res = call(&router, "GET", "/widgets?name=cog", "").await;
        assert_eq!(json_body(&res), json!([]));

        let res = call(&router, "DELETE", "/widgets/w1", "").await;
        assert_eq!(res.status_code(), 204);
        assert!(res.body().is_empty());

        let res = call(&router, "GET", "/widgets/w1", "").await;
        assert_eq!(res.status_code(), 404);
        assert_eq!(json_body(&res)["code"], "not_found");
    }

    #[tokio::test]
    async fn unimplemented_operations_answer_405_with_allow() {
        let router = router();

        let res = call(&router, "PUT", "/widgets/w1", r#"{"id":"w1","name":"x"}"#).await;
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some("DELETE, GET"));
        assert_eq!(json_body(&res)["code"], "method_not_allowed");

        let res = call(&router, "DELETE", "/widgets", "").await;
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some("GET, POST"));

        let res = call(&router, "POST", "/widgets/w1/polish", "").await;
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some(""));
    }

    #[tokio::test]
    async fn unimplemented_operations_never_read_the_body() {
        let router = router();

        // `Widget` rejects both bodies, so a 400 here would mean decoding ran.
        for body in ["", "{not json", r#"{"id":"w1"}"#] {
            let res = call(&router, "PUT", "/widgets/w1", body).await;
            assert_eq!(res.status_code(), 405, "body {body:?}");
            assert_eq!(res.header("allow"), Some("DELETE, GET"));
        }
    }

    #[tokio::test]
    async fn declared_operations_refusing_at_runtime_leave_out_their_method() {
        // Mounted as a singleton, `Widgets::get` sees no id and refuses.
        let mut router = Router::new();
        register_singleton(&mut router, "/widget", Arc::new(Widgets::default())).unwrap();
        let router = Arc::new(router);
        let res = call(&router, "GET", "/widget", "").await;
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some(""));
    }

    #[tokio::test]
    async fn rejects_bad_bodies_with_400() {
        let router = router();

        let res = call(&router, "POST", "/widgets", "{not json").await;
        assert_eq!(res.status_code(), 400);
        assert_eq!(json_body(&res)["code"], "validation_failed");

        let res = call(&router, "POST", "/widgets", r#"{"id":"w2"}"#).await;
        assert_eq!(res.status_code(), 400);

        let res = call(&router, "POST", "/widgets", r#"{"id":"w2","name":""}"#).await;
        assert_eq!(res.status_code(), 400);
        assert_eq!(json_body(&res)["message"], "name must not be empty");
    }

    #[tokio::test]
    async fn internal_errors_hide_their_message() {
        let router = router();

        let res = call(&router, "DELETE", "/widgets/ghost", "").await;
        assert_eq!(res.status_code(), 500);
        assert_eq!(json_body(&res)["message"], "internal server error");
    }

    #[tokio::test]
    async fn singleton_routes() {
        let router = router();

        let res = call(&router, "GET", "/settings", "").await;
        assert_eq!(json_body(&res), json!({"a": 1}));

        let res = call(&router, "PUT", "/settings", r#"{"b":2}"#).await;
        assert_eq!(res.status_code(), 200);
        assert_eq!(json_body(&call(&router, "GET", "/settings", "").await), json!({"b": 2}));

        let res = call(&router, "POST", "/settings/echo", r#"[1,2]"#).await;
        assert_eq!(json_body(&res), json!([1, 2]));

        let res = call(&router, "POST", "/settings/reset", "").await;
        assert_eq!(res.status_code(), 204);
        assert_eq!(json_body(&call(&router, "GET", "/settings", "").await), json!({}));

        let res = call(&router, "DELETE", "/settings", "").await;
        assert_eq!(res.status_code(), 405);
        assert_eq!(res.header("allow"), Some("GET, PUT"));
    }

    #[test]
    fn error_kinds_map_to_statuses() {
        let cases = [
            (ResourceError::validation("x"), 400),
            (ResourceError::not_found("x"), 404),
            (ResourceError::conflict("x"), 409),
            (ResourceError::not_implemented(), 405),
            (ResourceError::internal("x"), 500),
        ];
        for (err, status) in cases {
            assert_eq!(u16::from(err.kind().status()), status, "{err}");
        }
    }
}
