//! In-memory widget store: a collection, a singleton and one middleware.
//!
//! Run with:
//!   cargo run --example basic
//!
//! Try:
//!   curl http://localhost:8080/widgets
//!   curl -X POST http://localhost:8080/widgets \
//!        -H 'content-type: application/json' \
//!        -d '{"id":"w1","name":"gear"}'
//!   curl -H 'X-Api-Version: 1' http://localhost:8080/widgets/w1
//!   curl -X POST http://localhost:8080/widgets/w1/polish
//!   curl -X DELETE http://localhost:8080/widgets      # 405, no bulk delete
//!   curl -H 'Accept: application/xml' http://localhost:8080/settings

use std::collections::BTreeMap;
use std::sync::Mutex;

use luddite::{
    Context, Next, Operation, Query, Request, Resource, ResourceError, Service, ServiceConfig,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Serialize, Deserialize)]
struct Widget {
    id: String,
    name: String,
    #[serde(default)]
    polished: bool,
}

#[derive(Default)]
struct Widgets {
    items: Mutex<BTreeMap<String, Widget>>,
}

impl Resource for Widgets {
    type Item = Widget;
    const OPERATIONS: &'static [Operation] = &[
        Operation::List,
        Operation::Get,
        Operation::Create,
        Operation::Delete,
        Operation::Action,
    ];

    fn id(&self, item: &Widget) -> Option<String> {
        Some(item.id.clone())
    }

    async fn list(&self, _ctx: &Context, query: &Query) -> Result<Vec<Widget>, ResourceError> {
        let items = self.items.lock().map_err(|_| ResourceError::internal("widget store poisoned"))?;
        Ok(items.values()
            .filter(|w| query.get("name").is_none_or(|name| name == w.name))
            .cloned()
            .collect())
    }

    async fn get(&self, _ctx: &Context, id: Option<&str>) -> Result<Widget, ResourceError> {
        let id = id.unwrap_or_default();
        let items = self.items.lock().map_err(|_| ResourceError::internal("widget store poisoned"))?;
        items.get(id).cloned().ok_or_else(|| ResourceError::not_found(format!("no widget {id}")))
    }

    async fn create(&self, _ctx: &Context, widget: Widget) -> Result<Widget, ResourceError> {
        let mut items = self.items.lock().map_err(|_| ResourceError::internal("widget store poisoned"))?;
        if items.contains_key(&widget.id) {
            return Err(ResourceError::conflict(format!("widget {} already exists", widget.id)));
        }
        items.insert(widget.id.clone(), widget.clone());
        Ok(widget)
    }

    async fn delete(&self, _ctx: &Context, id: Option<&str>) -> Result<(), ResourceError> {
        let id = id.unwrap_or_default();
        let mut items = self.items.lock().map_err(|_| ResourceError::internal("widget store poisoned"))?;
        items.remove(id).map(|_| ()).ok_or_else(|| ResourceError::not_found(format!("no widget {id}")))
    }

    async fn action(&self, _ctx: &Context, id: Option<&str>, action: &str, _body: Value) -> Result<Value, ResourceError> {
        let id = id.unwrap_or_default();
        let mut items = self.items.lock().map_err(|_| ResourceError::internal("widget store poisoned"))?;
        let widget = items.get_mut(id).ok_or_else(|| ResourceError::not_found(format!("no widget {id}")))?;
        match action {
            "polish" => {
                widget.polished = true;
                Ok(Value::Null)
            }
            other => Err(ResourceError::validation(format!("unknown action {other}"))),
        }
    }
}

/// Read-only view of the running configuration.
struct Settings {
    max_version: u32,
}

impl Resource for Settings {
    type Item = Value;
    const OPERATIONS: &'static [Operation] = &[Operation::Get];

    async fn get(&self, ctx: &Context, _id: Option<&str>) -> Result<Value, ResourceError> {
        Ok(json!({
            "api_version": ctx.version(),
            "max_version": self.max_version,
            "request_id": ctx.request_id(),
        }))
    }
}

#[tokio::main]
async fn main() -> luddite::Result<()> {
    let config = ServiceConfig::load("luddite.toml")?;
    luddite::logging::init(&config.log)?;

    let max_version = config.version.max;
    let mut service = Service::new(config)?;

    service.add_handler(|ctx: Context, req: Request, next: Next| async move {
        let mut res = next.run(ctx, req).await;
        res.set_header("x-powered-by", "luddite");
        res
    })?;
    service.add_collection_resource("/widgets", Widgets::default())?;
    service.add_singleton_resource("/settings", Settings { max_version })?;

    service.run().await
}
