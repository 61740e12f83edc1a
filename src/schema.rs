//! Schema-file routes.
//!
//! With `schema.enabled`, the service answers:
//!
//! - `GET {uri_path}/v{n}` with the file `{file_path}/{file_pattern}`, `%d`
//!   replaced by `n`;
//! - `GET {uri_path}` with a `307` to the newest version;
//! - `GET /` with a `307` to `{uri_path}` when `root_redirect` is set.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error};

use crate::codec::render_error;
use crate::config::SchemaConfig;
use crate::context::Context;
use crate::error::Result;
use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::service::Service;
use crate::status::Status;

struct SchemaFiles {
    dir: PathBuf,
    pattern: String,
}

impl SchemaFiles {
    fn path_for(&self, version: u32) -> PathBuf {
        self.dir.join(self.pattern.replace("%d", &version.to_string()))
    }

    async fn serve(&self, ctx: &Context, segment: &str) -> Response {
        let Some(version) = segment.strip_prefix('v').and_then(|n| n.parse::<u32>().ok()) else {
            return render_error(ctx, Status::NotFound, "not_found", "no such schema", None);
        };

        let path = self.path_for(version);
        match tokio::fs::read(&path).await {
            Ok(body) => Response::builder().status(Status::Ok).bytes(content_type(&path), body),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "schema file not found");
                render_error(ctx, Status::NotFound, "not_found", "no such schema", None)
            }
            Err(e) => {
                error!(path = %path.display(), error = %e, "failed to read schema file");
                render_error(ctx, Status::InternalServerError, "internal_error", "internal server error", None)
            }
        }
    }
}

fn content_type(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("json") => "application/json",
        Some("yaml" | "yml") => "application/yaml",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Adds the schema routes to `service`. `max_version` is the redirect
/// target of the bare schema URI.
pub(crate) fn register(service: &mut Service, config: &SchemaConfig, max_version: u32) -> Result<()> {
    let base = config.uri_path.trim_end_matches('/');
    let base = if base.starts_with('/') { base.to_owned() } else { format!("/{base}") };

    let files = Arc::new(SchemaFiles {
        dir: config.file_path.clone(),
        pattern: config.file_pattern.clone(),
    });
    service.add_route(Method::Get, &format!("{base}/{{version}}"), move |ctx: Context, req: Request| {
        let files = Arc::clone(&files);
        async move { files.serve(&ctx, req.param("version").unwrap_or_default()).await }
    })?;

    let latest = format!("{base}/v{max_version}");
    service.add_route(Method::Get, &base, move |_ctx: Context, _req: Request| {
        let latest = latest.clone();
        async move { Response::redirect(&latest) }
    })?;

    if config.root_redirect && base != "/" {
        let target = base.clone();
        service.add_route(Method::Get, "/", move |_ctx: Context, _req: Request| {
            let target = target.clone();
            async move { Response::redirect(&target) }
        })?;
    }
    Ok(())
}
