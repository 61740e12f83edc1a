//! API version resolution.
//!
//! The requested version comes from a header (`X-Api-Version: 2` or `v2`) or
//! from a leading `/v2` path segment, depending on configuration. A request
//! that names no version gets the newest one. Anything malformed or outside
//! `[min, max]` is answered with `400 Bad Request` before routing.

use serde_json::json;
use tracing::debug;

use crate::codec::render_error;
use crate::config::{check_version_range, VersionConfig};
use crate::context::Context;
use crate::error::Result;
use crate::handler::{BoxFuture, Handler, Next};
use crate::request::Request;
use crate::status::Status;

/// Where the version indicator is read from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionSource {
    /// A request header, e.g. `X-Api-Version`.
    Header(String),
    /// A leading `/v{n}` path segment, stripped before routing.
    PathPrefix,
}

/// Resolves the API version into the context and echoes it on the response.
#[derive(Debug)]
pub struct VersionHandler {
    min: u32,
    max: u32,
    source: VersionSource,
    header: String,
}

#[derive(Debug, PartialEq, Eq)]
enum Requested {
    Absent,
    Malformed,
    Version(u32),
}

/// Parses `N` or `vN`.
fn parse_version(raw: &str) -> Requested {
    let raw = raw.trim();
    let digits = raw.strip_prefix(['v', 'V']).unwrap_or(raw);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Requested::Malformed;
    }
    digits.parse().map_or(Requested::Malformed, Requested::Version)
}

/// Splits `/v2/widgets` into `(2, "/widgets")`. Paths whose first segment
/// is not `v` followed by digits carry no version.
fn split_path_version(path: &str) -> Option<(Requested, String)> {
    let rest = path.strip_prefix('/')?;
    let (segment, tail) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, ""),
    };
    let digits = segment.strip_prefix('v')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let tail = if tail.is_empty() { "/" } else { tail };
    Some((parse_version(segment), tail.to_owned()))
}

impl VersionHandler {
    /// Fails when either bound is below 1 or `max < min`.
    pub fn new(min: u32, max: u32, source: VersionSource) -> Result<Self> {
        check_version_range(min, max)?;

        let header = match &source {
            VersionSource::Header(name) => name.clone(),
            VersionSource::PathPrefix => "X-Api-Version".to_owned(),
        };
        Ok(Self { min, max, source, header })
    }

    pub fn from_config(config: &VersionConfig) -> Result<Self> {
        let source = if config.path_prefix {
            VersionSource::PathPrefix
        } else {
            VersionSource::Header(config.header.clone())
        };
        let mut handler = Self::new(config.min, config.max, source)?;
        handler.header = config.header.clone();
        Ok(handler)
    }

    /// Checks a requested version against the supported range.
    fn resolve(&self, requested: Requested) -> Option<u32> {
        match requested {
            Requested::Absent => Some(self.max),
            Requested::Version(v) if (self.min..=self.max).contains(&v) => Some(v),
            _ => None,
        }
    }
}

impl Handler for VersionHandler {
    fn handle(&self, ctx: Context, mut req: Request, next: Next) -> BoxFuture {
        let requested = match &self.source {
            VersionSource::Header(name) => req.header(name).map_or(Requested::Absent, parse_version),
            VersionSource::PathPrefix => match split_path_version(req.path()) {
                Some((requested, tail)) => {
                    req.path = tail;
                    requested
                }
                None => Requested::Absent,
            },
        };

        let Some(version) = self.resolve(requested) else {
            debug!(min = self.min, max = self.max, "rejecting unsupported API version");
            let message = format!(
                "API version must be between {} and {}",
                self.min, self.max,
            );
            let res = render_error(
                &ctx,
                Status::BadRequest,
                "unsupported_version",
                &message,
                Some(json!({ "min": self.min, "max": self.max })),
            );
            return Box::pin(async move { res });
        };

        let header = self.header.clone();
        let fut = next.run(ctx.with_version(version), req);
        Box::pin(async move {
            let mut res = fut.await;
            res.set_header(&header, &version.to_string());
            res
        })
    }
}
