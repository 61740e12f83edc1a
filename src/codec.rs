//! Representation codecs.
//!
//! A [`Codec`] ties one content type to an encoder and decoder for
//! JSON-model documents ([`serde_json::Value`]). Resources deal in typed
//! items; the router converts them to and from `Value` and lets the codec
//! the negotiator picked produce the bytes. Any serde-visible type can
//! therefore be served in every registered format.
//!
//! Built in, in order of preference: [`JsonCodec`], [`XmlCodec`] and
//! [`HtmlCodec`].

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::error;

use crate::context::Context;
use crate::response::Response;
use crate::status::Status;

mod xml;

pub use xml::XmlCodec;

/// Failure to encode or decode a representation.
#[derive(Debug, Error)]
#[error("{content_type}: {message}")]
pub struct CodecError {
    pub content_type: String,
    pub message: String,
}

impl CodecError {
    pub fn new(content_type: &str, message: impl fmt::Display) -> Self {
        Self { content_type: content_type.to_owned(), message: message.to_string() }
    }
}

/// Encoder/decoder for one media type.
pub trait Codec: Send + Sync + 'static {
    /// Media type without parameters, lower-case (e.g. `application/json`).
    fn content_type(&self) -> &str;

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError>;

    fn decode(&self, body: &[u8]) -> Result<Value, CodecError>;

    /// `false` for representations that are only ever produced, never
    /// accepted as request bodies.
    fn can_decode(&self) -> bool {
        true
    }
}

/// `application/json` via serde_json.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(value).map_err(|e| CodecError::new(self.content_type(), e))
    }

    fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
        serde_json::from_slice(body).map_err(|e| CodecError::new(self.content_type(), e))
    }
}

/// `text/html`: the document pretty-printed inside a minimal page, for
/// browsing an API by hand. Encode only.
#[derive(Clone, Copy, Debug, Default)]
pub struct HtmlCodec;

impl Codec for HtmlCodec {
    fn content_type(&self) -> &str {
        "text/html"
    }

    fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let pretty = serde_json::to_string_pretty(value).map_err(|e| CodecError::new(self.content_type(), e))?;
        let page = format!(
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>luddite</title></head>\n<body><pre>{}</pre></body>\n</html>\n",
            html_escape(&pretty),
        );
        Ok(page.into_bytes())
    }

    fn decode(&self, _body: &[u8]) -> Result<Value, CodecError> {
        Err(CodecError::new(self.content_type(), "HTML request bodies are not accepted"))
    }

    fn can_decode(&self) -> bool {
        false
    }
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Ordered set of supported codecs. The first one is the default
/// representation.
#[derive(Clone)]
pub struct Codecs {
    list: Vec<Arc<dyn Codec>>,
}

impl Codecs {
    /// An empty set. At least one codec must be added before use.
    pub fn empty() -> Self {
        Self { list: Vec::new() }
    }

    /// Appends a codec, returning `self` for chaining.
    pub fn with(mut self, codec: impl Codec) -> Self {
        self.list.push(Arc::new(codec));
        self
    }

    pub fn default_codec(&self) -> Option<&Arc<dyn Codec>> {
        self.list.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Codec>> {
        self.list.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    /// Finds the codec for a `Content-Type` value. Parameters such as
    /// `charset` are ignored; comparison is case-insensitive.
    pub fn find(&self, content_type: &str) -> Option<&Arc<dyn Codec>> {
        let essence = media_essence(content_type);
        self.list.iter().find(|c| c.content_type().eq_ignore_ascii_case(essence))
    }
}

/// JSON (the default), XML, HTML.
impl Default for Codecs {
    fn default() -> Self {
        Self::empty().with(JsonCodec).with(XmlCodec).with(HtmlCodec)
    }
}

impl fmt::Debug for Codecs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.list.iter().map(|c| c.content_type())).finish()
    }
}

/// `type/subtype` part of a media type, parameters stripped.
pub(crate) fn media_essence(media_type: &str) -> &str {
    media_type.split(';').next().unwrap_or("").trim()
}

// ── rendering ─────────────────────────────────────────────────────────────────

/// Serializes `value` with the context's negotiated codec (JSON when none
/// was negotiated) into a response with the given status.
pub(crate) fn render<T: Serialize + ?Sized>(ctx: &Context, status: Status, value: &T) -> Response {
    let codec: Arc<dyn Codec> = match ctx.codec() {
        Some(codec) => Arc::clone(codec),
        None => Arc::new(JsonCodec),
    };

    let encoded = serde_json::to_value(value)
        .map_err(|e| CodecError::new(codec.content_type(), e))
        .and_then(|doc| codec.encode(&doc));

    match encoded {
        Ok(bytes) => Response::builder().status(status).bytes(codec.content_type(), bytes),
        Err(e) => {
            error!(error = %e, "failed to encode response");
            Response::status(Status::InternalServerError)
        }
    }
}

/// Body of every error response the framework produces.
#[derive(Debug, Serialize)]
pub(crate) struct ErrorBody<'a> {
    pub code: &'a str,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub(crate) fn render_error(
    ctx: &Context,
    status: Status,
    code: &str,
    message: &str,
    details: Option<Value>,
) -> Response {
    render(ctx, status, &ErrorBody { code, message, details })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_round_trips_documents() {
        let doc = serde_json::json!({"id": "42", "tags": ["a", "b"]});
        let bytes = JsonCodec.encode(&doc).unwrap();
        assert_eq!(JsonCodec.decode(&bytes).unwrap(), doc);
    }

    #[test]
    fn json_codec_reports_malformed_input() {
        let err = JsonCodec.decode(b"{not json").unwrap_err();
        assert_eq!(err.content_type, "application/json");
    }

    #[test]
    fn find_ignores_parameters_and_case() {
        let codecs = Codecs::default();
        assert!(codecs.find("Application/JSON; charset=utf-8").is_some());
        assert!(codecs.find("APPLICATION/XML").is_some());
        assert!(codecs.find("text/csv").is_none());
        assert_eq!(codecs.default_codec().map(|c| c.content_type()), Some("application/json"));
        assert_eq!(format!("{codecs:?}"), r#"["application/json", "application/xml", "text/html"]"#);
    }

    #[test]
    fn html_codec_escapes_and_refuses_bodies() {
        let page = HtmlCodec.encode(&serde_json::json!({"name": "<b>&"})).unwrap();
        let page = String::from_utf8(page).unwrap();
        assert!(page.starts_with("<!DOCTYPE html>"));
        assert!(page.contains("&quot;name&quot;: &quot;&lt;b&gt;&amp;&quot;"), "{page}");

        assert!(!HtmlCodec.can_decode());
        assert!(HtmlCodec.decode(b"<p/>").is_err());
    }

    #[test]
    fn render_error_falls_back_to_json() {
        let res = render_error(&Context::new(), Status::NotFound, "not_found", "no such widget", None);
        assert_eq!(res.status_code(), 404);
        assert_eq!(res.header("content-type"), Some("application/json"));

        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, serde_json::json!({"code": "not_found", "message": "no such widget"}));
    }
}
