//! Content negotiation.
//!
//! Picks the response representation from `Accept` and the request body
//! codec from `Content-Type`, among the service's ordered codec list. The
//! first codec is the default, used when `Accept` is absent or `*/*`.

use std::sync::Arc;

use serde_json::json;
use tracing::debug;

use crate::codec::{media_essence, render_error, Codec, Codecs};
use crate::context::Context;
use crate::handler::{BoxFuture, Handler, Next};
use crate::request::Request;
use crate::status::Status;

pub struct Negotiator {
    codecs: Codecs,
}

/// One `Accept` entry.
#[derive(Debug, PartialEq)]
struct MediaRange<'a> {
    kind: &'a str,
    subtype: &'a str,
    q: f32,
}

impl MediaRange<'_> {
    fn matches(&self, content_type: &str) -> bool {
        let (kind, subtype) = content_type.split_once('/').unwrap_or((content_type, ""));
        self.kind == "*"
            || (self.kind.eq_ignore_ascii_case(kind)
                && (self.subtype == "*" || self.subtype.eq_ignore_ascii_case(subtype)))
    }

    /// `*/*` < `type/*` < `type/subtype`.
    fn specificity(&self) -> u8 {
        match (self.kind, self.subtype) {
            ("*", _) => 0,
            (_, "*") => 1,
            _ => 2,
        }
    }
}

/// Quality the client gives `content_type`: that of the most specific range
/// matching it, the earlier range on ties. `None` if no range matches.
fn quality(ranges: &[MediaRange<'_>], content_type: &str) -> Option<f32> {
    ranges.iter()
        .filter(|range| range.matches(content_type))
        .fold(None::<&MediaRange<'_>>, |best, range| match best {
            Some(best) if best.specificity() >= range.specificity() => Some(best),
            _ => Some(range),
        })
        .map(|range| range.q)
}

/// Parses an `Accept` header into media ranges ordered by descending
/// quality. Ties keep header order. Entries that are not `type/subtype`
/// are skipped; an unparseable `q` counts as 1.
fn parse_accept(header: &str) -> Vec<MediaRange<'_>> {
    let mut ranges: Vec<MediaRange<'_>> = header.split(',')
        .filter_map(|entry| {
            let mut parts = entry.split(';');
            let essence = parts.next()?.trim();
            let (kind, subtype) = match essence {
                "*" => ("*", "*"),
                _ => essence.split_once('/')?,
            };
            if kind.is_empty() || subtype.is_empty() {
                return None;
            }
            let q = parts
                .filter_map(|param| param.split_once('='))
                .find(|(key, _)| key.trim().eq_ignore_ascii_case("q"))
                .and_then(|(_, value)| value.trim().parse::<f32>().ok())
                .filter(|q| (0.0..=1.0).contains(q))
                .unwrap_or(1.0);
            Some(MediaRange { kind: kind.trim(), subtype: subtype.trim(), q })
        })
        .collect();
    ranges.sort_by(|a, b| b.q.total_cmp(&a.q));
    ranges
}

impl Negotiator {
    pub fn new(codecs: Codecs) -> Self {
        Self { codecs }
    }

    /// Selects the response codec for an `Accept` value. `None` means no
    /// supported representation is acceptable.
    pub fn select(&self, accept: Option<&str>) -> Option<Arc<dyn Codec>> {
        let ranges = accept.map(parse_accept).unwrap_or_default();
        if ranges.is_empty() {
            return self.codecs.default_codec().cloned();
        }

        // A type excluded with `q=0` stays excluded when a broader range
        // matches it too.
        ranges.iter()
            .filter(|range| range.q > 0.0)
            .find_map(|range| {
                self.codecs.iter().find(|c| {
                    range.matches(c.content_type())
                        && quality(&ranges, c.content_type()).is_some_and(|q| q > 0.0)
                })
            })
            .cloned()
    }

    fn supported(&self) -> serde_json::Value {
        json!({ "supported": self.codecs.iter().map(|c| c.content_type()).collect::<Vec<_>>() })
    }
}

impl Handler for Negotiator {
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        let Some(response_codec) = self.select(req.header("accept")) else {
            debug!(accept = req.header("accept"), "no acceptable representation");
            let res = render_error(
                &ctx,
                Status::NotAcceptable,
                "not_acceptable",
                "none of the accepted media types is supported",
                Some(self.supported()),
            );
            return Box::pin(async move { res });
        };

        let declared = req.header("content-type")
            .map(media_essence)
            .filter(|ct| !ct.is_empty() && !req.body().is_empty());
        let request_codec = match declared {
            None if response_codec.can_decode() => Arc::clone(&response_codec),
            None => match self.codecs.iter().find(|c| c.can_decode()) {
                Some(codec) => Arc::clone(codec),
                None => Arc::clone(&response_codec),
            },
            Some(ct) => match self.codecs.find(ct).filter(|c| c.can_decode()) {
                Some(codec) => Arc::clone(codec),
                None => {
                    debug!(content_type = ct, "unsupported request media type");
                    let ctx = ctx.with_negotiated(Arc::clone(&response_codec), response_codec);
                    let res = render_error(
                        &ctx,
                        Status::UnsupportedMediaType,
                        "unsupported_media_type",
                        "the request body media type is not supported",
                        Some(self.supported()),
                    );
                    return Box::pin(async move { res });
                }
            },
        };

        next.run(ctx.with_negotiated(response_codec, request_codec), req)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use serde_json::Value;

    use super::*;
    use crate::codec::{CodecError, JsonCodec};
    use crate::handler::BoxedHandler;
    use crate::middleware::Chain;
    use crate::response::Response;

    /// Second codec so ordering and wildcards are observable.
    struct TextCodec;

    impl Codec for TextCodec {
        fn content_type(&self) -> &str { "text/plain" }

        fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
            Ok(value.to_string().into_bytes())
        }

        fn decode(&self, body: &[u8]) -> Result<Value, CodecError> {
            Ok(Value::String(String::from_utf8_lossy(body).into_owned()))
        }
    }

    fn negotiator() -> Negotiator {
        Negotiator::new(Codecs::empty().with(JsonCodec).with(TextCodec))
    }

    fn selected(accept: Option<&str>) -> Option<String> {
        negotiator().select(accept).map(|c| c.content_type().to_owned())
    }

    #[test]
    fn picks_among_the_built_in_codecs() {
        let n = Negotiator::new(Codecs::default());
        let pick = |accept: &str| n.select(Some(accept)).map(|c| c.content_type().to_owned());

        assert_eq!(pick("*/*").as_deref(), Some("application/json"));
        assert_eq!(pick("application/xml").as_deref(), Some("application/xml"));
        assert_eq!(pick("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8").as_deref(), Some("text/html"));
        assert_eq!(pick("application/json;q=0, application/*").as_deref(), Some("application/xml"));
        assert_eq!(pick("text/*").as_deref(), Some("text/html"));
    }

    #[test]
    fn parses_quality_and_keeps_order_on_ties() {
        let ranges = parse_accept("text/*;q=0.5, application/json, */*;q=0.1, image/png");
        let order: Vec<_> = ranges.iter().map(|r| (r.kind, r.subtype)).collect();
        assert_eq!(order, [("application", "json"), ("image", "png"), ("text", "*"), ("*", "*")]);
        assert_eq!(ranges[2].q, 0.5);
    }

    #[test]
    fn defaults_to_first_codec() {
        assert_eq!(selected(None).as_deref(), Some("application/json"));
        assert_eq!(selected(Some("")).as_deref(), Some("application/json"));
        assert_eq!(selected(Some("*/*")).as_deref(), Some("application/json"));
    }

    #[test]
    fn honours_exact_and_wildcard_ranges() {
        assert_eq!(selected(Some("text/plain")).as_deref(), Some("text/plain"));
        assert_eq!(selected(Some("text/*")).as_deref(), Some("text/plain"));
        assert_eq!(selected(Some("Application/JSON; charset=utf-8")).as_deref(), Some("application/json"));
        assert_eq!(
            selected(Some("application/json;q=0.2, text/plain;q=0.9")).as_deref(),
            Some("text/plain"),
        );
    }

    #[test]
    fn rejects_unsupported_and_zero_quality() {
        assert_eq!(selected(Some("image/png")), None);
        assert_eq!(selected(Some("application/json;q=0, image/png")), None);
    }

    #[test]
    fn zero_quality_survives_wildcards() {
        let only_json = || Negotiator::new(Codecs::empty().with(JsonCodec));
        let pick = |n: &Negotiator, accept: &str| n.select(Some(accept)).map(|c| c.content_type().to_owned());

        assert_eq!(pick(&only_json(), "application/json;q=0, */*"), None);
        assert_eq!(pick(&only_json(), "application/json;q=0, application/*"), None);
        assert_eq!(pick(&only_json(), "application/*;q=0, */*"), None);

        assert_eq!(selected(Some("application/json;q=0, */*")).as_deref(), Some("text/plain"));
        assert_eq!(selected(Some("*/*;q=0, application/json")).as_deref(), Some("application/json"));
        assert_eq!(selected(Some("text/*;q=0, */*;q=0.5")).as_deref(), Some("application/json"));
    }

    fn request(accept: Option<&str>, content_type: Option<&str>, body: &'static [u8]) -> Request {
        let mut builder = http::Request::builder().method("POST").uri("/widgets");
        if let Some(accept) = accept {
            builder = builder.header("accept", accept);
        }
        if let Some(ct) = content_type {
            builder = builder.header("content-type", ct);
        }
        builder.body(Bytes::from_static(body)).unwrap().into()
    }

    fn chain() -> Chain {
        let negotiator: BoxedHandler = Arc::new(negotiator());
        let echo: BoxedHandler = Arc::new(|ctx: Context, _req: Request, _next: Next| async move {
            let request = ctx.request_codec().map(|c| c.content_type().to_owned()).unwrap_or_default();
            Response::text(format!("{} {}", ctx.content_type().unwrap_or_default(), request))
        });
        Chain::build(&[negotiator, echo])
    }

    #[tokio::test]
    async fn short_circuits_with_406() {
        let res = chain().call(Context::new(), request(Some("application/xml"), None, b"")).await;

        assert_eq!(res.status_code(), 406);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["code"], "not_acceptable");
        assert_eq!(body["details"]["supported"], json!(["application/json", "text/plain"]));
    }

    #[tokio::test]
    async fn records_negotiated_codecs() {
        let res = chain().call(Context::new(), request(Some("text/plain"), None, b"{}")).await;
        assert_eq!(res.body(), b"text/plain text/plain");

        let res = chain()
            .call(Context::new(), request(None, Some("text/plain; charset=utf-8"), b"hi"))
            .await;
        assert_eq!(res.body(), b"application/json text/plain");
    }

    #[tokio::test]
    async fn rejects_unsupported_request_bodies_with_415() {
        let res = chain()
            .call(Context::new(), request(None, Some("text/csv"), b"a,b"))
            .await;
        assert_eq!(res.status_code(), 415);
        assert_eq!(res.header("content-type"), Some("application/json"));
    }

    #[tokio::test]
    async fn encode_only_codecs_never_read_request_bodies() {
        let negotiator: BoxedHandler = Arc::new(Negotiator::new(Codecs::default()));
        let echo: BoxedHandler = Arc::new(|ctx: Context, _req: Request, _next: Next| async move {
            Response::text(ctx.request_codec().map(|c| c.content_type().to_owned()).unwrap_or_default())
        });
        let chain = Chain::build(&[negotiator, echo]);

        let res = chain.call(Context::new(), request(Some("text/html"), None, b"{}")).await;
        assert_eq!(res.body(), b"application/json");

        let res = chain.call(Context::new(), request(None, Some("text/html"), b"<p>hi</p>")).await;
        assert_eq!(res.status_code(), 415);
    }
}
