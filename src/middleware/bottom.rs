//! Outermost middleware stage.
//!
//! Everything below it runs inside `catch_unwind`, so a panicking handler
//! or resource costs exactly one request: it is logged with the request id
//! and answered with `500 Internal Server Error`, and the server keeps going.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{error, info, info_span, Instrument};
use uuid::Uuid;

use crate::codec::render_error;
use crate::context::Context;
use crate::handler::{BoxFuture, Handler, Next};
use crate::request::Request;
use crate::stats::Stats;
use crate::status::Status;

/// Header carrying the request id, read from the request when present and
/// always set on the response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

const METRIC_REQUESTS: &str = "http_requests_total";
const METRIC_DURATION: &str = "http_request_duration_seconds";
const METRIC_PANICS: &str = "http_request_panics_total";

/// Request id, tracing span, access log, panic recovery and request metrics.
pub struct Bottom {
    stats: Arc<dyn Stats>,
}

impl Bottom {
    pub fn new(stats: Arc<dyn Stats>) -> Self {
        Self { stats }
    }
}

impl Handler for Bottom {
    fn handle(&self, ctx: Context, req: Request, next: Next) -> BoxFuture {
        let stats = Arc::clone(&self.stats);
        let request_id = req.header(REQUEST_ID_HEADER)
            .filter(|id| !id.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let method = req.method().clone();
        let path = req.path().to_owned();

        let span = info_span!("request", %method, %path, request_id = %request_id);
        let ctx = ctx.with_request_id(request_id.clone()).with_span(span.clone());
        let outer = ctx.clone();

        Box::pin(
            async move {
                let start = Instant::now();

                let mut res = match AssertUnwindSafe(next.run(ctx, req)).catch_unwind().await {
                    Ok(res) => res,
                    Err(panic) => {
                        error!(panic = panic_message(panic.as_ref()), "handler panicked");
                        stats.incr(METRIC_PANICS, &[("method", method.to_string())]);
                        render_error(&outer, Status::InternalServerError, "internal_error", "internal server error", None)
                    }
                };
                res.set_header(REQUEST_ID_HEADER, &request_id);

                let elapsed = start.elapsed();
                let tags = [
                    ("method", method.to_string()),
                    ("status", res.status_code().to_string()),
                ];
                stats.incr(METRIC_REQUESTS, &tags);
                stats.timing(METRIC_DURATION, elapsed, &tags);

                info!(
                    status = res.status_code(),
                    elapsed_ms = elapsed.as_secs_f64() * 1_000.0,
                    "request completed"
                );
                res
            }
            .instrument(span),
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload.downcast_ref::<&str>().copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::handler::BoxedHandler;
    use crate::middleware::Chain;
    use crate::response::Response;
    use crate::stats::Tags;

    #[derive(Default)]
    struct Recording {
        counters: Mutex<Vec<(String, Vec<(&'static str, String)>)>>,
        timings: Mutex<usize>,
    }

    impl Stats for Recording {
        fn incr(&self, name: &str, tags: Tags<'_>) {
            self.counters.lock().unwrap().push((name.to_owned(), tags.to_vec()));
        }

        fn timing(&self, _name: &str, _elapsed: Duration, _tags: Tags<'_>) {
            *self.timings.lock().unwrap() += 1;
        }
    }

    fn request(request_id: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method("GET").uri("/widgets");
        if let Some(id) = request_id {
            builder = builder.header(REQUEST_ID_HEADER, id);
        }
        builder.body(Bytes::new()).unwrap().into()
    }

    fn chain(stats: Arc<Recording>, inner: BoxedHandler) -> Chain {
        let bottom: BoxedHandler = Arc::new(Bottom::new(stats));
        Chain::build(&[bottom, inner])
    }

    #[tokio::test]
    async fn recovers_from_panics() {
        let stats = Arc::new(Recording::default());
        let boom: BoxedHandler = Arc::new(|_ctx: Context, _req: Request, _next: Next| async {
            if true {
                panic!("resource exploded");
            }
            Response::text("unreachable")
        });

        let res = chain(Arc::clone(&stats), boom).call(Context::new(), request(None)).await;

        assert_eq!(res.status_code(), 500);
        assert!(res.header(REQUEST_ID_HEADER).is_some());
        assert_eq!(res.header("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body, serde_json::json!({"code": "internal_error", "message": "internal server error"}));
        let counters = stats.counters.lock().unwrap();
        assert_eq!(counters[0].0, METRIC_PANICS);
        assert_eq!(counters[1].0, METRIC_REQUESTS);
        assert_eq!(counters[1].1[1], ("status", "500".to_owned()));
    }

    #[tokio::test]
    async fn recovers_from_panics_before_the_first_await() {
        let stats = Arc::new(Recording::default());
        let boom: BoxedHandler = Arc::new(|_ctx: Context, _req: Request, _next: Next| -> BoxFuture {
            panic!("synchronous panic");
        });

        let res = chain(stats, boom).call(Context::new(), request(None)).await;
        assert_eq!(res.status_code(), 500);
    }

    #[tokio::test]
    async fn propagates_request_id_and_records_metrics() {
        let stats = Arc::new(Recording::default());
        let echo: BoxedHandler = Arc::new(|ctx: Context, _req: Request, _next: Next| async move {
            Response::text(ctx.request_id().unwrap_or_default().to_owned())
        });

        let res = chain(Arc::clone(&stats), echo).call(Context::new(), request(Some("req-1"))).await;

        assert_eq!(res.status_code(), 200);
        assert_eq!(res.body(), b"req-1");
        assert_eq!(res.header(REQUEST_ID_HEADER), Some("req-1"));
        assert_eq!(stats.counters.lock().unwrap().len(), 1);
        assert_eq!(*stats.timings.lock().unwrap(), 1);
    }

    #[test]
    fn extracts_panic_messages() {
        let s: Box<dyn Any + Send> = Box::new("static");
        let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
        let other: Box<dyn Any + Send> = Box::new(42);
        assert_eq!(panic_message(s.as_ref()), "static");
        assert_eq!(panic_message(owned.as_ref()), "owned");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
