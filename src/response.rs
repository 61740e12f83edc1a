//! The value every stage of the chain hands back.
//!
//! Endpoints return anything [`IntoResponse`]; middleware sees the resulting
//! [`Response`] after `next.run` and may rewrite its status or headers before
//! passing it outwards. Header names are compared case-insensitively.

use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};
use http_body_util::Full;
use tracing::warn;

use crate::status::Status;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";

/// A response on its way out through the chain.
///
/// ```rust
/// use luddite::{Response, Status};
///
/// let gone = Response::status(Status::NoContent);
/// assert!(gone.body().is_empty());
///
/// let created = Response::builder()
///     .status(Status::Created)
///     .header("location", "/widgets/42")
///     .bytes("application/json", br#"{"id":"42"}"#.to_vec());
/// assert_eq!(created.header("Location"), Some("/widgets/42"));
/// ```
#[derive(Debug)]
pub struct Response {
    pub(crate) status: u16,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
}

impl Response {
    /// Empty body with the given status.
    pub fn status(code: Status) -> Self {
        Self { status: code.into(), headers: Vec::new(), body: Vec::new() }
    }

    /// `200` with a UTF-8 text body.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().bytes(TEXT_PLAIN, body.into().into_bytes())
    }

    /// `307 Temporary Redirect` to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::builder()
            .status(Status::TemporaryRedirect)
            .header("location", location)
            .no_body()
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { status: Status::Ok, headers: Vec::new() }
    }

    pub fn status_code(&self) -> u16 { self.status }
    pub fn body(&self) -> &[u8] { &self.body }
    pub fn headers(&self) -> &[(String, String)] { &self.headers }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Replaces every existing value of `name`.
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.to_owned()));
    }

    /// Headers that are not valid on the wire are dropped with a warning.
    pub(crate) fn into_hyper(self) -> http::Response<Full<Bytes>> {
        let mut res = http::Response::new(Full::new(Bytes::from(self.body)));
        *res.status_mut() = StatusCode::from_u16(self.status)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let headers = res.headers_mut();
        for (name, value) in self.headers {
            match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
                (Ok(name), Ok(value)) => { headers.append(name, value); }
                _ => warn!(header = %name, "dropping invalid response header"),
            }
        }
        res
    }
}

/// Starts at `200` with no headers; finished by [`bytes`](Self::bytes)
/// or [`no_body`](Self::no_body).
pub struct ResponseBuilder {
    status: Status,
    headers: Vec<(String, String)>,
}

impl ResponseBuilder {
    pub fn status(mut self, code: Status) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Finishes with `body`, labelled `content_type`.
    pub fn bytes(mut self, content_type: &str, body: Vec<u8>) -> Response {
        self.headers.insert(0, ("content-type".to_owned(), content_type.to_owned()));
        Response { status: self.status.into(), headers: self.headers, body }
    }

    pub fn no_body(self) -> Response {
        Response { status: self.status.into(), headers: self.headers, body: Vec::new() }
    }
}

/// Anything an endpoint may return.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for Status {
    fn into_response(self) -> Response {
        Response::status(self)
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        Response::text(self)
    }
}
