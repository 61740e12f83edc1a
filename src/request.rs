//! Incoming HTTP request type.

use std::collections::HashMap;

use bytes::Bytes;
use http::HeaderMap;

/// An incoming HTTP request with its body fully read.
pub struct Request {
    pub(crate) method: http::Method,
    pub(crate) path: String,
    pub(crate) query: Option<String>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) params: HashMap<String, String>,
}

impl Request {
    pub(crate) fn from_parts(parts: http::request::Parts, body: Bytes) -> Self {
        Self {
            method: parts.method,
            path: parts.uri.path().to_owned(),
            query: parts.uri.query().map(str::to_owned),
            headers: parts.headers,
            body,
            params: HashMap::new(),
        }
    }

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn path(&self) -> &str { &self.path }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Raw query string, without the leading `?`.
    pub fn query_string(&self) -> Option<&str> { self.query.as_deref() }

    /// Decoded query string pairs.
    pub fn query(&self) -> Query {
        let pairs = self.query.as_deref()
            .map(|q| {
                url::form_urlencoded::parse(q.as_bytes())
                    .map(|(k, v)| (k.into_owned(), v.into_owned()))
                    .collect()
            })
            .unwrap_or_default();
        Query { pairs }
    }

    /// Case-insensitive header lookup. Values that are not visible ASCII
    /// are reported as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Returns a named path parameter.
    ///
    /// For a route `/widgets/{id}`, `req.param("id")` on `/widgets/42` returns `Some("42")`.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

impl From<http::Request<Bytes>> for Request {
    fn from(req: http::Request<Bytes>) -> Self {
        let (parts, body) = req.into_parts();
        Self::from_parts(parts, body)
    }
}

/// Decoded query string handed to list operations.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Query {
    pairs: Vec<(String, String)>,
}

impl Query {
    /// First value for `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.pairs.iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Every value for `key`, in order of appearance.
    pub fn get_all<'a>(&'a self, key: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.pairs.iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool { self.pairs.is_empty() }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(uri: &str) -> Request {
        http::Request::builder()
            .uri(uri)
            .header("Accept", "application/json")
            .body(Bytes::new())
            .unwrap()
            .into()
    }

    #[test]
    fn splits_path_and_query() {
        let req = request("/widgets?color=red&tag=a&tag=b%20c");
        assert_eq!(req.path(), "/widgets");
        assert_eq!(req.query_string(), Some("color=red&tag=a&tag=b%20c"));

        let query = req.query();
        assert_eq!(query.get("color"), Some("red"));
        assert_eq!(query.get_all("tag").collect::<Vec<_>>(), ["a", "b c"]);
        assert_eq!(query.get("missing"), None);
    }

    #[test]
    fn header_lookup_ignores_case() {
        let req = request("/");
        assert_eq!(req.header("accept"), Some("application/json"));
        assert_eq!(req.header("ACCEPT"), Some("application/json"));
        assert!(req.query().is_empty());
    }
}
