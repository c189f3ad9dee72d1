//! HTTP/1.1 requests: parsing with [`httparse`] and programmatic construction.
//!
//! Every [`Request`] carries an absolute [`Url`]. Proxied requests arrive
//! either in absolute-form (`GET http://host/path HTTP/1.1`) or in origin-form
//! with a `Host` header; both resolve to the same URL.

use bytes::Bytes;
use thiserror::Error;
use url::Url;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid request target {target:?}: {source}")]
    InvalidUrl {
        target: String,
        #[source]
        source: url::ParseError,
    },
}

/// An HTTP request addressed by an absolute URL.
///
/// # Examples
///
/// ```
/// use swcache::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost:8080\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.url().as_str(), "http://localhost:8080/hello?name=world");
/// assert_eq!(request.path(), "/hello");
///
/// let (behind_tls, _) = Request::parse_with_scheme(raw, "https").unwrap();
/// assert_eq!(behind_tls.url().as_str(), "https://localhost:8080/hello?name=world");
/// ```
#[derive(Debug, Clone)]
pub struct Request {
    method: Method,
    url: Url,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    body: Bytes,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Creates an HTTP/1.1 request with no headers and an empty body.
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            version: 1,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Shorthand for a `GET` request to `url`.
    pub fn get(url: Url) -> Self {
        Self::new(Method::Get, url)
    }

    /// Appends a request header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator). The
    /// body is taken to be everything after that offset, up to `Content-Length`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`]: more data is needed to complete the request headers.
    /// - [`RequestError::Parse`]: the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`]: method, target, version, or `Host` is absent.
    /// - [`RequestError::InvalidUrl`]: the target does not form a valid absolute URL.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        Self::parse_with_scheme(buf, "http")
    }

    /// Like [`parse`](Self::parse), but origin-form targets are resolved as
    /// `{scheme}://{host}{target}`. Used when TLS is terminated in front of
    /// the listener and the served origin is not plain `http`.
    ///
    /// # Errors
    ///
    /// Same as [`parse`](Self::parse).
    pub fn parse_with_scheme(buf: &[u8], scheme: &str) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let url = resolve_target(target, scheme, &header_map)?;

        let content_length = header_map
            .get("content-length")
            .and_then(|v| v.trim().parse::<usize>().ok());
        let available = &buf[body_offset..];
        let body = match content_length {
            Some(len) => &available[..len.min(available.len())],
            None => available,
        };

        Ok((
            Self {
                method,
                url,
                version,
                headers: header_map,
                body: Bytes::copy_from_slice(body),
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        self.url.path()
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns `true` if the `Accept` header lists `media_type`.
    ///
    /// Only exact media types match; wildcards such as `*/*` do not.
    pub fn accepts(&self, media_type: &str) -> bool {
        self.headers.list("accept").any(|item| {
            item.split(';')
                .next()
                .is_some_and(|mt| mt.trim().eq_ignore_ascii_case(media_type))
        })
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.trim().parse().ok()
    }
}

// Absolute-form targets are used as-is; origin-form targets are joined with `Host`.
fn resolve_target(target: &str, scheme: &str, headers: &Headers) -> Result<Url, RequestError> {
    let absolute = if target.starts_with("http://") || target.starts_with("https://") {
        target.to_owned()
    } else {
        let host = headers
            .get("host")
            .ok_or(RequestError::MissingField { field: "host" })?;
        format!("{scheme}://{host}{target}")
    };

    Url::parse(&absolute).map_err(|source| RequestError::InvalidUrl {
        target: target.to_owned(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_origin_form_uses_host() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.url().as_str(), "http://localhost/");
        assert_eq!(req.version(), 1);
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn parse_absolute_form() {
        let raw = b"GET https://cdn.example.com/a.png HTTP/1.1\r\nHost: ignored\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.url().as_str(), "https://cdn.example.com/a.png");
        assert_eq!(req.path(), "/a.png");
    }

    #[test]
    fn parse_query_string() {
        let raw = b"GET /search?q=rust+lang&page=2 HTTP/1.1\r\nHost: example.com\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.path(), "/search");
        assert_eq!(req.url().query(), Some("q=rust+lang&page=2"));
    }

    #[test]
    fn origin_form_takes_served_scheme() {
        let raw = b"GET /app.js HTTP/1.1\r\nHost: shop.test\r\n\r\n";
        let (req, _) = Request::parse_with_scheme(raw, "https").unwrap();
        assert_eq!(req.url().as_str(), "https://shop.test/app.js");

        let absolute = b"GET http://cdn.test/lib.js HTTP/1.1\r\nHost: cdn.test\r\n\r\n";
        let (req, _) = Request::parse_with_scheme(absolute, "https").unwrap();
        assert_eq!(req.url().as_str(), "http://cdn.test/lib.js");
    }

    #[test]
    fn missing_host_is_rejected() {
        let raw = b"GET /x HTTP/1.1\r\n\r\n";
        assert!(matches!(
            Request::parse(raw),
            Err(RequestError::MissingField { field: "host" })
        ));
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn body_respects_content_length() {
        let raw = b"POST / HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhelloGET";
        let (req, body_offset) = Request::parse(raw).unwrap();
        assert_eq!(req.content_length(), Some(5));
        assert_eq!(req.body().as_ref(), b"hello");
        assert_eq!(&raw[body_offset..body_offset + 5], b"hello");
    }

    #[test]
    fn accepts_matches_media_type_only() {
        let url = Url::parse("http://localhost/").unwrap();
        let nav = Request::get(url.clone())
            .header("Accept", "text/html,application/xhtml+xml;q=0.9,*/*;q=0.8");
        assert!(nav.accepts("text/html"));
        assert!(nav.accepts("application/xhtml+xml"));

        let fetch = Request::get(url).header("Accept", "*/*");
        assert!(!fetch.accepts("text/html"));
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }
}
