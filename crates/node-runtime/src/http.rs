//! Just enough HTTP/1.1 for one request per connection.
//!
//! Only the request line is parsed; headers and bodies are ignored. Every
//! response closes the connection.

use std::collections::BTreeMap;
use std::fmt;

/// A parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    /// Method token, e.g. `GET`.
    pub method: String,
    /// Decoded path without the query string.
    pub path: String,
    /// Decoded query parameters; the last occurrence of a key wins.
    pub query: BTreeMap<String, String>,
}

impl Request {
    /// Parse the request line of `raw`. Returns `None` for anything that
    /// is not `METHOD TARGET HTTP/x.y`.
    #[must_use]
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let end = raw.iter().position(|&b| b == b'\n').unwrap_or(raw.len());
        let line = raw[..end].strip_suffix(b"\r").unwrap_or(&raw[..end]);
        let line = std::str::from_utf8(line).ok()?;

        let mut parts = line.split(' ');
        let method = parts.next().filter(|m| !m.is_empty())?;
        let target = parts.next().filter(|t| t.starts_with('/'))?;
        let version = parts.next()?;
        if !version.starts_with("HTTP/") || parts.next().is_some() {
            return None;
        }

        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, parse_query(query)),
            None => (target, BTreeMap::new()),
        };

        Some(Self {
            method: method.to_string(),
            path: decode(path),
            query,
        })
    }

    /// Query parameter `key`.
    #[must_use]
    pub fn param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Query parameter `key` parsed as an integer.
    #[must_use]
    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.param(key)?.trim().parse().ok()
    }
}

fn parse_query(query: &str) -> BTreeMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            (decode_form(k), decode_form(v))
        })
        .collect()
}

/// Percent-decode a path segment. Malformed escapes are kept as written.
fn decode(s: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(s.as_bytes())).into_owned()
}

/// Query components also encode spaces as `+`.
fn decode_form(s: &str) -> String {
    decode(&s.replace('+', " "))
}

/// Response status codes the node produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// 200
    Ok,
    /// 302
    Found,
    /// 404
    NotFound,
}

impl Status {
    /// Numeric code.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            Self::Ok => 200,
            Self::Found => 302,
            Self::NotFound => 404,
        }
    }

    /// Reason phrase.
    #[must_use]
    pub fn reason(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Found => "Found",
            Self::NotFound => "Not Found",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.reason())
    }
}

/// A complete response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status line.
    pub status: Status,
    /// Content-Type header, if any.
    pub content_type: Option<&'static str>,
    /// Location header for redirects.
    pub location: Option<String>,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl Response {
    /// 200 with an HTML body.
    #[must_use]
    pub fn html(body: String) -> Self {
        Self::ok("text/html; charset=utf-8", body.into_bytes())
    }

    /// 200 with a JSON body.
    #[must_use]
    pub fn json(body: String) -> Self {
        Self::ok("application/json", body.into_bytes())
    }

    /// 200 with a plain-text body.
    #[must_use]
    pub fn text(body: String) -> Self {
        Self::ok("text/plain; charset=utf-8", body.into_bytes())
    }

    /// 302 to `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self {
            status: Status::Found,
            content_type: None,
            location: Some(location.to_string()),
            body: Vec::new(),
        }
    }

    /// 404 with body `404`.
    #[must_use]
    pub fn not_found() -> Self {
        Self {
            status: Status::NotFound,
            content_type: Some("text/plain"),
            location: None,
            body: b"404".to_vec(),
        }
    }

    fn ok(content_type: &'static str, body: Vec<u8>) -> Self {
        Self {
            status: Status::Ok,
            content_type: Some(content_type),
            location: None,
            body,
        }
    }

    /// Serialize status line, headers and body.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut head = format!("HTTP/1.1 {}\r\n", self.status);
        if let Some(content_type) = self.content_type {
            head.push_str(&format!("Content-Type: {content_type}\r\n"));
        }
        if let Some(location) = &self.location {
            head.push_str(&format!("Location: {location}\r\n"));
        }
        head.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n",
            self.body.len()
        ));

        let mut out = head.into_bytes();
        out.extend_from_slice(&self.body);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line_with_query() {
        let req = Request::parse(b"GET /r?n=2&s=1 HTTP/1.1\r\nHost: x\r\n\r\n").unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/r");
        assert_eq!(req.param_usize("n"), Some(2));
        assert_eq!(req.param("s"), Some("1"));
        assert_eq!(req.param("x"), None);
    }

    #[test]
    fn test_parse_without_headers_or_crlf() {
        let req = Request::parse(b"GET /api HTTP/1.0").unwrap();
        assert_eq!(req.path, "/api");
        assert!(req.query.is_empty());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(Request::parse(b""), None);
        assert_eq!(Request::parse(b"\x16\x03\x01\x02\x00"), None);
        assert_eq!(Request::parse(b"GET index.html HTTP/1.1\r\n"), None);
        assert_eq!(Request::parse(b"GET / SPDY/3\r\n"), None);
        assert_eq!(Request::parse(b"GET /  HTTP/1.1\r\n"), None);
    }

    #[test]
    fn test_percent_decoding() {
        let req = Request::parse(b"GET /a%20b+c?k=a%2Bb+c&flag HTTP/1.1\r\n").unwrap();
        assert_eq!(req.path, "/a b+c");
        assert_eq!(req.param("k"), Some("a+b c"));
        assert_eq!(req.param("flag"), Some(""));
        assert_eq!(decode("100%"), "100%");
        assert_eq!(decode("%zz"), "%zz");
        assert_eq!(decode("%FF"), "\u{FFFD}");
    }

    #[test]
    fn test_bare_lf_line_endings() {
        let req = Request::parse(b"GET /r?n=2&s=1 HTTP/1.1\nHost: x\n\n").unwrap();
        assert_eq!(req.path, "/r");
        assert_eq!(req.param_usize("n"), Some(2));
        assert_eq!(req.param("s"), Some("1"));

        let req = Request::parse(b"GET /api HTTP/1.0\r").unwrap();
        assert_eq!(req.path, "/api");
    }

    #[test]
    fn test_redirect_bytes() {
        let bytes = Response::redirect("/").to_bytes();
        assert_eq!(
            bytes,
            b"HTTP/1.1 302 Found\r\nLocation: /\r\nContent-Length: 0\r\nConnection: close\r\n\r\n"
        );
    }

    #[test]
    fn test_not_found_bytes() {
        let bytes = Response::not_found().to_bytes();
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Content-Length: 3\r\n"));
        assert!(text.ends_with("\r\n\r\n404"));
    }
}
