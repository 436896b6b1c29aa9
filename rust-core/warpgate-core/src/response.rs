//! # HTTP Response
//!
//! Response-in-progress held by the request context, the `Reply` values
//! handlers return, and the raw response descriptor handed to the gateway.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Only handles response state, no routing or transport
//! - **O**: New reply kinds are enum variants, serialized in one place

use crate::error::{status_line, Error, Result};
use chrono::{DateTime, TimeZone, Utc};
pub use hyper::body::Bytes;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Header every response carries
pub const POWERED_BY: (&str, &str) = ("X-Powered-By", concat!("warpgate/", env!("CARGO_PKG_VERSION")));

const DEFAULT_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// Value returned by a handler
pub enum Reply {
    /// No body
    Empty,
    /// HTML (or whatever content type the handler set), sent as-is
    Html(String),
    /// Plain text, sets `text/plain; charset=utf-8`
    Text(String),
    /// Raw bytes, content type left to the handler
    Bytes(Bytes),
    /// Structured result, serialized as JSON
    Json(serde_json::Value),
    /// Deferred body, iterated and written chunk by chunk
    Stream(Box<dyn Iterator<Item = Bytes> + Send>),
    /// Named template plus model, rendered by the configured engine
    Template {
        /// Template name
        name: String,
        /// Model passed to the engine
        model: serde_json::Value,
    },
}

impl Reply {
    /// Serialize any value into a JSON reply
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if the value cannot be serialized.
    pub fn json<T: Serialize>(value: &T) -> Result<Self> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    /// Template reply
    pub fn template(name: impl Into<String>, model: serde_json::Value) -> Self {
        Self::Template {
            name: name.into(),
            model,
        }
    }

    /// Stream reply from any iterator of chunks
    pub fn stream<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + 'static,
    {
        Self::Stream(Box::new(chunks.into_iter()))
    }
}

impl fmt::Debug for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Empty"),
            Self::Html(s) => f.debug_tuple("Html").field(s).finish(),
            Self::Text(s) => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(&b.len()).finish(),
            Self::Json(v) => f.debug_tuple("Json").field(v).finish(),
            Self::Stream(_) => write!(f, "Stream(..)"),
            Self::Template { name, .. } => f.debug_struct("Template").field("name", name).finish(),
        }
    }
}

impl From<String> for Reply {
    fn from(s: String) -> Self {
        Self::Html(s)
    }
}

impl From<&str> for Reply {
    fn from(s: &str) -> Self {
        Self::Html(s.to_string())
    }
}

impl From<serde_json::Value> for Reply {
    fn from(v: serde_json::Value) -> Self {
        Self::Json(v)
    }
}

/// Options for `ResponseBuilder::set_cookie`
#[derive(Debug, Clone)]
pub struct CookieOptions {
    /// `Max-Age` in seconds, ignored when `expires` is set
    pub max_age: Option<i64>,
    /// Absolute expiry
    pub expires: Option<DateTime<Utc>>,
    /// Cookie path (default `/`)
    pub path: String,
    /// Cookie domain
    pub domain: Option<String>,
    /// Send only over HTTPS
    pub secure: bool,
    /// Hide from scripts (default on)
    pub http_only: bool,
}

impl Default for CookieOptions {
    fn default() -> Self {
        Self {
            max_age: None,
            expires: None,
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: true,
        }
    }
}

/// Mutable response state for the current request
///
/// Interceptors and handlers adjust status, headers and cookies here through
/// the request context; the dispatcher serializes it once the chain returns.
#[derive(Debug, Clone)]
pub struct ResponseBuilder {
    status: u16,
    headers: Vec<(String, String)>,
    cookies: BTreeMap<String, String>,
}

impl Default for ResponseBuilder {
    fn default() -> Self {
        Self {
            status: 200,
            headers: vec![("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string())],
            cookies: BTreeMap::new(),
        }
    }
}

impl ResponseBuilder {
    /// Fresh response: `200 OK`, HTML content type
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Status code
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Status line, e.g. `200 OK`
    #[must_use]
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }

    /// Set the status code
    ///
    /// # Errors
    ///
    /// Returns `Error::Internal` for codes outside `100..=999`.
    pub fn set_status(&mut self, status: u16) -> Result<()> {
        if !(100..=999).contains(&status) {
            return Err(Error::Internal(format!("Bad response code: {status}")));
        }
        self.status = status;
        Ok(())
    }

    /// Header value (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Set or override a header
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self
            .headers
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
        {
            Some(slot) => slot.1 = value,
            None => self.headers.push((name.to_string(), value)),
        }
    }

    /// Remove a header
    pub fn unset_header(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    /// Content type
    #[must_use]
    pub fn content_type(&self) -> Option<&str> {
        self.header("Content-Type")
    }

    /// Set the content type; an empty value removes the header
    pub fn set_content_type(&mut self, value: &str) {
        if value.is_empty() {
            self.unset_header("Content-Type");
        } else {
            self.set_header("Content-Type", value);
        }
    }

    /// Set a cookie
    pub fn set_cookie(&mut self, name: &str, value: &str, options: &CookieOptions) {
        let mut parts = vec![format!("{}={}", quote(name), quote(value))];
        if let Some(expires) = options.expires {
            parts.push(format!(
                "Expires={}",
                expires.format("%a, %d-%b-%Y %H:%M:%S GMT")
            ));
        } else if let Some(max_age) = options.max_age {
            parts.push(format!("Max-Age={max_age}"));
        }
        parts.push(format!("Path={}", options.path));
        if let Some(domain) = &options.domain {
            parts.push(format!("Domain={domain}"));
        }
        if options.secure {
            parts.push("Secure".to_string());
        }
        if options.http_only {
            parts.push("HttpOnly".to_string());
        }
        self.cookies.insert(name.to_string(), parts.join("; "));
    }

    /// Expire a cookie on the client
    pub fn delete_cookie(&mut self, name: &str) {
        let options = CookieOptions {
            expires: Utc.timestamp_opt(0, 0).single(),
            ..CookieOptions::default()
        };
        self.set_cookie(name, "__delete__", &options);
    }

    /// Drop a cookie set earlier in this request
    pub fn unset_cookie(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    /// `Set-Cookie` value for a cookie, if set
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Final header list: headers, one `Set-Cookie` per cookie, `X-Powered-By`
    #[must_use]
    pub fn headers(&self) -> Vec<(String, String)> {
        let mut all = self.headers.clone();
        all.extend(
            self.cookies
                .values()
                .map(|v| ("Set-Cookie".to_string(), v.clone())),
        );
        all.push((POWERED_BY.0.to_string(), POWERED_BY.1.to_string()));
        all
    }

    /// Finish into a raw response with the given body
    #[must_use]
    pub fn into_raw(self, body: Bytes) -> RawResponse {
        RawResponse {
            status: self.status,
            headers: self.headers(),
            body,
        }
    }
}

/// Generic response descriptor produced by the dispatcher
#[derive(Debug, Clone)]
pub struct RawResponse {
    /// Status code
    pub status: u16,
    /// Header list in emission order
    pub headers: Vec<(String, String)>,
    /// Body bytes
    pub body: Bytes,
}

impl RawResponse {
    /// Status line, e.g. `404 Not Found`
    #[must_use]
    pub fn status_line(&self) -> String {
        status_line(self.status)
    }

    /// First header with this name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body as UTF-8 text (lossy)
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Percent-encode everything except unreserved characters and `/`
fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-' | b'~' | b'/') {
            out.push(char::from(b));
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let resp = ResponseBuilder::new();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.status_line(), "200 OK");
        assert_eq!(resp.content_type(), Some("text/html; charset=utf-8"));
    }

    #[test]
    fn test_set_status() {
        let mut resp = ResponseBuilder::new();
        resp.set_status(404).unwrap();
        assert_eq!(resp.status_line(), "404 Not Found");
        resp.set_status(500).unwrap();
        assert_eq!(resp.status(), 500);
        assert!(resp.set_status(99).is_err());
        assert!(resp.set_status(1000).is_err());
    }

    #[test]
    fn test_headers_case_insensitive() {
        let mut resp = ResponseBuilder::new();
        resp.set_header("content-type", "image/png");
        assert_eq!(resp.header("CONTENT-TYPE"), Some("image/png"));
        resp.set_content_type("");
        assert_eq!(resp.content_type(), None);
    }

    #[test]
    fn test_set_cookie_max_age() {
        let mut resp = ResponseBuilder::new();
        let options = CookieOptions {
            max_age: Some(3600),
            ..CookieOptions::default()
        };
        resp.set_cookie("company", "Abc, Inc.", &options);
        assert_eq!(
            resp.cookie("company"),
            Some("company=Abc%2C%20Inc.; Max-Age=3600; Path=/; HttpOnly")
        );
    }

    #[test]
    fn test_set_cookie_expires_wins() {
        let mut resp = ResponseBuilder::new();
        let options = CookieOptions {
            max_age: Some(3600),
            expires: Utc.timestamp_opt(1_342_274_794, 0).single(),
            path: "/sub/".to_string(),
            ..CookieOptions::default()
        };
        resp.set_cookie("company", "Expires", &options);
        assert_eq!(
            resp.cookie("company"),
            Some("company=Expires; Expires=Sat, 14-Jul-2012 14:06:34 GMT; Path=/sub/; HttpOnly")
        );
    }

    #[test]
    fn test_delete_and_unset_cookie() {
        let mut resp = ResponseBuilder::new();
        resp.delete_cookie("session");
        let cookie = resp.cookie("session").unwrap();
        assert!(cookie.starts_with("session=__delete__; Expires=Thu, 01-Jan-1970"));

        resp.unset_cookie("session");
        assert_eq!(resp.cookie("session"), None);
    }

    #[test]
    fn test_final_headers_include_cookies_and_powered_by() {
        let mut resp = ResponseBuilder::new();
        resp.set_cookie("s1", "ok", &CookieOptions::default());
        let headers = resp.headers();
        assert!(headers.iter().any(|(k, v)| k == "Set-Cookie" && v.starts_with("s1=ok")));
        assert_eq!(headers.last().map(|(k, _)| k.as_str()), Some("X-Powered-By"));
    }

    #[test]
    fn test_reply_json() {
        #[derive(Serialize)]
        struct Item {
            id: u32,
        }
        let reply = Reply::json(&Item { id: 7 }).unwrap();
        assert!(matches!(reply, Reply::Json(ref v) if v["id"] == 7));
    }
}
