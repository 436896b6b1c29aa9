//! # HTTP Request
//!
//! Raw request descriptor accepted by the dispatcher and the read-only request
//! view exposed through the request context.
//!
//! ## Design Principles (SOLID)
//!
//! - **S**: Request only handles request data, not response
//! - **D**: Does not expose the transport to handlers
//!
//! Cookies and input parameters are parsed on first access and cached for the
//! rest of the request.

use crate::error::{Error, Result};
use hyper::body::Bytes;
use hyper::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, COOKIE, HOST};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::OnceLock;

/// Generic request descriptor handed to `Dispatcher::handle`
#[derive(Debug, Clone, Default)]
pub struct RawRequest {
    /// Method as sent by the client (e.g. `GET`)
    pub method: String,
    /// Raw path, still percent-encoded
    pub path: String,
    /// Raw query string without the leading `?`
    pub query: Option<String>,
    /// Request headers
    pub headers: HeaderMap,
    /// Collected request body
    pub body: Bytes,
    /// Client address, if known
    pub remote_addr: Option<SocketAddr>,
}

impl RawRequest {
    /// Build a request from a method and a target such as `/a/b?x=1`
    pub fn new(method: impl Into<String>, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((p, q)) => (p.to_string(), Some(q.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method: method.into(),
            path,
            query,
            ..Self::default()
        }
    }

    /// Add a header (invalid names or values are skipped)
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(n), Ok(v)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(n, v);
        }
        self
    }

    /// Set the body
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Set the client address
    #[must_use]
    pub const fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// Read-only view of the current request
#[derive(Debug)]
pub struct RequestView {
    method: String,
    path: String,
    query_string: Option<String>,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: Option<SocketAddr>,
    cookies: OnceLock<HashMap<String, String>>,
    params: OnceLock<HashMap<String, Vec<String>>>,
}

impl RequestView {
    /// Wrap a raw request; the path is percent-decoded here
    #[must_use]
    pub fn from_raw(raw: RawRequest) -> Self {
        Self {
            method: raw.method.to_ascii_uppercase(),
            path: url_decode(&raw.path, false),
            query_string: raw.query,
            headers: raw.headers,
            body: raw.body,
            remote_addr: raw.remote_addr,
            cookies: OnceLock::new(),
            params: OnceLock::new(),
        }
    }

    /// HTTP method, upper-cased
    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Decoded request path
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Raw query string
    #[must_use]
    pub fn query_string(&self) -> &str {
        self.query_string.as_deref().unwrap_or("")
    }

    /// Client address, `0.0.0.0` when unknown
    #[must_use]
    pub fn remote_addr(&self) -> String {
        self.remote_addr
            .map_or_else(|| "0.0.0.0".to_string(), |a| a.ip().to_string())
    }

    /// `Host` header
    #[must_use]
    pub fn host(&self) -> &str {
        self.headers
            .get(HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Get a header value by name (case-insensitive)
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All headers as name/value pairs (names lower-case)
    #[must_use]
    pub fn headers(&self) -> HashMap<String, String> {
        self.headers
            .iter()
            .filter_map(|(k, v)| {
                v.to_str()
                    .ok()
                    .map(|val| (k.as_str().to_string(), val.to_string()))
            })
            .collect()
    }

    /// Cookie value by name
    #[must_use]
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies().get(name).map(String::as_str)
    }

    /// All cookies
    pub fn cookies(&self) -> &HashMap<String, String> {
        self.cookies.get_or_init(|| {
            self.headers
                .get_all(COOKIE)
                .iter()
                .filter_map(|v| v.to_str().ok())
                .flat_map(|v| v.split(';'))
                .filter_map(|pair| {
                    let (k, v) = pair.split_once('=')?;
                    let k = k.trim();
                    (!k.is_empty()).then(|| (k.to_string(), url_decode(v.trim(), false)))
                })
                .collect()
        })
    }

    /// First input value for a key (query string or form body)
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.params()
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Every input value for a key
    #[must_use]
    pub fn gets(&self, key: &str) -> Option<&[String]> {
        self.params().get(key).map(Vec::as_slice)
    }

    /// Input as a flat map, starting from `defaults` and overlaid with the
    /// first value of every request parameter
    #[must_use]
    pub fn input(&self, defaults: &[(&str, &str)]) -> HashMap<String, String> {
        let mut out: HashMap<String, String> = defaults
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        for (k, values) in self.params() {
            if let Some(first) = values.first() {
                out.insert(k.clone(), first.clone());
            }
        }
        out
    }

    /// Raw body bytes
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Body as UTF-8 text
    #[must_use]
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }

    /// Parse the body as JSON using simd-json
    ///
    /// # Errors
    ///
    /// Returns `Error::BadRequest` if the body is not valid JSON for `T`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let mut bytes = self.body.to_vec();
        simd_json::from_slice(&mut bytes)
            .map_err(|e| Error::bad_request(format!("invalid JSON body: {e}")))
    }

    fn params(&self) -> &HashMap<String, Vec<String>> {
        self.params.get_or_init(|| {
            let mut params = HashMap::new();
            parse_query_into(self.query_string(), &mut params);
            if self.is_form_body() {
                if let Some(body) = self.body_str() {
                    parse_query_into(body, &mut params);
                }
            }
            params
        })
    }

    fn is_form_body(&self) -> bool {
        self.headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| {
                v.to_ascii_lowercase()
                    .starts_with("application/x-www-form-urlencoded")
            })
    }
}

/// Parse `a=1&b=2&a=3` into a multi-map, keeping blank values
fn parse_query_into(query: &str, params: &mut HashMap<String, Vec<String>>) {
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        params
            .entry(url_decode(key, true))
            .or_default()
            .push(url_decode(value, true));
    }
}

/// Percent-decode, optionally treating `+` as a space
fn url_decode(s: &str, plus_as_space: bool) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' if plus_as_space => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..=i + 2])
                    .ok()
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                if let Some(b) = hex {
                    out.push(b);
                    i += 2;
                } else {
                    out.push(b'%');
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
