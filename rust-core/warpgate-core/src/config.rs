//! # Configuration
//!
//! Typed settings for the gateway, the database engine and the dispatcher.
//! Every struct deserializes with serde and falls back to its `Default` for
//! missing keys. Layered setups (defaults plus a deployment override) are
//! combined with `merge` before deserializing.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// HTTP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind the server to
    pub address: SocketAddr,
    /// Enable keep-alive connections
    pub keep_alive: bool,
    /// Seconds to wait for in-flight connections on shutdown
    pub shutdown_timeout_secs: u64,
    /// Max request body size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: ([127, 0, 0, 1], 9000).into(),
            keep_alive: true,
            shutdown_timeout_secs: 30,
            max_body_size: 1024 * 1024,
        }
    }
}

impl ServerConfig {
    /// Shutdown drain timeout
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Database engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Connection URL (e.g. `sqlite:app.db`)
    pub url: String,
    /// Maximum pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:warpgate.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Top-level application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Include failure details in 500 pages and serve `/static/` files
    pub debug: bool,
    /// Directory holding the `static/` tree
    pub document_root: PathBuf,
    /// Gateway settings
    pub server: ServerConfig,
    /// Database settings
    pub database: DatabaseConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            debug: false,
            document_root: PathBuf::from("."),
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl AppConfig {
    /// Deserialize from a JSON document; absent keys keep their defaults
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if a present key has the wrong shape.
    pub fn from_value(value: Value) -> Result<Self> {
        Ok(serde_json::from_value(value)?)
    }

    /// Defaults with `overrides` merged on top
    ///
    /// # Errors
    ///
    /// Returns `Error::Json` if an override has the wrong shape.
    pub fn with_overrides(overrides: &Value) -> Result<Self> {
        let defaults = serde_json::to_value(Self::default())?;
        Self::from_value(merge(&defaults, overrides))
    }
}

/// Merge `overrides` onto `defaults`
///
/// Only keys present in `defaults` survive. Nested objects merge key by key;
/// any other overridden value replaces the default wholesale.
#[must_use]
pub fn merge(defaults: &Value, overrides: &Value) -> Value {
    match (defaults, overrides) {
        (Value::Object(base), Value::Object(over)) => Value::Object(
            base.iter()
                .map(|(key, value)| {
                    let merged = match over.get(key) {
                        Some(o) => merge(value, o),
                        None => value.clone(),
                    };
                    (key.clone(), merged)
                })
                .collect(),
        ),
        (_, over) => over.clone(),
    }
}
