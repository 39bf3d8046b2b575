//! Server configuration for apihub.
//!
//! Every field has a default so an empty file (or no file at all) yields a
//! runnable configuration; `APIHUB_*` environment variables override it.
use std::time::Duration;

use eyre::{Result, WrapErr};
use serde::{Deserialize, Serialize};

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_def_path() -> String {
    "./conf/apis".to_string()
}

fn default_private_def_path() -> String {
    "./conf/privates".to_string()
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// JSON lines instead of human readable output.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Directory holding one JSON file per API definition.
    #[serde(default = "default_api_def_path")]
    pub api_def_path: String,
    /// Directory holding one JSON file per private value store.
    #[serde(default = "default_private_def_path")]
    pub private_def_path: String,
    /// Expose `/api/{bucket}/{id}` in addition to `/api/{id}`.
    #[serde(default)]
    pub bucket_enabled: bool,
    /// Backend request timeout, humantime syntax (`30s`, `1m 30s`).
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
    #[serde(default)]
    pub log: LogConfig,
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Result<Duration> {
        humantime::parse_duration(&self.request_timeout)
            .wrap_err_with(|| format!("Invalid request_timeout '{}'", self.request_timeout))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            api_def_path: default_api_def_path(),
            private_def_path: default_private_def_path(),
            bucket_enabled: false,
            request_timeout: default_request_timeout(),
            log: LogConfig::default(),
        }
    }
}
