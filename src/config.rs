//! Configuration module for amgi
//!
//! Settings come from an optional JSON file and are then overridden by
//! command-line flags.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::protocol::ProxyMode;
use crate::transport::TlsOptions;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    /// Listen port (all IPv4 interfaces)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Protocol served to clients
    #[serde(default)]
    pub mode: ProxyMode,

    /// trace, debug, info, warning, error or fatal
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log to this file instead of the console
    #[serde(default)]
    pub log_file: Option<String>,

    /// Mutual-TLS front-end; plain TCP when absent
    #[serde(default)]
    pub tls: Option<TlsOptions>,
}

fn default_port() -> u16 {
    8443
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            mode: ProxyMode::default(),
            log_level: default_log_level(),
            log_file: None,
            tls: None,
        }
    }
}

impl ProxyConfig {
    /// Load configuration from a JSON file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_json(&content)
    }

    /// Parse configuration from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Check the settings that serde cannot
    pub fn validate(&self) -> Result<()> {
        parse_log_level(&self.log_level)?;

        if let Some(tls) = &self.tls {
            let paths = [
                ("private-key", &tls.private_key),
                ("server-cert", &tls.server_cert),
                ("ca-cert", &tls.ca_cert),
            ];
            for (name, path) in paths {
                if path.as_os_str().is_empty() {
                    return Err(Error::Config(format!(
                        "TLS mode requires the {} parameter",
                        name
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Map a configured level name onto a `tracing` filter directive
pub fn parse_log_level(level: &str) -> Result<&'static str> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok("trace"),
        "debug" => Ok("debug"),
        "info" => Ok("info"),
        "warning" | "warn" => Ok("warn"),
        "error" | "fatal" => Ok("error"),
        other => Err(Error::Config(format!("Unknown log level: {}", other))),
    }
}
