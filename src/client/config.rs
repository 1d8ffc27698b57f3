//! Connection settings.
//!
//! Settings come from code, from a TOML document, or both, and can be
//! overridden from the environment:
//!
//! - `ORIENTDB_HOST` - Server host
//! - `ORIENTDB_PORT` - Binary protocol port
//! - `ORIENTDB_SESSION_ID` - Session id to stamp on every request

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{DriverError, DriverResult};

pub const ENV_HOST: &str = "ORIENTDB_HOST";
pub const ENV_PORT: &str = "ORIENTDB_PORT";
pub const ENV_SESSION_ID: &str = "ORIENTDB_SESSION_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `-1` until a session has been opened.
    #[serde(default = "default_session_id")]
    pub session_id: i32,
    #[serde(default = "default_true")]
    pub nodelay: bool,
    /// Read the 2-byte protocol version the server sends on accept.
    #[serde(default = "default_true")]
    pub read_greeting: bool,
    /// Largest response the connection will buffer before giving up.
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    2424
}

fn default_session_id() -> i32 {
    -1
}

fn default_true() -> bool {
    true
}

fn default_max_frame_size() -> usize {
    16 * 1024 * 1024
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            session_id: default_session_id(),
            nodelay: true,
            read_greeting: true,
            max_frame_size: default_max_frame_size(),
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> DriverResult<Self> {
        toml::from_str(content).map_err(|e| DriverError::Config(e.to_string()))
    }

    /// Load a TOML file and apply environment overrides.
    pub fn load(path: &Path) -> DriverResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DriverError::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let mut config = Self::from_toml_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from any key lookup. Empty or unparsable values are
    /// ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup(ENV_HOST).filter(|h| !h.is_empty()) {
            self.host = host;
        }

        if let Some(port) = lookup(ENV_PORT).and_then(|p| p.parse::<u16>().ok()) {
            self.port = port;
        }

        if let Some(session_id) = lookup(ENV_SESSION_ID).and_then(|s| s.parse::<i32>().ok()) {
            self.session_id = session_id;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.address(), "localhost:2424");
        assert_eq!(config.session_id, -1);
        assert!(config.nodelay);
        assert!(config.read_greeting);
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config =
            ClientConfig::from_toml_str("host = \"db.internal\"\nread_greeting = false\n").unwrap();
        assert_eq!(config.host, "db.internal");
        assert_eq!(config.port, 2424);
        assert!(!config.read_greeting);
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
    }

    #[test]
    fn test_invalid_toml() {
        let err = ClientConfig::from_toml_str("port = \"nope\"").unwrap_err();
        assert!(matches!(err, DriverError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_HOST, ""),
            (ENV_PORT, "2480"),
            (ENV_SESSION_ID, "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = ClientConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 2480);
        assert_eq!(config.session_id, -1);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = ClientConfig {
            session_id: 7,
            ..ClientConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("session_id = 7"));
        assert_eq!(ClientConfig::from_toml_str(&text).unwrap(), config);
    }
}
