//! Configuration for the server and client.
//!
//! Priority chain:
//! 1. Built-in defaults (`Config::default()`)
//! 2. Config file (`--config FILE` or `~/.config/codepub/config.toml`)
//! 3. CLI flags (applied by `main.rs`, highest priority)

use crate::error::{PublishError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default TCP port of the reference deployment
pub const DEFAULT_PORT: u16 = 8080;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub server: ServerSettings,
    pub client: ClientSettings,
    pub transfer: TransferSettings,
}

/// `[server]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerSettings {
    /// Interface to bind
    pub host: String,
    /// Port to bind (0 lets the OS pick one)
    pub port: u16,
    /// Directory holding sources, published pages and shared assets
    pub root: PathBuf,
    /// Connection handler threads
    pub workers: usize,
    /// Accepted connections allowed to wait for a free worker
    pub backlog: usize,
    /// Run the publish pipeline once before accepting connections
    pub publish_on_start: bool,
    /// Source file patterns picked up by the publish pipeline
    pub patterns: Vec<String>,
    /// Per-connection read timeout; `None` blocks until the peer speaks
    pub read_timeout_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            root: PathBuf::from("./repo"),
            workers: num_cpus::get().max(2),
            backlog: 32,
            publish_on_start: false,
            patterns: vec!["*.h".to_string(), "*.cpp".to_string()],
            read_timeout_secs: None,
        }
    }
}

impl ServerSettings {
    pub fn read_timeout(&self) -> Option<Duration> {
        self.read_timeout_secs.map(Duration::from_secs)
    }
}

/// `[client]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientSettings {
    pub host: String,
    pub port: u16,
    /// Where downloaded files are written
    pub staging_dir: PathBuf,
    /// Hand opened pages to the desktop's default handler
    pub open_pages: bool,
    pub retry: RetrySettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            staging_dir: PathBuf::from("./TempDir"),
            open_pages: true,
            retry: RetrySettings::default(),
        }
    }
}

impl ClientSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// `[client.retry]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetrySettings {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
    /// `None` retries forever
    pub max_attempts: Option<u32>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// `[transfer]` section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TransferSettings {
    /// Chunk size used when streaming file payloads
    pub block_size: usize,
    /// Extension of published pages, without the dot
    pub page_extension: String,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            block_size: crate::wire::BLOCK_SIZE,
            page_extension: crate::wire::PAGE_EXTENSION.to_string(),
        }
    }
}

impl Config {
    /// Parse a TOML document. Missing keys fall back to defaults.
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`, or from the default location when `path` is `None`.
    /// A missing default file yields the built-in defaults; a missing
    /// explicit file is an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => {
                let text = std::fs::read_to_string(p).map_err(|e| {
                    PublishError::Config(format!("cannot read {}: {}", p.display(), e))
                })?;
                Self::from_toml(&text)
            }
            None => match Self::default_path() {
                Some(p) if p.exists() => {
                    tracing::debug!("Loading config from {}", p.display());
                    let text = std::fs::read_to_string(&p)?;
                    Self::from_toml(&text)
                }
                _ => Ok(Self::default()),
            },
        }
    }

    /// `~/.config/codepub/config.toml` (platform equivalent)
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("codepub").join("config.toml"))
    }

    fn validate(&self) -> Result<()> {
        if self.transfer.block_size == 0 {
            return Err(PublishError::Config("transfer.block_size must be > 0".into()));
        }
        if self.server.workers == 0 {
            return Err(PublishError::Config("server.workers must be > 0".into()));
        }
        if self.client.retry.multiplier < 1.0 {
            return Err(PublishError::Config(
                "client.retry.multiplier must be >= 1.0".into(),
            ));
        }
        if self.transfer.page_extension.starts_with('.') {
            return Err(PublishError::Config(
                "transfer.page_extension is given without the leading dot".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_reference_deployment() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.client.port, 8080);
        assert_eq!(config.client.host, "127.0.0.1");
        assert_eq!(config.transfer.block_size, 2048);
        assert_eq!(config.transfer.page_extension, "htm");
        assert_eq!(config.client.retry.initial_delay_ms, 100);
        assert!(config.client.retry.max_attempts.is_none());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [server]
            port = 9000
            workers = 3

            [client.retry]
            max_attempts = 5
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.workers, 3);
        assert_eq!(config.server.backlog, 32);
        assert_eq!(config.client.retry.max_attempts, Some(5));
        assert_eq!(config.client.retry.initial_delay_ms, 100);
    }

    #[test]
    fn test_rejects_zero_block_size() {
        let err = Config::from_toml("[transfer]\nblock_size = 0\n").unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }

    #[test]
    fn test_rejects_bad_toml() {
        let err = Config::from_toml("[server\nport = 1").unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }

    #[test]
    fn test_missing_explicit_file_is_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let err = Config::load(Some(&tmp.path().join("nope.toml"))).unwrap_err();
        assert!(matches!(err, PublishError::Config(_)));
    }
}
