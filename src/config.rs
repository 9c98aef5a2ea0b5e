//! Configuration file parser for `atom-combiner.toml`.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are silently ignored by serde (with `deny_unknown_fields` off),
//! though we log a warning when the file contains potential typos.
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::feed::normalize::DEFAULT_FAVICON_TEMPLATE;
use crate::feed::FetchSettings;
use crate::storage::DEFAULT_TTL_SECS;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Service configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub bind: String,

    /// Port to listen on. The `PORT` environment variable takes precedence.
    pub port: u16,

    /// Directory holding cached feed bodies.
    pub cache_dir: PathBuf,

    /// How long a fetched feed is served from cache, in seconds.
    pub cache_ttl_secs: u64,

    /// Upstream request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Largest accepted source document, in bytes.
    pub max_feed_bytes: usize,

    /// User-Agent sent with upstream requests.
    pub user_agent: String,

    /// Favicon URL template for `feed:icon`; `{base}` and `{host}` are substituted.
    pub favicon_template: String,

    /// Allow source URLs on loopback and private networks.
    pub allow_private_hosts: bool,
}

impl Default for Config {
    fn default() -> Self {
        let fetch = FetchSettings::default();
        Self {
            bind: "0.0.0.0".to_string(),
            port: 80,
            cache_dir: PathBuf::from(".cache"),
            cache_ttl_secs: DEFAULT_TTL_SECS,
            request_timeout_secs: fetch.timeout.as_secs(),
            max_feed_bytes: fetch.max_bytes,
            user_agent: fetch.user_agent,
            favicon_template: DEFAULT_FAVICON_TEMPLATE.to_string(),
            allow_private_hosts: false,
        }
    }
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    const KNOWN_KEYS: [&'static str; 9] = [
        "bind",
        "port",
        "cache_dir",
        "cache_ttl_secs",
        "request_timeout_secs",
        "max_feed_bytes",
        "user_agent",
        "favicon_template",
        "allow_private_hosts",
    ];

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading to prevent memory exhaustion
        // from a maliciously large or corrupted config file.
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {} // Size is within limits, proceed
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse the TOML content first as a raw table to detect unknown keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !Self::KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), port = config.port, "Loaded configuration");
        Ok(config)
    }

    /// Applies the `PORT` environment variable, if set and valid.
    pub fn apply_env(&mut self) {
        if let Ok(port) = std::env::var("PORT") {
            match port.trim().parse::<u16>() {
                Ok(port) => self.port = port,
                Err(e) => tracing::warn!(value = %port, error = %e, "Ignoring invalid PORT"),
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_feed_bytes == 0 {
            return Err(ConfigError::Invalid {
                key: "max_feed_bytes",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Upstream fetch settings derived from this configuration.
    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            timeout: Duration::from_secs(self.request_timeout_secs),
            max_bytes: self.max_feed_bytes,
            user_agent: self.user_agent.clone(),
            allow_private_hosts: self.allow_private_hosts,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("atom-combiner.toml");
        std::fs::write(&path, content).unwrap();
        (dir, path)
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind, "0.0.0.0");
        assert_eq!(config.port, 80);
        assert_eq!(config.cache_dir, PathBuf::from(".cache"));
        assert_eq!(config.cache_ttl_secs, 600);
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.max_feed_bytes, 10 * 1024 * 1024);
        assert!(config.favicon_template.contains("{base}"));
        assert!(!config.allow_private_hosts);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.port, 80);
    }

    #[test]
    fn test_whitespace_only_file_returns_default() {
        let (_dir, path) = write_config("   \n  \n  ");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.cache_ttl_secs, 600);
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let (_dir, path) = write_config("port = 8080\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.cache_ttl_secs, 600); // default
        assert_eq!(config.bind, "0.0.0.0"); // default
    }

    #[test]
    fn test_full_config() {
        let (_dir, path) = write_config(
            r#"
bind = "127.0.0.1"
port = 3000
cache_dir = "/var/cache/atom-combiner"
cache_ttl_secs = 120
request_timeout_secs = 5
max_feed_bytes = 1024
user_agent = "test-agent"
favicon_template = "{base}/favicon.ico"
allow_private_hosts = true
"#,
        );

        let config = Config::load(&path).unwrap();
        assert_eq!(config.bind, "127.0.0.1");
        assert_eq!(config.port, 3000);
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/atom-combiner"));
        assert_eq!(config.cache_ttl_secs, 120);
        assert!(config.allow_private_hosts);

        let fetch = config.fetch_settings();
        assert_eq!(fetch.timeout, Duration::from_secs(5));
        assert_eq!(fetch.max_bytes, 1024);
        assert_eq!(fetch.user_agent, "test-agent");
        assert!(fetch.allow_private_hosts);
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let (_dir, path) = write_config("this is not [valid toml");
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let (_dir, path) = write_config("port = 81\ntotally_fake_key = \"x\"\n");
        let config = Config::load(&path).unwrap();
        assert_eq!(config.port, 81);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        let (_dir, path) = write_config("port = \"eighty\"\n");
        assert!(Config::load(&path).is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let (_dir, path) = write_config("request_timeout_secs = 0\n");
        assert!(matches!(
            Config::load(&path),
            Err(ConfigError::Invalid {
                key: "request_timeout_secs",
                ..
            })
        ));
    }

    // SEC-014: File size limit
    #[test]
    fn test_too_large_file_rejected() {
        let (_dir, path) = write_config(&"a".repeat(1_048_577));
        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));
    }
}
