//! Configuration management for the ShellBridge daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellbridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::SessionSettings;

/// Environment variable overriding `daemon.log_level`.
pub const ENV_LOG_LEVEL: &str = "SHELLBRIDGE_LOG_LEVEL";

/// Environment variable overriding `network.listen_addr`.
pub const ENV_LISTEN_ADDR: &str = "SHELLBRIDGE_LISTEN_ADDR";

/// Upper bound for both grace periods, in milliseconds.
const MAX_GRACE_MS: u64 = 600_000;

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),

    #[error("listen_addr must be a socket address like 127.0.0.1:3457, got {0}")]
    InvalidListenAddr(String),

    #[error("terminal dimensions must be non-zero, got {cols}x{rows}")]
    InvalidDimensions { cols: u16, rows: u16 },

    #[error("{name} must be between 0 and 600000 ms, got {value}")]
    InvalidGrace { name: &'static str, value: u64 },

    #[error("shell path does not exist: {0}")]
    InvalidShellPath(String),
}

/// Main configuration structure for the ShellBridge daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Viewer listener configuration.
    pub network: NetworkConfig,

    /// Shell session configuration.
    pub session: SessionConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

/// Network configuration for the WebSocket listener.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address viewers connect to.
    pub listen_addr: String,
}

/// Shell session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell to spawn. Falls back to `$SHELL`, then `/bin/bash`, then `/bin/sh`.
    pub shell: Option<String>,

    /// Terminal width when the spawn request does not give one.
    pub default_cols: u16,

    /// Terminal height when the spawn request does not give one.
    pub default_rows: u16,

    /// How long a session survives with no viewers.
    pub orphan_grace_ms: u64,

    /// How long a shell gets between SIGTERM and SIGKILL.
    pub kill_grace_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3457".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: None,
            default_cols: 80,
            default_rows: 24,
            orphan_grace_ms: 5_000,
            kill_grace_ms: 2_000,
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellbridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - SHELLBRIDGE_LISTEN_ADDR: Override the viewer listen address
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.daemon.log_level = level;
            }
        }

        if let Ok(addr) = std::env::var(ENV_LISTEN_ADDR) {
            if !addr.is_empty() {
                tracing::info!("Overriding listen_addr from environment: {}", addr);
                self.network.listen_addr = addr;
            }
        }
    }

    /// Validate the configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        self.listen_addr()?;

        let session = &self.session;
        if session.default_cols == 0 || session.default_rows == 0 {
            return Err(ConfigError::InvalidDimensions {
                cols: session.default_cols,
                rows: session.default_rows,
            });
        }

        for (name, value) in [
            ("orphan_grace_ms", session.orphan_grace_ms),
            ("kill_grace_ms", session.kill_grace_ms),
        ] {
            if value > MAX_GRACE_MS {
                return Err(ConfigError::InvalidGrace { name, value });
            }
        }

        if let Some(shell) = &session.shell {
            let shell_path = Path::new(shell);
            let found = if shell_path.is_absolute() {
                shell_path.is_file()
            } else {
                which::which(shell).is_ok()
            };
            if !found {
                return Err(ConfigError::InvalidShellPath(shell.clone()));
            }
        }

        Ok(())
    }

    /// Parses `network.listen_addr`.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.network
            .listen_addr
            .parse()
            .map_err(|_| ConfigError::InvalidListenAddr(self.network.listen_addr.clone()))
    }

    /// Session manager settings derived from the `[session]` section.
    ///
    /// A relative shell name is resolved through `PATH`.
    pub fn session_settings(&self) -> SessionSettings {
        let shell = self.session.shell.as_ref().map(|shell| {
            let path = PathBuf::from(shell);
            if path.is_absolute() {
                path
            } else {
                which::which(shell).unwrap_or(path)
            }
        });

        SessionSettings {
            shell,
            default_cols: self.session.default_cols,
            default_rows: self.session.default_rows,
            orphan_grace: Duration::from_millis(self.session.orphan_grace_ms),
            kill_grace: Duration::from_millis(self.session.kill_grace_ms),
        }
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert_eq!(config.network.listen_addr, "127.0.0.1:3457");
        assert_eq!(config.session.shell, None);
        assert_eq!(config.session.default_cols, 80);
        assert_eq!(config.session.default_rows, 24);
        assert_eq!(config.session.orphan_grace_ms, 5_000);
        assert_eq!(config.session.kill_grace_ms, 2_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[session]
orphan_grace_ms = 30000
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.session.orphan_grace_ms, 30_000);
        assert_eq!(config.session.kill_grace_ms, 2_000);
        assert_eq!(config.network.listen_addr, "127.0.0.1:3457");
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
log_level = "debug"

[network]
listen_addr = "0.0.0.0:9000"

[session]
shell = "/bin/sh"
default_cols = 132
default_rows = 50
orphan_grace_ms = 1000
kill_grace_ms = 500
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.session.shell.as_deref(), Some("/bin/sh"));
        assert_eq!(config.session.default_cols, 132);
        assert_eq!(config.session.default_rows, 50);
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[session\norphan_grace_ms = 1");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let result = Config::from_toml("[session]\ndefault_cols = \"wide\"");
        assert!(result.is_err());
    }

    #[test]
    fn test_session_settings_conversion() {
        let mut config = Config::default();
        config.session.orphan_grace_ms = 750;
        config.session.kill_grace_ms = 0;
        config.session.shell = Some("/bin/sh".to_string());

        let settings = config.session_settings();
        assert_eq!(settings.orphan_grace, Duration::from_millis(750));
        assert_eq!(settings.kill_grace, Duration::ZERO);
        assert_eq!(settings.shell, Some(PathBuf::from("/bin/sh")));
        assert_eq!(settings.default_cols, 80);
    }

    #[test]
    fn test_relative_shell_resolved_through_path() {
        let mut config = Config::default();
        config.session.shell = Some("sh".to_string());

        assert!(config.validate().is_ok());
        let shell = config.session_settings().shell.unwrap();
        assert!(shell.is_absolute());
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();
        config.daemon.log_level = "WARN".to_string();
        assert!(config.validate().is_ok());

        config.daemon.log_level = "loud".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("loud".to_string()))
        );
    }

    #[test]
    fn test_validate_listen_addr() {
        let mut config = Config::default();
        config.network.listen_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("localhost".to_string()))
        );
    }

    #[test]
    fn test_validate_dimensions() {
        let mut config = Config::default();
        config.session.default_rows = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidDimensions { cols: 80, rows: 0 })
        );
    }

    #[test]
    fn test_validate_grace_bounds() {
        let mut config = Config::default();
        config.session.orphan_grace_ms = 0;
        config.session.kill_grace_ms = MAX_GRACE_MS;
        assert!(config.validate().is_ok());

        config.session.kill_grace_ms = MAX_GRACE_MS + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidGrace {
                name: "kill_grace_ms",
                value: MAX_GRACE_MS + 1
            })
        );
    }

    #[test]
    fn test_validate_missing_shell() {
        let mut config = Config::default();
        config.session.shell = Some("/no/such/shell".to_string());
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidShellPath("/no/such/shell".to_string()))
        );

        config.session.shell = Some("definitely-not-a-shell-binary".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.to_string_lossy().contains("shellbridge"));
        assert!(path.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_listen_addr() {
        std::env::set_var(ENV_LISTEN_ADDR, "127.0.0.1:4000");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.network.listen_addr, "127.0.0.1:4000");

        std::env::remove_var(ENV_LISTEN_ADDR);
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        std::env::set_var(ENV_LOG_LEVEL, "trace");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.daemon.log_level, "trace");

        std::env::remove_var(ENV_LOG_LEVEL);
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        std::env::set_var(ENV_LISTEN_ADDR, "");
        std::env::set_var(ENV_LOG_LEVEL, "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        std::env::remove_var(ENV_LISTEN_ADDR);
        std::env::remove_var(ENV_LOG_LEVEL);
    }
}
