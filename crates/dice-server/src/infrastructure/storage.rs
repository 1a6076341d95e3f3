//! TOML configuration file.
//!
//! Every key is optional; anything left out keeps the [`ServerConfig`]
//! default.  A complete file looks like:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0:443"
//! server_name = "Liar's Dice Server"
//! greeting = "hello, world!"
//! accept_on_start = true
//!
//! [tls]
//! cert = "assets/pem/cert.pem"
//! key = "assets/pem/key.pem"
//! dh_params = "assets/pem/dh.pem"
//!
//! [limits]
//! idle_timeout_secs = 300
//! handshake_timeout_secs = 10
//! max_message_size = 65536
//!
//! [logging]
//! level = "info"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ServerConfig;
use crate::error::ConfigError;

/// Default `tracing` filter when neither `RUST_LOG` nor the file sets one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ── File schema ───────────────────────────────────────────────────────────────

/// Top-level layout of the configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub tls: TlsSection,
    #[serde(default)]
    pub limits: LimitsSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    /// `ip:port` to listen on.
    pub bind_address: Option<String>,
    pub server_name: Option<String>,
    pub greeting: Option<String>,
    pub accept_on_start: Option<bool>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TlsSection {
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
    /// An empty string disables the DH parameters check.
    pub dh_params: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LimitsSection {
    pub idle_timeout_secs: Option<u64>,
    pub handshake_timeout_secs: Option<u64>,
    pub max_message_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct LoggingSection {
    /// `tracing` filter directive, e.g. `"debug"` or `"liars_dice_server=trace"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

// ── Loading ───────────────────────────────────────────────────────────────────

/// Reads and parses the file at `path`.
///
/// # Errors
///
/// [`ConfigError::Io`] if the file cannot be read, [`ConfigError::Parse`] if
/// it is not valid TOML for this schema.
pub fn load_config(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&text)
}

/// Parses configuration from TOML text.
///
/// # Errors
///
/// [`ConfigError::Parse`] on malformed TOML or unknown keys.
pub fn parse_config(text: &str) -> Result<FileConfig, ConfigError> {
    Ok(toml::from_str(text)?)
}

impl FileConfig {
    /// Overlays the values present in the file onto `base`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::InvalidAddress`] if `server.bind_address` does not parse.
    pub fn apply_to(&self, mut base: ServerConfig) -> Result<ServerConfig, ConfigError> {
        if let Some(value) = &self.server.bind_address {
            base.bind_addr = parse_socket_addr(value)?;
        }
        if let Some(name) = &self.server.server_name {
            base.server_name.clone_from(name);
        }
        if let Some(greeting) = &self.server.greeting {
            base.greeting.clone_from(greeting);
        }
        if let Some(accept) = self.server.accept_on_start {
            base.accept_on_start = accept;
        }

        if let Some(cert) = &self.tls.cert {
            base.cert_path.clone_from(cert);
        }
        if let Some(key) = &self.tls.key {
            base.key_path.clone_from(key);
        }
        if let Some(dh) = &self.tls.dh_params {
            base.dh_params_path = (!dh.as_os_str().is_empty()).then(|| dh.clone());
        }

        if let Some(secs) = self.limits.idle_timeout_secs {
            base.idle_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = self.limits.handshake_timeout_secs {
            base.handshake_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = self.limits.max_message_size {
            base.max_message_size = size;
        }
        Ok(base)
    }
}

/// Parses an `ip:port` string into a [`SocketAddr`].
///
/// # Errors
///
/// [`ConfigError::InvalidAddress`] carrying the offending text.
pub fn parse_socket_addr(value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|source| ConfigError::InvalidAddress {
        value: value.to_string(),
        source,
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_keeps_every_default() {
        // Arrange
        let file = parse_config("").unwrap();

        // Act
        let config = file.apply_to(ServerConfig::default()).unwrap();

        // Assert
        assert_eq!(config, ServerConfig::default());
        assert_eq!(file.logging.level, DEFAULT_LOG_LEVEL);
    }

    #[test]
    fn test_full_file_overrides_every_field() {
        let text = r#"
            [server]
            bind_address = "127.0.0.1:8443"
            server_name = "Test Server"
            greeting = "welcome"
            accept_on_start = false

            [tls]
            cert = "/etc/dice/cert.pem"
            key = "/etc/dice/key.pem"
            dh_params = "/etc/dice/dh.pem"

            [limits]
            idle_timeout_secs = 30
            handshake_timeout_secs = 3
            max_message_size = 1024

            [logging]
            level = "debug"
        "#;

        let file = parse_config(text).unwrap();
        let config = file.apply_to(ServerConfig::default()).unwrap();

        assert_eq!(config.bind_addr.to_string(), "127.0.0.1:8443");
        assert_eq!(config.server_name, "Test Server");
        assert_eq!(config.greeting, "welcome");
        assert!(!config.accept_on_start);
        assert_eq!(config.cert_path, PathBuf::from("/etc/dice/cert.pem"));
        assert_eq!(config.key_path, PathBuf::from("/etc/dice/key.pem"));
        assert_eq!(config.dh_params_path, Some(PathBuf::from("/etc/dice/dh.pem")));
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert_eq!(config.handshake_timeout, Duration::from_secs(3));
        assert_eq!(config.max_message_size, 1024);
        assert_eq!(file.logging.level, "debug");
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let file = parse_config("[limits]\nidle_timeout_secs = 5\n").unwrap();

        let config = file.apply_to(ServerConfig::default()).unwrap();

        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.handshake_timeout, ServerConfig::default().handshake_timeout);
        assert_eq!(config.bind_addr, ServerConfig::default().bind_addr);
    }

    #[test]
    fn test_empty_dh_params_disables_check() {
        let file = parse_config("[tls]\ndh_params = \"\"\n").unwrap();

        let config = file.apply_to(ServerConfig::default()).unwrap();

        assert_eq!(config.dh_params_path, None);
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let file = parse_config("[server]\nbind_address = \"not-an-address\"\n").unwrap();

        let result = file.apply_to(ServerConfig::default());

        assert!(matches!(
            result,
            Err(ConfigError::InvalidAddress { ref value, .. }) if value == "not-an-address"
        ));
    }

    #[test]
    fn test_unknown_key_is_parse_error() {
        let result = parse_config("[server]\nport = 443\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        let result = parse_config("[server\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let result = load_config(Path::new("/nonexistent/dice.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_load_config_reads_file_from_disk() {
        // Arrange
        let dir = std::env::temp_dir().join(format!("dice_cfg_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dice.toml");
        std::fs::write(&path, "[server]\ngreeting = \"hi\"\n").unwrap();

        // Act
        let file = load_config(&path).unwrap();

        // Assert
        assert_eq!(file.server.greeting.as_deref(), Some("hi"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_config_round_trips_through_toml() {
        let mut file = FileConfig::default();
        file.limits.max_message_size = Some(2048);

        let text = toml::to_string(&file).unwrap();
        let parsed = parse_config(&text).unwrap();

        assert_eq!(parsed, file);
    }
}
