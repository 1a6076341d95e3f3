//! Error taxonomy shared by the server layers.
//!
//! | Error          | Scope                 | Effect                                  |
//! |----------------|-----------------------|-----------------------------------------|
//! | `ConfigError`  | process               | aborts startup                          |
//! | `SessionError` | one connection        | connection becomes `Failed` or `Closed` |
//! | `HubError`     | one registry lookup   | stale reference; caller no-ops          |
//!
//! `HubError` lives next to the hub in [`crate::application::hub`].

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_rustls::rustls;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Bad or missing configuration: TLS credentials or the TOML file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file could not be opened or read.
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The certificate file contained no PEM certificate.
    #[error("no certificates found in {path}")]
    NoCertificates { path: PathBuf },

    /// The key file contained no PKCS#1, PKCS#8 or SEC1 private key.
    #[error("no private key found in {path}")]
    NoPrivateKey { path: PathBuf },

    /// The DH parameters file has no `DH PARAMETERS` PEM block.
    #[error("no DH PARAMETERS block found in {path}")]
    InvalidDhParams { path: PathBuf },

    /// rustls rejected the certificate/key pair.
    #[error("TLS configuration rejected: {0}")]
    Tls(#[from] rustls::Error),

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A bind address did not parse.
    #[error("invalid socket address '{value}': {source}")]
    InvalidAddress {
        value: String,
        #[source]
        source: std::net::AddrParseError,
    },

    /// The `Server` header value contains characters HTTP does not allow.
    #[error("invalid server name '{0}' for the Server header")]
    InvalidServerName(String),
}

/// Failure of a single connection.  Never escapes the session task.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The TLS server handshake failed.
    #[error("TLS handshake failed: {0}")]
    Handshake(#[source] std::io::Error),

    /// The WebSocket upgrade request was malformed or the response could not
    /// be sent.
    #[error("WebSocket upgrade failed: {0}")]
    Upgrade(#[source] WsError),

    /// The TLS handshake plus WebSocket upgrade took too long.
    #[error("handshake did not finish within {0:?}")]
    HandshakeTimeout(Duration),

    /// A read or write on the established WebSocket failed.
    #[error("WebSocket I/O error: {0}")]
    Io(#[source] WsError),

    /// The peer stopped reading: a frame could not be written within the idle
    /// timeout.
    #[error("write stalled for {0:?}")]
    WriteTimeout(Duration),
}
