//! Server configuration types.
//!
//! [`ServerConfig`] is the single source of truth for runtime settings.  It is
//! built once at startup (defaults, then the TOML file, then CLI flags) and
//! shared read-only with every connection through an `Arc`.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use liars_dice_core::DEFAULT_GREETING;

/// Value of the `Server` header sent in the WebSocket upgrade response.
pub const DEFAULT_SERVER_NAME: &str = "Liar's Dice Server";

/// Default listening endpoint: every IPv4 interface, HTTPS port.
pub const DEFAULT_BIND_ADDR: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 443);

/// All runtime configuration for the server.
///
/// # Example
///
/// ```rust
/// use liars_dice_server::domain::ServerConfig;
///
/// let cfg = ServerConfig::default();
/// assert_eq!(cfg.bind_addr.port(), 443);
/// assert_eq!(cfg.server_name, "Liar's Dice Server");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    /// TCP endpoint the acceptor listens on.
    pub bind_addr: SocketAddr,

    /// PEM certificate chain, leaf first.
    pub cert_path: PathBuf,

    /// PEM private key, unencrypted.
    pub key_path: PathBuf,

    /// PEM `DH PARAMETERS` file.  Checked at startup when present; key
    /// exchange itself is always ephemeral and negotiated by rustls.
    pub dh_params_path: Option<PathBuf>,

    /// Product string sent in the upgrade response's `Server` header.
    pub server_name: String,

    /// Text the default dispatcher answers every frame with.
    pub greeting: String,

    /// A connection that exchanges no frame for this long is closed.
    pub idle_timeout: Duration,

    /// Upper bound on the TLS handshake plus WebSocket upgrade, and on the
    /// close handshake at the end of a session.
    pub handshake_timeout: Duration,

    /// Largest inbound message accepted, in bytes.  Bigger frames close the
    /// connection.
    pub max_message_size: usize,

    /// Whether the acceptor is armed as soon as the server starts.
    pub accept_on_start: bool,
}

impl Default for ServerConfig {
    /// | Field              | Default                |
    /// |--------------------|------------------------|
    /// | bind_addr          | `0.0.0.0:443`          |
    /// | cert_path          | `assets/pem/cert.pem`  |
    /// | key_path           | `assets/pem/key.pem`   |
    /// | dh_params_path     | `assets/pem/dh.pem`    |
    /// | server_name        | `Liar's Dice Server`   |
    /// | greeting           | `hello, world!`        |
    /// | idle_timeout       | 300 seconds            |
    /// | handshake_timeout  | 10 seconds             |
    /// | max_message_size   | 64 KiB                 |
    /// | accept_on_start    | `true`                 |
    fn default() -> Self {
        Self {
            bind_addr: DEFAULT_BIND_ADDR,
            cert_path: PathBuf::from("assets/pem/cert.pem"),
            key_path: PathBuf::from("assets/pem/key.pem"),
            dh_params_path: Some(PathBuf::from("assets/pem/dh.pem")),
            server_name: DEFAULT_SERVER_NAME.to_string(),
            greeting: DEFAULT_GREETING.to_string(),
            idle_timeout: Duration::from_secs(300),
            handshake_timeout: Duration::from_secs(10),
            max_message_size: 64 * 1024,
            accept_on_start: true,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
