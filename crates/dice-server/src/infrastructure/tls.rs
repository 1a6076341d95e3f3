//! Secure transport context: TLS credentials loaded once, shared by every
//! connection.
//!
//! [`TlsContext::initialize`] reads a PEM certificate chain, a password-less
//! PEM private key and, optionally, a PEM `DH PARAMETERS` file, and builds a
//! rustls server configuration restricted to TLS 1.2 and 1.3.  The result is
//! immutable and cheap to clone; wrapping a socket does not touch it.
//!
//! # Key exchange
//!
//! rustls negotiates a fresh ephemeral (EC)DHE key for every handshake and
//! has no legacy interoperability workarounds to switch off.  The DH
//! parameters file is therefore only validated: a missing or malformed file
//! is still a configuration error, so a broken deployment is caught at
//! startup rather than by the first browser that connects.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls_pemfile::Item;
use tokio::net::TcpStream;
use tokio_rustls::rustls::{self, pki_types::CertificateDer, pki_types::PrivateKeyDer};
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;
use tracing::info;

use crate::error::ConfigError;

/// ALPN protocol offered to browsers: WebSocket upgrades ride on HTTP/1.1.
const ALPN_HTTP_1_1: &[u8] = b"http/1.1";

/// PEM label of an OpenSSL DH parameters block.
const DH_PARAMS_LABEL: &str = "-----BEGIN DH PARAMETERS-----";

/// Immutable TLS server configuration.
#[derive(Clone)]
pub struct TlsContext {
    acceptor: TlsAcceptor,
    config: Arc<rustls::ServerConfig>,
}

impl std::fmt::Debug for TlsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsContext")
            .field("alpn_protocols", &self.config.alpn_protocols)
            .finish_non_exhaustive()
    }
}

impl TlsContext {
    /// Loads credentials and builds the server configuration.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if any file is missing or unreadable, holds no
    /// certificate / private key / DH parameters block, or if rustls rejects
    /// the certificate and key pair.
    pub fn initialize(
        cert_path: &Path,
        key_path: &Path,
        dh_params_path: Option<&Path>,
    ) -> Result<Self, ConfigError> {
        let certs = load_certs(cert_path)?;
        let key = load_private_key(key_path)?;
        if let Some(path) = dh_params_path {
            check_dh_params(path)?;
        }

        let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
        config.alpn_protocols = vec![ALPN_HTTP_1_1.to_vec()];

        info!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "TLS context initialised (TLS 1.2+)"
        );

        let config = Arc::new(config);
        Ok(Self {
            acceptor: TlsAcceptor::from(Arc::clone(&config)),
            config,
        })
    }

    /// Runs the TLS server handshake on an accepted socket.
    ///
    /// # Errors
    ///
    /// Returns the I/O error reported by rustls: malformed ClientHello,
    /// protocol version rejection, or a socket failure.
    pub async fn accept(&self, stream: TcpStream) -> std::io::Result<TlsStream<TcpStream>> {
        self.acceptor.accept(stream).await
    }

    /// The underlying rustls configuration.
    pub fn server_config(&self) -> &Arc<rustls::ServerConfig> {
        &self.config
    }
}

fn open(path: &Path) -> Result<BufReader<File>, ConfigError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError + '_ {
    move |source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Reads every certificate from a PEM file, leaf first.
///
/// # Errors
///
/// [`ConfigError::Io`] if unreadable, [`ConfigError::NoCertificates`] if the
/// file holds no `CERTIFICATE` block.
pub fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, ConfigError> {
    let mut reader = open(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(path))?;
    if certs.is_empty() {
        return Err(ConfigError::NoCertificates {
            path: path.to_path_buf(),
        });
    }
    Ok(certs)
}

/// Reads the first private key (PKCS#1, PKCS#8 or SEC1) from a PEM file.
///
/// # Errors
///
/// [`ConfigError::Io`] if unreadable, [`ConfigError::NoPrivateKey`] if the
/// file holds no key block.
pub fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, ConfigError> {
    let mut reader = open(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(io_error(path))?
        .ok_or_else(|| ConfigError::NoPrivateKey {
            path: path.to_path_buf(),
        })
}

/// Checks that `path` is readable and holds a `DH PARAMETERS` PEM block.
///
/// # Errors
///
/// [`ConfigError::Io`] if unreadable, [`ConfigError::InvalidDhParams`] if the
/// block is missing or the file also carries credentials rustls would parse
/// (a sign the wrong file was configured).
pub fn check_dh_params(path: &Path) -> Result<(), ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(io_error(path))?;
    let invalid = || ConfigError::InvalidDhParams {
        path: PathBuf::from(path),
    };

    if !contents.contains(DH_PARAMS_LABEL) {
        return Err(invalid());
    }
    let mut reader = contents.as_bytes();
    let has_credentials = rustls_pemfile::read_all(&mut reader).any(|item| {
        matches!(
            item,
            Ok(Item::X509Certificate(_) | Item::Pkcs1Key(_) | Item::Pkcs8Key(_) | Item::Sec1Key(_))
        )
    });
    if has_credentials {
        return Err(invalid());
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join(name)
    }

    /// Writes `contents` to a fresh file in the temp directory.
    fn scratch_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("dice_tls_{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_initialize_with_fixture_credentials_succeeds() {
        // Arrange
        let cert = fixture("cert.pem");
        let key = fixture("key.pem");
        let dh = fixture("dh.pem");

        // Act
        let ctx = TlsContext::initialize(&cert, &key, Some(&dh));

        // Assert
        let ctx = ctx.expect("fixture credentials must load");
        assert_eq!(ctx.server_config().alpn_protocols, vec![b"http/1.1".to_vec()]);
    }

    #[test]
    fn test_initialize_without_dh_params_succeeds() {
        let result = TlsContext::initialize(&fixture("cert.pem"), &fixture("key.pem"), None);
        assert!(result.is_ok());
    }

    #[test]
    fn test_missing_certificate_file_is_io_error() {
        let result = TlsContext::initialize(
            Path::new("/nonexistent/cert.pem"),
            &fixture("key.pem"),
            None,
        );
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_missing_key_file_is_io_error() {
        let result = TlsContext::initialize(
            &fixture("cert.pem"),
            Path::new("/nonexistent/key.pem"),
            None,
        );
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_key_file_passed_as_certificate_has_no_certificates() {
        let result = load_certs(&fixture("key.pem"));
        assert!(matches!(result, Err(ConfigError::NoCertificates { .. })));
    }

    #[test]
    fn test_certificate_file_passed_as_key_has_no_private_key() {
        let result = load_private_key(&fixture("cert.pem"));
        assert!(matches!(result, Err(ConfigError::NoPrivateKey { .. })));
    }

    #[test]
    fn test_garbage_dh_params_are_rejected() {
        let path = scratch_file("dh.pem", "not a pem file\n");
        let result = TlsContext::initialize(&fixture("cert.pem"), &fixture("key.pem"), Some(&path));
        assert!(matches!(result, Err(ConfigError::InvalidDhParams { .. })));
    }

    #[test]
    fn test_certificate_passed_as_dh_params_is_rejected() {
        let result = check_dh_params(&fixture("cert.pem"));
        assert!(matches!(result, Err(ConfigError::InvalidDhParams { .. })));
    }

    #[test]
    fn test_missing_dh_params_file_is_io_error() {
        let result = check_dh_params(Path::new("/nonexistent/dh.pem"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_fixture_chain_has_leaf_certificate() {
        let certs = load_certs(&fixture("cert.pem")).unwrap();
        assert_eq!(certs.len(), 1);
    }
}
