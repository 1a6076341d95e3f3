//! Native `wss://` client for the game server.
//!
//! Used by the integration tests and by anything that wants to talk to the
//! server without a browser: it connects over TLS (trusting a supplied root
//! certificate), performs the WebSocket upgrade, and exchanges text or binary
//! frames.  A session looks like:
//!
//! ```rust,no_run
//! # async fn demo() -> Result<(), liars_dice_server::infrastructure::ClientError> {
//! use std::path::Path;
//! use liars_dice_server::infrastructure::GameClient;
//!
//! let addr = "127.0.0.1:443".parse().unwrap();
//! let mut client = GameClient::connect(addr, "localhost", Path::new("ca.pem")).await?;
//! client.send_text("ping").await?;
//! let reply = client.recv().await?;
//! client.close().await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liars_dice_core::Payload;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use tokio_tungstenite::tungstenite::http::header::SERVER;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async, WebSocketStream};
use tracing::debug;

use crate::error::ConfigError;
use crate::infrastructure::tls::load_certs;

/// Errors raised by [`GameClient`].
#[derive(Debug, Error)]
pub enum ClientError {
    /// The root certificate could not be loaded or rustls rejected it.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The name is neither a DNS name nor an IP address.
    #[error("invalid server name '{0}'")]
    InvalidServerName(String),

    /// TCP connect or TLS handshake failed.
    #[error("connection failed: {0}")]
    Io(#[from] std::io::Error),

    /// Upgrade or framing error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] WsError),
}

/// An upgraded client connection.
pub struct GameClient {
    ws: WebSocketStream<TlsStream<TcpStream>>,
    server_header: Option<String>,
    close_frame: Option<CloseFrame<'static>>,
}

impl GameClient {
    /// Opens `wss://<server_name>:<port>/` against `addr`.
    ///
    /// `server_name` is used for SNI and certificate verification, so it must
    /// match a subject alternative name of the server certificate.
    ///
    /// # Errors
    ///
    /// Any failure while loading `ca_path`, connecting, in the TLS handshake,
    /// or in the upgrade.
    pub async fn connect(
        addr: SocketAddr,
        server_name: &str,
        ca_path: &Path,
    ) -> Result<Self, ClientError> {
        let mut roots = RootCertStore::empty();
        for cert in load_certs(ca_path)? {
            roots.add(cert).map_err(ConfigError::from)?;
        }

        let mut config = ClientConfig::builder_with_provider(Arc::new(
            rustls::crypto::ring::default_provider(),
        ))
        .with_protocol_versions(&[&rustls::version::TLS13, &rustls::version::TLS12])
        .map_err(ConfigError::from)?
        .with_root_certificates(roots)
        .with_no_client_auth();
        config.alpn_protocols = vec![b"http/1.1".to_vec()];

        let domain = ServerName::try_from(server_name.to_string())
            .map_err(|_| ClientError::InvalidServerName(server_name.to_string()))?;

        let tcp = TcpStream::connect(addr).await?;
        let tls = TlsConnector::from(Arc::new(config))
            .connect(domain, tcp)
            .await?;

        let url = format!("wss://{server_name}:{}/", addr.port());
        let (ws, response) = client_async(url, tls).await?;
        let server_header = response
            .headers()
            .get(SERVER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        debug!(%addr, server = ?server_header, "client connected");

        Ok(Self {
            ws,
            server_header,
            close_frame: None,
        })
    }

    /// The `Server` header of the upgrade response, if any.
    pub fn server_header(&self) -> Option<&str> {
        self.server_header.as_deref()
    }

    /// The close frame the server sent, once one has been received.
    pub fn close_frame(&self) -> Option<&CloseFrame<'static>> {
        self.close_frame.as_ref()
    }

    pub async fn send_text(&mut self, text: impl Into<String>) -> Result<(), ClientError> {
        self.ws.send(Message::Text(text.into())).await?;
        Ok(())
    }

    pub async fn send_binary(&mut self, bytes: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.ws.send(Message::Binary(bytes.into())).await?;
        Ok(())
    }

    pub async fn send_ping(&mut self, data: impl Into<Vec<u8>>) -> Result<(), ClientError> {
        self.ws.send(Message::Ping(data.into())).await?;
        Ok(())
    }

    /// Waits for the next text or binary frame.
    ///
    /// Control frames are skipped.  Returns `Ok(None)` once the server has
    /// closed the connection; the close frame is then available from
    /// [`GameClient::close_frame`].
    pub async fn recv(&mut self) -> Result<Option<Payload>, ClientError> {
        while let Some(message) = self.ws.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(Payload::Text(text))),
                Ok(Message::Binary(bytes)) => return Ok(Some(Payload::Binary(bytes))),
                Ok(Message::Close(frame)) => self.close_frame = frame,
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => break,
                // Transport torn down after the close handshake.
                Err(WsError::Io(_)) if self.close_frame.is_some() => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    /// Closes with `1000 Normal` and waits for the server's reply.
    pub async fn close(mut self) -> Result<(), ClientError> {
        let frame = CloseFrame {
            code: CloseCode::Normal,
            reason: "bye".into(),
        };
        match self.ws.close(Some(frame)).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {}
            Err(e) => return Err(e.into()),
        }
        // Anything after our close frame only ends the conversation.
        while let Some(Ok(_)) = self.ws.next().await {}
        if let Err(e) = self.ws.get_mut().shutdown().await {
            debug!(error = %e, "TLS shutdown failed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for GameClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameClient")
            .field("server_header", &self.server_header)
            .field("close_frame", &self.close_frame)
            .finish_non_exhaustive()
    }
}
