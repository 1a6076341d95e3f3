//! Shared helpers for the end-to-end tests: a server on an ephemeral loopback
//! port using the fixture certificates, and a client that trusts them.

#![allow(dead_code)]

use std::future::Future;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use liars_dice_core::{ConnectionId, ConnectionState, Dispatcher, GreetingDispatcher};
use liars_dice_server::application::{ConnectionHub, HubEvent};
use liars_dice_server::domain::ServerConfig;
use liars_dice_server::infrastructure::tls::load_certs;
use liars_dice_server::infrastructure::{Acceptor, AcceptorHandle, GameClient};
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_rustls::client::TlsStream;
use tokio_rustls::rustls::{self, pki_types::ServerName, ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Loopback, ephemeral port, fixture credentials, short handshake timeout.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        cert_path: fixture("cert.pem"),
        key_path: fixture("key.pem"),
        dh_params_path: Some(fixture("dh.pem")),
        idle_timeout: Duration::from_secs(30),
        handshake_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

/// A running acceptor plus the task driving it.
pub struct TestServer {
    pub handle: AcceptorHandle,
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl TestServer {
    pub fn start(config: ServerConfig, dispatcher: Arc<dyn Dispatcher>) -> Self {
        let acceptor = Acceptor::from_config(config, dispatcher).expect("server must start");
        let handle = acceptor.handle();
        let addr = acceptor.local_addr();
        let task = tokio::spawn(acceptor.run());
        Self { handle, addr, task }
    }

    pub fn start_default() -> Self {
        Self::start(test_config(), Arc::new(GreetingDispatcher::default()))
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        self.handle.hub()
    }

    pub async fn connect(&self) -> GameClient {
        tokio::time::timeout(WAIT, GameClient::connect(self.addr, "localhost", &fixture("ca.pem")))
            .await
            .expect("connect timed out")
            .expect("connect failed")
    }

    /// Shuts down and waits for every session to drain.
    pub async fn stop(self) {
        self.handle.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("server did not drain")
            .expect("acceptor task panicked");
    }
}

/// Completes only the TLS handshake with `addr`, trusting the fixture CA.
///
/// The stream is left before any WebSocket upgrade, for tests that need to
/// speak raw HTTP over TLS.
pub async fn tls_connect(addr: SocketAddr) -> TlsStream<TcpStream> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(&fixture("ca.pem")).unwrap() {
        roots.add(cert).unwrap();
    }
    let config = ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .unwrap()
    .with_root_certificates(roots)
    .with_no_client_auth();

    let tcp = TcpStream::connect(addr).await.unwrap();
    let name = ServerName::try_from("localhost").unwrap();
    within(TlsConnector::from(Arc::new(config)).connect(name, tcp))
        .await
        .expect("TLS handshake failed")
}

/// Polls `condition` until it holds, panicking after [`WAIT`].
pub async fn eventually(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Awaits `future`, panicking after [`WAIT`].
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT, future).await.expect("timed out")
}

/// Waits for the next `Removed` event and returns the final state.
pub async fn next_removal(
    events: &mut broadcast::Receiver<HubEvent>,
) -> (ConnectionId, ConnectionState) {
    within(async {
        loop {
            let event = events.recv().await.expect("event stream ended");
            if let HubEvent::Removed { id, state } = event {
                return (id, state);
            }
        }
    })
    .await
}
