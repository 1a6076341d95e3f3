//! Connection acceptor: the single listening socket and its accept loop.
//!
//! # Accept loop
//!
//! ```text
//!   ┌──────────┐  accepted   ┌──────────────────┐
//!   │ accept() │ ──────────► │ register + spawn │ ──┐
//!   └──────────┘             └──────────────────┘   │
//!        ▲      accept error: log, back off         │
//!        └──────────────────────────────────────────┘
//! ```
//!
//! Exactly one accept is outstanding while the acceptor is armed.  Every
//! completion re-arms it, whether it produced a socket or an error, so one
//! bad client never stops the server from accepting others.
//!
//! [`AcceptorHandle::stop_accepting`] only clears a flag: an accept already in
//! flight still completes and its connection is served; the loop then parks
//! until [`AcceptorHandle::start_accepting`] re-arms it.  The runtime itself is
//! never stopped or restarted by either call.
//!
//! [`AcceptorHandle::shutdown`] ends the loop, asks every live connection to
//! close with `1001 Going Away`, and waits for the hub to drain.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use liars_dice_core::Dispatcher;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use crate::application::{CloseReason, ConnectionHub};
use crate::domain::ServerConfig;
use crate::error::ConfigError;
use crate::infrastructure::listener::bind_reusable;
use crate::infrastructure::session::{self, SessionContext};
use crate::infrastructure::tls::TlsContext;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// Errors that prevent the acceptor from starting.
#[derive(Debug, Error)]
pub enum AcceptorError {
    /// The listening socket could not be created, bound or queried.
    #[error("failed to bind {addr}: {source}")]
    BindFailed {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    /// The session context could not be built from the configuration.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Flags shared by the accept loop and its handles.
#[derive(Debug)]
struct AcceptControl {
    accepting: AtomicBool,
    rearm: Notify,
    shutdown: watch::Sender<bool>,
}

/// The bound listener plus everything needed to serve accepted sockets.
pub struct Acceptor {
    listener: TcpListener,
    local_addr: SocketAddr,
    ctx: SessionContext,
    control: Arc<AcceptControl>,
}

impl Acceptor {
    /// Binds `config.bind_addr` and prepares the shared session context.
    ///
    /// No connection is accepted until [`Acceptor::run`] is awaited.
    ///
    /// # Errors
    ///
    /// [`AcceptorError::BindFailed`] if the endpoint cannot be bound (port in
    /// use, or a privileged port without rights), [`AcceptorError::Config`] if
    /// the server name is not a valid header value.
    pub fn bind(
        config: Arc<ServerConfig>,
        tls: TlsContext,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, AcceptorError> {
        let addr = config.bind_addr;
        let bind_failed = |source| AcceptorError::BindFailed { addr, source };

        let listener = bind_reusable(addr).map_err(bind_failed)?;
        let local_addr = listener.local_addr().map_err(bind_failed)?;

        let (shutdown, _) = watch::channel(false);
        let control = Arc::new(AcceptControl {
            accepting: AtomicBool::new(config.accept_on_start),
            rearm: Notify::new(),
            shutdown,
        });

        let hub = Arc::new(ConnectionHub::new());
        let ctx = SessionContext::new(tls, hub, dispatcher, config)?;

        info!(%local_addr, "listening");
        Ok(Self {
            listener,
            local_addr,
            ctx,
            control,
        })
    }

    /// Loads the TLS credentials named in `config`, then binds.
    ///
    /// # Errors
    ///
    /// [`AcceptorError::Config`] for unusable credentials, plus everything
    /// [`Acceptor::bind`] reports.
    pub fn from_config(
        config: ServerConfig,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Result<Self, AcceptorError> {
        let tls = TlsContext::initialize(
            &config.cert_path,
            &config.key_path,
            config.dh_params_path.as_deref(),
        )?;
        Self::bind(Arc::new(config), tls, dispatcher)
    }

    /// A cloneable handle for controlling the loop from other tasks.
    pub fn handle(&self) -> AcceptorHandle {
        AcceptorHandle {
            control: Arc::clone(&self.control),
            hub: Arc::clone(self.ctx.hub()),
            local_addr: self.local_addr,
        }
    }

    /// The address actually bound; differs from the configured one when port
    /// `0` was requested.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        self.ctx.hub()
    }

    /// Runs the accept loop until [`AcceptorHandle::shutdown`] is called, then
    /// drains every live connection.
    pub async fn run(self) {
        let mut shutdown = self.control.shutdown.subscribe();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            if !self.control.accepting.load(Ordering::Acquire) {
                debug!("acceptor disarmed");
                tokio::select! {
                    () = self.control.rearm.notified() => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }

            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => match session::spawn(self.ctx.clone(), stream, peer) {
                        Ok(id) => debug!(%id, %peer, "accepted"),
                        Err(e) => warn!(%peer, error = %e, "connection refused"),
                    },
                    Err(e) => {
                        warn!(error = %e, "accept failed; re-arming");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                _ = shutdown.changed() => {}
            }
        }

        let hub = self.ctx.hub();
        let closing = hub.close_all(CloseReason::Shutdown);
        info!(closing, "acceptor stopped; draining connections");
        hub.wait_until_empty().await;
        info!("all connections closed");
    }
}

/// Control surface for a running [`Acceptor`].
#[derive(Debug, Clone)]
pub struct AcceptorHandle {
    control: Arc<AcceptControl>,
    hub: Arc<ConnectionHub>,
    local_addr: SocketAddr,
}

impl AcceptorHandle {
    /// Arms the acceptor.  Idempotent.
    pub fn start_accepting(&self) {
        if !self.control.accepting.swap(true, Ordering::AcqRel) {
            info!("accepting connections");
        }
        self.control.rearm.notify_one();
    }

    /// Disarms the acceptor once the pending accept completes.
    pub fn stop_accepting(&self) {
        if self.control.accepting.swap(false, Ordering::AcqRel) {
            info!("no longer accepting connections");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.control.accepting.load(Ordering::Acquire)
    }

    /// Stops the loop and closes every live connection.
    pub fn shutdown(&self) {
        self.control.shutdown.send_replace(true);
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
