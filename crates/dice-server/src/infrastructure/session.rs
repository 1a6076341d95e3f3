//! Per-connection session: the lifecycle state machine driven over a real
//! socket.
//!
//! Each accepted socket gets one tokio task running [`Session::run`].  The task
//! owns the transport exclusively, so reads and writes on a connection are
//! strictly sequential: at most one read and one write are ever pending.  The
//! task reports every step to the [`ConnectionHub`] as a [`LifecycleEvent`]
//! and removes its entry when it ends, whatever the reason.
//!
//! ```text
//! TCP ──► TLS handshake ──► WebSocket upgrade ──► ┌─ read frame ─► dispatch ─► write ─┐
//!                                                 └───────────────────────────────────┘
//! ```
//!
//! While a read is pending the task also listens on its [`SessionInbox`]
//! (frames routed from other connections, close requests) and on the idle
//! deadline.  Every frame read or written pushes the deadline back by
//! `idle_timeout`.  A single write may take at most `idle_timeout` as well: a
//! peer that stops reading is closed and its transport dropped without a close
//! handshake.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use liars_dice_core::{
    ConnectionId, ConnectionState, Dispatch, Dispatcher, InboundMessage, LifecycleEvent, Payload,
};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::{sleep_until, timeout, timeout_at, Instant};
use tokio_rustls::server::TlsStream;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{header::SERVER, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, WebSocketConfig};
use tokio_tungstenite::tungstenite::{error::ProtocolError, Error as WsError, Message};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::application::{CloseReason, ConnectionHub, HubError, SessionCommand, SessionInbox};
use crate::domain::ServerConfig;
use crate::error::{ConfigError, SessionError};
use crate::infrastructure::tls::TlsContext;

type ServerStream = WebSocketStream<TlsStream<TcpStream>>;

/// Everything a session needs, shared by all sessions.
#[derive(Clone)]
pub struct SessionContext {
    tls: TlsContext,
    hub: Arc<ConnectionHub>,
    dispatcher: Arc<dyn Dispatcher>,
    config: Arc<ServerConfig>,
    server_header: HeaderValue,
}

impl SessionContext {
    /// # Errors
    ///
    /// [`ConfigError::InvalidServerName`] if `config.server_name` cannot be
    /// sent as an HTTP header value.
    pub fn new(
        tls: TlsContext,
        hub: Arc<ConnectionHub>,
        dispatcher: Arc<dyn Dispatcher>,
        config: Arc<ServerConfig>,
    ) -> Result<Self, ConfigError> {
        let server_header = HeaderValue::from_str(&config.server_name)
            .map_err(|_| ConfigError::InvalidServerName(config.server_name.clone()))?;
        Ok(Self {
            tls,
            hub,
            dispatcher,
            config,
            server_header,
        })
    }

    pub fn hub(&self) -> &Arc<ConnectionHub> {
        &self.hub
    }

    fn websocket_config(&self) -> WebSocketConfig {
        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(self.config.max_message_size);
        ws_config.max_frame_size = Some(self.config.max_message_size);
        ws_config
    }
}

/// Registers `stream` with the hub and spawns its session task.
///
/// Returns the new connection's stable id.  The entry is visible in the hub
/// before this function returns.
///
/// # Errors
///
/// [`HubError::Full`] if the hub cannot take another connection; `stream` is
/// dropped.
pub fn spawn(
    ctx: SessionContext,
    stream: TcpStream,
    peer: SocketAddr,
) -> Result<ConnectionId, HubError> {
    let (id, inbox) = ctx.hub.register(peer)?;
    let session = Session {
        id,
        ctx,
        state: ConnectionState::Accepted,
    };
    let span = info_span!("connection", %id, %peer);
    tokio::spawn(session.run(stream, inbox).instrument(span));
    Ok(id)
}

/// Outcome of one wait while a read is pending.
enum Step {
    Command(Option<SessionCommand>),
    Frame(Option<Result<Message, WsError>>),
    IdleTimeout,
}

struct Session {
    id: ConnectionId,
    ctx: SessionContext,
    state: ConnectionState,
}

impl Session {
    async fn run(mut self, stream: TcpStream, mut inbox: SessionInbox) {
        let outcome = match self.handshake(stream).await {
            Ok(mut ws) => {
                let outcome = self.exchange(&mut ws, &mut inbox).await;
                // A stalled peer would stall close_notify too.
                if !matches!(outcome, Err(SessionError::WriteTimeout(_))) {
                    self.shutdown_transport(&mut ws).await;
                }
                outcome
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => debug!(state = %self.state, "session ended"),
            Err(e) => {
                warn!(error = %e, state = %self.state, "session failed");
                if !self.state.is_terminal() {
                    self.advance(LifecycleEvent::Error);
                }
            }
        }

        if let Err(e) = self.ctx.hub.remove(self.id) {
            debug!(error = %e, "entry already gone");
        }
    }

    /// Records `event` in the hub and mirrors the resulting state locally.
    fn advance(&mut self, event: LifecycleEvent) {
        match self.ctx.hub.apply(self.id, event) {
            Ok(state) => self.state = state,
            Err(e) => warn!(error = %e, ?event, "lifecycle event rejected"),
        }
    }

    async fn handshake(&mut self, stream: TcpStream) -> Result<ServerStream, SessionError> {
        let limit = self.ctx.config.handshake_timeout;
        let deadline = Instant::now() + limit;

        self.advance(LifecycleEvent::TlsStarted);
        let tls = timeout_at(deadline, self.ctx.tls.accept(stream))
            .await
            .map_err(|_| SessionError::HandshakeTimeout(limit))?
            .map_err(SessionError::Handshake)?;
        self.advance(LifecycleEvent::TlsEstablished);

        let server_header = self.ctx.server_header.clone();
        let decorate = move |_request: &Request, mut response: Response| {
            response.headers_mut().insert(SERVER, server_header);
            Ok::<Response, ErrorResponse>(response)
        };
        let ws = timeout_at(
            deadline,
            accept_hdr_async_with_config(tls, decorate, Some(self.ctx.websocket_config())),
        )
        .await
        .map_err(|_| SessionError::HandshakeTimeout(limit))?
        .map_err(SessionError::Upgrade)?;
        self.advance(LifecycleEvent::Upgraded);

        info!("connection established");
        Ok(ws)
    }

    async fn exchange(
        &mut self,
        ws: &mut ServerStream,
        inbox: &mut SessionInbox,
    ) -> Result<(), SessionError> {
        let idle = self.ctx.config.idle_timeout;
        let mut deadline = Instant::now() + idle;

        loop {
            if self.state == ConnectionState::Idle {
                self.advance(LifecycleEvent::ReadArmed);
            }

            let step = tokio::select! {
                biased;
                command = inbox.recv() => Step::Command(command),
                frame = ws.next() => Step::Frame(frame),
                () = sleep_until(deadline) => Step::IdleTimeout,
            };

            match step {
                Step::Command(Some(SessionCommand::Send(payload))) => {
                    self.advance(LifecycleEvent::OutboundQueued);
                    self.write(ws, payload).await?;
                    self.advance(LifecycleEvent::WriteCompleted);
                    deadline = Instant::now() + idle;
                }
                Step::Command(Some(SessionCommand::Close(reason))) => {
                    self.advance(LifecycleEvent::CloseRequested);
                    let (code, text) = match reason {
                        CloseReason::Requested => (CloseCode::Normal, "closed by server"),
                        CloseReason::Shutdown => (CloseCode::Away, "server shutting down"),
                    };
                    self.close(ws, code, text).await;
                    return Ok(());
                }
                Step::Command(None) => {
                    self.advance(LifecycleEvent::CloseRequested);
                    self.close(ws, CloseCode::Normal, "closed by server").await;
                    return Ok(());
                }
                Step::IdleTimeout => {
                    info!(?idle, "idle timeout");
                    self.advance(LifecycleEvent::IdleTimeout);
                    self.close(ws, CloseCode::Away, "idle timeout").await;
                    return Ok(());
                }
                Step::Frame(Some(Ok(message))) => {
                    let payload = match message {
                        Message::Text(text) => Payload::Text(text),
                        Message::Binary(bytes) => Payload::Binary(bytes),
                        Message::Ping(_) | Message::Pong(_) => {
                            // tungstenite queues the pong itself.
                            deadline = Instant::now() + idle;
                            continue;
                        }
                        Message::Close(frame) => {
                            debug!(?frame, "peer sent close frame");
                            self.advance(LifecycleEvent::PeerClosed);
                            // Sends the close reply tungstenite queued.
                            match timeout(self.ctx.config.handshake_timeout, ws.flush()).await {
                                Ok(Ok(())) => {}
                                Ok(Err(e)) => debug!(error = %e, "close reply not sent"),
                                Err(_) => debug!("close reply timed out"),
                            }
                            return Ok(());
                        }
                        Message::Frame(_) => continue,
                    };
                    deadline = Instant::now() + idle;
                    if !self.handle_message(ws, payload).await? {
                        return Ok(());
                    }
                }
                Step::Frame(None)
                | Step::Frame(Some(Err(
                    WsError::ConnectionClosed
                    | WsError::AlreadyClosed
                    | WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake),
                ))) => {
                    debug!("peer hung up");
                    self.advance(LifecycleEvent::PeerClosed);
                    return Ok(());
                }
                Step::Frame(Some(Err(e))) => return Err(SessionError::Io(e)),
            }
        }
    }

    /// Dispatches one complete inbound frame and writes the reply.
    ///
    /// Returns `false` once the connection has been closed.
    async fn handle_message(
        &mut self,
        ws: &mut ServerStream,
        payload: Payload,
    ) -> Result<bool, SessionError> {
        debug!(bytes = payload.len(), text = payload.is_text(), "frame received");
        self.advance(LifecycleEvent::MessageReceived);

        let dispatch = self.ctx.dispatcher.dispatch(InboundMessage {
            sender: self.id,
            payload,
        });

        let outbound = match dispatch {
            Dispatch::Close => {
                self.advance(LifecycleEvent::CloseRequested);
                self.close(ws, CloseCode::Normal, "closed by server").await;
                return Ok(false);
            }
            Dispatch::Reply(outbound) => outbound,
        };

        self.advance(LifecycleEvent::Dispatched);
        for frame in outbound {
            if frame.recipient == self.id {
                self.write(ws, frame.payload).await?;
            } else {
                let recipient = frame.recipient;
                match self.ctx.hub.route(frame) {
                    Ok(()) => {}
                    Err(e @ HubError::Backpressure(_)) => {
                        warn!(%recipient, error = %e, "dropping frame for slow recipient");
                    }
                    Err(e) => debug!(%recipient, error = %e, "dropping frame for stale recipient"),
                }
            }
        }
        self.advance(LifecycleEvent::WriteCompleted);
        Ok(true)
    }

    /// Writes one frame, giving up once `idle_timeout` passes without it
    /// being accepted by the transport.
    ///
    /// On a stall the connection moves to `Closed` and
    /// [`SessionError::WriteTimeout`] is returned.
    async fn write(&mut self, ws: &mut ServerStream, payload: Payload) -> Result<(), SessionError> {
        let limit = self.ctx.config.idle_timeout;
        let message = match payload {
            Payload::Text(text) => Message::Text(text),
            Payload::Binary(bytes) => Message::Binary(bytes),
        };
        match timeout(limit, ws.send(message)).await {
            Ok(result) => result.map_err(SessionError::Io),
            Err(_) => {
                self.advance(LifecycleEvent::IdleTimeout);
                Err(SessionError::WriteTimeout(limit))
            }
        }
    }

    /// Sends a close frame and waits, bounded, for the peer's reply.
    async fn close(&self, ws: &mut ServerStream, code: CloseCode, reason: &'static str) {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        let closing = async {
            ws.close(Some(frame)).await?;
            while let Some(message) = ws.next().await {
                message?;
            }
            Ok::<(), WsError>(())
        };

        match timeout(self.ctx.config.handshake_timeout, closing).await {
            Ok(Ok(())) => debug!("close handshake completed"),
            Ok(Err(e)) => debug!(error = %e, "close handshake interrupted"),
            Err(_) => debug!("peer did not answer the close frame"),
        }
    }

    /// Sends the TLS `close_notify` and shuts down the socket's write side.
    async fn shutdown_transport(&self, ws: &mut ServerStream) {
        let tls = ws.get_mut();
        match timeout(self.ctx.config.handshake_timeout, tls.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(error = %e, "TLS shutdown failed"),
            Err(_) => debug!("TLS shutdown timed out"),
        }
    }
}

