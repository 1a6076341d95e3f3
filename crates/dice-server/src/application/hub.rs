//! ConnectionHub: the registry of live connections and the routes between them.
//!
//! Every accepted socket gets an entry here before its TLS handshake starts and
//! loses it when its session task ends.  An entry records the peer address, the
//! current [`ConnectionState`], and the sending halves of the session's
//! [`SessionInbox`].  Session tasks and the dispatcher only ever hold a
//! [`ConnectionId`] and resolve it through the hub when they need the entry.
//!
//! # Concurrency
//!
//! The server runs on a single-threaded tokio runtime, so every hub call
//! happens on the reactor thread and the lock below is never contended.  The
//! registry still sits behind a `std::sync::Mutex` so the hub is `Send + Sync`
//! and stays correct if the server is ever moved to a multi-threaded runtime.
//! The lock is never held across an `.await`.
//!
//! # Backpressure
//!
//! Routed frames go through a bounded queue of [`OUTBOUND_CAPACITY`] frames per
//! connection.  A recipient that falls that far behind gets
//! [`HubError::Backpressure`] instead of more memory.  Close requests travel on
//! a separate `watch` channel, so a full queue never holds one back.

use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use liars_dice_core::{
    ConnectionId, ConnectionState, LifecycleEvent, Outbound, Payload, Registry, RegistryError,
    TransitionError,
};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, trace};

/// Capacity of the hub event channel.  Slow subscribers lose the oldest events.
const EVENT_CAPACITY: usize = 256;

/// Frames that may wait in one connection's outbound queue.
pub const OUTBOUND_CAPACITY: usize = 64;

/// Errors returned by hub operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// The connection is absent or already closed; treat the id as stale.
    #[error("connection {0} not found")]
    NotFound(ConnectionId),
    /// The recipient's outbound queue is full; the frame was not queued.
    #[error("outbound queue of connection {0} is full")]
    Backpressure(ConnectionId),
    /// No new connection id can be issued.
    #[error("connection registry is full")]
    Full,
    /// The lifecycle event is not valid in the connection's current state.
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

impl From<RegistryError> for HubError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => Self::NotFound(id),
            RegistryError::Full => Self::Full,
        }
    }
}

/// Instruction delivered to a session task through its command queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// Write this frame to the peer.
    Send(Payload),
    /// Close the connection.
    Close(CloseReason),
}

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed on request (dispatcher or operator).
    Requested,
    /// The server is shutting down.
    Shutdown,
}

/// Observable change in the hub, for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubEvent {
    Registered {
        id: ConnectionId,
        peer: SocketAddr,
    },
    Transition {
        id: ConnectionId,
        event: LifecycleEvent,
        state: ConnectionState,
    },
    Removed {
        id: ConnectionId,
        state: ConnectionState,
    },
}

/// Read-only view of a registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub id: ConnectionId,
    pub peer: SocketAddr,
    pub state: ConnectionState,
    pub accepted_at: Instant,
}

#[derive(Debug)]
struct ConnectionRecord {
    peer: SocketAddr,
    state: ConnectionState,
    accepted_at: Instant,
    outbound: mpsc::Sender<Payload>,
    close: watch::Sender<Option<CloseReason>>,
}

/// Receiving side of one session's commands, owned by its session task.
#[derive(Debug)]
pub struct SessionInbox {
    outbound: mpsc::Receiver<Payload>,
    close: watch::Receiver<Option<CloseReason>>,
}

impl SessionInbox {
    /// Waits for the next command.  A pending close wins over queued frames.
    ///
    /// Returns `None` once the hub has dropped the connection's entry.
    /// Cancel-safe.
    pub async fn recv(&mut self) -> Option<SessionCommand> {
        tokio::select! {
            biased;
            Ok(()) = self.close.changed() => {
                let reason = *self.close.borrow_and_update();
                reason.map(SessionCommand::Close)
            }
            payload = self.outbound.recv() => payload.map(SessionCommand::Send),
        }
    }

    /// Non-blocking variant of [`SessionInbox::recv`].
    ///
    /// # Errors
    ///
    /// [`mpsc::error::TryRecvError::Empty`] when nothing is pending,
    /// [`mpsc::error::TryRecvError::Disconnected`] once the entry is gone.
    pub fn try_recv(&mut self) -> Result<SessionCommand, mpsc::error::TryRecvError> {
        if self.close.has_changed().unwrap_or(false) {
            if let Some(reason) = *self.close.borrow_and_update() {
                return Ok(SessionCommand::Close(reason));
            }
        }
        self.outbound.try_recv().map(SessionCommand::Send)
    }
}

/// Registry of live connections plus outbound routing.
#[derive(Debug)]
pub struct ConnectionHub {
    registry: Mutex<Registry<ConnectionRecord>>,
    events: broadcast::Sender<HubEvent>,
    live: watch::Sender<usize>,
}

impl Default for ConnectionHub {
    fn default() -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (live, _) = watch::channel(0);
        Self {
            registry: Mutex::new(Registry::new()),
            events,
            live,
        }
    }
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn registry(&self) -> MutexGuard<'_, Registry<ConnectionRecord>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: HubEvent) {
        // No subscribers is the normal case in production.
        let _ = self.events.send(event);
    }

    /// Adds a freshly accepted connection in the `Accepted` state.
    ///
    /// Returns its stable id and the [`SessionInbox`] the session task owns.
    ///
    /// # Errors
    ///
    /// [`HubError::Full`] if the registry cannot issue another id.
    pub fn register(&self, peer: SocketAddr) -> Result<(ConnectionId, SessionInbox), HubError> {
        let (outbound, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (close, close_rx) = watch::channel(None);
        let inbox = SessionInbox {
            outbound: outbound_rx,
            close: close_rx,
        };
        let (id, live) = {
            let mut registry = self.registry();
            let id = registry.insert(ConnectionRecord {
                peer,
                state: ConnectionState::Accepted,
                accepted_at: Instant::now(),
                outbound,
                close,
            })?;
            (id, registry.len())
        };
        self.live.send_replace(live);
        debug!(%id, %peer, live, "connection registered");
        self.emit(HubEvent::Registered { id, peer });
        Ok((id, inbox))
    }

    /// Applies a lifecycle event to the entry for `id`.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] for a stale id, [`HubError::Transition`] if the
    /// event is invalid in the current state.  The entry is unchanged on error.
    pub fn apply(
        &self,
        id: ConnectionId,
        event: LifecycleEvent,
    ) -> Result<ConnectionState, HubError> {
        let state = {
            let mut registry = self.registry();
            let record = registry.get_mut(id)?;
            let next = record.state.next(event)?;
            record.state = next;
            next
        };
        trace!(%id, ?event, %state, "transition");
        self.emit(HubEvent::Transition { id, event, state });
        Ok(state)
    }

    /// Current state of `id`.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] for a stale id.
    pub fn state(&self, id: ConnectionId) -> Result<ConnectionState, HubError> {
        Ok(self.registry().get(id)?.state)
    }

    /// Snapshot of the entry for `id`.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] for a stale id.
    pub fn info(&self, id: ConnectionId) -> Result<ConnectionInfo, HubError> {
        let registry = self.registry();
        let record = registry.get(id)?;
        Ok(ConnectionInfo {
            id,
            peer: record.peer,
            state: record.state,
            accepted_at: record.accepted_at,
        })
    }

    /// Removes `id` and returns the state it ended in.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] if it was already removed.
    pub fn remove(&self, id: ConnectionId) -> Result<ConnectionState, HubError> {
        let (state, live) = {
            let mut registry = self.registry();
            let record = registry.remove(id)?;
            (record.state, registry.len())
        };
        self.live.send_replace(live);
        debug!(%id, %state, live, "connection removed");
        self.emit(HubEvent::Removed { id, state });
        Ok(state)
    }

    /// Queues `outbound` on its recipient's connection without waiting.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] if the recipient is gone or already closed,
    /// [`HubError::Backpressure`] if its queue is full.
    pub fn route(&self, outbound: Outbound) -> Result<(), HubError> {
        let id = outbound.recipient;
        let registry = self.registry();
        let record = registry.get(id)?;
        if record.state.is_terminal() {
            return Err(HubError::NotFound(id));
        }
        record
            .outbound
            .try_send(outbound.payload)
            .map_err(|err| match err {
                mpsc::error::TrySendError::Full(_) => HubError::Backpressure(id),
                mpsc::error::TrySendError::Closed(_) => HubError::NotFound(id),
            })
    }

    /// Asks the session for `id` to close its connection.
    ///
    /// The first reason given sticks; later requests are accepted but change
    /// nothing.
    ///
    /// # Errors
    ///
    /// [`HubError::NotFound`] if the connection is gone or already closed.
    pub fn request_close(&self, id: ConnectionId, reason: CloseReason) -> Result<(), HubError> {
        let registry = self.registry();
        let record = registry.get(id)?;
        if record.state.is_terminal() || record.close.is_closed() {
            return Err(HubError::NotFound(id));
        }
        record.close.send_if_modified(|pending| {
            if pending.is_some() {
                return false;
            }
            *pending = Some(reason);
            true
        });
        Ok(())
    }

    /// Ids of upgraded connections that are idle or waiting on a read.
    ///
    /// The returned ids are detached from the registry: entries may come and
    /// go while the caller walks them, and stale ids resolve to `NotFound`.
    pub fn listening(&self) -> Vec<ConnectionId> {
        self.registry().snapshot(|record| record.state.is_listening())
    }

    /// Queues `payload` on every listening connection and returns how many
    /// accepted it.  Connections that vanish in the meantime, or whose queue
    /// is full, are skipped.
    pub fn broadcast(&self, payload: &Payload) -> usize {
        self.listening()
            .into_iter()
            .filter(|&id| {
                self.route(Outbound {
                    recipient: id,
                    payload: payload.clone(),
                })
                .is_ok()
            })
            .count()
    }

    /// Asks every live session to close and returns how many were asked.
    pub fn close_all(&self, reason: CloseReason) -> usize {
        self.ids()
            .into_iter()
            .filter(|&id| self.request_close(id, reason).is_ok())
            .count()
    }

    /// Ids of every registered connection, whatever its state.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.registry().ids()
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.registry().contains(id)
    }

    pub fn len(&self) -> usize {
        self.registry().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Subscribes to registrations, transitions and removals.
    pub fn subscribe(&self) -> broadcast::Receiver<HubEvent> {
        self.events.subscribe()
    }

    /// Resolves once no connection is registered.
    pub async fn wait_until_empty(&self) {
        let mut live = self.live.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = live.wait_for(|count| *count == 0).await;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
