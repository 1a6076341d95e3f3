//! # liars-dice-core
//!
//! Shared foundation of the Liar's Dice server: the connection lifecycle, the
//! registry that gives every live connection a stable identity, and the
//! dispatcher contract that future game logic plugs into.
//!
//! This crate has zero dependencies on sockets, TLS, or an async runtime.  The
//! `liars-dice-server` crate drives these types from its tokio reactor.
//!
//! # Architecture overview
//!
//! - **`domain`** – Pure state.  [`ConnectionState`] is the per-connection
//!   state machine (`Accepted → TlsHandshaking → WsHandshaking → Idle →
//!   Reading → Dispatching → Writing → …`), and [`Registry`] is a generational
//!   slot arena: every inserted value receives a [`ConnectionId`] that stays
//!   valid until that value is removed and is never handed out again.
//!
//! - **`protocol`** – The seam between the transport and the game.  A
//!   [`Dispatcher`] receives each complete inbound frame and answers with a
//!   [`Dispatch`]: an ordered list of outbound frames, or a request to close.

pub mod domain;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `liars_dice_core::Registry` instead of `liars_dice_core::domain::registry::Registry`.
pub use domain::connection::{ConnectionId, ConnectionState, LifecycleEvent, TransitionError};
pub use domain::registry::{Registry, RegistryError};
pub use protocol::dispatch::{
    Dispatch, Dispatcher, GreetingDispatcher, InboundMessage, Outbound, Payload, DEFAULT_GREETING,
};
