//! Liar's Dice server library crate.
//!
//! A TLS-secured WebSocket server: it accepts TCP connections, runs the TLS
//! handshake, upgrades each stream to WebSocket, and then serves every
//! connection in a read → dispatch → write loop until it closes.  What a frame
//! *means* is left to a [`liars_dice_core::Dispatcher`]; the default one
//! answers every frame with a fixed greeting.
//!
//! # Architecture
//!
//! ```text
//! [liars-dice-server]
//!   ├── domain/          ServerConfig
//!   ├── application/     ConnectionHub: registry of live connections, routing
//!   └── infrastructure/
//!         ├── tls        TlsContext
//!         ├── listener   SO_REUSEADDR listening socket
//!         ├── acceptor   accept loop, start / stop / shutdown
//!         ├── session    per-connection lifecycle task
//!         ├── storage    TOML configuration file
//!         └── client     wss:// client
//! ```
//!
//! # Layer rules
//!
//! - `domain` holds plain data, no I/O.
//! - `application` depends on `domain` and `liars-dice-core`, and uses only
//!   tokio channels, never sockets.
//! - `infrastructure` depends on everything else plus tokio, rustls and
//!   tungstenite.

pub mod error;

/// Domain layer: configuration types.
pub mod domain;

/// Application layer: connection registry and outbound routing.
pub mod application;

/// Infrastructure layer: TLS, sockets, WebSocket sessions, config file.
pub mod infrastructure;
