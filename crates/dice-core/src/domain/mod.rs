//! Domain entities for the Liar's Dice connection substrate.
//!
//! Nothing in this module performs I/O.  The server crate owns the sockets and
//! reports what happened to them as [`connection::LifecycleEvent`]s; the types
//! here decide what those events mean.

/// Connection identity and lifecycle state machine.
pub mod connection;

/// Generational slot arena addressed by [`connection::ConnectionId`].
pub mod registry;
