//! Application layer for the server.
//!
//! Owns the set of live connections and decides where outbound frames go.  It
//! knows nothing about sockets or TLS; the infrastructure layer reports
//! lifecycle events to it and drains the inboxes it hands out.

pub mod hub;

pub use hub::{
    CloseReason, ConnectionHub, ConnectionInfo, HubError, HubEvent, SessionCommand, SessionInbox,
    OUTBOUND_CAPACITY,
};
