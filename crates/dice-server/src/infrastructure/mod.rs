//! Infrastructure layer for the server.
//!
//! Everything that touches the operating system lives here: the listening
//! socket, TLS, the per-connection WebSocket sessions, the configuration file,
//! and the native client used to exercise the server end to end.
//!
//! | Module     | Concern                                              |
//! |------------|------------------------------------------------------|
//! | `tls`      | certificate / key / DH file loading, TLS handshakes  |
//! | `listener` | `SO_REUSEADDR` listening socket                      |
//! | `acceptor` | accept loop, start / stop / shutdown control         |
//! | `session`  | per-connection lifecycle over TLS + WebSocket        |
//! | `storage`  | TOML configuration file                              |
//! | `client`   | `wss://` client                                      |

pub mod acceptor;
pub mod client;
pub mod listener;
pub mod session;
pub mod storage;
pub mod tls;

pub use acceptor::{Acceptor, AcceptorError, AcceptorHandle};
pub use client::{ClientError, GameClient};
pub use session::SessionContext;
pub use storage::{load_config, FileConfig};
pub use tls::TlsContext;
