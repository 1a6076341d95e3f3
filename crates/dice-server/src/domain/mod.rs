//! Domain layer for the server.
//!
//! Plain configuration types.  No sockets, no files, no environment reads:
//! the infrastructure layer populates these from the TOML file and the CLI.

pub mod config;

pub use config::{ServerConfig, DEFAULT_BIND_ADDR, DEFAULT_SERVER_NAME};
