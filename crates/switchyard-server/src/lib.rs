//! # Switchyard relay
//!
//! Routes published messages between networked transports. Each WebSocket
//! session greets the relay with `hello`, then subscribes, advertises and
//! publishes with the frames defined in `switchyard-protocol`.
//!
//! The binary `switchyard` wraps [`handlers::run_server`]; the library is
//! exposed so the relay can be embedded and tested in-process.

pub mod config;
pub mod handlers;
pub mod metrics;
pub mod router;

pub use config::Config;
pub use handlers::{build_app, run_server, serve, AppState};
pub use router::{Router, RouterConfig, RouterError, RouterStats};
