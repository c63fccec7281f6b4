//! Network-facing layer: terminal I/O with markup rendering, per-connection
//! sessions, and the listening server with broadcast and shutdown.
//!
//! The transport is anything implementing [`SessionStream`]; the stack runs
//! over plain TCP here and expects an encrypting layer (a TLS terminator or
//! SSH forwarder) in front of it in production.

pub mod server;
pub mod session;
pub mod terminal;

pub use server::Server;
pub use session::{SessionInfo, SessionState};
pub use terminal::{render, SessionStream, Terminal};
