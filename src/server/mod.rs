//! Portcullis server implementation
//!
//! Accepts TCP clients, runs the authentication handshake, and hands
//! authorized connections to a data plane.

mod connections;
pub mod dataplane;
pub mod deadline;
pub mod handshake;
pub mod listener;

pub use connections::{ClientConnection, ConnectionManager};
pub use dataplane::{DataPlane, IdleDataPlane, TcpConnection};
pub use deadline::AuthDeadline;
pub use handshake::{AuthorizedConnection, Handshake, HandshakeAttempt, HandshakeError, HandshakeStatus};
pub use listener::GateServer;
