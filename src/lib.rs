//! Portcullis - client authentication gate for a pub/sub broker
//!
//! Every TCP client is greeted with `INFO`, must present credentials in its
//! `CONNECT` frame before a deadline, and is either handed to the data plane
//! with its grant attached or sent `-ERR` and disconnected.

pub mod auth;
pub mod config;
pub mod protocol;
pub mod server;

pub use auth::{AuthConfig, AuthError, Authenticator, Credentials, HashPolicy, Permissions};
pub use config::GateConfig;
pub use server::{DataPlane, GateServer, IdleDataPlane};
