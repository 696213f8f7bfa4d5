//! SSH transport module
//!
//! This module provides the SSH session used for every remote operation:
//! lazy connection (direct or through a bastion), authentication, serialized
//! command execution and uploads.

pub mod command;
pub mod connection;
pub mod elevation;
pub mod endpoint;
pub mod exclusive;
pub mod handler;
pub mod sanitize;
pub mod transport;

// Re-exports
pub use command::{CommandFailure, CommandResult};
pub use connection::SshSession;
pub use elevation::{quote, wrap_sudo_command};
pub use endpoint::{AuthMethods, Bastion, RemoteEndpoint};
pub use exclusive::{Exclusive, ExclusiveGuard};
pub use handler::SshHandler;
pub use sanitize::sanitize_command;
pub use transport::RemoteTransport;
