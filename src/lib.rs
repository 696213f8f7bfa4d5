//! mongo-provision - provision MongoDB on remote hosts over SSH
//!
//! This crate installs and configures a standalone `mongod`, the Ops Manager
//! console or the Ops Manager automation agent on a remote Linux host that is
//! only reachable over SSH, and reads their configuration back afterwards.
//!
//! # Features
//!
//! - One lazily opened SSH session per resource (direct or through a bastion),
//!   with key, agent and password authentication
//! - Commands and uploads serialized on the session, never interleaved
//! - Bounded readiness polling (port open, process running)
//! - Read/modify/write of remote `key=value` files that keeps comments and
//!   untouched settings, with a `.backup` copy
//! - Fail-fast provisioning workflows returning typed errors
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! mongo-provision process create --host=10.0.0.5 --user=ubuntu \
//!   --key=~/.ssh/id_ed25519 --params=mongod.json
//! ```
//!
//! # Example Usage (library)
//!
//! ```no_run
//! use mongo_provision::{ProcessParams, ProcessTarget, RemoteEndpoint, Resource, Timeouts};
//!
//! # async fn run(params: ProcessParams) -> mongo_provision::Result<()> {
//! let endpoint = RemoteEndpoint::new("10.0.0.5", "ubuntu").with_agent(None);
//! let resource = Resource::new(ProcessTarget, endpoint, Timeouts::default());
//! let record = resource.create(&params).await?;
//! println!("{}", record.id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod mongod_conf;
pub mod mutator;
pub mod properties;
pub mod readiness;
pub mod registration;
pub mod resource;
pub mod ssh;
pub mod workflow;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::{Action, Args, Config, TargetKind, Timeouts};
pub use error::{MutationStage, ProvisionError, Result};
pub use properties::{ConfigDocument, ConfigEdits};
pub use readiness::{Poller, ReadinessCheck};
pub use registration::ConsoleApi;
pub use resource::{Record, Resource};
pub use ssh::{CommandResult, RemoteEndpoint, RemoteTransport, SshSession};
pub use workflow::{
    AgentParams, AgentTarget, OpsManagerParams, OpsManagerTarget, ProcessParams, ProcessTarget,
    Target,
};
