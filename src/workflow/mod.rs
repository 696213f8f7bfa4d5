//! Provisioning workflows
//!
//! Each target (standalone `mongod`, Ops Manager, automation agent) is a
//! fail-fast sequence of remote steps built from the helpers on
//! [`Context`]: directories, artifact placement and install, configuration
//! mutation, detached start and readiness confirmation. The first failing
//! step aborts the rest; nothing already done on the remote host is undone.

pub mod agent;
pub mod artifact;
pub mod keys;
pub mod opsmanager;
pub mod process;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use crate::config::Timeouts;
use crate::error::Result;
use crate::mutator;
use crate::properties::{ConfigDocument, ConfigEdits};
use crate::readiness::{Observation, ReadinessCheck};
use crate::registration::ConsoleApi;
use crate::ssh::elevation::{quote, quote_all};
use crate::ssh::{CommandResult, RemoteEndpoint, RemoteTransport};

use artifact::{ArtifactKind, ArtifactSource};

pub use agent::{AgentParams, AgentState, AgentTarget};
pub use opsmanager::{OpsManagerParams, OpsManagerState, OpsManagerTarget};
pub use process::{ProcessParams, ProcessState, ProcessTarget};

/// An installable target
#[async_trait]
pub trait Target: Send + Sync {
    /// Desired configuration, as supplied by the caller
    type Params: DeserializeOwned + Send + Sync;

    /// Observed state reported after create and read
    type State: Serialize + Send;

    /// Name used in log lines and errors
    fn name(&self) -> &'static str;

    /// Run the full provisioning sequence
    async fn provision(&self, ctx: &Context<'_>, params: &Self::Params) -> Result<Self::State>;

    /// Load the target's configuration back from the host
    async fn observe(&self, ctx: &Context<'_>, params: &Self::Params) -> Result<Self::State>;
}

/// Everything a workflow step needs to talk to the remote host
#[derive(Clone, Copy)]
pub struct Context<'a> {
    pub transport: &'a dyn RemoteTransport,
    pub endpoint: &'a RemoteEndpoint,
    pub timeouts: Timeouts,
    pub console: Option<&'a dyn ConsoleApi>,
}

impl<'a> Context<'a> {
    pub fn new(
        transport: &'a dyn RemoteTransport,
        endpoint: &'a RemoteEndpoint,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            transport,
            endpoint,
            timeouts,
            console: None,
        }
    }

    /// Attach the console client used for first-run registration
    pub fn with_console(mut self, console: &'a dyn ConsoleApi) -> Self {
        self.console = Some(console);
        self
    }

    /// Run a command as the SSH user; any failure is an error
    pub async fn run(&self, command: &str) -> Result<CommandResult> {
        self.transport.run_command(command).await.into_result()
    }

    /// Run a command with sudo when the endpoint allows it
    pub async fn run_privileged(&self, command: &str) -> Result<CommandResult> {
        self.run(&self.endpoint.privileged(command)).await
    }

    /// Write `contents` to `path`
    pub async fn upload(&self, path: &str, contents: &[u8]) -> Result<()> {
        self.transport
            .upload(path, contents)
            .await
            .into_result()
            .map(|_| ())
    }

    /// Contents of a remote file
    pub async fn read_file(&self, path: &str) -> Result<String> {
        let result = self
            .run_privileged(&format!("cat {}", quote(path)))
            .await?;
        Ok(result.stdout().to_string())
    }

    /// Create directories owned by the SSH user with mode 0775
    ///
    /// One privileged command, always in the order create, chown, chmod.
    pub async fn ensure_directories(&self, dirs: &[&str]) -> Result<()> {
        let list = quote_all(dirs.iter().copied());
        let command = format!(
            "mkdir -p {list} && chown {user} {list} && chmod 0775 {list}",
            list = list,
            user = quote(&self.endpoint.user)
        );
        self.run_privileged(&command).await?;
        debug!("Prepared directories: {}", dirs.join(", "));
        Ok(())
    }

    /// Put the artifact named by `locator` into `dir`, returning its path
    ///
    /// URLs are fetched by the remote host, bounded by the download
    /// timeout; anything else is read locally and uploaded.
    pub async fn place_artifact(&self, locator: &str, dir: &str) -> Result<String> {
        let destination = join_remote(dir, artifact::file_name(locator)?);

        match ArtifactSource::parse(locator) {
            ArtifactSource::Url(url) => {
                info!("Fetching {} on the remote host", url);
                let command = format!(
                    "curl -fsSL --max-time {} -o {} {}",
                    self.timeouts.download.as_secs().max(1),
                    quote(&destination),
                    quote(&url)
                );
                self.run(&command).await?;
            }
            ArtifactSource::Local(path) => {
                let contents = tokio::fs::read(&path).await?;
                info!("Uploading {} ({} bytes)", path.display(), contents.len());
                self.upload(&destination, &contents).await?;
            }
        }

        Ok(destination)
    }

    /// Install a placed artifact; archives are unpacked into `dir`
    pub async fn install(&self, kind: ArtifactKind, artifact: &str, dir: &str) -> Result<()> {
        self.run(&kind.install_command(self.endpoint, artifact, dir))
            .await?;
        info!("Installed {} into {}", artifact, dir);
        Ok(())
    }

    /// Apply edits to a remote `key=value` file
    pub async fn update_config(&self, path: &str, edits: &ConfigEdits) -> Result<ConfigDocument> {
        mutator::update_remote_config(self.transport, self.endpoint, path, edits).await
    }

    /// Read a remote `key=value` file
    pub async fn read_config(&self, path: &str) -> Result<ConfigDocument> {
        mutator::read_remote_config(self.transport, self.endpoint, path).await
    }

    /// Wait until `port` is listening
    pub async fn wait_for_port(&self, port: u16) -> Result<()> {
        self.timeouts
            .port_poller()
            .wait_until_ready(self.transport, &ReadinessCheck::port_open(port))
            .await
    }

    /// Wait until a process named `name` is running
    pub async fn wait_for_service(&self, name: &str) -> Result<()> {
        self.timeouts
            .service_poller()
            .wait_until_ready(self.transport, &ReadinessCheck::service_running(name)?)
            .await
    }

    /// Run a check once
    pub async fn probe(&self, check: &ReadinessCheck) -> Result<Observation> {
        check.observe(self.transport.run_command(check.command()).await)
    }
}

/// Join a remote directory and a file name
pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        return name.to_string();
    }
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Absolute paths are kept, relative ones are placed under `base`
pub fn resolve_remote(base: &str, path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        join_remote(base, path)
    }
}

/// Directory part of a remote path
pub fn parent_remote(path: &str) -> &str {
    match path.trim_end_matches('/').rsplit_once('/') {
        Some(("", _)) => "/",
        Some((parent, _)) => parent,
        None => ".",
    }
}
