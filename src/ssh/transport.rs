//! Transport abstraction used by the poller, the config mutator and the
//! workflows

use async_trait::async_trait;

use super::command::CommandResult;
use super::connection::SshSession;

/// Serialized command and file-transfer access to one remote host
///
/// Implementations never raise: every failure is recorded in the returned
/// [`CommandResult`] and the caller decides whether it is fatal.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Run a shell command and capture its output
    async fn run_command(&self, command: &str) -> CommandResult;

    /// Write `contents` to `remote_path`, overwriting it
    async fn upload(&self, remote_path: &str, contents: &[u8]) -> CommandResult;
}

#[async_trait]
impl RemoteTransport for SshSession {
    async fn run_command(&self, command: &str) -> CommandResult {
        self.exec_command(command).await
    }

    async fn upload(&self, remote_path: &str, contents: &[u8]) -> CommandResult {
        self.upload_data(remote_path, contents).await
    }
}
