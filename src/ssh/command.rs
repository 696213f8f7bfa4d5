//! Command execution and uploads over SSH
//!
//! Provides [`CommandResult`], the value produced by every remote command or
//! upload, and the session methods that produce it.

use russh::ChannelMsg;
use tracing::{debug, info};

use super::connection::SshSession;
use super::elevation::quote;
use super::sanitize::{sanitize_command, truncate_for_log, TRACE_OUTPUT_CHARS};
use crate::error::{ProvisionError, Result};

/// Why a remote command did not succeed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandFailure {
    /// The session could not be opened
    Connection(String),
    /// The channel failed while the command was running
    Transport(String),
    /// The command exited with a non-zero status
    ExitStatus(u32),
    /// The command was killed by a signal
    Signal(String),
    /// The command was refused before it was sent
    Rejected(String),
}

impl std::fmt::Display for CommandFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandFailure::Connection(msg) => write!(f, "connection failed: {}", msg),
            CommandFailure::Transport(msg) => write!(f, "channel failed: {}", msg),
            CommandFailure::ExitStatus(code) => write!(f, "exit status {}", code),
            CommandFailure::Signal(name) => write!(f, "killed by signal {}", name),
            CommandFailure::Rejected(msg) => write!(f, "rejected: {}", msg),
        }
    }
}

/// Output of one remote command or upload
///
/// Immutable once produced. Stdout is only handed out for parsing through
/// [`CommandResult::output`], which refuses when the command failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    command: String,
    stdout: String,
    stderr: String,
    exit_code: Option<u32>,
    failure: Option<CommandFailure>,
}

impl CommandResult {
    /// A successful result with the given stdout
    pub fn ok(command: impl Into<String>, stdout: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            exit_code: Some(0),
            ..Self::default()
        }
    }

    /// A failed result
    pub fn failed(command: impl Into<String>, failure: CommandFailure) -> Self {
        let exit_code = match failure {
            CommandFailure::ExitStatus(code) => Some(code),
            _ => None,
        };
        Self {
            command: command.into(),
            exit_code,
            failure: Some(failure),
            ..Self::default()
        }
    }

    /// Attach captured stderr
    pub fn with_stderr(mut self, stderr: impl Into<String>) -> Self {
        self.stderr = stderr.into();
        self
    }

    /// Attach captured stdout
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// The command text (or upload description)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Trimmed stdout, or `None` when the command failed
    pub fn output(&self) -> Option<&str> {
        if self.failure.is_some() {
            None
        } else {
            Some(self.stdout.trim())
        }
    }

    /// Raw captured stdout, for diagnostics only
    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    /// Raw captured stderr
    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Exit code, when the remote side reported one
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Failure, if any
    pub fn failure(&self) -> Option<&CommandFailure> {
        self.failure.as_ref()
    }

    /// Whether the command failed
    pub fn is_error(&self) -> bool {
        self.failure.is_some()
    }

    /// Get combined output (stdout + stderr)
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }

    /// Convert into a `Result`, so callers can abort with `?`
    ///
    /// Connection failures surface as [`ProvisionError::Connection`]; every
    /// other failure as [`ProvisionError::Command`] carrying this result.
    pub fn into_result(self) -> Result<CommandResult> {
        match &self.failure {
            None => Ok(self),
            Some(CommandFailure::Connection(msg)) => Err(ProvisionError::connection(msg.clone())),
            Some(_) => Err(ProvisionError::Command(Box::new(self))),
        }
    }

    /// Emit the trace record for this result
    pub fn trace(&self) {
        debug!(
            command = %self.command,
            stdout = %truncate_for_log(self.stdout.trim(), TRACE_OUTPUT_CHARS),
            stderr = %truncate_for_log(self.stderr.trim(), TRACE_OUTPUT_CHARS),
            failure = ?self.failure,
            "Executed remote command"
        );
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, " command: '{}'", self.command)?;
        if let Some(failure) = &self.failure {
            write!(f, "\nerror: {}", failure)?;
        }
        if !self.stdout.trim().is_empty() {
            write!(f, "\nstdout: {}", self.stdout.trim())?;
        }
        if !self.stderr.trim().is_empty() {
            write!(f, "\nstderr: {}", self.stderr.trim())?;
        }
        Ok(())
    }
}

impl SshSession {
    /// Execute a command over SSH
    ///
    /// Holds the session guard from channel open until the channel closes.
    /// Failures are recorded in the returned result, never raised.
    pub async fn exec_command(&self, command: &str) -> CommandResult {
        let result = match sanitize_command(command) {
            Ok(sanitized) => self.exec_via_channel(&sanitized, None).await,
            Err(e) => CommandResult::failed(command, CommandFailure::Rejected(e.to_string())),
        };
        result.trace();
        result
    }

    /// Upload bytes to a remote path, overwriting it
    ///
    /// The bytes land in a sibling temporary file that replaces the target
    /// only once its size matches; a cut-off transfer leaves the target
    /// untouched.
    pub async fn upload_data(&self, remote_path: &str, contents: &[u8]) -> CommandResult {
        info!(
            "Uploading {} bytes to the remote host at: {}",
            contents.len(),
            remote_path
        );
        let command = self
            .endpoint()
            .privileged(&upload_command(remote_path, contents.len()));
        let result = self.exec_via_channel(&command, Some(contents)).await;
        result.trace();
        result
    }

    async fn exec_via_channel(&self, command: &str, stdin: Option<&[u8]>) -> CommandResult {
        let connection = match self.exclusive().await {
            Ok(connection) => connection,
            Err(e) => {
                return CommandResult::failed(command, CommandFailure::Connection(e.to_string()))
            }
        };

        let channel = match connection.handle.channel_open_session().await {
            Ok(channel) => channel,
            Err(e) => {
                return CommandResult::failed(
                    command,
                    CommandFailure::Transport(format!("Failed to open channel: {}", e)),
                )
            }
        };

        if let Err(e) = channel.exec(true, command).await {
            return CommandResult::failed(
                command,
                CommandFailure::Transport(format!("Failed to exec command: {}", e)),
            );
        }

        if let Some(bytes) = stdin {
            if let Err(e) = channel.data(bytes).await {
                return CommandResult::failed(
                    command,
                    CommandFailure::Transport(format!("Failed to send data: {}", e)),
                );
            }
            if let Err(e) = channel.eof().await {
                return CommandResult::failed(
                    command,
                    CommandFailure::Transport(format!("Failed to close input: {}", e)),
                );
            }
        }

        collect_channel_output(command, channel).await
    }
}

/// Collect output from a channel until it closes
async fn collect_channel_output(
    command: &str,
    mut channel: russh::Channel<russh::client::Msg>,
) -> CommandResult {
    let mut stdout = String::new();
    let mut stderr = String::new();
    let mut exit_code = None;
    let mut signal = None;

    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => {
                stdout.push_str(&String::from_utf8_lossy(&data));
            }
            ChannelMsg::ExtendedData { data, ext } => {
                // ext == 1 is stderr
                if ext == 1 {
                    stderr.push_str(&String::from_utf8_lossy(&data));
                } else {
                    stdout.push_str(&String::from_utf8_lossy(&data));
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                exit_code = Some(exit_status);
            }
            ChannelMsg::ExitSignal { signal_name, .. } => {
                signal = Some(format!("{:?}", signal_name));
            }
            ChannelMsg::Close => {
                break;
            }
            _ => {
                // exit status may still follow an Eof
            }
        }
    }

    debug!(
        "Command completed: exit_code={:?}, stdout_len={}, stderr_len={}",
        exit_code,
        stdout.len(),
        stderr.len()
    );

    let failure = exit_failure(signal, exit_code);

    CommandResult {
        command: command.to_string(),
        stdout,
        stderr,
        exit_code,
        failure,
    }
}

/// Shell command that writes `len` bytes of stdin to `remote_path`
///
/// Writes `<path>.upload.<pid>`, checks its size and renames it over the
/// target; the temporary file is removed on any failure. The temporary
/// file starts as a copy of an existing target so mode and owner carry over.
fn upload_command(remote_path: &str, len: usize) -> String {
    let target = quote(remote_path);
    format!(
        "tmp={target}.upload.$$ && {{ cp -p {target} \"$tmp\" 2>/dev/null || : > \"$tmp\"; }} \
         && head -c {len} > \"$tmp\" && [ $(wc -c < \"$tmp\") -eq {len} ] \
         && mv -f \"$tmp\" {target} || {{ rm -f \"$tmp\"; exit 1; }}",
        target = target,
        len = len
    )
}

/// Map how a channel ended to a failure, if any
///
/// A channel that closes without an exit status or signal was cut off.
fn exit_failure(signal: Option<String>, exit_code: Option<u32>) -> Option<CommandFailure> {
    match (signal, exit_code) {
        (Some(name), _) => Some(CommandFailure::Signal(name)),
        (None, Some(0)) => None,
        (None, Some(code)) => Some(CommandFailure::ExitStatus(code)),
        (None, None) => Some(CommandFailure::Transport(
            "channel closed without exit status".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success() {
        let result = CommandResult::ok("echo hello", "hello\n");
        assert!(!result.is_error());
        assert_eq!(result.output(), Some("hello"));
        assert_eq!(result.exit_code(), Some(0));
    }

    #[test]
    fn test_failed_result_hides_stdout() {
        let result = CommandResult::failed("cat /missing", CommandFailure::ExitStatus(1))
            .with_stdout("partial")
            .with_stderr("No such file or directory");
        assert!(result.is_error());
        assert_eq!(result.output(), None);
        assert_eq!(result.stdout(), "partial");
        assert_eq!(result.exit_code(), Some(1));
    }

    #[test]
    fn test_command_result_combined() {
        let result = CommandResult::ok("cmd", "stdout").with_stderr("stderr");
        assert_eq!(result.combined_output(), "stdout\nstderr");
    }

    #[test]
    fn test_command_result_combined_only_stderr() {
        let result =
            CommandResult::failed("cmd", CommandFailure::ExitStatus(2)).with_stderr("stderr");
        assert_eq!(result.combined_output(), "stderr");
    }

    #[test]
    fn test_into_result_maps_connection_failure() {
        let result = CommandResult::failed("ls", CommandFailure::Connection("refused".into()));
        assert!(matches!(
            result.into_result(),
            Err(ProvisionError::Connection(msg)) if msg == "refused"
        ));
    }

    #[test]
    fn test_into_result_carries_output() {
        let result = CommandResult::failed("tar -xzf x.tgz", CommandFailure::ExitStatus(2))
            .with_stderr("gzip: stdin: not in gzip format");
        let err = result.into_result().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("tar -xzf x.tgz"));
        assert!(message.contains("exit status 2"));
        assert!(message.contains("not in gzip format"));
    }

    #[tokio::test]
    async fn test_empty_command_rejected_without_connecting() {
        let session = SshSession::new(crate::ssh::RemoteEndpoint::new("127.0.0.1", "u").with_port(1));
        let result = session.exec_command("   ").await;
        assert!(matches!(result.failure(), Some(CommandFailure::Rejected(_))));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn test_unreachable_host_is_connection_failure() {
        let session = SshSession::new(
            crate::ssh::RemoteEndpoint::new("127.0.0.1", "u")
                .with_port(1)
                .with_password("p"),
        );
        let result = session.exec_command("true").await;
        assert!(matches!(result.failure(), Some(CommandFailure::Connection(_))));
    }

    #[test]
    fn test_upload_never_writes_target_directly() {
        let command = upload_command("/opt/mongodb/mms/conf/mms.conf", 12);
        assert_eq!(
            command,
            "tmp=/opt/mongodb/mms/conf/mms.conf.upload.$$ \
             && { cp -p /opt/mongodb/mms/conf/mms.conf \"$tmp\" 2>/dev/null || : > \"$tmp\"; } \
             && head -c 12 > \"$tmp\" && [ $(wc -c < \"$tmp\") -eq 12 ] && mv -f \"$tmp\" /opt/mongodb/mms/conf/mms.conf \
             || { rm -f \"$tmp\"; exit 1; }"
        );
        assert!(!command.contains("tee"));
        assert!(!command.contains("> /opt/mongodb/mms/conf/mms.conf"));
    }

    #[test]
    fn test_upload_command_quotes_target() {
        let command = upload_command("/srv/my dir/a.conf", 0);
        assert!(command.starts_with("tmp='/srv/my dir/a.conf'.upload.$$ && { cp -p '/srv/my dir/a.conf'"));
        assert!(command.contains("head -c 0 > \"$tmp\""));
        assert!(command.contains("mv -f \"$tmp\" '/srv/my dir/a.conf'"));
    }

    #[test]
    fn test_exit_failure() {
        assert_eq!(exit_failure(None, Some(0)), None);
        assert_eq!(exit_failure(None, Some(2)), Some(CommandFailure::ExitStatus(2)));
        assert_eq!(
            exit_failure(Some("KILL".into()), Some(0)),
            Some(CommandFailure::Signal("KILL".into()))
        );
    }

    #[test]
    fn test_channel_closed_without_status_is_failure() {
        let failure = exit_failure(None, None);
        assert!(matches!(failure, Some(CommandFailure::Transport(_))));

        let result = CommandResult {
            command: "cat /etc/mms.conf".to_string(),
            stdout: "a=1\nb=".to_string(),
            failure,
            ..CommandResult::default()
        };
        assert_eq!(result.output(), None);
        assert!(result.into_result().is_err());
    }
}
