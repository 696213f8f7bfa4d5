//! Scripted transport double for unit tests
//!
//! Records every command and upload, keeps an in-memory file system that
//! understands `cat <path>` and `cp <from> <to>` (bare or wrapped in
//! `sudo -n sh -c '...'`), and lets a test queue outputs or inject failures
//! by substring.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::ssh::{CommandFailure, CommandResult, RemoteTransport};

#[derive(Default)]
struct State {
    files: HashMap<String, String>,
    log: Vec<String>,
    failures: Vec<(String, CommandFailure)>,
    responses: Vec<(String, VecDeque<String>)>,
}

#[derive(Default)]
pub(crate) struct ScriptedTransport {
    state: Mutex<State>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_file(self, path: &str, contents: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), contents.to_string());
        self
    }

    /// Fail every command (or `upload <path>` entry) containing `pattern`
    pub(crate) fn fail_on(self, pattern: &str, failure: CommandFailure) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .push((pattern.to_string(), failure));
        self
    }

    /// Answer commands containing `pattern` with `outputs` in turn; the last
    /// output repeats
    pub(crate) fn respond(self, pattern: &str, outputs: &[&str]) -> Self {
        self.state.lock().unwrap().responses.push((
            pattern.to_string(),
            outputs.iter().map(|o| o.to_string()).collect(),
        ));
        self
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    pub(crate) fn file(&self, path: &str) -> Option<String> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    /// Index of the first logged entry containing `pattern`
    pub(crate) fn position(&self, pattern: &str) -> Option<usize> {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .position(|c| c.contains(pattern))
    }

    pub(crate) fn count(&self, pattern: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .log
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }
}

impl State {
    fn injected_failure(&self, entry: &str) -> Option<CommandFailure> {
        self.failures
            .iter()
            .find(|(pattern, _)| entry.contains(pattern.as_str()))
            .map(|(_, failure)| failure.clone())
    }

    fn scripted_output(&mut self, command: &str) -> Option<String> {
        let (_, outputs) = self
            .responses
            .iter_mut()
            .find(|(pattern, _)| command.contains(pattern.as_str()))?;
        if outputs.len() > 1 {
            outputs.pop_front()
        } else {
            outputs.front().cloned()
        }
    }

    fn simulate(&mut self, command: &str) -> CommandResult {
        let inner = unwrap_sudo(command);
        let words: Vec<&str> = inner
            .as_deref()
            .unwrap_or(command)
            .split_whitespace()
            .collect();
        match words.as_slice() {
            ["cat", path] => match self.files.get(*path) {
                Some(contents) => CommandResult::ok(command, contents.clone()),
                None => missing(command, path),
            },
            ["cp", from, to] => match self.files.get(*from).cloned() {
                Some(contents) => {
                    self.files.insert(to.to_string(), contents);
                    CommandResult::ok(command, "")
                }
                None => missing(command, from),
            },
            _ => CommandResult::ok(command, ""),
        }
    }
}

/// The command inside `sudo -n sh -c <quoted>`, with shell quoting removed
fn unwrap_sudo(command: &str) -> Option<String> {
    let quoted = command.strip_prefix("sudo -n sh -c ")?;
    let mut inner = String::new();
    let mut in_quotes = false;
    let mut chars = quoted.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' => in_quotes = !in_quotes,
            '\\' if !in_quotes => inner.extend(chars.next()),
            _ => inner.push(c),
        }
    }
    Some(inner)
}

fn missing(command: &str, path: &str) -> CommandResult {
    CommandResult::failed(command, CommandFailure::ExitStatus(1))
        .with_stderr(format!("{}: No such file or directory", path))
}

#[async_trait]
impl RemoteTransport for ScriptedTransport {
    async fn run_command(&self, command: &str) -> CommandResult {
        let mut state = self.state.lock().unwrap();
        state.log.push(command.to_string());

        if let Some(failure) = state.injected_failure(command) {
            return CommandResult::failed(command, failure);
        }
        if let Some(output) = state.scripted_output(command) {
            return CommandResult::ok(command, output);
        }
        state.simulate(command)
    }

    async fn upload(&self, remote_path: &str, contents: &[u8]) -> CommandResult {
        let entry = format!("upload {}", remote_path);
        let mut state = self.state.lock().unwrap();
        state.log.push(entry.clone());

        if let Some(failure) = state.injected_failure(&entry) {
            return CommandResult::failed(entry, failure);
        }
        state.files.insert(
            remote_path.to_string(),
            String::from_utf8_lossy(contents).into_owned(),
        );
        CommandResult::ok(entry, "")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_sudo() {
        assert_eq!(
            unwrap_sudo("sudo -n sh -c 'cat /etc/mms.conf'").as_deref(),
            Some("cat /etc/mms.conf")
        );
        assert_eq!(
            unwrap_sudo(r"sudo -n sh -c 'echo '\''hi'\'''").as_deref(),
            Some("echo 'hi'")
        );
        assert_eq!(unwrap_sudo("cat /etc/mms.conf"), None);
    }
}
