//! Privilege elevation and quoting utilities for remote commands
//!
//! Commands that touch system paths are wrapped with `sudo -n sh -c '…'` so
//! that compound commands (`a && b`) run entirely with elevated privileges,
//! not just their first word.

use std::borrow::Cow;

use shell_escape::unix::escape;

/// Wraps a command for execution with sudo privileges.
///
/// Uses `sudo -n` so a host that requires a sudo password fails fast instead
/// of hanging on a prompt.
///
/// # Examples
///
/// ```
/// use mongo_provision::ssh::elevation::wrap_sudo_command;
///
/// let cmd = wrap_sudo_command("apt update");
/// assert_eq!(cmd, "sudo -n sh -c 'apt update'");
/// ```
pub fn wrap_sudo_command(command: &str) -> String {
    format!("sudo -n sh -c {}", escape(Cow::from(command)))
}

/// Quotes a single shell word (paths, URLs) when it needs quoting.
///
/// # Examples
///
/// ```
/// use mongo_provision::ssh::elevation::quote;
///
/// assert_eq!(quote("/opt/mongodb"), "/opt/mongodb");
/// assert_eq!(quote("/opt/my dir"), "'/opt/my dir'");
/// ```
pub fn quote(word: &str) -> String {
    escape(Cow::from(word)).into_owned()
}

/// Joins several words, quoting each one.
pub fn quote_all<'a>(words: impl IntoIterator<Item = &'a str>) -> String {
    words.into_iter().map(quote).collect::<Vec<_>>().join(" ")
}
