//! Command sanitization and log truncation utilities

use crate::error::{ProvisionError, Result};

/// Maximum number of characters of stdout/stderr kept in trace records
pub const TRACE_OUTPUT_CHARS: usize = 512;

/// Sanitize a command before execution
///
/// Rejects empty commands and commands containing NUL bytes, and trims
/// surrounding whitespace.
///
/// # Examples
/// ```
/// use mongo_provision::ssh::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  ls -la  ").unwrap();
/// assert_eq!(cmd, "ls -la");
/// assert!(sanitize_command("   ").is_err());
/// ```
pub fn sanitize_command(command: &str) -> Result<String> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(ProvisionError::invalid_params("Command cannot be empty"));
    }

    if trimmed.contains('\0') {
        return Err(ProvisionError::invalid_params(
            "Command cannot contain NUL bytes",
        ));
    }

    Ok(trimmed.to_string())
}

/// Shorten captured output for log records, on a char boundary
pub fn truncate_for_log(output: &str, max_chars: usize) -> String {
    match output.char_indices().nth(max_chars) {
        None => output.to_string(),
        Some((idx, _)) => format!("{}… ({} bytes total)", &output[..idx], output.len()),
    }
}
