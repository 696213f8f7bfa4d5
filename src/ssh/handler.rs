//! SSH client handler implementation
//!
//! Implements the `russh::client::Handler` trait to handle SSH connection events.

use russh::keys::PublicKey;
use tracing::{debug, warn};

use crate::error::{ProvisionError, Result};

/// SSH client handler for russh
///
/// Verifies the server's host key against a pinned key when one is
/// configured; otherwise every key is accepted.
#[derive(Debug, Clone, Default)]
pub struct SshHandler {
    expected_key: Option<PublicKey>,
}

impl SshHandler {
    /// Create a handler that accepts any host key
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a handler pinned to an OpenSSH-formatted host key
    ///
    /// Accepts either a bare `ssh-ed25519 AAAA…` line or a `known_hosts`
    /// style line with a leading host pattern.
    pub fn pinned(host_key: &str) -> Result<Self> {
        let key = parse_host_key(host_key)?;
        Ok(Self {
            expected_key: Some(key),
        })
    }

    fn accepts(&self, presented: &PublicKey) -> bool {
        match &self.expected_key {
            None => true,
            Some(expected) => expected.key_data() == presented.key_data(),
        }
    }
}

fn parse_host_key(host_key: &str) -> Result<PublicKey> {
    let trimmed = host_key.trim();
    if let Ok(key) = PublicKey::from_openssh(trimmed) {
        return Ok(key);
    }

    // known_hosts lines carry the host pattern first
    match trimmed.split_once(char::is_whitespace) {
        Some((_, rest)) => PublicKey::from_openssh(rest.trim())
            .map_err(|e| ProvisionError::SshKey(format!("Failed to parse host key: {}", e))),
        None => Err(ProvisionError::SshKey(
            "Failed to parse host key: not in OpenSSH format".to_string(),
        )),
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = self.accepts(server_public_key);
        if accepted {
            debug!("Server host key accepted ({})", server_public_key.algorithm());
        } else {
            warn!(
                "Server host key does not match the pinned key ({})",
                server_public_key.algorithm()
            );
        }
        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ED25519_KEY: &str =
        "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIAECAwQFBgcICQoLDA0ODxAREhMUFRYXGBkaGxwdHh8g";

    #[test]
    fn test_handler_creation() {
        let handler = SshHandler::new();
        assert!(format!("{:?}", handler).contains("SshHandler"));
    }

    #[test]
    fn test_pinned_accepts_matching_key() {
        let handler = SshHandler::pinned(ED25519_KEY).unwrap();
        let presented = PublicKey::from_openssh(ED25519_KEY).unwrap();
        assert!(handler.accepts(&presented));
    }

    #[test]
    fn test_pinned_accepts_known_hosts_line() {
        let line = format!("db1.example.com {}", ED25519_KEY);
        let handler = SshHandler::pinned(&line).unwrap();
        assert!(handler.expected_key.is_some());
    }

    #[test]
    fn test_pinned_rejects_garbage() {
        assert!(SshHandler::pinned("not-a-key").is_err());
    }
}
