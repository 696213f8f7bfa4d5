//! SSH session
//!
//! Owns one authenticated SSH connection to a [`RemoteEndpoint`], opened
//! lazily on first use (directly or through a bastion hop) and guarded so
//! that exactly one command or upload uses it at a time.

use std::sync::Arc;
use std::time::Duration;

use russh::client::{self, Handle};
use russh::keys::agent::client::AgentClient;
use russh::keys::{HashAlg, PrivateKeyWithHashAlg};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::endpoint::{AuthMethods, RemoteEndpoint};
use super::exclusive::{Exclusive, ExclusiveGuard};
use super::handler::SshHandler;
use crate::config::CONNECTION_TIMEOUT_SECS;
use crate::error::{ProvisionError, Result};

/// An open SSH connection, plus the bastion hop keeping it alive if any
pub struct SshConnection {
    pub(crate) handle: Handle<SshHandler>,
    bastion: Option<Handle<SshHandler>>,
}

impl SshConnection {
    async fn disconnect(self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("Disconnect from target failed: {}", e);
        }
        if let Some(bastion) = self.bastion {
            if let Err(e) = bastion
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await
            {
                debug!("Disconnect from bastion failed: {}", e);
            }
        }
    }
}

/// SSH session bound to one remote endpoint
///
/// Created per resource operation and closed when the workflow completes;
/// sessions are never pooled or shared between workflows.
pub struct SshSession {
    /// Connection parameters
    endpoint: RemoteEndpoint,

    /// Connection slot; the lock is held for the whole of every command
    slot: Exclusive<SshConnection>,
}

impl SshSession {
    /// Create a new session
    ///
    /// Does not establish the connection; it is opened by `connect()` or by
    /// the first command.
    pub fn new(endpoint: RemoteEndpoint) -> Self {
        Self {
            endpoint,
            slot: Exclusive::new(),
        }
    }

    /// The endpoint this session talks to
    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Establish the SSH connection if it is not open yet
    pub async fn connect(&self) -> Result<()> {
        self.exclusive().await.map(|_| ())
    }

    /// Check if the connection is open
    pub async fn is_connected(&self) -> bool {
        self.slot.is_open().await
    }

    /// Acquire exclusive use of the connection, opening it if necessary
    pub(crate) async fn exclusive(&self) -> Result<ExclusiveGuard<'_, SshConnection>> {
        self.slot.acquire(|| open_connection(&self.endpoint)).await
    }

    /// Close the SSH connection
    pub async fn close(&self) {
        if let Some(connection) = self.slot.take().await {
            connection.disconnect().await;
            info!("SSH connection to {} closed", self.endpoint.display_target());
        }
    }
}

impl std::fmt::Debug for SshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshSession")
            .field("host", &self.endpoint.host)
            .field("port", &self.endpoint.port)
            .field("user", &self.endpoint.user)
            .field("bastion", &self.endpoint.bastion.as_ref().map(|b| &b.host))
            .finish()
    }
}

/// Open and authenticate a connection, through the bastion when configured
async fn open_connection(endpoint: &RemoteEndpoint) -> Result<SshConnection> {
    info!("Connecting to SSH server {}...", endpoint.display_target());

    let connection = match &endpoint.bastion {
        None => {
            let handler = handler_for(&endpoint.auth)?;
            let mut handle = connect_direct(&endpoint.host, endpoint.port, handler).await?;
            authenticate(&mut handle, &endpoint.user, &endpoint.auth).await?;
            SshConnection {
                handle,
                bastion: None,
            }
        }
        Some(bastion) => {
            info!(
                "Using bastion {}@{}:{}",
                bastion.user, bastion.host, bastion.port
            );
            let mut jump = connect_direct(&bastion.host, bastion.port, handler_for(&bastion.auth)?)
                .await?;
            authenticate(&mut jump, &bastion.user, &bastion.auth).await?;

            let channel = jump
                .channel_open_direct_tcpip(
                    endpoint.host.clone(),
                    u32::from(endpoint.port),
                    "127.0.0.1",
                    0,
                )
                .await
                .map_err(|e| {
                    ProvisionError::connection(format!(
                        "Bastion could not reach {}:{}: {}",
                        endpoint.host, endpoint.port, e
                    ))
                })?;

            let connect_result = timeout(
                Duration::from_secs(CONNECTION_TIMEOUT_SECS),
                client::connect_stream(
                    Arc::new(client::Config::default()),
                    channel.into_stream(),
                    handler_for(&endpoint.auth)?,
                ),
            )
            .await;
            let mut handle = settle_connect(connect_result)?;
            authenticate(&mut handle, &endpoint.user, &endpoint.auth).await?;
            SshConnection {
                handle,
                bastion: Some(jump),
            }
        }
    };

    info!("Successfully connected to {}", endpoint.display_target());
    Ok(connection)
}

fn handler_for(auth: &AuthMethods) -> Result<SshHandler> {
    match &auth.host_key {
        Some(host_key) => SshHandler::pinned(host_key),
        None => Ok(SshHandler::new()),
    }
}

async fn connect_direct(host: &str, port: u16, handler: SshHandler) -> Result<Handle<SshHandler>> {
    let addr = format!("{}:{}", host, port);
    let connect_result = timeout(
        Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        client::connect(Arc::new(client::Config::default()), addr.as_str(), handler),
    )
    .await;
    settle_connect(connect_result)
}

fn settle_connect(
    connect_result: std::result::Result<
        std::result::Result<Handle<SshHandler>, anyhow::Error>,
        tokio::time::error::Elapsed,
    >,
) -> Result<Handle<SshHandler>> {
    match connect_result {
        Ok(Ok(handle)) => Ok(handle),
        Ok(Err(e)) => {
            error!("SSH connection failed: {}", e);
            Err(ProvisionError::connection(e.to_string()))
        }
        Err(_) => {
            error!("SSH connection timeout after {}s", CONNECTION_TIMEOUT_SECS);
            Err(ProvisionError::connection(format!(
                "Connection timeout after {}s",
                CONNECTION_TIMEOUT_SECS
            )))
        }
    }
}

/// Authenticate, trying private key, agent identities, then password
///
/// An agent that cannot be reached counts as a rejected method, so the
/// password is still tried.
async fn authenticate(
    handle: &mut Handle<SshHandler>,
    user: &str,
    auth: &AuthMethods,
) -> Result<()> {
    if auth.is_empty() {
        return Err(ProvisionError::auth(
            "No authentication method available (require private key, agent or password)",
        ));
    }

    if let Some(ref key_content) = auth.private_key {
        debug!("Attempting key authentication for user '{}'", user);

        let key = russh::keys::PrivateKey::from_openssh(key_content.as_bytes())
            .map_err(|e| ProvisionError::SshKey(format!("Failed to parse private key: {}", e)))?;
        let key_with_alg = PrivateKeyWithHashAlg::new(Arc::new(key), None);

        let auth_result = handle
            .authenticate_publickey(user, key_with_alg)
            .await
            .map_err(|e| ProvisionError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful");
            return Ok(());
        }
        warn!("Key authentication rejected for user '{}'", user);
    }

    if auth.agent && authenticate_with_agent(handle, user, auth.agent_identity.as_deref()).await? {
        info!("Agent authentication successful");
        return Ok(());
    }

    if let Some(ref password) = auth.password {
        debug!("Attempting password authentication for user '{}'", user);
        let auth_result = handle
            .authenticate_password(user, password)
            .await
            .map_err(|e| ProvisionError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Password authentication successful");
            return Ok(());
        }
        warn!("Password authentication rejected for user '{}'", user);
    }

    Err(ProvisionError::auth(format!(
        "All configured authentication methods were rejected for user '{}'",
        user
    )))
}

/// Offer agent identities in turn; `identity` narrows them to one SHA256
/// fingerprint
async fn authenticate_with_agent(
    handle: &mut Handle<SshHandler>,
    user: &str,
    identity: Option<&str>,
) -> Result<bool> {
    let Some(mut agent) = connect_agent().await else {
        return Ok(false);
    };

    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            warn!("Could not list agent identities: {}", e);
            return Ok(false);
        }
    };
    debug!("SSH agent offered {} identities", identities.len());

    for key in identities {
        let fingerprint = key.fingerprint(HashAlg::Sha256).to_string();
        if identity.is_some_and(|wanted| wanted != fingerprint) {
            continue;
        }

        debug!("Attempting agent authentication with {}", fingerprint);
        let auth_result = handle
            .authenticate_publickey_with(user, key, None, &mut agent)
            .await
            .map_err(|e| ProvisionError::auth(format!("Agent signing failed: {:?}", e)))?;

        if auth_result.success() {
            return Ok(true);
        }
    }

    warn!("No agent identity was accepted for user '{}'", user);
    Ok(false)
}

/// Agent on `SSH_AUTH_SOCK`; `None` when it cannot be reached
async fn connect_agent() -> Option<AgentClient<tokio::net::UnixStream>> {
    match AgentClient::connect_env().await {
        Ok(agent) => Some(agent),
        Err(e) => {
            warn!("Could not reach SSH agent, skipping agent authentication: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_session_creation() {
        let endpoint = RemoteEndpoint::new("localhost", "testuser")
            .with_port(22)
            .with_password("testpass");

        let session = SshSession::new(endpoint);

        assert!(!session.is_connected().await);
        assert_eq!(session.endpoint().user, "testuser");
    }

    #[tokio::test]
    async fn test_connect_without_auth_fails() {
        // nothing listens on port 1, so this fails at the transport level
        let session = SshSession::new(RemoteEndpoint::new("127.0.0.1", "nobody").with_port(1));
        let result = session.connect().await;
        assert!(matches!(result, Err(ProvisionError::Connection(_))));
        assert!(!session.is_connected().await);
    }

    #[tokio::test]
    async fn test_close_without_connection_is_noop() {
        let session = SshSession::new(RemoteEndpoint::new("localhost", "u"));
        session.close().await;
        assert!(!session.is_connected().await);
    }

    #[test]
    fn test_debug_hides_auth() {
        let session = SshSession::new(RemoteEndpoint::new("db1", "u").with_password("hunter2"));
        let rendered = format!("{:?}", session);
        assert!(rendered.contains("db1"));
        assert!(!rendered.contains("hunter2"));
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_skipped() {
        std::env::set_var("SSH_AUTH_SOCK", "/nonexistent/mongo-provision-agent.sock");
        assert!(connect_agent().await.is_none());
    }
}
