//! Remote endpoint description
//!
//! Connection parameters for one remote host, including authentication
//! material and an optional bastion hop. The public part of an endpoint
//! (user, host, port, sudo flag) doubles as the provisioned resource's id.

use serde::{Deserialize, Serialize};

use super::elevation::wrap_sudo_command;
use crate::error::Result;

/// Authentication material for an SSH hop
#[derive(Clone, Default)]
pub struct AuthMethods {
    /// Password for password authentication
    pub password: Option<String>,

    /// Private key content (not path!) for key authentication
    pub private_key: Option<String>,

    /// Expected host key in OpenSSH format; any key is accepted when unset
    pub host_key: Option<String>,

    /// Whether identities from the running SSH agent may be used
    pub agent: bool,

    /// Restrict agent authentication to the identity with this SHA256
    /// fingerprint (`SHA256:…`)
    pub agent_identity: Option<String>,
}

impl AuthMethods {
    /// Whether at least one authentication method is configured
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.private_key.is_none() && !self.agent
    }
}

impl std::fmt::Debug for AuthMethods {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthMethods")
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("host_key", &self.host_key)
            .field("agent", &self.agent)
            .field("agent_identity", &self.agent_identity)
            .finish()
    }
}

/// Intermediate host used to reach the target
#[derive(Debug, Clone)]
pub struct Bastion {
    /// Bastion hostname or IP address
    pub host: String,

    /// Bastion SSH port
    pub port: u16,

    /// Username on the bastion
    pub user: String,

    /// Authentication for the bastion hop
    pub auth: AuthMethods,
}

impl Bastion {
    /// Create a bastion hop on port 22
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: 22,
            user: user.into(),
            auth: AuthMethods::default(),
        }
    }

    /// Set the bastion SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the bastion authentication
    pub fn with_auth(mut self, auth: AuthMethods) -> Self {
        self.auth = auth;
        self
    }
}

/// One remote machine reachable over SSH
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Username for authentication
    pub user: String,

    /// Remote hostname or IP address
    pub host: String,

    /// SSH port (default: 22)
    pub port: u16,

    /// Whether privileged commands may be wrapped with `sudo`
    #[serde(default = "default_sudo_allowed")]
    pub sudo_allowed: bool,

    /// Authentication for the target hop
    #[serde(skip)]
    pub auth: AuthMethods,

    /// Optional jump host
    #[serde(skip)]
    pub bastion: Option<Bastion>,
}

fn default_sudo_allowed() -> bool {
    true
}

impl RemoteEndpoint {
    /// Create a new endpoint with minimal required fields
    pub fn new(host: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            host: host.into(),
            port: 22,
            sudo_allowed: true,
            auth: AuthMethods::default(),
            bastion: None,
        }
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set password authentication
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.auth.password = Some(password.into());
        self
    }

    /// Set private key authentication (key content, not path)
    pub fn with_private_key(mut self, key: impl Into<String>) -> Self {
        self.auth.private_key = Some(key.into());
        self
    }

    /// Pin the expected host key
    pub fn with_host_key(mut self, key: impl Into<String>) -> Self {
        self.auth.host_key = Some(key.into());
        self
    }

    /// Allow SSH agent authentication
    pub fn with_agent(mut self, identity: Option<String>) -> Self {
        self.auth.agent = true;
        self.auth.agent_identity = identity;
        self
    }

    /// Route the connection through a bastion host
    pub fn with_bastion(mut self, bastion: Bastion) -> Self {
        self.bastion = Some(bastion);
        self
    }

    /// Forbid wrapping commands with `sudo`
    pub fn without_sudo(mut self) -> Self {
        self.sudo_allowed = false;
        self
    }

    /// Serialize the public connection descriptor; used as resource id
    pub fn to_id(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Recover a connection descriptor from a resource id
    ///
    /// Authentication material is not part of the id and must be supplied
    /// again before connecting.
    pub fn from_id(id: &str) -> Result<Self> {
        Ok(serde_json::from_str(id)?)
    }

    /// Whether privileged commands get wrapped with `sudo`
    pub fn uses_sudo(&self) -> bool {
        self.sudo_allowed && self.user != "root"
    }

    /// Wrap a command so it runs with elevated privileges when allowed
    pub fn privileged(&self, command: &str) -> String {
        if self.uses_sudo() {
            wrap_sudo_command(command)
        } else {
            command.to_string()
        }
    }

    /// `user@host:port`, for log lines
    pub fn display_target(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}
