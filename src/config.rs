//! Configuration and CLI argument parsing for mongo-provision

use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ProvisionError, Result};
use crate::readiness::Poller;
use crate::ssh::{AuthMethods, Bastion, RemoteEndpoint};

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Interval between readiness probes in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// How long to wait for a started service to open its port
pub const DEFAULT_PORT_AVAILABLE_SECS: u64 = 5 * 60;

/// How long to wait for a started process to show up
pub const DEFAULT_SERVICE_STARTED_SECS: u64 = 30 * 60;

/// Ceiling for fetching an artifact on the remote host
pub const DEFAULT_DOWNLOAD_SECS: u64 = 30 * 60;

/// Ceiling for short phases (read, delete)
pub const DEFAULT_PHASE_SECS: u64 = 10 * 60;

/// Ceiling for long phases (create, update)
pub const LONG_PHASE_SECS: u64 = 60 * 60;

/// Which target to act on
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TargetKind {
    /// A standalone `mongod`
    Process,
    /// The Ops Manager console
    #[value(name = "opsmanager")]
    OpsManager,
    /// The automation agent
    Agent,
}

/// What to do with the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Action {
    /// Provision the target and report its state
    Create,
    /// Report the target's observed state (`null` when absent)
    Read,
    /// Forget the target; the remote host is left untouched
    Delete,
}

/// mongo-provision CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "mongo-provision")]
#[command(version)]
#[command(about = "Provision MongoDB processes, Ops Manager and automation agents over SSH")]
pub struct Args {
    /// Target to act on
    #[arg(value_enum)]
    pub target: TargetKind,

    /// Operation to run
    #[arg(value_enum)]
    pub action: Action,

    /// JSON file with the target parameters (required for create and read)
    #[arg(long, env = "MONGO_PROVISION_PARAMS")]
    pub params: Option<PathBuf>,

    /// Resource id printed by a previous create; replaces --host/--user/--port
    #[arg(long, env = "MONGO_PROVISION_ID")]
    pub id: Option<String>,

    /// SSH host to connect to
    #[arg(long, env = "MONGO_PROVISION_HOST")]
    pub host: Option<String>,

    /// SSH port
    #[arg(long, default_value = "22", env = "MONGO_PROVISION_PORT")]
    pub port: u16,

    /// SSH username
    #[arg(long, env = "MONGO_PROVISION_USER")]
    pub user: Option<String>,

    /// SSH password
    #[arg(long, env = "MONGO_PROVISION_PASSWORD")]
    pub password: Option<String>,

    /// Path to SSH private key file
    #[arg(long, env = "MONGO_PROVISION_KEY")]
    pub key: Option<PathBuf>,

    /// Expected host key, OpenSSH format
    #[arg(long, env = "MONGO_PROVISION_HOST_KEY")]
    pub host_key: Option<String>,

    /// Authenticate with identities from the running SSH agent
    #[arg(long, default_value = "false", env = "MONGO_PROVISION_AGENT")]
    pub agent: bool,

    /// Only use the agent identity with this SHA256 fingerprint
    #[arg(long, env = "MONGO_PROVISION_AGENT_IDENTITY")]
    pub agent_identity: Option<String>,

    /// Bastion host to jump through
    #[arg(long, env = "MONGO_PROVISION_BASTION_HOST")]
    pub bastion_host: Option<String>,

    /// Bastion SSH port
    #[arg(long, default_value = "22", env = "MONGO_PROVISION_BASTION_PORT")]
    pub bastion_port: u16,

    /// Bastion username (defaults to --user)
    #[arg(long, env = "MONGO_PROVISION_BASTION_USER")]
    pub bastion_user: Option<String>,

    /// Bastion password
    #[arg(long, env = "MONGO_PROVISION_BASTION_PASSWORD")]
    pub bastion_password: Option<String>,

    /// Path to the bastion's SSH private key file (defaults to --key)
    #[arg(long, env = "MONGO_PROVISION_BASTION_KEY")]
    pub bastion_key: Option<PathBuf>,

    /// Run every command as the SSH user, never through sudo
    #[arg(long, default_value = "false", env = "MONGO_PROVISION_NO_SUDO")]
    pub no_sudo: bool,

    /// Interval between readiness probes in milliseconds
    #[arg(long, default_value_t = DEFAULT_POLL_INTERVAL_MS, env = "MONGO_PROVISION_POLL_INTERVAL")]
    pub poll_interval: u64,

    /// Seconds to wait for a port to open
    #[arg(long, default_value_t = DEFAULT_PORT_AVAILABLE_SECS, env = "MONGO_PROVISION_PORT_TIMEOUT")]
    pub port_timeout: u64,

    /// Seconds to wait for a process to start
    #[arg(long, default_value_t = DEFAULT_SERVICE_STARTED_SECS, env = "MONGO_PROVISION_SERVICE_TIMEOUT")]
    pub service_timeout: u64,

    /// Seconds allowed for a remote artifact download
    #[arg(long, default_value_t = DEFAULT_DOWNLOAD_SECS, env = "MONGO_PROVISION_DOWNLOAD_TIMEOUT")]
    pub download_timeout: u64,

    /// Log filter, e.g. `info` or `mongo_provision=debug`
    #[arg(long, default_value = "info", env = "RUST_LOG")]
    pub log_level: String,
}

/// Timeouts applied by the workflows and the resource lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Interval between readiness probes
    pub poll_interval: Duration,
    /// Wait for a port to open
    pub port_available: Duration,
    /// Wait for a process to start
    pub service_started: Duration,
    /// Remote artifact download ceiling
    pub download: Duration,
    /// Ceiling for read and delete
    pub default_phase: Duration,
    /// Ceiling for create and update
    pub long_phase: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            port_available: Duration::from_secs(DEFAULT_PORT_AVAILABLE_SECS),
            service_started: Duration::from_secs(DEFAULT_SERVICE_STARTED_SECS),
            download: Duration::from_secs(DEFAULT_DOWNLOAD_SECS),
            default_phase: Duration::from_secs(DEFAULT_PHASE_SECS),
            long_phase: Duration::from_secs(LONG_PHASE_SECS),
        }
    }
}

impl Timeouts {
    /// Poller for "port is open" checks
    pub fn port_poller(&self) -> Poller {
        Poller::new(self.poll_interval, self.port_available)
    }

    /// Poller for "process is running" checks
    pub fn service_poller(&self) -> Poller {
        Poller::new(self.poll_interval, self.service_started)
    }
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Target to act on
    pub target: TargetKind,

    /// Operation to run
    pub action: Action,

    /// Parameters file
    pub params: Option<PathBuf>,

    /// Remote host and credentials
    pub endpoint: RemoteEndpoint,

    /// Workflow timeouts
    pub timeouts: Timeouts,

    /// Log filter directive
    pub log_level: String,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let private_key = args.key.as_deref().map(load_private_key).transpose()?;
        let mut endpoint = match args.id.as_deref() {
            Some(id) => RemoteEndpoint::from_id(id)
                .map_err(|e| ProvisionError::config(format!("Invalid --id: {}", e)))?,
            None => RemoteEndpoint::new(
                args.host.clone().unwrap_or_default(),
                args.user.clone().unwrap_or_default(),
            )
            .with_port(args.port),
        };
        endpoint.auth = AuthMethods {
            password: sanitize_password(args.password),
            private_key: private_key.clone(),
            host_key: args.host_key,
            agent: args.agent,
            agent_identity: args.agent_identity,
        };
        if args.no_sudo {
            endpoint.sudo_allowed = false;
        }

        if let Some(bastion_host) = args.bastion_host {
            let bastion_key = match args.bastion_key.as_deref() {
                Some(path) => Some(load_private_key(path)?),
                None => private_key,
            };
            let bastion_user = args
                .bastion_user
                .unwrap_or_else(|| endpoint.user.clone());
            let auth = AuthMethods {
                password: sanitize_password(args.bastion_password),
                private_key: bastion_key,
                host_key: None,
                agent: endpoint.auth.agent,
                agent_identity: endpoint.auth.agent_identity.clone(),
            };
            endpoint = endpoint.with_bastion(
                Bastion::new(bastion_host, bastion_user)
                    .with_port(args.bastion_port)
                    .with_auth(auth),
            );
        }

        Ok(Config {
            target: args.target,
            action: args.action,
            params: args.params,
            endpoint,
            timeouts: Timeouts {
                poll_interval: Duration::from_millis(args.poll_interval),
                port_available: Duration::from_secs(args.port_timeout),
                service_started: Duration::from_secs(args.service_timeout),
                download: Duration::from_secs(args.download_timeout),
                ..Timeouts::default()
            },
            log_level: args.log_level,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.id.is_none() {
        if args.host.as_deref().map_or(true, str::is_empty) {
            errors.push("Missing required --host (or --id)".to_string());
        }
        if args.user.as_deref().map_or(true, str::is_empty) {
            errors.push("Missing required --user (or --id)".to_string());
        }
    }

    if args.action != Action::Delete && args.params.is_none() {
        errors.push("Missing required --params".to_string());
    }

    if args.password.as_deref().map_or(true, str::is_empty) && args.key.is_none() && !args.agent {
        errors.push("Must provide --password, --key or --agent".to_string());
    }

    for path in [args.key.as_ref(), args.bastion_key.as_ref(), args.params.as_ref()]
        .into_iter()
        .flatten()
    {
        if !path.exists() {
            errors.push(format!("File not found: {}", path.display()));
        }
    }

    if args.poll_interval == 0 {
        errors.push("--poll-interval must be positive".to_string());
    }

    if !errors.is_empty() {
        return Err(ProvisionError::Config(format!(
            "Configuration error:\n{}",
            errors.join("\n")
        )));
    }

    Ok(())
}

/// Read an OpenSSH private key file and make sure it can be used unattended
pub fn load_private_key(path: &Path) -> Result<String> {
    let content = std::fs::read_to_string(path)?;
    validate_private_key(&content)
        .map_err(|e| ProvisionError::SshKey(format!("{}: {}", path.display(), e)))?;
    Ok(content)
}

fn validate_private_key(content: &str) -> std::result::Result<(), String> {
    let key = ssh_key::PrivateKey::from_openssh(content).map_err(|e| e.to_string())?;
    if key.is_encrypted() {
        return Err("encrypted private keys are not supported; use --agent".to_string());
    }
    Ok(())
}

/// Sanitize password: return None if empty
fn sanitize_password(password: Option<String>) -> Option<String> {
    password.filter(|p| !p.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["mongo-provision"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_timeouts_default() {
        let timeouts = Timeouts::default();
        assert_eq!(timeouts.poll_interval, Duration::from_secs(1));
        assert_eq!(timeouts.port_available, Duration::from_secs(300));
        assert_eq!(timeouts.service_started, Duration::from_secs(1800));
        assert_eq!(timeouts.long_phase, Duration::from_secs(3600));
        assert_eq!(timeouts.port_poller().timeout(), timeouts.port_available);
        assert_eq!(timeouts.service_poller().interval(), timeouts.poll_interval);
    }

    #[test]
    fn test_parse_target_and_action() {
        let args = parse(&["opsmanager", "delete", "--host", "om1", "--user", "ubuntu", "--agent"]);
        assert_eq!(args.target, TargetKind::OpsManager);
        assert_eq!(args.action, Action::Delete);
        assert_eq!(args.port, 22);
    }

    #[test]
    fn test_config_from_args() {
        let args = parse(&[
            "agent", "delete", "--host", "10.0.0.5", "--user", "ec2-user", "--password", "pw",
            "--port", "2222", "--no-sudo", "--port-timeout", "12",
        ]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.endpoint.host, "10.0.0.5");
        assert_eq!(config.endpoint.port, 2222);
        assert!(!config.endpoint.sudo_allowed);
        assert_eq!(config.endpoint.auth.password.as_deref(), Some("pw"));
        assert_eq!(config.timeouts.port_available, Duration::from_secs(12));
    }

    #[test]
    fn test_config_from_id() {
        let id = r#"{"user":"ubuntu","host":"db1","port":2200,"sudo_allowed":true}"#;
        let args = parse(&["process", "delete", "--id", id, "--agent"]);
        let config = Config::from_args(args).unwrap();
        assert_eq!(config.endpoint.host, "db1");
        assert_eq!(config.endpoint.port, 2200);
        assert!(config.endpoint.auth.agent);
    }

    #[test]
    fn test_bastion_inherits_user() {
        let args = parse(&[
            "process", "delete", "--host", "db1", "--user", "ubuntu", "--agent",
            "--bastion-host", "jump.example.com",
        ]);
        let config = Config::from_args(args).unwrap();
        let bastion = config.endpoint.bastion.unwrap();
        assert_eq!(bastion.host, "jump.example.com");
        assert_eq!(bastion.user, "ubuntu");
        assert!(bastion.auth.agent);
    }

    #[test]
    fn test_missing_host_and_auth() {
        let args = parse(&["process", "delete"]);
        let err = Config::from_args(args).unwrap_err().to_string();
        assert!(err.contains("--host"));
        assert!(err.contains("--user"));
        assert!(err.contains("--password, --key or --agent"));
    }

    #[test]
    fn test_create_requires_params() {
        let args = parse(&["process", "create", "--host", "h", "--user", "u", "--agent"]);
        let err = Config::from_args(args).unwrap_err().to_string();
        assert!(err.contains("--params"));
    }

    #[test]
    fn test_missing_key_file() {
        let args = parse(&[
            "process", "delete", "--host", "h", "--user", "u", "--key", "/nonexistent/id_ed25519",
        ]);
        let err = Config::from_args(args).unwrap_err().to_string();
        assert!(err.contains("File not found"));
    }

    #[test]
    fn test_rejects_garbage_private_key() {
        assert!(validate_private_key("not a key").is_err());
    }

    #[test]
    fn test_sanitize_password() {
        assert_eq!(
            sanitize_password(Some("secret".to_string())),
            Some("secret".to_string())
        );
        assert_eq!(sanitize_password(Some("".to_string())), None);
        assert_eq!(sanitize_password(None), None);
    }
}
