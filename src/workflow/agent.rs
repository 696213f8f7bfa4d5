//! Ops Manager automation agent

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::artifact::ArtifactKind;
use super::keys::{AgentSetting, GENERATED_COMMENT};
use super::{join_remote, Context, Target};
use crate::error::{ProvisionError, Result};
use crate::properties::ConfigEdits;
use crate::readiness::{Observation, ReadinessCheck};
use crate::ssh::elevation::quote;

/// Executable shipped in the agent archive
pub const AGENT_EXECUTABLE: &str = "mongodb-mms-automation-agent";

fn default_agent_dir() -> String {
    "/var/lib/mongodb-mms-automation".to_string()
}

fn default_log_dir() -> String {
    "/var/log/mongodb-mms-automation".to_string()
}

/// Desired automation agent configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentParams {
    /// Agent archive URL or local path
    pub binary: String,
    /// Ops Manager URL the agent reports to
    #[serde(rename = "baseurl")]
    pub base_url: String,
    #[serde(default = "default_agent_dir")]
    pub agentdir: String,
    /// Log directory
    #[serde(default = "default_log_dir")]
    pub logpath: String,
    /// Project id
    pub group_id: String,
    /// Agent API key of the project
    pub api_key: String,
    /// Extra `local.config` settings, applied last
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
}

impl std::fmt::Debug for AgentParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentParams")
            .field("binary", &self.binary)
            .field("base_url", &self.base_url)
            .field("agentdir", &self.agentdir)
            .field("logpath", &self.logpath)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}

impl AgentParams {
    pub fn config_path(&self) -> String {
        join_remote(&self.agentdir, "local.config")
    }

    fn start_command(&self) -> String {
        format!(
            "cd {dir} && nohup ./{exe} --config={config} >> {log} 2>&1 < /dev/null &",
            dir = quote(&self.agentdir),
            exe = AGENT_EXECUTABLE,
            config = quote(&self.config_path()),
            log = quote(&join_remote(&self.logpath, "automation-agent-fatal.log")),
        )
    }
}

/// Observed agent configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentState {
    pub binary: String,
    pub agentdir: String,
    pub base_url: Option<String>,
    pub group_id: Option<String>,
    pub running: bool,
}

/// Workflow for the automation agent
#[derive(Debug, Clone, Copy, Default)]
pub struct AgentTarget;

#[async_trait]
impl Target for AgentTarget {
    type Params = AgentParams;
    type State = AgentState;

    fn name(&self) -> &'static str {
        "agent"
    }

    async fn provision(&self, ctx: &Context<'_>, params: &AgentParams) -> Result<AgentState> {
        if !ArtifactKind::detect(&params.binary)?.is_archive() {
            return Err(ProvisionError::invalid_params(
                "the automation agent can only be installed from a .tar.gz archive",
            ));
        }

        ctx.ensure_directories(&[&params.agentdir, &params.logpath])
            .await?;
        let archive = ctx.place_artifact(&params.binary, &params.agentdir).await?;
        ctx.install(ArtifactKind::Archive, &archive, &params.agentdir)
            .await?;

        let edits = ConfigEdits::new()
            .set_commented(
                AgentSetting::GroupId.key(),
                params.group_id.as_str(),
                &["", GENERATED_COMMENT, ""],
            )
            .set_commented(
                AgentSetting::ApiKey.key(),
                params.api_key.as_str(),
                &["", GENERATED_COMMENT],
            )
            .set_commented(
                AgentSetting::BaseUrl.key(),
                params.base_url.as_str(),
                &["", GENERATED_COMMENT],
            )
            .with_overrides(&params.overrides);
        ctx.update_config(&params.config_path(), &edits).await?;

        ctx.run(&params.start_command()).await?;
        info!("Started the automation agent with {}", params.config_path());

        ctx.wait_for_service(AGENT_EXECUTABLE).await?;
        info!("Automation agent is running");

        self.observe(ctx, params).await
    }

    async fn observe(&self, ctx: &Context<'_>, params: &AgentParams) -> Result<AgentState> {
        let config = ctx.read_config(&params.config_path()).await?;
        let running = ctx
            .probe(&ReadinessCheck::service_running(AGENT_EXECUTABLE)?)
            .await?
            == Observation::Target;

        Ok(AgentState {
            binary: params.binary.clone(),
            agentdir: params.agentdir.clone(),
            base_url: config.get(AgentSetting::BaseUrl.key()).map(str::to_string),
            group_id: config.get(AgentSetting::GroupId.key()).map(str::to_string),
            running,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Timeouts;
    use crate::ssh::{CommandFailure, RemoteEndpoint};
    use crate::testing::ScriptedTransport;
    use std::time::Duration;

    const LOCAL_CONFIG: &str = "/var/lib/mongodb-mms-automation/local.config";

    fn params() -> AgentParams {
        serde_json::from_str(
            r#"{
                "binary": "http://om1:8080/download/agent/automation/mongodb-mms-automation-agent-latest.linux_x86_64.tar.gz",
                "baseurl": "http://om1:8080",
                "group_id": "5f0000000000000000000001",
                "api_key": "agent-key",
                "overrides": { "logLevel": "DEBUG" }
            }"#,
        )
        .unwrap()
    }

    fn shipped_config() -> &'static str {
        "#\n# Automation agent configuration\n#\nmmsConfigBackup=/var/lib/mongodb-mms-automation/mms-cluster-config-backup.json\nmmsGroupId=\nmmsApiKey=\nmmsBaseUrl=\nlogFile=/var/log/mongodb-mms-automation/automation-agent.log\nlogLevel=INFO\n"
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            poll_interval: Duration::from_millis(5),
            service_started: Duration::from_millis(50),
            ..Timeouts::default()
        }
    }

    #[test]
    fn test_start_command_is_detached() {
        assert_eq!(
            params().start_command(),
            "cd /var/lib/mongodb-mms-automation && nohup ./mongodb-mms-automation-agent \
             --config=/var/lib/mongodb-mms-automation/local.config \
             >> /var/log/mongodb-mms-automation/automation-agent-fatal.log 2>&1 < /dev/null &"
        );
    }

    #[tokio::test]
    async fn test_provision_happy_path() {
        let transport = ScriptedTransport::new()
            .with_file(LOCAL_CONFIG, shipped_config())
            .respond("ps -eo", &["stopped", "started"]);
        let endpoint = RemoteEndpoint::new("node1", "root");
        let ctx = Context::new(&transport, &endpoint, timeouts());

        let state = AgentTarget.provision(&ctx, &params()).await.unwrap();

        assert!(state.running);
        assert_eq!(state.group_id.as_deref(), Some("5f0000000000000000000001"));
        assert_eq!(state.base_url.as_deref(), Some("http://om1:8080"));

        let written = transport.file(LOCAL_CONFIG).unwrap();
        assert!(written.starts_with("#\n# Automation agent configuration\n#\n"));
        assert!(written.contains("mmsApiKey=agent-key\n"));
        assert!(written.contains("logLevel=DEBUG\n"));
        assert!(written.contains("logFile=/var/log/mongodb-mms-automation/automation-agent.log\n"));
        assert_eq!(
            transport.file(&format!("{}.backup", LOCAL_CONFIG)).as_deref(),
            Some(shipped_config())
        );

        let order = ["mkdir -p", "curl", "tar -C", "cp ", "nohup", "ps -eo"];
        let positions: Vec<usize> = order
            .iter()
            .map(|step| transport.position(step).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{:?}", transport.commands());
    }

    #[tokio::test]
    async fn test_agent_never_starts() {
        let transport = ScriptedTransport::new()
            .with_file(LOCAL_CONFIG, shipped_config())
            .respond("ps -eo", &["stopped"]);
        let endpoint = RemoteEndpoint::new("node1", "root");
        let ctx = Context::new(&transport, &endpoint, timeouts());

        let err = AgentTarget.provision(&ctx, &params()).await.unwrap_err();
        assert!(matches!(err, ProvisionError::Timeout { ref last_state, .. } if last_state == "stopped"));
    }

    #[tokio::test]
    async fn test_unpack_failure_aborts_before_start() {
        let transport = ScriptedTransport::new()
            .with_file(LOCAL_CONFIG, shipped_config())
            .fail_on("tar -C", CommandFailure::ExitStatus(2));
        let endpoint = RemoteEndpoint::new("node1", "root");
        let ctx = Context::new(&transport, &endpoint, timeouts());

        assert!(AgentTarget.provision(&ctx, &params()).await.is_err());
        assert!(transport.position("nohup").is_none());
        assert!(transport.position("ps -eo").is_none());
        assert!(transport.position("cp ").is_none());
    }

    #[tokio::test]
    async fn test_observe_reports_stopped_agent() {
        let transport = ScriptedTransport::new()
            .with_file(LOCAL_CONFIG, "mmsGroupId=abc\nmmsBaseUrl=http://om\n")
            .respond("ps -eo", &["stopped"]);
        let endpoint = RemoteEndpoint::new("node1", "root");
        let ctx = Context::new(&transport, &endpoint, timeouts());

        let state = AgentTarget.observe(&ctx, &params()).await.unwrap();
        assert!(!state.running);
        assert_eq!(state.group_id.as_deref(), Some("abc"));
    }
}
