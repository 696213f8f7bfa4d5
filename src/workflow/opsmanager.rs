//! Ops Manager console

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::artifact::ArtifactKind;
use super::keys::{OpsManagerSetting, GENERATED_COMMENT};
use super::{join_remote, parent_remote, Context, Target};
use crate::error::{ProvisionError, Result};
use crate::properties::ConfigEdits;
use crate::registration;
use crate::ssh::elevation::quote;

/// Where the console reads its encryption key from
pub const ENCRYPTION_KEY_PATH: &str = "/etc/mongodb-mms/gen.key";

/// Length of the encryption key, in characters
pub const ENCRYPTION_KEY_LEN: usize = 24;

/// Install root of the OS packages
pub const PACKAGE_BASE_DIR: &str = "/opt/mongodb";

/// Service account created by the OS packages
pub const SERVICE_ACCOUNT: &str = "mongodb-mms";

const INIT_SCRIPT: &str = "/etc/init.d/mongodb-mms";

fn default_port() -> u16 {
    8080
}

fn default_username() -> String {
    "admin".to_string()
}

/// Desired Ops Manager configuration
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsManagerParams {
    /// Package or archive URL / local path
    pub binary: String,
    pub workdir: String,
    /// Application database connection string
    pub mongo_uri: String,
    /// At least 24 characters; only the first 24 are used
    pub encryption_key: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Defaults to `http://<host>:<port>`
    #[serde(default)]
    pub central_url: Option<String>,
    /// Extra `conf-mms.properties` settings, applied last
    #[serde(default)]
    pub overrides: BTreeMap<String, String>,
    #[serde(default)]
    pub register_first_user: bool,
    #[serde(default = "default_username")]
    pub first_user_username: String,
    #[serde(default)]
    pub first_user_password: Option<String>,
    /// Port the API is reachable on from here, when it differs from `port`
    #[serde(default)]
    pub external_port: Option<u16>,
}

impl std::fmt::Debug for OpsManagerParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsManagerParams")
            .field("binary", &self.binary)
            .field("workdir", &self.workdir)
            .field("port", &self.port)
            .field("central_url", &self.central_url)
            .field("overrides", &self.overrides)
            .field("register_first_user", &self.register_first_user)
            .field("first_user_username", &self.first_user_username)
            .finish_non_exhaustive()
    }
}

impl OpsManagerParams {
    /// Archive installs keep their configuration under the working directory
    fn conf_dir(&self) -> Result<String> {
        let base = if ArtifactKind::detect(&self.binary)?.is_archive() {
            self.workdir.as_str()
        } else {
            PACKAGE_BASE_DIR
        };
        Ok(join_remote(base, "mms/conf"))
    }

    /// `conf-mms.properties`
    pub fn properties_path(&self) -> Result<String> {
        Ok(join_remote(&self.conf_dir()?, "conf-mms.properties"))
    }

    /// `mms.conf`
    pub fn sys_config_path(&self) -> Result<String> {
        Ok(join_remote(&self.conf_dir()?, "mms.conf"))
    }

    fn encryption_key(&self) -> Result<String> {
        if self.encryption_key.chars().count() < ENCRYPTION_KEY_LEN {
            return Err(ProvisionError::invalid_params(format!(
                "encryption_key must be at least {} characters",
                ENCRYPTION_KEY_LEN
            )));
        }
        Ok(self.encryption_key.chars().take(ENCRYPTION_KEY_LEN).collect())
    }

    fn central_url(&self, host: &str) -> String {
        self.central_url
            .clone()
            .unwrap_or_else(|| format!("http://{}:{}", host, self.port))
    }

    fn api_url(&self, host: &str) -> String {
        format!("http://{}:{}", host, self.external_port.unwrap_or(self.port))
    }
}

/// Observed Ops Manager configuration
///
/// `mms_group_id` and `mms_agent_api_key` come from first-run registration
/// and are only set by create. Nothing on the host records them, so read
/// and update always report them as `None`; callers keep the values from
/// the create record.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OpsManagerState {
    pub binary: String,
    pub workdir: String,
    pub port: Option<u16>,
    pub mongo_uri: Option<String>,
    pub central_url: Option<String>,
    /// Project id, set by create when the first project was registered
    pub mms_group_id: Option<String>,
    /// Agent API key, set by create when the first project was registered
    pub mms_agent_api_key: Option<String>,
}

impl std::fmt::Debug for OpsManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpsManagerState")
            .field("binary", &self.binary)
            .field("workdir", &self.workdir)
            .field("port", &self.port)
            .field("central_url", &self.central_url)
            .field("mms_group_id", &self.mms_group_id)
            .finish_non_exhaustive()
    }
}

/// Workflow for the Ops Manager console
#[derive(Debug, Clone, Copy, Default)]
pub struct OpsManagerTarget;

impl OpsManagerTarget {
    /// Write the key with mode 0600 before any content lands in it
    async fn install_encryption_key(
        &self,
        ctx: &Context<'_>,
        key: &str,
        owner: &str,
    ) -> Result<()> {
        let path = quote(ENCRYPTION_KEY_PATH);
        ctx.run_privileged(&format!(
            "mkdir -p {} && touch {path} && chmod 0600 {path}",
            quote(parent_remote(ENCRYPTION_KEY_PATH)),
            path = path
        ))
        .await?;
        ctx.upload(ENCRYPTION_KEY_PATH, key.as_bytes()).await?;
        ctx.run_privileged(&format!(
            "chown {owner}:{owner} {path} && chmod 0600 {path}",
            owner = quote(owner),
            path = path
        ))
        .await?;
        info!("Installed the encryption key at {}", ENCRYPTION_KEY_PATH);
        Ok(())
    }
}

#[async_trait]
impl Target for OpsManagerTarget {
    type Params = OpsManagerParams;
    type State = OpsManagerState;

    fn name(&self) -> &'static str {
        "opsmanager"
    }

    async fn provision(
        &self,
        ctx: &Context<'_>,
        params: &OpsManagerParams,
    ) -> Result<OpsManagerState> {
        let kind = ArtifactKind::detect(&params.binary)?;
        let key = params.encryption_key()?;
        let first_user = match (params.register_first_user, ctx.console) {
            (false, _) => None,
            (true, None) => {
                return Err(ProvisionError::Registration(
                    "register_first_user needs a console API client".to_string(),
                ))
            }
            (true, Some(console)) => {
                let password = params.first_user_password.as_deref().ok_or_else(|| {
                    ProvisionError::invalid_params(
                        "first_user_password is required to register the first user",
                    )
                })?;
                Some((console, password))
            }
        };

        ctx.ensure_directories(&[&params.workdir]).await?;
        let artifact = ctx.place_artifact(&params.binary, &params.workdir).await?;
        ctx.install(kind, &artifact, &params.workdir).await?;

        let properties = ConfigEdits::new()
            .set_commented(
                OpsManagerSetting::MongoUri.key(),
                params.mongo_uri.as_str(),
                &["", GENERATED_COMMENT, ""],
            )
            .set_commented(
                OpsManagerSetting::CentralUrl.key(),
                params.central_url(&ctx.endpoint.host),
                &["", GENERATED_COMMENT],
            )
            .with_overrides(&params.overrides);
        ctx.update_config(&params.properties_path()?, &properties)
            .await?;

        let sys_config = ConfigEdits::new().set_commented(
            OpsManagerSetting::Port.key(),
            params.port.to_string(),
            &[GENERATED_COMMENT, ""],
        );
        ctx.update_config(&params.sys_config_path()?, &sys_config)
            .await?;

        let owner = if kind.is_archive() {
            ctx.endpoint.user.as_str()
        } else {
            SERVICE_ACCOUNT
        };
        self.install_encryption_key(ctx, &key, owner).await?;

        if kind.is_archive() {
            let script = join_remote(&params.workdir, "bin/mongodb-mms");
            ctx.run(&format!("{} start", quote(&script))).await?;
        } else {
            ctx.run_privileged(&format!("{} start", INIT_SCRIPT)).await?;
        }
        info!("Started Ops Manager on port {}", params.port);

        ctx.wait_for_port(params.port).await?;
        info!("Ops Manager is listening on port {}", params.port);

        let mut state = self.observe(ctx, params).await?;
        if let Some((console, password)) = first_user {
            let project = registration::register(
                console,
                &params.api_url(&ctx.endpoint.host),
                &params.first_user_username,
                password,
            )
            .await?;
            state.mms_group_id = Some(project.id);
            state.mms_agent_api_key = Some(project.agent_api_key);
        }
        Ok(state)
    }

    async fn observe(
        &self,
        ctx: &Context<'_>,
        params: &OpsManagerParams,
    ) -> Result<OpsManagerState> {
        let properties = ctx.read_config(&params.properties_path()?).await?;
        let sys_config = ctx.read_config(&params.sys_config_path()?).await?;

        Ok(OpsManagerState {
            binary: params.binary.clone(),
            workdir: params.workdir.clone(),
            port: sys_config
                .get(OpsManagerSetting::Port.key())
                .and_then(|port| port.trim().parse().ok()),
            mongo_uri: properties
                .get(OpsManagerSetting::MongoUri.key())
                .map(str::to_string),
            central_url: properties
                .get(OpsManagerSetting::CentralUrl.key())
                .map(str::to_string),
            mms_group_id: None,
            mms_agent_api_key: None,
        })
    }
}
