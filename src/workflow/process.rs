//! Standalone `mongod` process

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::artifact::ArtifactKind;
use super::{join_remote, parent_remote, resolve_remote, Context, Target};
use crate::error::{ProvisionError, Result};
use crate::mongod_conf::MongodConfig;
use crate::ssh::elevation::quote;

/// Name of the generated configuration file inside the working directory
pub const CONFIG_FILE_NAME: &str = "mongod.conf";

fn default_port() -> u16 {
    27017
}

fn default_dbpath() -> String {
    "data".to_string()
}

fn default_logpath() -> String {
    "mongod.log".to_string()
}

/// Desired `mongod` configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessParams {
    /// Archive URL or local path
    pub binary: String,
    pub workdir: String,
    pub bindip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Data directory, relative to `workdir` unless absolute
    #[serde(default = "default_dbpath")]
    pub dbpath: String,
    #[serde(default, rename = "wt_cachesize_gb")]
    pub wt_cache_size_gb: Option<f64>,
    /// Log file, relative to `workdir` unless absolute
    #[serde(default = "default_logpath")]
    pub logpath: String,
}

impl ProcessParams {
    pub fn config_path(&self) -> String {
        join_remote(&self.workdir, CONFIG_FILE_NAME)
    }

    pub fn data_dir(&self) -> String {
        resolve_remote(&self.workdir, &self.dbpath)
    }

    pub fn log_file(&self) -> String {
        resolve_remote(&self.workdir, &self.logpath)
    }

    fn config(&self) -> MongodConfig {
        MongodConfig::forking(
            &self.data_dir(),
            self.port,
            &self.bindip,
            &self.log_file(),
            self.wt_cache_size_gb,
        )
    }
}

/// Observed `mongod` configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessState {
    pub binary: String,
    pub port: u16,
    pub bindip: String,
    pub dbpath: String,
    pub logpath: String,
}

/// Workflow for a standalone `mongod`
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessTarget;

#[async_trait]
impl Target for ProcessTarget {
    type Params = ProcessParams;
    type State = ProcessState;

    fn name(&self) -> &'static str {
        "mongod"
    }

    async fn provision(&self, ctx: &Context<'_>, params: &ProcessParams) -> Result<ProcessState> {
        if !ArtifactKind::detect(&params.binary)?.is_archive() {
            return Err(ProvisionError::invalid_params(
                "mongod can only be installed from a .tgz/.tar.gz archive",
            ));
        }

        let data_dir = params.data_dir();
        let log_file = params.log_file();
        ctx.ensure_directories(&[&params.workdir, &data_dir, parent_remote(&log_file)])
            .await?;

        let config_path = params.config_path();
        ctx.upload(&config_path, params.config().to_yaml()?.as_bytes())
            .await?;
        info!("Uploaded {}", config_path);

        let archive = ctx.place_artifact(&params.binary, &params.workdir).await?;
        ctx.install(ArtifactKind::Archive, &archive, &params.workdir)
            .await?;

        // forks once the server is initialized; print the log on failure
        let start = format!(
            "{} -f {} || {{ cat {}; exit 1; }}",
            quote(&join_remote(&params.workdir, "bin/mongod")),
            quote(&config_path),
            quote(&log_file)
        );
        ctx.run(&start).await?;
        info!("Started mongod from {}", params.workdir);

        ctx.wait_for_port(params.port).await?;
        info!("mongod is listening on port {}", params.port);

        self.observe(ctx, params).await
    }

    async fn observe(&self, ctx: &Context<'_>, params: &ProcessParams) -> Result<ProcessState> {
        let text = ctx.read_file(&params.config_path()).await?;
        let config = MongodConfig::from_yaml(&text)?;

        let net = config.net.unwrap_or_default();
        Ok(ProcessState {
            binary: params.binary.clone(),
            port: net.port,
            bindip: net.bind_ip,
            dbpath: config.storage.map(|s| s.db_path).unwrap_or_default(),
            logpath: config.system_log.map(|l| l.path).unwrap_or_default(),
        })
    }
}
