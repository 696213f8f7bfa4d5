//! mongo-provision - Entry point
//!
//! Parses CLI arguments, validates configuration, runs one resource
//! operation against the remote host and prints the resulting record as
//! JSON on stdout.

use std::path::Path;

use clap::Parser;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use mongo_provision::config::{Action, Args, Config, TargetKind};
use mongo_provision::error::{ProvisionError, Result};
use mongo_provision::{AgentTarget, OpsManagerTarget, ProcessTarget, Resource, Target};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Logs go to stderr; stdout carries the JSON record
    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    // Validate and create config
    let config = Config::from_args(args)?;

    info!("mongo-provision v{} starting...", env!("CARGO_PKG_VERSION"));
    info!(
        "{:?} {:?} on {}",
        config.action,
        config.target,
        config.endpoint.display_target()
    );

    let operation = async {
        match config.target {
            TargetKind::Process => run(ProcessTarget, &config).await,
            TargetKind::OpsManager => run(OpsManagerTarget, &config).await,
            TargetKind::Agent => run(AgentTarget, &config).await,
        }
    };

    tokio::select! {
        result = operation => {
            if let Err(e) = &result {
                error!("{}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted; the remote host is left as it is");
            Err(ProvisionError::Io(std::io::Error::new(
                std::io::ErrorKind::Interrupted,
                "interrupted",
            )))
        }
    }
}

async fn run<T: Target>(target: T, config: &Config) -> Result<()>
where
    T::State: Serialize,
{
    let resource = Resource::new(target, config.endpoint.clone(), config.timeouts);

    match config.action {
        Action::Create => {
            let params: T::Params = load_params(config.params.as_deref())?;
            let record = resource.create(&params).await?;
            print_json(&record)
        }
        Action::Read => {
            let params: T::Params = load_params(config.params.as_deref())?;
            let record = resource.read(&params).await;
            if record.is_none() {
                warn!("Target not found on {}", config.endpoint.display_target());
            }
            print_json(&record)
        }
        Action::Delete => {
            resource.delete().await?;
            print_json(&serde_json::json!({ "id": resource.id()?, "deleted": true }))
        }
    }
}

fn load_params<P: DeserializeOwned>(path: Option<&Path>) -> Result<P> {
    let path = path.ok_or_else(|| ProvisionError::config("Missing required --params"))?;
    let text = std::fs::read_to_string(path)?;
    serde_json::from_str(&text).map_err(|e| {
        ProvisionError::invalid_params(format!("{}: {}", path.display(), e))
    })
}

fn print_json<V: Serialize>(value: &V) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
