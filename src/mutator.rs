//! Remote configuration mutation
//!
//! Read/modify/write of a remote `key=value` file: back it up, read it,
//! parse it, apply the edits and upload the result over the original.
//! There is no remote transaction; if the upload fails the `.backup` copy
//! is the recovery point.

use tracing::{debug, info};

use crate::error::{MutationStage, ProvisionError, Result};
use crate::properties::{ConfigDocument, ConfigEdits};
use crate::ssh::elevation::quote;
use crate::ssh::{CommandFailure, CommandResult, RemoteEndpoint, RemoteTransport};

/// Suffix of the copy taken before a file is rewritten
pub const BACKUP_SUFFIX: &str = ".backup";

/// Path of the backup copy for `path`
pub fn backup_path(path: &str) -> String {
    format!("{}{}", path, BACKUP_SUFFIX)
}

/// Apply `edits` to the remote file at `path`
///
/// Returns the document as written. Every failure names the file and the
/// stage it stopped at; a dropped connection surfaces as
/// [`ProvisionError::Connection`] instead.
pub async fn update_remote_config(
    transport: &dyn RemoteTransport,
    endpoint: &RemoteEndpoint,
    path: &str,
    edits: &ConfigEdits,
) -> Result<ConfigDocument> {
    edits.validate()?;
    info!("Updating {} ({} assignment(s))", path, edits.len());

    let backup = endpoint.privileged(&format!("cp {} {}", quote(path), quote(&backup_path(path))));
    stage(path, MutationStage::Backup, transport.run_command(&backup).await)?;
    debug!("Backed up {} to {}", path, backup_path(path));

    let mut document = read_document(transport, endpoint, path).await?;
    document.apply(edits);

    let text = document.to_text();
    stage(
        path,
        MutationStage::Upload,
        transport.upload(path, text.as_bytes()).await,
    )?;

    info!("Updated {}", path);
    Ok(document)
}

/// Read and parse the remote file at `path` without changing it
pub async fn read_remote_config(
    transport: &dyn RemoteTransport,
    endpoint: &RemoteEndpoint,
    path: &str,
) -> Result<ConfigDocument> {
    read_document(transport, endpoint, path).await
}

async fn read_document(
    transport: &dyn RemoteTransport,
    endpoint: &RemoteEndpoint,
    path: &str,
) -> Result<ConfigDocument> {
    let cat = endpoint.privileged(&format!("cat {}", quote(path)));
    let result = stage(path, MutationStage::Read, transport.run_command(&cat).await)?;

    ConfigDocument::parse(result.stdout())
        .map_err(|e| ProvisionError::mutation(path, MutationStage::Parse, e.to_string()))
}

fn stage(path: &str, stage: MutationStage, result: CommandResult) -> Result<CommandResult> {
    match result.failure() {
        None => Ok(result),
        Some(CommandFailure::Connection(msg)) => Err(ProvisionError::connection(msg.clone())),
        Some(failure) => {
            let reason = match result.stderr().trim() {
                "" => failure.to_string(),
                stderr => format!("{}: {}", failure, stderr),
            };
            Err(ProvisionError::mutation(path, stage, reason))
        }
    }
}
