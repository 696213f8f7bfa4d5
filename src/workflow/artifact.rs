//! Installation artifacts: where they come from and how they are installed

use std::path::PathBuf;

use crate::error::{ProvisionError, Result};
use crate::ssh::elevation::quote;
use crate::ssh::RemoteEndpoint;

/// Package format, decided by the artifact's file name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `.tar.gz` / `.tgz`, unpacked into the working directory
    Archive,
    /// Debian package
    Deb,
    /// RPM package
    Rpm,
}

impl ArtifactKind {
    /// Detect the kind from a URL or path
    pub fn detect(locator: &str) -> Result<Self> {
        let name = file_name(locator)?.to_ascii_lowercase();
        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(ArtifactKind::Archive)
        } else if name.ends_with(".deb") {
            Ok(ArtifactKind::Deb)
        } else if name.ends_with(".rpm") {
            Ok(ArtifactKind::Rpm)
        } else {
            Err(ProvisionError::invalid_params(format!(
                "Unknown artifact type: {}",
                name
            )))
        }
    }

    pub fn is_archive(self) -> bool {
        self == ArtifactKind::Archive
    }

    /// Command installing `artifact`; archives are unpacked into `dir`
    pub fn install_command(self, endpoint: &RemoteEndpoint, artifact: &str, dir: &str) -> String {
        match self {
            ArtifactKind::Archive => format!(
                "tar -C {} -xzf {} --strip-components 1",
                quote(dir),
                quote(artifact)
            ),
            ArtifactKind::Deb => {
                endpoint.privileged(&format!("dpkg -i --force-confnew {}", quote(artifact)))
            }
            ArtifactKind::Rpm => {
                endpoint.privileged(&format!("rpm -Uvh --replacepkgs {}", quote(artifact)))
            }
        }
    }
}

/// Where an artifact is fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Fetched by the remote host itself
    Url(String),
    /// Read locally and uploaded
    Local(PathBuf),
}

impl ArtifactSource {
    pub fn parse(locator: &str) -> Self {
        if let Some(path) = locator.strip_prefix("file://") {
            return ArtifactSource::Local(PathBuf::from(path));
        }
        let lowered = locator.to_ascii_lowercase();
        if ["http://", "https://", "ftp://"]
            .iter()
            .any(|scheme| lowered.starts_with(scheme))
        {
            ArtifactSource::Url(locator.to_string())
        } else {
            ArtifactSource::Local(PathBuf::from(locator))
        }
    }
}

/// Last path segment of a URL or path, without query or fragment
pub fn file_name(locator: &str) -> Result<&str> {
    let without_query = locator.split(['?', '#']).next().unwrap_or_default();
    match without_query.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ProvisionError::invalid_params(format!(
            "Cannot derive a file name from '{}'",
            locator
        ))),
    }
}
