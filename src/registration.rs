//! First-run registration against a freshly started Ops Manager
//!
//! The HTTP client lives outside this crate: callers supply a
//! [`ConsoleApi`] implementation. The console accepts the first user
//! without authentication; everything after that uses digest
//! authentication with the returned API key.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ProvisionError, Result};

/// Access list entry allowing the first user's API key from anywhere
pub const OPEN_ACCESS_LIST: &str = "0.0.0.1/0";

/// First (global owner) user to create
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FirstUser {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

/// Credentials returned when the first user is created
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisteredUser {
    pub username: String,
    pub api_key: String,
}

impl std::fmt::Debug for RegisteredUser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredUser")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

/// Project created for the automation agents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub agent_api_key: String,
}

/// Ops Manager public API, as far as provisioning needs it
#[async_trait]
pub trait ConsoleApi: Send + Sync {
    /// Create the first user; only valid against a console with no users
    async fn create_first_user(
        &self,
        base_url: &str,
        user: &FirstUser,
        access_list: &str,
    ) -> Result<RegisteredUser>;

    /// Create a project, authenticating with the user's API key
    async fn create_project(
        &self,
        base_url: &str,
        credentials: &RegisteredUser,
        name: &str,
    ) -> Result<Project>;
}

/// Register the first user, then a project for the agents
pub async fn register(
    api: &dyn ConsoleApi,
    base_url: &str,
    username: &str,
    password: &str,
) -> Result<Project> {
    let user = FirstUser {
        username: username.to_string(),
        password: password.to_string(),
        first_name: "first".to_string(),
        last_name: "last".to_string(),
    };

    let credentials = api
        .create_first_user(base_url, &user, OPEN_ACCESS_LIST)
        .await
        .map_err(|e| registration_error("create first user", e))?;
    info!("Created first Ops Manager user: {}", credentials.username);

    let name = project_name();
    let project = api
        .create_project(base_url, &credentials, &name)
        .await
        .map_err(|e| registration_error("create first project", e))?;
    info!("Created project {} ({})", project.name, project.id);

    Ok(project)
}

fn registration_error(step: &str, err: ProvisionError) -> ProvisionError {
    match err {
        ProvisionError::Registration(msg) => {
            ProvisionError::Registration(format!("{}: {}", step, msg))
        }
        other => ProvisionError::Registration(format!("{}: {}", step, other)),
    }
}

fn project_name() -> String {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() % 10_000_000)
        .unwrap_or_default();
    format!("Project-{}", suffix)
}
