//! Resource lifecycle
//!
//! Wraps a workflow [`Target`] with the create/read/update/delete surface a
//! declarative caller expects. Every operation opens its own SSH session,
//! runs under a phase ceiling and closes the session when done.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::config::Timeouts;
use crate::error::{ProvisionError, Result};
use crate::registration::ConsoleApi;
use crate::ssh::{RemoteEndpoint, RemoteTransport, SshSession};
use crate::workflow::{Context, Target};

/// Identity plus observed state of a provisioned target
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record<S> {
    /// Serialized endpoint descriptor (see [`RemoteEndpoint::to_id`])
    pub id: String,
    pub state: S,
}

/// A target on one remote host
pub struct Resource<T: Target> {
    target: T,
    endpoint: RemoteEndpoint,
    timeouts: Timeouts,
    console: Option<Arc<dyn ConsoleApi>>,
}

impl<T: Target> Resource<T> {
    pub fn new(target: T, endpoint: RemoteEndpoint, timeouts: Timeouts) -> Self {
        Self {
            target,
            endpoint,
            timeouts,
            console: None,
        }
    }

    /// Console client used when the target registers itself after start
    pub fn with_console(mut self, console: Arc<dyn ConsoleApi>) -> Self {
        self.console = Some(console);
        self
    }

    pub fn endpoint(&self) -> &RemoteEndpoint {
        &self.endpoint
    }

    /// Resource id
    pub fn id(&self) -> Result<String> {
        self.endpoint.to_id()
    }

    fn context<'a>(&'a self, transport: &'a dyn RemoteTransport) -> Context<'a> {
        let ctx = Context::new(transport, &self.endpoint, self.timeouts);
        match &self.console {
            Some(console) => ctx.with_console(console.as_ref()),
            None => ctx,
        }
    }

    /// Provision the target over a fresh SSH session
    pub async fn create(&self, params: &T::Params) -> Result<Record<T::State>> {
        let session = SshSession::new(self.endpoint.clone());
        let result = self.create_on(&session, params).await;
        session.close().await;
        result
    }

    /// Provision the target over an existing transport
    pub async fn create_on(
        &self,
        transport: &dyn RemoteTransport,
        params: &T::Params,
    ) -> Result<Record<T::State>> {
        let id = self.id()?;
        info!(
            "Creating {} on {}",
            self.target.name(),
            self.endpoint.display_target()
        );
        let ctx = self.context(transport);
        let state = within(
            "create",
            self.timeouts.long_phase,
            self.target.provision(&ctx, params),
        )
        .await?;
        info!("Created {} on {}", self.target.name(), self.endpoint.host);
        Ok(Record { id, state })
    }

    /// Observe the target; `None` when it cannot be observed for any reason
    pub async fn read(&self, params: &T::Params) -> Option<Record<T::State>> {
        self.read_with_limit(params, self.timeouts.default_phase)
            .await
    }

    /// Observe the target over an existing transport
    pub async fn read_on(
        &self,
        transport: &dyn RemoteTransport,
        params: &T::Params,
    ) -> Option<Record<T::State>> {
        self.observe_on(transport, params, "read", self.timeouts.default_phase)
            .await
    }

    /// Re-read the target; running targets are never changed in place
    pub async fn update(&self, params: &T::Params) -> Option<Record<T::State>> {
        self.read_with_limit(params, self.timeouts.long_phase).await
    }

    /// Forget the target; the remote host is left as it is
    pub async fn delete(&self) -> Result<()> {
        info!(
            "Deleting {} record for {}; the remote host is not modified",
            self.target.name(),
            self.endpoint.display_target()
        );
        Ok(())
    }

    async fn read_with_limit(
        &self,
        params: &T::Params,
        limit: Duration,
    ) -> Option<Record<T::State>> {
        let session = SshSession::new(self.endpoint.clone());
        let record = self.observe_on(&session, params, "read", limit).await;
        session.close().await;
        record
    }

    async fn observe_on(
        &self,
        transport: &dyn RemoteTransport,
        params: &T::Params,
        phase: &str,
        limit: Duration,
    ) -> Option<Record<T::State>> {
        let ctx = self.context(transport);
        let observed = within(phase, limit, self.target.observe(&ctx, params)).await;
        let outcome = observed.and_then(|state| Ok(Record { id: self.id()?, state }));

        match outcome {
            Ok(record) => Some(record),
            Err(e) if e.is_unreachable() => {
                warn!(
                    "{} is unreachable, treating {} as absent: {}",
                    self.endpoint.display_target(),
                    self.target.name(),
                    e
                );
                None
            }
            Err(e) => {
                warn!("Could not observe {}, treating it as absent: {}", self.target.name(), e);
                None
            }
        }
    }
}

/// Run `future` under a phase ceiling
async fn within<F, R>(phase: &str, limit: Duration, future: F) -> Result<R>
where
    F: Future<Output = Result<R>>,
{
    tokio::time::timeout(limit, future)
        .await
        .map_err(|_| ProvisionError::PhaseTimeout {
            phase: phase.to_string(),
            limit,
        })?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mongod_conf::MongodConfig;
    use crate::ssh::CommandFailure;
    use crate::testing::ScriptedTransport;
    use crate::workflow::{ProcessParams, ProcessTarget};

    fn params() -> ProcessParams {
        serde_json::from_str(
            r#"{"binary": "https://h/mongodb.tgz", "workdir": "/srv/mongo", "bindip": "0.0.0.0"}"#,
        )
        .unwrap()
    }

    fn resource() -> Resource<ProcessTarget> {
        Resource::new(
            ProcessTarget,
            RemoteEndpoint::new("db1", "root"),
            Timeouts {
                poll_interval: Duration::from_millis(5),
                port_available: Duration::from_millis(100),
                ..Timeouts::default()
            },
        )
    }

    #[tokio::test]
    async fn test_create_on_returns_id_and_state() {
        let transport = ScriptedTransport::new().respond("netstat", &["open"]);
        let record = resource().create_on(&transport, &params()).await.unwrap();

        assert_eq!(
            record.id,
            r#"{"user":"root","host":"db1","port":22,"sudo_allowed":true}"#
        );
        assert_eq!(record.state.port, 27017);
    }

    #[tokio::test]
    async fn test_read_on_missing_config_is_absent() {
        let transport = ScriptedTransport::new();
        assert!(resource().read_on(&transport, &params()).await.is_none());
    }

    #[tokio::test]
    async fn test_read_on_dropped_connection_is_absent() {
        let transport = ScriptedTransport::new()
            .fail_on("cat", CommandFailure::Connection("no route to host".into()));
        assert!(resource().read_on(&transport, &params()).await.is_none());
    }

    #[tokio::test]
    async fn test_read_on_reports_state() {
        let yaml = MongodConfig::forking("/srv/mongo/data", 27017, "0.0.0.0", "/srv/mongo/mongod.log", None)
            .to_yaml()
            .unwrap();
        let transport = ScriptedTransport::new().with_file("/srv/mongo/mongod.conf", &yaml);
        let record = resource().read_on(&transport, &params()).await.unwrap();
        assert_eq!(record.state.dbpath, "/srv/mongo/data");
    }

    #[tokio::test]
    async fn test_read_unreachable_host_is_absent() {
        let resource = Resource::new(
            ProcessTarget,
            RemoteEndpoint::new("127.0.0.1", "nobody")
                .with_port(1)
                .with_password("x"),
            Timeouts::default(),
        );
        assert!(resource.read(&params()).await.is_none());
        assert!(resource.update(&params()).await.is_none());
    }

    #[tokio::test]
    async fn test_delete_is_noop() {
        // nothing listens on the endpoint; delete must not try to connect
        let resource = Resource::new(
            ProcessTarget,
            RemoteEndpoint::new("127.0.0.1", "nobody").with_port(1),
            Timeouts::default(),
        );
        resource.delete().await.unwrap();
    }

    #[tokio::test]
    async fn test_phase_ceiling() {
        let err = within("create", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::PhaseTimeout { ref phase, .. } if phase == "create"));
    }
}
