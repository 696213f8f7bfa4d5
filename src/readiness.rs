//! Readiness polling
//!
//! Turns a point-in-time remote check into a bounded wait. A
//! [`ReadinessCheck`] knows which command to run and which two outputs mean
//! "not yet" (pending) and "ready" (target); the [`Poller`] runs it until the
//! target shows up, the deadline passes, or the probe itself fails.

use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::error::{ProvisionError, Result};
use crate::ssh::elevation::quote;
use crate::ssh::{CommandResult, RemoteTransport};

/// Outcome strings for the port check
pub const PORT_CLOSED: &str = "closed";
/// Outcome strings for the port check
pub const PORT_OPEN: &str = "open";
/// Outcome strings for the process check
pub const SERVICE_STOPPED: &str = "stopped";
/// Outcome strings for the process check
pub const SERVICE_STARTED: &str = "started";

/// Deadline used when `started + timeout` does not fit in an `Instant`
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// What a single probe observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// The pending outcome; keep polling
    Pending,
    /// The target outcome; done
    Target,
}

/// A remote check with its canonical pending/target outcomes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessCheck {
    subject: String,
    command: String,
    pending: &'static str,
    target: &'static str,
}

impl ReadinessCheck {
    /// Port is listening on the remote host
    pub fn port_open(port: u16) -> Self {
        let pattern = quote(&format!(":{}([^0-9]|$)", port));
        Self {
            subject: format!("port {}", port),
            command: format!(
                "((netstat -nlt 2>/dev/null || ss -nlt) | grep -qE {}) && echo {} || echo {}",
                pattern, PORT_OPEN, PORT_CLOSED
            ),
            pending: PORT_CLOSED,
            target: PORT_OPEN,
        }
    }

    /// A process whose command line contains `name` is running
    ///
    /// The first character is wrapped in brackets so the probe's own shell
    /// never matches the pattern.
    pub fn service_running(name: &str) -> Result<Self> {
        let mut chars = name.chars();
        let first = chars
            .next()
            .ok_or_else(|| ProvisionError::invalid_params("Service name cannot be empty"))?;
        let pattern = format!("[{}]{}", first, escape_regex(chars.as_str()));

        Ok(Self {
            subject: format!("service {}", name),
            command: format!(
                "(ps -eo args= | grep -q {}) && echo {} || echo {}",
                quote(&pattern),
                SERVICE_STARTED,
                SERVICE_STOPPED
            ),
            pending: SERVICE_STOPPED,
            target: SERVICE_STARTED,
        })
    }

    /// Shell command run on each tick
    pub fn command(&self) -> &str {
        &self.command
    }

    /// What is being waited for, for log lines
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Outcome meaning "not yet"
    pub fn pending(&self) -> &'static str {
        self.pending
    }

    /// Outcome meaning "ready"
    pub fn target(&self) -> &'static str {
        self.target
    }

    /// Map one probe result onto the state machine
    ///
    /// A failed probe aborts with its command error; output that is neither
    /// outcome aborts with [`ProvisionError::UnexpectedState`].
    pub fn observe(&self, result: CommandResult) -> Result<Observation> {
        let result = result.into_result()?;
        match result.output() {
            Some(out) if out == self.target => Ok(Observation::Target),
            Some(out) if out == self.pending => Ok(Observation::Pending),
            other => {
                if !result.stderr().is_empty() {
                    debug!("Unexpected probe stderr: {}", result.stderr().trim());
                }
                Err(ProvisionError::UnexpectedState {
                    target: self.target.to_string(),
                    state: other.unwrap_or_default().to_string(),
                })
            }
        }
    }
}

fn escape_regex(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '.' | '[' | ']' | '*' | '^' | '$' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Bounded polling with a fixed interval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Poller {
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    /// Create a poller probing every `interval` for at most `timeout`
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }

    /// Interval between probes
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Overall deadline
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Poll `probe` until it reports the check's target outcome
    ///
    /// Only pending outcomes are retried. A probe failure or an unexpected
    /// outcome stops polling immediately. When the deadline passes the error
    /// carries the last observed state.
    pub async fn wait_for<F, Fut>(&self, check: &ReadinessCheck, mut probe: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CommandResult>,
    {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match check.observe(probe().await)? {
                Observation::Target => {
                    info!(
                        "{} reached '{}' after {} probe(s)",
                        check.subject, check.target, attempts
                    );
                    return Ok(());
                }
                Observation::Pending => {
                    debug!("{} still '{}' (attempt {})", check.subject, check.pending, attempts);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(ProvisionError::Timeout {
                    target: check.target.to_string(),
                    last_state: check.pending.to_string(),
                    waited: now - started,
                });
            }
            sleep(self.interval.min(deadline - now)).await;
        }
    }

    /// Poll a check by running its command on `transport`
    pub async fn wait_until_ready(
        &self,
        transport: &dyn RemoteTransport,
        check: &ReadinessCheck,
    ) -> Result<()> {
        info!(
            "Waiting up to {:?} for {} to be '{}'",
            self.timeout, check.subject, check.target
        );
        self.wait_for(check, || transport.run_command(check.command()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::CommandFailure;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn fast_poller(timeout_ms: u64) -> Poller {
        Poller::new(Duration::from_millis(10), Duration::from_millis(timeout_ms))
    }

    #[tokio::test]
    async fn test_unbounded_timeout_does_not_overflow() {
        let poller = Poller::new(Duration::from_millis(1), Duration::MAX);
        let calls = AtomicUsize::new(0);
        let check = ReadinessCheck::port_open(27017);

        poller
            .wait_for(&check, || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                let out = if n == 0 { PORT_CLOSED } else { PORT_OPEN };
                async move { CommandResult::ok("probe", out) }
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_port_check_command() {
        let check = ReadinessCheck::port_open(8080);
        assert_eq!(
            check.command(),
            "((netstat -nlt 2>/dev/null || ss -nlt) | grep -qE ':8080([^0-9]|$)') && echo open || echo closed"
        );
        assert_eq!(check.pending(), "closed");
        assert_eq!(check.target(), "open");
    }

    #[test]
    fn test_service_check_never_matches_itself() {
        let check = ReadinessCheck::service_running("mongodb-mms-automation-agent").unwrap();
        assert_eq!(
            check.command(),
            "(ps -eo args= | grep -q '[m]ongodb-mms-automation-agent') && echo started || echo stopped"
        );
    }

    #[test]
    fn test_service_check_escapes_dots() {
        let check = ReadinessCheck::service_running("java.exe").unwrap();
        assert!(check.command().contains("'[j]ava\\.exe'"));
    }

    #[test]
    fn test_service_check_rejects_empty_name() {
        assert!(ReadinessCheck::service_running("").is_err());
    }

    #[test]
    fn test_observe_outcomes() {
        let check = ReadinessCheck::port_open(1);
        assert_eq!(
            check.observe(CommandResult::ok("p", "open\n")).unwrap(),
            Observation::Target
        );
        assert_eq!(
            check.observe(CommandResult::ok("p", "closed")).unwrap(),
            Observation::Pending
        );
        assert!(matches!(
            check.observe(CommandResult::ok("p", "maybe")),
            Err(ProvisionError::UnexpectedState { state, .. }) if state == "maybe"
        ));
    }

    #[tokio::test]
    async fn test_reaches_target_after_pending() {
        let calls = AtomicUsize::new(0);
        let check = ReadinessCheck::port_open(27017);

        let result = fast_poller(2_000)
            .wait_for(&check, || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                CommandResult::ok("probe", if n < 2 { "closed" } else { "open" })
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_with_last_state() {
        let check = ReadinessCheck::port_open(27017);

        let result = fast_poller(20)
            .wait_for(&check, || async { CommandResult::ok("probe", "closed") })
            .await;

        match result {
            Err(ProvisionError::Timeout {
                target, last_state, ..
            }) => {
                assert_eq!(target, "open");
                assert_eq!(last_state, "closed");
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_transport_error_aborts_immediately() {
        let calls = AtomicUsize::new(0);
        let check = ReadinessCheck::service_running("mongod").unwrap();

        let result = fast_poller(5_000)
            .wait_for(&check, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                CommandResult::failed("probe", CommandFailure::Transport("channel closed".into()))
            })
            .await;

        assert!(matches!(result, Err(ProvisionError::Command(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connection_error_aborts_as_connection() {
        let check = ReadinessCheck::port_open(8080);
        let result = fast_poller(5_000)
            .wait_for(&check, || async {
                CommandResult::failed("probe", CommandFailure::Connection("reset".into()))
            })
            .await;
        assert!(matches!(result, Err(ProvisionError::Connection(_))));
    }

    #[tokio::test]
    async fn test_target_on_first_probe_does_not_sleep() {
        let check = ReadinessCheck::service_running("mongod").unwrap();
        let started = std::time::Instant::now();
        fast_poller(10_000)
            .wait_for(&check, || async { CommandResult::ok("probe", "started") })
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
