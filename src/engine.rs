//! Remote execution engines.
//!
//! An [`Engine`] runs one command on a set of hosts in parallel and reports an [`Outcome`]
//! per host. The dispatch loop only ever talks to this trait; [`SshEngine`] is the
//! implementation used by the binary.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use openssh::{KnownHosts, Session, SessionBuilder};
use tokio::sync::Semaphore;

use crate::config::{HostOverride, HostOverrides, Settings};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// What happened when running the command on one host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The host could not be reached (or the operation timed out).
    ConnectionFailure { detail: String },
    /// The command ran and exited with a non-zero status.
    CommandFailure { exit_code: i32, stderr: String },
    Success { exit_code: i32, stdout: String },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success { .. })
    }

    /// Exit code as reported in logs. Connection failures count as 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Outcome::ConnectionFailure { .. } => 1,
            Outcome::CommandFailure { exit_code, .. } | Outcome::Success { exit_code, .. } => {
                *exit_code
            }
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Outcome::ConnectionFailure { detail } => write!(f, "connection failure: {}", detail),
            Outcome::CommandFailure { exit_code, .. } => write!(f, "failed ({})", exit_code),
            Outcome::Success { exit_code, .. } => write!(f, "succeeded ({})", exit_code),
        }
    }
}

#[async_trait]
pub trait Engine {
    /// Runs `command` on every host in `hosts` and waits for all of them.
    ///
    /// Returns one `(host, outcome)` pair per entry of `hosts`, in the same order. A host
    /// listed twice is run twice and reported twice.
    async fn execute(&self, hosts: &[String], command: &str) -> Vec<(String, Outcome)>;
}

/// Connection parameters for one host after applying its override.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostParams {
    pub port: Option<u16>,
    pub user: Option<String>,
    pub private_key: Option<PathBuf>,
    pub num_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Option<Duration>,
}

impl HostParams {
    pub fn resolve(settings: &Settings, host: Option<&HostOverride>) -> Self {
        let host = host.cloned().unwrap_or_default();
        Self {
            port: host.port.or(settings.port),
            user: host.user.or_else(|| settings.user.clone()),
            private_key: host.private_key.or_else(|| settings.private_key.clone()),
            num_retries: host.num_retries.or(settings.num_retries).unwrap_or(0),
            retry_delay: host
                .retry_delay
                .map(Duration::from_secs)
                .or(settings.retry_delay)
                .unwrap_or_default(),
            timeout: host.timeout.map(Duration::from_secs).or(settings.timeout),
        }
    }
}

/// Runs commands over SSH with OpenSSH multiplexed sessions.
pub struct SshEngine {
    settings: Settings,
    overrides: HostOverrides,
    permits: Arc<Semaphore>,
}

impl SshEngine {
    pub fn new(settings: Settings, overrides: HostOverrides) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_parallel.get()));
        Self {
            settings,
            overrides,
            permits,
        }
    }

    async fn run_on_host(&self, host: &str, command: &str) -> Outcome {
        // The semaphore is never closed.
        let _permit = match self.permits.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                return Outcome::ConnectionFailure {
                    detail: e.to_string(),
                }
            }
        };
        let params = HostParams::resolve(&self.settings, self.overrides.get(host));
        let remote = remote_command(command, self.settings.sudo);
        let run = run_remote(host, &params, &remote);
        match params.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Outcome::ConnectionFailure {
                    detail: format!("timed out after {}s", limit.as_secs()),
                },
            },
            None => run.await,
        }
    }
}

#[async_trait]
impl Engine for SshEngine {
    async fn execute(&self, hosts: &[String], command: &str) -> Vec<(String, Outcome)> {
        let runs = hosts.iter().map(|host| async move {
            let outcome = self.run_on_host(host, command).await;
            (host.clone(), outcome)
        });
        join_all(runs).await
    }
}

async fn connect(host: &str, params: &HostParams) -> Result<Session, openssh::Error> {
    let mut builder = SessionBuilder::default();
    builder
        .known_hosts_check(KnownHosts::Add)
        .connect_timeout(CONNECT_TIMEOUT);
    if let Some(port) = params.port {
        builder.port(port);
    }
    if let Some(user) = &params.user {
        builder.user(user.clone());
    }
    if let Some(key) = &params.private_key {
        builder.keyfile(key);
    }
    builder.connect_mux(host).await
}

async fn run_remote(host: &str, params: &HostParams, remote: &str) -> Outcome {
    let mut attempt = 0;
    let session = loop {
        match connect(host, params).await {
            Ok(session) => break session,
            Err(e) if attempt < params.num_retries => {
                attempt += 1;
                tracing::debug!(
                    "[{}] Connection attempt {} failed: {}. Retrying in {:?}.",
                    host,
                    attempt,
                    e,
                    params.retry_delay
                );
                tokio::time::sleep(params.retry_delay).await;
            }
            Err(e) => {
                return Outcome::ConnectionFailure {
                    detail: e.to_string(),
                }
            }
        }
    };
    tracing::debug!("[{}] Connected to host.", host);

    let output = session.raw_command(remote).output().await;
    if let Err(e) = session.close().await {
        tracing::debug!("[{}] Error while terminating: {}", host, e);
    }

    match output {
        Ok(output) => {
            let exit_code = output.status.code().unwrap_or(-1);
            if output.status.success() {
                Outcome::Success {
                    exit_code,
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                }
            } else {
                Outcome::CommandFailure {
                    exit_code,
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
        }
        Err(e) => Outcome::ConnectionFailure {
            detail: e.to_string(),
        },
    }
}

/// Remote command line running `command` under `sh -c`, through sudo if asked.
pub fn remote_command(command: &str, sudo: bool) -> String {
    let shell = format!("sh -c {}", shell_quote(command));
    if sudo {
        format!("sudo -n {}", shell)
    } else {
        shell
    }
}

/// Single-quotes `s` for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::*;

    fn settings() -> Settings {
        Settings {
            max_parallel: NonZeroUsize::new(4).unwrap(),
            port: Some(22),
            num_retries: Some(2),
            retry_delay: Some(Duration::from_secs(3)),
            timeout: None,
            sudo: false,
            user: Some("ops".to_string()),
            private_key: None,
            per_host_config: None,
            output_log: PathBuf::from("out.log"),
            error_log: PathBuf::from("err.log"),
        }
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("uptime"), "'uptime'");
        assert_eq!(shell_quote("echo 'hi'"), r"'echo '\''hi'\'''");
    }

    #[test]
    fn test_remote_command() {
        assert_eq!(remote_command("ls -l", false), "sh -c 'ls -l'");
        assert_eq!(remote_command("ls -l", true), "sudo -n sh -c 'ls -l'");
    }

    #[test]
    fn test_host_params_without_override() {
        let params = HostParams::resolve(&settings(), None);
        assert_eq!(params.port, Some(22));
        assert_eq!(params.user.as_deref(), Some("ops"));
        assert_eq!(params.num_retries, 2);
        assert_eq!(params.retry_delay, Duration::from_secs(3));
        assert_eq!(params.timeout, None);
    }

    #[test]
    fn test_host_params_override_wins() {
        let host = HostOverride {
            port: Some(2200),
            user: Some("root".to_string()),
            private_key: Some(PathBuf::from("/keys/root")),
            num_retries: None,
            retry_delay: Some(1),
            timeout: Some(30),
        };
        let params = HostParams::resolve(&settings(), Some(&host));
        assert_eq!(params.port, Some(2200));
        assert_eq!(params.user.as_deref(), Some("root"));
        assert_eq!(params.private_key, Some(PathBuf::from("/keys/root")));
        assert_eq!(params.num_retries, 2);
        assert_eq!(params.retry_delay, Duration::from_secs(1));
        assert_eq!(params.timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_outcome_exit_code() {
        let failure = Outcome::ConnectionFailure {
            detail: "refused".to_string(),
        };
        assert_eq!(failure.exit_code(), 1);
        assert!(!failure.is_success());
        let success = Outcome::Success {
            exit_code: 0,
            stdout: String::new(),
        };
        assert_eq!(success.exit_code(), 0);
        assert!(success.is_success());
        assert_eq!(success.to_string(), "succeeded (0)");
    }
}
