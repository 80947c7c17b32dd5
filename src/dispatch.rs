//! Dispatch loop.
//!
//! Harmless commands go to the engine in one call with every host. Commands that need
//! caution go through the batch planner, one engine call per batch, and the next batch is
//! only planned after the previous one has fully returned.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;

use colored::Colorize;

use crate::config::Policy;
use crate::engine::{Engine, Outcome};
use crate::error::HostParseError;
use crate::host::RackBuckets;
use crate::logging::{ERROR_TARGET, OUTPUT_TARGET};
use crate::scheduler::BatchPlanner;

/// Outcomes of one invocation, in dispatch order.
#[derive(Debug, Default)]
pub struct Report {
    pub outcomes: Vec<(String, Outcome)>,
    /// Number of engine calls made.
    pub batches: usize,
}

impl Report {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::CommandFailure { .. }))
            .count()
    }

    pub fn unreachable(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, Outcome::ConnectionFailure { .. }))
            .count()
    }

    pub fn outcome(&self, host: &str) -> Option<&Outcome> {
        self.outcomes
            .iter()
            .find(|(h, _)| h == host)
            .map(|(_, outcome)| outcome)
    }
}

pub struct Dispatcher<'a, E> {
    engine: &'a E,
    limit: NonZeroUsize,
}

impl<'a, E: Engine> Dispatcher<'a, E> {
    pub fn new(engine: &'a E, limit: NonZeroUsize) -> Self {
        Self { engine, limit }
    }

    /// Runs `command` on `hosts` under `policy`.
    ///
    /// Under needs-caution, a host without a rack fails the whole run before anything
    /// is dispatched.
    pub async fn run(
        &self,
        policy: Policy,
        hosts: Vec<String>,
        command: &str,
    ) -> Result<Report, HostParseError> {
        match policy {
            Policy::Harmless => Ok(self.run_harmless(hosts, command).await),
            Policy::NeedsCaution => {
                let buckets = RackBuckets::build(hosts)?;
                Ok(self.run_needs_caution(buckets, command).await)
            }
        }
    }

    /// One engine call with every host. The engine bounds concurrency on its own.
    pub async fn run_harmless(&self, hosts: Vec<String>, command: &str) -> Report {
        let mut report = Report::default();
        if hosts.is_empty() {
            tracing::warn!("No hosts to run '{}' on.", command);
        }
        tracing::info!("Running '{}' on {} hosts.", command, hosts.len());
        self.dispatch(hosts, command, &mut report).await;
        report
    }

    /// One engine call per batch, strictly one after another.
    pub async fn run_needs_caution(&self, buckets: RackBuckets, command: &str) -> Report {
        let mut report = Report::default();
        tracing::info!(
            "Running '{}' on {} hosts in {} racks: {}",
            command,
            buckets.total_hosts(),
            buckets.num_racks(),
            buckets
        );
        for (index, batch) in BatchPlanner::new(buckets, self.limit).enumerate() {
            tracing::info!("Batch {}: {:?}", index + 1, batch);
            self.dispatch(batch, command, &mut report).await;
        }
        report
    }

    async fn dispatch(&self, hosts: Vec<String>, command: &str, report: &mut Report) {
        let mut results = by_host(self.engine.execute(&hosts, command).await);
        report.batches += 1;
        for host in hosts {
            let outcome = results
                .get_mut(&host)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| Outcome::ConnectionFailure {
                    detail: "no result returned by engine".to_string(),
                });
            record(&host, command, &outcome);
            report.outcomes.push((host, outcome));
        }
        log_unexpected(results);
    }
}

/// Prints the summary line of one host and logs its outcome.
fn record(host: &str, command: &str, outcome: &Outcome) {
    let exit_code = outcome.exit_code();
    match outcome {
        Outcome::Success { stdout, .. } => {
            println!(
                "{} : {} : execution {} with exit status {} check cmd_stdout.log file for output log",
                host,
                command,
                "Succeeded".green(),
                exit_code
            );
            tracing::info!(target: OUTPUT_TARGET, host, exit_code, command, "{}", stdout);
        }
        Outcome::CommandFailure { stderr, .. } => {
            println!(
                "{} : {} : execution {} with exit status {} check cmd_stdout.log file for error log",
                host,
                command,
                "Failed".red(),
                exit_code
            );
            tracing::error!(target: OUTPUT_TARGET, host, exit_code, command, "{}", stderr);
        }
        Outcome::ConnectionFailure { detail } => {
            println!(
                "{} : {} : {} while connecting host. Check executer.log file for error log",
                host,
                command,
                "exception".red()
            );
            tracing::error!(target: ERROR_TARGET, host, exit_code, command, "{}", detail);
        }
    }
}

/// Groups engine results per host. Repeated hosts keep their call order.
fn by_host(results: Vec<(String, Outcome)>) -> HashMap<String, VecDeque<Outcome>> {
    let mut grouped: HashMap<String, VecDeque<Outcome>> = HashMap::new();
    for (host, outcome) in results {
        grouped.entry(host).or_default().push_back(outcome);
    }
    grouped
}

fn log_unexpected(results: HashMap<String, VecDeque<Outcome>>) {
    for (host, outcomes) in results {
        for outcome in outcomes {
            tracing::warn!(
                "Engine reported '{}' for {}, which was not part of the batch.",
                outcome,
                host
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::prelude::*;

    use super::*;
    use crate::logging::stream_layer;

    /// In-memory log file.
    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl Buffer {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_record_routes_outcomes_to_their_stream() {
        let output = Buffer::default();
        let errors = Buffer::default();
        let subscriber = tracing_subscriber::registry()
            .with(stream_layer(
                {
                    let output = output.clone();
                    move || output.clone()
                },
                OUTPUT_TARGET,
            ))
            .with(stream_layer(
                {
                    let errors = errors.clone();
                    move || errors.clone()
                },
                ERROR_TARGET,
            ));

        tracing::subscriber::with_default(subscriber, || {
            record(
                "ok-rack1-a",
                "uptime",
                &Outcome::Success {
                    exit_code: 0,
                    stdout: "up 3 days".to_string(),
                },
            );
            record(
                "bad-rack1-b",
                "uptime",
                &Outcome::CommandFailure {
                    exit_code: 2,
                    stderr: "no such file".to_string(),
                },
            );
            record(
                "gone-rack2-c",
                "uptime",
                &Outcome::ConnectionFailure {
                    detail: "Connection refused".to_string(),
                },
            );
            // Console diagnostics stay out of both files.
            tracing::warn!("unrelated");
        });

        let output = output.contents();
        let errors = errors.contents();

        assert!(output.contains("ok-rack1-a") && output.contains("up 3 days"));
        assert!(output.contains("bad-rack1-b") && output.contains("no such file"));
        assert!(!output.contains("gone-rack2-c"));
        assert!(errors.contains("gone-rack2-c") && errors.contains("Connection refused"));
        assert!(!errors.contains("ok-rack1-a"));
        assert!(!errors.contains("bad-rack1-b"));
        assert!(!output.contains("unrelated") && !errors.contains("unrelated"));

        assert_eq!(output.lines().count(), 2);
        assert_eq!(errors.lines().count(), 1);
        for line in output.lines().chain(errors.lines()) {
            for field in ["host=", "exit_code=", "command="] {
                assert!(line.contains(field), "{} missing from {:?}", field, line);
            }
        }
        assert!(errors.contains("exit_code=1"));
    }

    #[test]
    fn test_report_counters() {
        let report = Report {
            outcomes: vec![
                (
                    "a".to_string(),
                    Outcome::Success {
                        exit_code: 0,
                        stdout: "ok".to_string(),
                    },
                ),
                (
                    "b".to_string(),
                    Outcome::CommandFailure {
                        exit_code: 2,
                        stderr: "no such file".to_string(),
                    },
                ),
                (
                    "c".to_string(),
                    Outcome::ConnectionFailure {
                        detail: "refused".to_string(),
                    },
                ),
            ],
            batches: 1,
        };
        assert_eq!(report.succeeded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.unreachable(), 1);
        assert_eq!(report.outcome("b").map(Outcome::exit_code), Some(2));
        assert!(report.outcome("z").is_none());
    }
}
