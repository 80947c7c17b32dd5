//! racksh: Rack-aware parallel SSH command runner.

// Command line arguments and configuration.
pub mod config;
// How to parse hosts and group them by rack.
pub mod host;
// Rack-exclusive batch scheduling.
pub mod scheduler;
// Dispatch loop over the execution engine.
pub mod dispatch;
// Remote execution engines.
pub mod engine;
// Console and file logging.
pub mod logging;
// Error handling.
pub mod error;

pub use config::{Cli, HostOverride, HostOverrides, Policy, Settings};
pub use dispatch::{Dispatcher, Report};
pub use engine::{Engine, Outcome, SshEngine};
pub use error::{ConfigError, HostFileError, HostParseError, PerHostConfigError, RackshError};
pub use host::{rack_id, read_hosts, RackBuckets, RackId};
pub use scheduler::{optimal_batch_count, plan, Batch, BatchPlanner, Schedule};
