//! Configuration for racksh.
//!
//! Command line arguments live in the clap struct [`Cli`]. Connection settings come from
//! the environment (optionally seeded from a `.env` file) and are loaded once into
//! [`Settings`], which is then handed to the engine. Per-host overrides are read from an
//! optional YAML file.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use clap::{ArgAction, Parser, ValueEnum};
use serde::Deserialize;

use crate::error::{ConfigError, PerHostConfigError};
use crate::logging::ERROR_TARGET;

#[derive(Parser, Debug)]
#[command(version, about = "Parallel remote program executer")]
pub struct Cli {
    /// File with the list of hosts, one per line
    #[arg(short = 'f', long, alias = "hostFile", num_args = 1.., required = true)]
    pub host_file: Vec<String>,

    /// Command to be executed on every host
    #[arg(short, long, num_args = 1.., required = true)]
    pub command: Vec<String>,

    /// Whether the command is harmless or needs caution (one host per rack at a time)
    #[arg(short = 't', long, alias = "ctype", alias = "commandType", value_enum)]
    pub command_type: Policy,

    /// Dotenv file to load settings from. Defaults to `.env` if it exists
    #[arg(long)]
    pub env_file: Option<PathBuf>,

    /// Increase console log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Host file path. Multiple words are joined with a space.
    pub fn host_file(&self) -> PathBuf {
        PathBuf::from(self.host_file.join(" "))
    }

    /// Command string. Multiple words are joined with a space.
    pub fn command(&self) -> String {
        self.command.join(" ")
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, ValueEnum)]
pub enum Policy {
    /// Run on all hosts at once, bounded only by the concurrency ceiling
    #[value(name = "harmless")]
    Harmless,
    /// Never run on two hosts of the same rack at the same time
    #[value(name = "needs-caution")]
    NeedsCaution,
}

impl fmt::Display for Policy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Policy::Harmless => write!(f, "harmless"),
            Policy::NeedsCaution => write!(f, "needs-caution"),
        }
    }
}

/// Process-wide connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Most hosts ever running the command at the same time.
    pub max_parallel: NonZeroUsize,
    pub port: Option<u16>,
    pub num_retries: Option<u32>,
    /// Delay between connection attempts.
    pub retry_delay: Option<Duration>,
    /// Bound on the whole operation for one host.
    pub timeout: Option<Duration>,
    pub sudo: bool,
    pub user: Option<String>,
    pub private_key: Option<PathBuf>,
    pub per_host_config: Option<PathBuf>,
    pub output_log: PathBuf,
    pub error_log: PathBuf,
}

impl Settings {
    /// Loads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads settings through `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let max_parallel: usize =
            parse_var("MAX_PARALLEL_CONCURRENCY", get("MAX_PARALLEL_CONCURRENCY"))?
                .ok_or(ConfigError::Missing("MAX_PARALLEL_CONCURRENCY"))?;
        let max_parallel = NonZeroUsize::new(max_parallel).ok_or(ConfigError::ZeroConcurrency)?;

        Ok(Self {
            max_parallel,
            port: parse_var("PORT", get("PORT"))?,
            num_retries: parse_var("NUM_RETRIES", get("NUM_RETRIES"))?,
            retry_delay: parse_var("RETRY_DELAY", get("RETRY_DELAY"))?.map(Duration::from_secs),
            timeout: parse_var("PSSH_TIMEOUT", get("PSSH_TIMEOUT"))?.map(Duration::from_secs),
            sudo: get("PSSH_SUDO").map_or(false, |value| is_truthy(&value)),
            user: get("PSSH_USER"),
            private_key: get("PSSH_PKEY").map(PathBuf::from),
            per_host_config: get("PSSH_PERHOSTCONF").map(PathBuf::from),
            output_log: get("RACKSH_OUTPUT_LOG")
                .map_or_else(|| PathBuf::from("cmd_stdout.log"), PathBuf::from),
            error_log: get("RACKSH_ERROR_LOG")
                .map_or_else(|| PathBuf::from("executer.log"), PathBuf::from),
        })
    }
}

fn parse_var<T: FromStr>(
    var: &'static str,
    value: Option<String>,
) -> Result<Option<T>, ConfigError> {
    value
        .map(|value| {
            value.trim().parse().map_err(|_| ConfigError::Invalid {
                var,
                value: value.clone(),
            })
        })
        .transpose()
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Connection settings for a single host, overriding the process-wide ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct HostOverride {
    pub port: Option<u16>,
    pub user: Option<String>,
    #[serde(alias = "pkey")]
    pub private_key: Option<PathBuf>,
    pub num_retries: Option<u32>,
    /// Seconds.
    pub retry_delay: Option<u64>,
    /// Seconds.
    pub timeout: Option<u64>,
}

pub type HostOverrides = HashMap<String, HostOverride>;

/// Reads the per-host override file at `path`.
///
/// An empty file has no overrides.
pub fn load_host_overrides(path: &Path) -> Result<HostOverrides, PerHostConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| PerHostConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    if contents.trim().is_empty() {
        return Ok(HostOverrides::new());
    }
    let overrides: Option<HostOverrides> =
        serde_yaml::from_str(&contents).map_err(|source| PerHostConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(overrides.unwrap_or_default())
}

/// Loads per-host overrides if a file is configured.
///
/// Nothing here is fatal: a missing or broken file is reported and the run continues
/// without overrides.
pub fn host_overrides_or_default(path: Option<&Path>) -> HostOverrides {
    let Some(path) = path else {
        return HostOverrides::new();
    };
    if !path.is_file() {
        tracing::warn!(
            "Per-host config {} not found, continuing without it.",
            path.display()
        );
        return HostOverrides::new();
    }
    match load_host_overrides(path) {
        Ok(overrides) => {
            tracing::info!(
                "Loaded per-host config for {} hosts from {}.",
                overrides.len(),
                path.display()
            );
            overrides
        }
        Err(e) => {
            tracing::error!(
                target: ERROR_TARGET,
                host = %local_hostname(),
                exit_code = 1,
                command = "yaml load",
                "{}",
                e
            );
            println!("yaml loading failed! check error logs");
            HostOverrides::new()
        }
    }
}

/// Name of the machine racksh runs on.
pub fn local_hostname() -> String {
    hostname::get()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "localhost".to_string())
}
