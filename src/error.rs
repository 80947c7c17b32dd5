use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RackshError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    HostFile(#[from] HostFileError),
    #[error(transparent)]
    HostParse(#[from] HostParseError),
}

/// Process settings that are missing or malformed. Always fatal.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("{var} must be a non-negative integer, got '{value}'")]
    Invalid { var: &'static str, value: String },
    #[error("MAX_PARALLEL_CONCURRENCY must be at least 1")]
    ZeroConcurrency,
}

#[derive(Error, Debug)]
pub enum HostFileError {
    #[error("{} not found", .0.display())]
    NotFound(PathBuf),
    #[error("Failed to read {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A host name that does not follow the `<prefix>-rack<id>-<suffix>` convention.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HostParseError {
    #[error("Host '{0}' has no '-rack' marker in its name")]
    MissingRackMarker(String),
    #[error("Host '{0}' has an empty rack id after '-rack'")]
    EmptyRackId(String),
}

#[derive(Error, Debug)]
pub enum PerHostConfigError {
    #[error("Failed to read per-host config {}: {}", .path.display(), .source)]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse per-host config {}: {}", .path.display(), .source)]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
}
