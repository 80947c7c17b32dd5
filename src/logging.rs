//! Logging setup.
//!
//! Console diagnostics go to stderr. Two more streams are written to files: one for the
//! output of commands (`racksh::output`) and one for errors and exceptions
//! (`racksh::errors`). Records on both carry `host`, `exit_code` and `command` fields.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing::Subscriber;
use tracing_subscriber::filter::{filter_fn, EnvFilter};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

/// Target of records that carry command output.
pub const OUTPUT_TARGET: &str = "racksh::output";
/// Target of records that carry connection failures and internal errors.
pub const ERROR_TARGET: &str = "racksh::errors";

/// Console filter derived from `RUST_LOG`, or else from the verbosity flag.
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("racksh=warn"),
            1 => EnvFilter::new("racksh=info"),
            2 => EnvFilter::new("racksh=debug"),
            _ => EnvFilter::new("racksh=trace,openssh=debug"),
        }
    }
}

/// File layer that keeps only the records of `target`.
pub fn stream_layer<S, W>(writer: W, target: &'static str) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'span> LookupSpan<'span> + 'static,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter_fn(move |metadata| metadata.target() == target))
        .boxed()
}

fn open_log(path: &Path) -> Option<File> {
    match OpenOptions::new().create(true).append(true).open(path) {
        Ok(file) => Some(file),
        Err(e) => {
            eprintln!("[racksh] Failed to open log file {}: {}", path.display(), e);
            None
        }
    }
}

/// Installs the global subscriber.
///
/// A log file that can't be opened disables its stream; console logging still works.
pub fn init_logging(verbosity: u8, output_log: &Path, error_log: &Path) {
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_filter(create_env_filter(verbosity));

    let output =
        open_log(output_log).map(|file| stream_layer(Mutex::new(file), OUTPUT_TARGET));
    let errors = open_log(error_log).map(|file| stream_layer(Mutex::new(file), ERROR_TARGET));

    tracing_subscriber::registry()
        .with(console)
        .with(output)
        .with(errors)
        .init();
}
