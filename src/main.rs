use std::process;

use clap::Parser;

use racksh::config::{host_overrides_or_default, local_hostname};
use racksh::logging::{init_logging, ERROR_TARGET};
use racksh::{read_hosts, Cli, Dispatcher, RackshError, Settings, SshEngine};

fn load_env(cli: &Cli) {
    match &cli.env_file {
        Some(env_file) => {
            if let Err(e) = dotenvy::from_path(env_file) {
                eprintln!("[racksh] Failed to load env file {}: {}", env_file.display(), e);
                process::exit(1);
            }
        }
        // A missing default `.env` is fine.
        None => {
            dotenvy::dotenv().ok();
        }
    }
}

async fn run(cli: &Cli, settings: Settings) -> Result<(), RackshError> {
    let overrides = host_overrides_or_default(settings.per_host_config.as_deref());
    let hosts = read_hosts(&cli.host_file())?;
    let command = cli.command();

    eprintln!(
        "[racksh] Running '{}' on {} hosts in {} mode.",
        command,
        hosts.len(),
        cli.command_type
    );
    let limit = settings.max_parallel;
    let engine = SshEngine::new(settings, overrides);
    let report = Dispatcher::new(&engine, limit)
        .run(cli.command_type, hosts, &command)
        .await?;

    // Per-host failures are reported above and never change the exit status.
    eprintln!(
        "[racksh] Done in {} batches: {} succeeded, {} failed, {} unreachable.",
        report.batches,
        report.succeeded(),
        report.failed(),
        report.unreachable()
    );
    Ok(())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    load_env(&cli);

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("[racksh] {}", e);
            process::exit(1);
        }
    };
    init_logging(cli.verbose, &settings.output_log, &settings.error_log);

    match run(&cli, settings).await {
        Ok(()) => {}
        Err(RackshError::HostFile(e)) => {
            println!("{}", e);
            process::exit(1);
        }
        Err(e) => {
            tracing::error!(
                target: ERROR_TARGET,
                host = %local_hostname(),
                exit_code = 1,
                command = %cli.command(),
                "{}",
                e
            );
            eprintln!("[racksh] {}", e);
            process::exit(1);
        }
    }
}
