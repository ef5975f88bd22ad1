//! Tally CLI - Main entry point

use clap::Parser;
use std::process;
use tally_cli::commands::dispatch::Workers;
use tally_cli::{Cli, Commands};
use tally_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use tracing::error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.markdown_help {
        println!("{}", clap_markdown::help_markdown::<Cli>());
        return;
    }

    let Some(command) = cli.command.as_ref() else {
        eprintln!("Error: A subcommand is required");
        eprintln!();
        eprintln!("For more information, try '--help'.");
        process::exit(2);
    };

    let log_config = LogConfig::builder()
        .level(if cli.verbose { LogLevel::Debug } else { LogLevel::Warn })
        .output(LogOutput::Console)
        .log_file_prefix("tally-cli")
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // The CLI works without logging
    let _ = init_logging(&log_config);

    if let Err(e) = execute_command(command).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn execute_command(command: &Commands) -> tally_cli::Result<()> {
    match command {
        Commands::Run { job, data, pretty } => tally_cli::commands::run::run(job, data, *pretty).await,
        Commands::Dispatch {
            job,
            data,
            workers,
            local_workers,
            divisions,
            timeout_secs,
            pretty,
        } => {
            let workers = match local_workers {
                Some(count) => Workers::Local(*count),
                None => Workers::Http {
                    endpoints: workers.clone(),
                    timeout_secs: *timeout_secs,
                },
            };
            tally_cli::commands::dispatch::run(job, data, workers, *divisions, *pretty).await
        },
        Commands::Validate { job } => tally_cli::commands::validate::run(job),
        Commands::Components { json } => tally_cli::commands::components::run(*json),
    }
}
