//! Pubfeed CLI - Main entry point

use clap::Parser;
use pubfeed_cli::commands::import::ImportOptions;
use pubfeed_cli::{Cli, Commands};
use pubfeed_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tracing::error;

fn main() {
    let cli = Cli::parse();

    // Verbose: debug to the console; otherwise warnings only
    let log_config = if cli.verbose {
        LogConfig::builder()
            .level(LogLevel::Debug)
            .output(LogOutput::Console)
            .log_file_prefix("pubfeed".to_string())
            .build()
    } else {
        LogConfig::builder()
            .level(LogLevel::Warn)
            .output(LogOutput::Console)
            .log_file_prefix("pubfeed".to_string())
            .build()
    };

    // Environment variables take precedence
    let log_config = log_config.clone().with_env().unwrap_or(log_config);

    // The CLI works without logging
    let _guard = init_logging(&log_config).ok();

    if let Err(e) = execute_command(&cli) {
        error!(error = %e, "Command failed");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn execute_command(cli: &Cli) -> pubfeed_cli::Result<()> {
    match &cli.command {
        Commands::Import {
            publisher,
            record_type,
            file,
            dir,
            dry_run,
        } => pubfeed_cli::commands::import::run(
            cli,
            ImportOptions {
                publisher: publisher.clone(),
                record_type: record_type.clone(),
                file: file.clone(),
                dir: dir.clone(),
                dry_run: *dry_run,
            },
        ),
        Commands::Config => pubfeed_cli::commands::config::run(cli),
        Commands::InitStore => pubfeed_cli::commands::init_store::run(cli),
    }
}
