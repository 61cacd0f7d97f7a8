pub mod archive;
pub mod auto_backup;
pub mod cli;
pub mod config;
pub mod database;
pub mod logger;
pub mod playthrough_index;

use clap::Parser;

use crate::logger::LogConfig;

/// Entry point used by the binary: parse arguments, install logging and run
/// the requested command on a tokio runtime.
pub fn run() -> anyhow::Result<()> {
    let cli = cli::Cli::parse();

    let log_config = LogConfig {
        level: if cli.verbose { "debug" } else { "info" }.to_string(),
        enable_console_output: cli.verbose,
        ..LogConfig::default()
    };
    // keep the guard alive so buffered log lines are flushed on exit
    let _guard = match logger::initialize_logging_with_config(log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let result = runtime.block_on(cli::dispatch(cli));
    if let Err(e) = &result {
        logger::error("APP", "Command failed", Some(&format!("{:#}", e)));
    }
    result
}
