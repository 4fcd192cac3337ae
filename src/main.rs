use std::process::ExitCode;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::{error, warn};

use rewrite_xml::{BatchResults, Cli, ConfigManager, Output, RewriteEngine, logging};

/// Exit status for configuration problems
const EXIT_CONFIG_ERROR: u8 = 2;
/// Exit status when at least one file failed
const EXIT_FILE_FAILURE: u8 = 1;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(cli.verbosity());

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(EXIT_CONFIG_ERROR);
    }

    let engine = match ConfigManager::load_config(&cli)
        .await
        .and_then(RewriteEngine::new)
    {
        Ok(engine) => engine,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    match run(&engine).await {
        Ok(results) => {
            print!("{}", Output::new(cli.verbosity()).format_results(&results));
            if results.has_failures() {
                ExitCode::from(EXIT_FILE_FAILURE)
            } else {
                ExitCode::SUCCESS
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(EXIT_FILE_FAILURE)
        }
    }
}

async fn run(engine: &RewriteEngine) -> anyhow::Result<BatchResults> {
    let cancelled = engine.cancellation_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing files in progress");
            cancelled.store(true, Ordering::SeqCst);
        }
    });

    engine.run().await.with_context(|| {
        format!(
            "rewriting {} failed",
            engine.config().input_directory.display()
        )
    })
}
