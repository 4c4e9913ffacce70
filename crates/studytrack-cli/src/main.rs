//! studytrack - command-line front end for the study tracker.
//!
//! Logs in against the study-tracking backend, keeps the session across
//! runs, and lists or edits subjects, study sessions, progress and tips.

mod app;
mod commands;

use std::io;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use studytrack_core::{Config, HttpTransport, SessionManager};

use app::{App, CliObserver};
use commands::{Command, USAGE};

/// Directory for an additional daily-rolling log file
const LOG_DIR_ENV: &str = "STUDYTRACK_LOG_DIR";

/// Initialize the tracing subscriber for logging.
/// The returned guard must live until exit so buffered file logs are flushed.
fn init_tracing() -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match std::env::var(LOG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => {
            let appender = tracing_appender::rolling::daily(dir, "studytrack.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        _ => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&args) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load()?;
    info!(base_url = %config.base_url, "studytrack starting");

    let transport = Arc::new(HttpTransport::new(&config.base_url, config.request_timeout())?);
    let session = Arc::new(SessionManager::init(
        config.credential_store()?,
        transport,
        Arc::new(CliObserver),
    ));

    let mut app = App::new(config, session);
    let result = app.run(command).await;

    info!("studytrack finished");
    drop(log_guard);

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}
