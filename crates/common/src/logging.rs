//! Logging and tracing initialization.

use std::fs::OpenOptions;
use std::sync::Mutex;

use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Initialize the tracing subscriber with the given configuration.
///
/// `RUST_LOG` takes precedence over `config.level`. When `config.file` is
/// set and can be opened, events are appended there instead of stderr.
pub fn init_logging(config: &LoggingConfig) {
    let log_file = config.file.as_ref().and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("keyroll: cannot open log file {}: {e}", path.display());
                None
            }
        }
    });

    match log_file {
        Some(file) => install(config, Mutex::new(file), false),
        None => install(config, std::io::stderr, true),
    }
}

fn install<W>(config: &LoggingConfig, writer: W, ansi: bool)
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    } else {
        let subscriber = fmt::Subscriber::builder()
            .with_env_filter(env_filter)
            .with_writer(writer)
            .with_ansi(ansi)
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .finish();
        tracing::subscriber::set_global_default(subscriber).ok();
    }
}

/// Initialize logging with defaults (useful for tests and quick scripts).
pub fn init_default_logging() {
    init_logging(&LoggingConfig::default());
}
