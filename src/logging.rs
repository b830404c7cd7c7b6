//! tracing subscriber setup.
//!
//! `RUST_LOG` wins over the configured level. Output goes to stderr through
//! a non-blocking writer, and optionally to a daily-rolling file.

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::config::{LogFormat, LoggingSection};

/// Keeps the background log writers alive. Drop it last.
pub struct LogGuards {
    _guards: Vec<WorkerGuard>,
}

fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

/// Install the global subscriber. `verbose` forces debug level.
pub fn init(settings: &LoggingSection, verbose: bool) -> Result<LogGuards> {
    let level = if verbose { "debug" } else { settings.level.as_str() };
    let mut guards = Vec::new();

    let (stderr, guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(guard);
    let stderr_layer = match settings.format {
        LogFormat::Json => fmt::layer().json().with_writer(stderr).boxed(),
        LogFormat::Pretty => fmt::layer().with_target(false).with_writer(stderr).boxed(),
    };

    let file_layer = match &settings.directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "installsync.log");
            let (file, guard) = tracing_appender::non_blocking(appender);
            guards.push(guard);
            Some(fmt::layer().json().with_writer(file).boxed())
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(stderr_layer)
        .with(file_layer)
        .try_init()?;

    Ok(LogGuards { _guards: guards })
}
