//! Structured logging for the JX server
//!
//! Pretty console output for development, JSON for production, and daily
//! rotated files when `output` asks for them.

use std::str::FromStr;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LoggingConfig;

const LOG_FILE: &str = "jx-server.log";

/// Log format configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable format for development
    Pretty,
    /// JSON format for production
    Json,
    /// Compact format for testing
    Compact,
}

impl FromStr for LogFormat {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "json" => LogFormat::Json,
            "compact" => LogFormat::Compact,
            _ => LogFormat::Pretty,
        })
    }
}

/// Log output configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogOutput {
    Stdout,
    File,
    Both,
}

impl FromStr for LogOutput {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "file" => LogOutput::File,
            "both" => LogOutput::Both,
            _ => LogOutput::Stdout,
        })
    }
}

fn filter(level: &str) -> anyhow::Result<EnvFilter> {
    let filter = EnvFilter::try_new(level)?
        .add_directive("hyper=warn".parse()?)
        .add_directive("tokio=warn".parse()?)
        .add_directive("tower=warn".parse()?)
        .add_directive("h2=warn".parse()?);
    Ok(filter)
}

fn file_appender(directory: &str) -> anyhow::Result<RollingFileAppender> {
    std::fs::create_dir_all(directory)?;
    Ok(RollingFileAppender::new(Rotation::DAILY, directory, LOG_FILE))
}

/// Initialize the global subscriber.
///
/// ```bash
/// # Development: pretty console output at debug level
/// RUST_LOG=debug LOG_FORMAT=pretty jx-server
///
/// # Production: JSON to file
/// RUST_LOG=info LOG_FORMAT=json LOG_OUTPUT=file LOG_DIR=/var/log/jx jx-server
/// ```
pub fn init(config: &LoggingConfig) -> anyhow::Result<()> {
    let format: LogFormat = config.format.parse()?;
    let output: LogOutput = config.output.parse()?;

    let console = match format {
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_thread_ids(true)
            .with_target(true)
            .boxed(),
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Compact => fmt::layer().compact().boxed(),
    };
    let file = match output {
        LogOutput::Stdout => None,
        LogOutput::File | LogOutput::Both => Some(
            fmt::layer()
                .with_writer(file_appender(&config.directory)?)
                .with_ansi(false)
                .boxed(),
        ),
    };
    let console = (output != LogOutput::File).then_some(console);

    tracing_subscriber::registry()
        .with(filter(&config.level)?)
        .with(console)
        .with(file)
        .try_init()?;

    tracing::info!(format = ?format, output = ?output, level = %config.level, "Logging initialized");
    if output != LogOutput::Stdout {
        tracing::debug!(directory = %config.directory, "Writing log files");
    }
    Ok(())
}
