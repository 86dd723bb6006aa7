use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Log file name inside the log directory
const LOG_FILE_NAME: &str = "baseline-rs.log";

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (trace, debug, info, warn, error or a full EnvFilter string)
    pub level: String,
    /// Write to stderr
    pub console: bool,
    /// Write to a rolling file in `dir`
    pub file: bool,
    pub dir: PathBuf,
    pub rotation: LogRotation,
    /// JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogRotation {
    Daily,
    Hourly,
    Never,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            file: false,
            dir: PathBuf::from("logs"),
            rotation: LogRotation::Daily,
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Filter from `RUST_LOG` if set, otherwise from the configured level
    pub fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.level))
            .unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer when dropped; keep it alive for
/// the life of the process.
pub fn init_logging(config: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let console_layer = config.console.then(|| {
        let layer = fmt::layer().with_writer(std::io::stderr).with_target(false);
        if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    });

    let (file_layer, guard) = if config.file {
        ensure_log_dir(&config.dir)?;
        let appender = match config.rotation {
            LogRotation::Daily => rolling::daily(&config.dir, LOG_FILE_NAME),
            LogRotation::Hourly => rolling::hourly(&config.dir, LOG_FILE_NAME),
            LogRotation::Never => rolling::never(&config.dir, LOG_FILE_NAME),
        };
        let (writer, guard) = non_blocking(appender);
        let layer = fmt::layer().with_writer(writer).with_ansi(false);
        let layer = if config.json {
            layer.json().boxed()
        } else {
            layer.boxed()
        };
        (Some(layer), Some(guard))
    } else {
        (None, None)
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(console_layer)
        .with(file_layer)
        .try_init()?;

    tracing::debug!(
        "Logging initialized (level={}, console={}, file={})",
        config.level,
        config.console,
        config.file
    );
    if config.file {
        tracing::debug!("Log directory: {}", config.dir.display());
    }

    Ok(guard)
}

fn ensure_log_dir(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir)?;
    }
    Ok(())
}
