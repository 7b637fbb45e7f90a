//! Tracing subscriber setup: stdout plus an optional rolling log file.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

use crate::config::{Config, LogFormat};
use crate::error::{Error, Result};

/// Rotated files kept next to the active one.
const MAX_LOG_FILES: usize = 3;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Keeps the file writer flushing until dropped.
pub struct TelemetryGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber. Hold the returned guard for the life of
/// the process or buffered file output is lost.
pub fn init(config: &Config) -> Result<TelemetryGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("wallpaper_api={},tower_http=debug", config.log_level.to_lowercase()).into()
    });

    let mut layers: Vec<BoxedLayer> = vec![stdout_layer(config.log_format)];

    let file = match &config.log_file {
        Some(path) => {
            let (layer, guard) = file_layer(path, config.log_format)?;
            layers.push(layer);
            Some(guard)
        }
        None => None,
    };

    layers.push(Box::new(filter));
    tracing_subscriber::registry().with(layers).init();

    Ok(TelemetryGuard { _file: file })
}

fn stdout_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => Box::new(tracing_subscriber::fmt::layer().json()),
        LogFormat::Pretty => Box::new(tracing_subscriber::fmt::layer()),
    }
}

/// Daily-rotated file layer. `path` names the active file, e.g.
/// `logs/application.log` rolls as `logs/application.<date>.log`.
pub fn file_layer(path: &Path, format: LogFormat) -> Result<(BoxedLayer, WorkerGuard)> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let prefix = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .ok_or_else(|| Error::Config(format!("Invalid log file path: {}", path.display())))?;
    let mut builder = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(prefix)
        .max_log_files(MAX_LOG_FILES);
    if let Some(ext) = path.extension().and_then(|ext| ext.to_str()) {
        builder = builder.filename_suffix(ext);
    }
    let appender = builder
        .build(dir)
        .map_err(|e| Error::Config(format!("Failed to open log file {}: {}", path.display(), e)))?;

    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer: BoxedLayer = match format {
        LogFormat::Json => Box::new(
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false),
        ),
        LogFormat::Pretty => Box::new(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false),
        ),
    };
    Ok((layer, guard))
}
