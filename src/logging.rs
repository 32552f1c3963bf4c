//! env_logger setup with an optional log file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Target, WriteStyle};
use log::LevelFilter;

/// Map a configured level name to a filter. `None` for unknown names.
pub fn parse_log_level(name: &str) -> Option<LevelFilter> {
    match name.trim().to_ascii_lowercase().as_str() {
        "verbose" | "debug" => Some(LevelFilter::Debug),
        "warning" | "warn" => Some(LevelFilter::Warn),
        "info" => Some(LevelFilter::Info),
        "error" => Some(LevelFilter::Error),
        _ => None,
    }
}

/// Writes everything to stdout and, if present, to a file.
struct TeeWriter {
    stdout: io::Stdout,
    file: Option<File>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stdout.write_all(buf)?;
        if let Some(file) = self.file.as_mut() {
            file.write_all(buf)?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.stdout.flush()?;
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Install the global logger.
///
/// `RUST_LOG`, when set, refines the configured level.
pub fn init(level: &str, file: Option<&Path>) -> io::Result<()> {
    let parsed = parse_log_level(level);

    let file = match file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };
    let to_file = file.is_some();

    let mut builder = Builder::new();
    builder
        .filter_level(parsed.unwrap_or(LevelFilter::Info))
        .parse_default_env()
        .format_timestamp_millis()
        .target(Target::Pipe(Box::new(TeeWriter {
            stdout: io::stdout(),
            file,
        })));
    if to_file {
        builder.write_style(WriteStyle::Never);
    }
    builder
        .try_init()
        .map_err(|e| io::Error::new(io::ErrorKind::AlreadyExists, e))?;

    if parsed.is_none() {
        log::warn!("Unknown log level '{}', using info", level);
    }
    Ok(())
}
