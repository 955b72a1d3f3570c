use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use anyhow::{Context, Result};
use chrono::Local;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Sink for human-readable diagnostic lines.
///
/// Logging is fire and forget: implementations must not block the caller
/// for long and never report failures back.
pub trait DiagnosticSink: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);

    /// Wait until everything logged so far has reached its destination
    fn flush(&self) {}
}

fn emit_tracing(level: LogLevel, message: &str) {
    match level {
        LogLevel::Debug => tracing::debug!("{}", message),
        LogLevel::Info => tracing::info!("{}", message),
        LogLevel::Warning => tracing::warn!("{}", message),
        LogLevel::Error => tracing::error!("{}", message),
    }
}

/// Forwards diagnostics to the tracing subscriber only
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn log(&self, level: LogLevel, message: &str) {
        emit_tracing(level, message);
    }
}

enum LogCommand {
    Line(String),
    Clear,
    Sync(flume::Sender<()>),
}

/// Appends diagnostics to a file from a dedicated writer thread.
///
/// Lines are written in the order `log` was called. Each line is also
/// forwarded to tracing so it shows up on the console.
pub struct FileSink {
    tx: flume::Sender<LogCommand>,
    path: PathBuf,
}

impl FileSink {
    /// Open (or create) the log file and start the writer thread
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file: {}", path.display()))?;

        let (tx, rx) = flume::unbounded::<LogCommand>();
        let writer_path = path.clone();

        thread::Builder::new()
            .name("diagnostic-log".to_string())
            .spawn(move || run_writer(file, writer_path, rx))
            .context("Failed to spawn log writer thread")?;

        let sink = Self { tx, path };
        sink.log(
            LogLevel::Info,
            &format!("Logger initialized. Log file: {}", sink.path.display()),
        );
        Ok(sink)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Truncate the log file
    pub fn clear(&self) {
        let _ = self.tx.send(LogCommand::Clear);
    }

    /// Block until every line logged so far has been written
    pub fn sync(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        if self.tx.send(LogCommand::Sync(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl DiagnosticSink for FileSink {
    fn log(&self, level: LogLevel, message: &str) {
        emit_tracing(level, message);

        let timestamp = Local::now().format(TIMESTAMP_FORMAT);
        let line = format!("[{}] [{}] {}\n", timestamp, level.as_str(), message);
        let _ = self.tx.send(LogCommand::Line(line));
    }

    fn flush(&self) {
        self.sync();
    }
}

fn run_writer(mut file: File, path: PathBuf, rx: flume::Receiver<LogCommand>) {
    while let Ok(cmd) = rx.recv() {
        match cmd {
            LogCommand::Line(line) => {
                if let Err(e) = file.write_all(line.as_bytes()) {
                    tracing::debug!("Failed to write log line to {}: {}", path.display(), e);
                }
            }
            LogCommand::Clear => {
                if let Err(e) = file.set_len(0) {
                    tracing::debug!("Failed to clear log file {}: {}", path.display(), e);
                }
            }
            LogCommand::Sync(done) => {
                let _ = file.flush();
                let _ = done.send(());
            }
        }
    }
}
