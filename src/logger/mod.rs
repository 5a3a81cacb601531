//! Asynchronous buffered logger.
//!
//! The store must never stall on logging, so every log call is a
//! non-blocking `try_send` into a bounded channel; a background worker task
//! drains the channel and writes JSON lines to the configured sink (a file,
//! or stdout with ANSI level colors). When the buffer is saturated the
//! record is dropped silently.
//!
//! A disabled logger ([`Logger::disabled`]) spawns nothing and every call on
//! it is a no-op, so the store can log unconditionally.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Log severity, ordered from most to least verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn color(self) -> &'static str {
        match self {
            LogLevel::Debug => "\x1b[36m",
            LogLevel::Info => "\x1b[32m",
            LogLevel::Warn => "\x1b[33m",
            LogLevel::Error => "\x1b[31m",
        }
    }
}

/// One record on the wire between callers and the writer task.
#[derive(Debug, Serialize)]
struct LogRecord {
    /// Seconds since the unix epoch, with sub-second precision.
    ts: f64,
    level: LogLevel,
    message: String,
}

enum LogSink {
    Stdout(std::io::Stdout),
    File(std::fs::File),
}

impl LogSink {
    fn write_record(&mut self, record: &LogRecord) {
        let Ok(line) = serde_json::to_string(record) else {
            return;
        };
        match self {
            LogSink::Stdout(out) => {
                let mut lock = out.lock();
                let _ = writeln!(lock, "{}{}\x1b[0m", record.level.color(), line);
            }
            LogSink::File(file) => {
                let _ = writeln!(file, "{}", line);
            }
        }
    }

    fn flush(&mut self) {
        match self {
            LogSink::Stdout(out) => {
                let _ = out.lock().flush();
            }
            LogSink::File(file) => {
                let _ = file.flush();
            }
        }
    }
}

struct LoggerInner {
    tx: mpsc::Sender<LogRecord>,
    shutdown_tx: watch::Sender<bool>,
    worker: StdMutex<Option<JoinHandle<()>>>,
    min_level: LogLevel,
}

/// Handle to the asynchronous logger. Cheap to clone; all clones feed the
/// same writer task.
///
/// **Note:** an enabled logger spawns its writer on the current tokio
/// runtime, so it must be created inside one.
#[derive(Clone)]
pub struct Logger {
    inner: Option<Arc<LoggerInner>>,
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("enabled", &self.inner.is_some())
            .finish()
    }
}

impl Logger {
    /// A logger whose every call is a no-op.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Creates an enabled logger writing to `log_file`, or stdout when
    /// `log_file` is `None`. Fails only if the file cannot be opened.
    pub fn new(
        log_file: Option<&Path>,
        buffer_size: usize,
        min_level: LogLevel,
    ) -> std::io::Result<Self> {
        let sink = match log_file {
            Some(path) => LogSink::File(
                OpenOptions::new().create(true).append(true).open(path)?,
            ),
            None => LogSink::Stdout(std::io::stdout()),
        };

        let buffer_size = if buffer_size == 0 { 1000 } else { buffer_size };
        let (tx, rx) = mpsc::channel(buffer_size);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let worker = tokio::spawn(writer_loop(sink, rx, shutdown_rx));

        Ok(Self {
            inner: Some(Arc::new(LoggerInner {
                tx,
                shutdown_tx,
                worker: StdMutex::new(Some(worker)),
                min_level,
            })),
        })
    }

    /// Whether records are being written at all.
    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message);
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        let Some(inner) = &self.inner else { return };
        if level < inner.min_level {
            return;
        }
        let record = LogRecord {
            ts: unix_now(),
            level,
            message: message.into(),
        };
        // Full buffer drops the record; the caller never blocks.
        let _ = inner.tx.try_send(record);
    }

    /// Signals the writer to stop, drains buffered records, and joins it.
    /// Safe to call more than once; later calls are no-ops.
    pub async fn close(&self) {
        let Some(inner) = &self.inner else { return };
        let _ = inner.shutdown_tx.send(true);
        let handle = inner.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

async fn writer_loop(
    mut sink: LogSink,
    mut rx: mpsc::Receiver<LogRecord>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            record = rx.recv() => {
                match record {
                    Some(record) => sink.write_record(&record),
                    None => break,
                }
            }
            result = shutdown_rx.changed() => {
                if result.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    // Drain whatever was buffered before the shutdown signal.
    while let Ok(record) = rx.try_recv() {
        sink.write_record(&record);
    }
    sink.flush();
}
