//! Product log fan-out.
//!
//! The [`LogDispatcher`] forwards leveled records to a named, mutable set of
//! backends. Each backend filters by its own threshold and renders with its
//! own [`Formatter`]. This is the output users see on the console and in the
//! results directory; developer diagnostics go through `tracing` instead
//! (see [`crate::logging`]).

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, SecondsFormat};
use tracing::warn;

/// Severity of a log record. Lower severity numbers are more important.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Critical,
    Error,
    Warning,
    Skip,
    Pass,
    Cancel,
    Fail,
    Summary,
    Stderr,
    Stdout,
    Info,
    Debug,
}

impl Level {
    pub fn severity(self) -> u16 {
        match self {
            Level::Critical => 100,
            Level::Error => 200,
            Level::Warning => 300,
            Level::Skip => 301,
            Level::Pass => 302,
            Level::Cancel => 303,
            Level::Fail => 304,
            Level::Summary => 305,
            Level::Stderr => 306,
            Level::Stdout => 307,
            Level::Info => 400,
            Level::Debug => 500,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Level::Critical => "CRITICAL",
            Level::Error => "ERROR",
            Level::Warning => "WARNING",
            Level::Skip => "SKIP",
            Level::Pass => "PASS",
            Level::Cancel => "CANCEL",
            Level::Fail => "FAIL",
            Level::Summary => "SUMMARY",
            Level::Stderr => "STDERR",
            Level::Stdout => "STDOUT",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
        }
    }

    /// Outcome and summary lines use the short, untimestamped format.
    fn is_outcome(self) -> bool {
        matches!(
            self,
            Level::Pass | Level::Fail | Level::Skip | Level::Summary | Level::Cancel
        )
    }

    fn colour(self) -> Option<&'static str> {
        match self {
            Level::Critical => Some("\x1b[1;31m"), // Bold red
            Level::Error | Level::Stderr => Some("\x1b[31m"),
            Level::Warning => Some("\x1b[33m"),
            Level::Info => Some("\x1b[34m"),
            Level::Debug => Some("\x1b[37m"),
            Level::Skip => Some("\x1b[1;33m"),
            Level::Pass => Some("\x1b[1;32m"),
            Level::Cancel => Some("\x1b[1;35m"),
            Level::Fail => Some("\x1b[1;31m"),
            Level::Summary | Level::Stdout => None,
        }
    }

    /// Whether a backend with threshold `self` emits records at `level`.
    pub fn admits(self, level: Level) -> bool {
        level.severity() <= self.severity()
    }
}

/// Renders a record into one line of text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Formatter {
    pub coloured: bool,
}

impl Formatter {
    pub fn format(&self, timestamp: DateTime<Local>, level: Level, msg: &str) -> String {
        let mut tag = format!("[{:<8}]", level.name());
        if self.coloured
            && let Some(colour) = level.colour()
        {
            tag = format!("{colour}{tag}\x1b[0m");
        }
        if level.is_outcome() {
            format!("{tag} {msg}\n")
        } else {
            let stamp = timestamp.to_rfc3339_opts(SecondsFormat::Nanos, false);
            format!("{tag} {stamp}: {msg}\n")
        }
    }
}

/// A log destination.
pub trait Backend: Send + Sync {
    fn log(&self, timestamp: DateTime<Local>, level: Level, msg: &str);
}

/// Backend writing formatted records to any `Write` sink.
pub struct WriterBackend<W: Write + Send> {
    writer: Mutex<W>,
    formatter: Formatter,
    level: Level,
}

impl<W: Write + Send> WriterBackend<W> {
    pub fn new(writer: W, formatter: Formatter, level: Level) -> Self {
        Self {
            writer: Mutex::new(writer),
            formatter,
            level,
        }
    }

    pub fn into_inner(self) -> W {
        self.writer
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<W: Write + Send> Backend for WriterBackend<W> {
    fn log(&self, timestamp: DateTime<Local>, level: Level, msg: &str) {
        if !self.level.admits(level) {
            return;
        }
        let entry = self.formatter.format(timestamp, level, msg);
        let mut writer = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(err) = writer
            .write_all(entry.as_bytes())
            .and_then(|()| writer.flush())
        {
            warn!(err = %err, "failed to write log entry");
        }
    }
}

/// Console verbosity and colouring.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogConfig {
    /// Number of `-v` flags.
    pub verbosity: u8,
    pub coloured: bool,
}

impl LogConfig {
    pub fn console_level(&self) -> Level {
        match self.verbosity {
            0 => Level::Summary,
            1 => Level::Stderr,
            2 => Level::Info,
            _ => Level::Debug,
        }
    }

    /// Console backend writing to stderr.
    pub fn console(&self) -> WriterBackend<io::Stderr> {
        WriterBackend::new(
            io::stderr(),
            Formatter {
                coloured: self.coloured,
            },
            self.console_level(),
        )
    }
}

/// Uncoloured backend logging everything down to `Debug` into a new file.
pub fn file_backend(path: &Path) -> Result<WriterBackend<File>> {
    let file =
        File::create(path).with_context(|| format!("create log file {}", path.display()))?;
    Ok(WriterBackend::new(file, Formatter::default(), Level::Debug))
}

/// Fans records out to every registered backend.
#[derive(Default)]
pub struct LogDispatcher {
    backends: RwLock<HashMap<String, Arc<dyn Backend>>>,
}

impl LogDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward a record to every backend registered at the time of the call.
    pub fn log(&self, level: Level, msg: impl AsRef<str>) {
        let timestamp = Local::now();
        let backends: Vec<Arc<dyn Backend>> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for backend in backends {
            backend.log(timestamp, level, msg.as_ref());
        }
    }

    /// Add or replace the backend called `name`.
    pub fn register(&self, name: impl Into<String>, backend: Arc<dyn Backend>) {
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), backend);
    }

    pub fn unregister(&self, name: &str) {
        self.backends
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
    }

    /// A new dispatcher sharing the current backends.
    ///
    /// Backends registered on the fork are invisible to `self`, which keeps a
    /// per-test log file private to that test when tests run in parallel.
    pub fn fork(&self) -> LogDispatcher {
        let backends = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        LogDispatcher {
            backends: RwLock::new(backends),
        }
    }

    pub fn backend_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .backends
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }
}
