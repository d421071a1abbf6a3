//! In-memory log capture
//!
//! A `tracing` layer that keeps the most recent records so they can be
//! exported to a file on request, e.g. when a user wants to attach logs to
//! a bug report.

use chrono::{DateTime, Datelike, Local};
use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{debug, Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::{fmt as log_fmt, EnvFilter};

use crate::error::{VpnctlError, VpnctlResult};

/// Number of records kept in memory
pub const LOG_MAX: usize = 10_000;

const LOG_FILE_PREFIX: &str = "vpnctl";

/// One captured record
#[derive(Debug, Clone)]
pub struct LogRecord {
    pub timestamp: DateTime<Local>,
    pub level: Level,
    pub target: String,
    pub file: Option<String>,
    pub line: Option<u32>,
    pub message: String,
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.level {
            Level::TRACE => "Trace:",
            Level::DEBUG => "Debug:",
            Level::INFO => "Info:",
            Level::WARN => "Warning:",
            _ => "Critical:",
        };

        // Only the file name, not the full path
        let file = self
            .file
            .as_deref()
            .map(|path| path.rsplit(['/', '\\']).next().unwrap_or(path))
            .unwrap_or("");

        write!(
            f,
            "{} {} {} ({}:{}, {})",
            self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            self.message,
            file,
            self.line.unwrap_or(0),
            self.target
        )
    }
}

/// Bounded buffer of recent log records
#[derive(Clone)]
pub struct LogBuffer {
    records: Arc<Mutex<VecDeque<LogRecord>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new() -> Self {
        Self::with_capacity(LOG_MAX)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            records: Arc::new(Mutex::new(VecDeque::with_capacity(capacity.min(1024)))),
            capacity,
        }
    }

    /// Layer feeding this buffer
    pub fn layer(&self) -> LogBufferLayer {
        LogBufferLayer {
            buffer: self.clone(),
        }
    }

    /// Subscriber printing to stderr through `console_filter` while this
    /// buffer captures every record regardless of level
    pub fn subscriber(
        &self,
        console_filter: EnvFilter,
        ansi: bool,
    ) -> impl Subscriber + Send + Sync + 'static {
        let console = log_fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(ansi)
            .with_filter(console_filter);

        tracing_subscriber::registry().with(console).with(self.layer())
    }

    pub fn push(&self, record: LogRecord) {
        let Ok(mut records) = self.records.lock() else {
            return;
        };
        records.push_back(record);
        while records.len() > self.capacity {
            records.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All records rendered one per line
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Ok(records) = self.records.lock() {
            for record in records.iter() {
                let _ = writeln!(out, "{}", record);
            }
        }
        out
    }

    /// Write the buffer to `vpnctl-Y-M-D.txt` in `dir`, or to
    /// `vpnctl-Y-M-D_N.txt` with the first free N if that name is taken.
    pub fn write_to_dir(&self, dir: &Path) -> VpnctlResult<PathBuf> {
        if !dir.is_dir() {
            return Err(VpnctlError::Io(format!("Log directory {:?} does not exist", dir)));
        }

        let now = Local::now();
        let stem = format!("{}-{}-{}-{}", LOG_FILE_PREFIX, now.year(), now.month(), now.day());

        let mut path = dir.join(format!("{}.txt", stem));
        let mut index = 1;
        while path.exists() {
            debug!("{:?} exists, trying a new filename", path);
            path = dir.join(format!("{}_{}.txt", stem, index));
            index += 1;
        }

        std::fs::write(&path, self.render())?;
        debug!("Wrote logs into {:?}", path);
        Ok(path)
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// `tracing_subscriber` layer capturing events into a [`LogBuffer`]
pub struct LogBufferLayer {
    buffer: LogBuffer,
}

impl<S: Subscriber> Layer<S> for LogBufferLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        self.buffer.push(LogRecord {
            timestamp: Local::now(),
            level: *metadata.level(),
            target: metadata.target().to_string(),
            file: metadata.file().map(str::to_string),
            line: metadata.line(),
            message: visitor.message,
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
        } else {
            let _ = write!(self.message, " {}={:?}", field.name(), value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(message: &str) -> LogRecord {
        LogRecord {
            timestamp: Local.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            level: Level::INFO,
            target: "libvpnctl::controller".to_string(),
            file: Some("src/controller/mod.rs".to_string()),
            line: Some(42),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_record_format() {
        assert_eq!(
            record("Setting state: on").to_string(),
            "2026-01-02 03:04:05.000 Info: Setting state: on (mod.rs:42, libvpnctl::controller)"
        );
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let buffer = LogBuffer::with_capacity(3);
        for i in 0..5 {
            buffer.push(record(&format!("line {}", i)));
        }
        assert_eq!(buffer.len(), 3);
        let rendered = buffer.render();
        assert!(!rendered.contains("line 1"));
        assert!(rendered.contains("line 2"));
        assert!(rendered.contains("line 4"));
    }

    #[test]
    fn test_layer_captures_events() {
        let buffer = LogBuffer::new();
        let subscriber = tracing_subscriber::registry().with(buffer.layer());

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(state = "off", "Unexpected disconnection");
        });

        assert_eq!(buffer.len(), 1);
        let rendered = buffer.render();
        assert!(rendered.contains(" Warning: Unexpected disconnection"));
        assert!(rendered.contains("state=\"off\""));
    }

    #[test]
    fn test_buffer_ignores_console_filter() {
        let buffer = LogBuffer::new();
        let subscriber = buffer.subscriber(EnvFilter::new("error"), false);

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!("Arming grace timer");
            tracing::info!("Setting state: off");
        });

        assert_eq!(buffer.len(), 2);
        let rendered = buffer.render();
        assert!(rendered.contains("Debug: Arming grace timer"));
        assert!(rendered.contains("Info: Setting state: off"));
    }

    #[test]
    fn test_write_to_dir_picks_free_name() {
        let dir = tempfile::tempdir().unwrap();
        let buffer = LogBuffer::new();
        buffer.push(record("hello"));

        let first = buffer.write_to_dir(dir.path()).unwrap();
        let second = buffer.write_to_dir(dir.path()).unwrap();

        assert_ne!(first, second);
        assert!(second.file_name().unwrap().to_string_lossy().ends_with("_1.txt"));
        assert!(std::fs::read_to_string(&second).unwrap().contains("hello"));
    }

    #[test]
    fn test_write_to_missing_dir() {
        let buffer = LogBuffer::new();
        assert!(buffer.write_to_dir(Path::new("/nonexistent/vpnctl-logs")).is_err());
    }
}
