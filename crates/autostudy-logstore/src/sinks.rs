//! On-disk JSON-lines sinks.

use std::io::{self, Write};
use std::path::Path;

use tracing::warn;
use tracing_appender::non_blocking::{NonBlocking, NonBlockingBuilder, WorkerGuard};

use crate::entry::{LogCategory, LogEntry};
use crate::rotation::{RotatingFileWriter, RotationPolicy};

struct Sink {
    name: &'static str,
    writer: NonBlocking,
    _guard: WorkerGuard,
}

impl Sink {
    fn open(dir: &Path, name: &'static str, policy: RotationPolicy) -> io::Result<Self> {
        let file = RotatingFileWriter::new(dir, name, policy)?;
        let (writer, guard) = NonBlockingBuilder::default()
            .lossy(false)
            .thread_name(&format!("logstore-{}", name))
            .finish(file);
        Ok(Self {
            name,
            writer,
            _guard: guard,
        })
    }

    fn append(&mut self, line: &[u8]) {
        if let Err(e) = self.writer.write_all(line) {
            warn!(sink = self.name, error = %e, "Failed to append log line");
        }
    }
}

/// The structured, error and performance files.
///
/// Dropping the sinks flushes pending lines and stops the writer threads.
pub(crate) struct FileSinks {
    structured: Sink,
    errors: Sink,
    performance: Sink,
}

impl FileSinks {
    pub(crate) fn open(dir: &Path, policy: RotationPolicy) -> io::Result<Self> {
        Ok(Self {
            structured: Sink::open(dir, "structured", policy)?,
            errors: Sink::open(dir, "error", policy)?,
            performance: Sink::open(dir, "performance", policy)?,
        })
    }

    /// Serialize `entry` as one JSON line.
    pub(crate) fn encode(entry: &LogEntry) -> Option<Vec<u8>> {
        match serde_json::to_vec(entry) {
            Ok(mut line) => {
                line.push(b'\n');
                Some(line)
            }
            Err(e) => {
                warn!(error = %e, "Failed to serialize log entry");
                None
            }
        }
    }

    /// Route an encoded line to the files `entry` belongs in.
    pub(crate) fn write_line(&mut self, entry: &LogEntry, line: &[u8]) {
        self.structured.append(line);
        if entry.level.is_error() {
            self.errors.append(line);
        }
        if entry.category == LogCategory::Performance {
            self.performance.append(line);
        }
    }
}
