//! Daily, size-bounded log file rotation with gzip compression and retention.
//!
//! Files are named `{prefix}_{YYYY-MM-DD}.log` for the first part of a day and
//! `{prefix}_{YYYY-MM-DD}.{n}.log` for further parts once the size bound is hit.
//! A closed part is compressed to `<name>.log.gz` when compression is enabled.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, warn};

const DATE_FORMAT: &str = "%Y-%m-%d";

/// How files are rotated and retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Size bound of a single part, in bytes.
    pub max_bytes: u64,
    /// Files dated more than this many days ago are deleted.
    pub retention_days: u32,
    /// Gzip closed parts.
    pub compression: bool,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 100 * 1024 * 1024,
            retention_days: 30,
            compression: true,
        }
    }
}

struct OpenPart {
    file: File,
    path: PathBuf,
    date: NaiveDate,
    part: u32,
    size: u64,
}

/// An append-only writer that rotates daily and by size.
pub struct RotatingFileWriter {
    dir: PathBuf,
    prefix: String,
    policy: RotationPolicy,
    current: Option<OpenPart>,
}

impl RotatingFileWriter {
    /// Create the writer, compressing stale parts and applying retention.
    pub fn new(
        dir: impl Into<PathBuf>,
        prefix: impl Into<String>,
        policy: RotationPolicy,
    ) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        let writer = Self {
            dir,
            prefix: prefix.into(),
            policy,
            current: None,
        };
        let today = Utc::now().date_naive();
        writer.housekeeping(today);
        Ok(writer)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the part currently open for writing, if any.
    pub fn current_path(&self) -> Option<&Path> {
        self.current.as_ref().map(|p| p.path.as_path())
    }

    /// File name for a given day and part.
    pub fn file_name(&self, date: NaiveDate, part: u32) -> String {
        if part == 0 {
            format!("{}_{}.log", self.prefix, date.format(DATE_FORMAT))
        } else {
            format!("{}_{}.{}.log", self.prefix, date.format(DATE_FORMAT), part)
        }
    }

    /// Append `buf` to the part for `date`, rotating first when needed.
    pub fn write_on(&mut self, date: NaiveDate, buf: &[u8]) -> io::Result<usize> {
        let needs_rotation = match &self.current {
            None => true,
            Some(open) => {
                open.date != date
                    || (open.size > 0 && open.size + buf.len() as u64 > self.policy.max_bytes)
            }
        };

        if needs_rotation {
            self.rotate(date)?;
        }

        let Some(open) = self.current.as_mut() else {
            return Err(io::Error::other("no log file open"));
        };
        open.file.write_all(buf)?;
        open.size += buf.len() as u64;
        Ok(buf.len())
    }

    fn rotate(&mut self, date: NaiveDate) -> io::Result<()> {
        let day_changed = self.current.as_ref().is_some_and(|open| open.date != date);

        let next_part = match self.current.take() {
            Some(open) => {
                let OpenPart {
                    file,
                    path,
                    date: open_date,
                    part,
                    ..
                } = open;
                drop(file);
                if self.policy.compression {
                    compress_file(&path);
                }
                if open_date == date { part + 1 } else { 0 }
            }
            None => self.resume_part(date),
        };

        if day_changed {
            self.housekeeping(date);
        }

        let path = self.dir.join(self.file_name(date, next_part));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        debug!(path = %path.display(), part = next_part, "Opened log file");

        self.current = Some(OpenPart {
            file,
            path,
            date,
            part: next_part,
            size,
        });
        Ok(())
    }

    /// Pick the part to continue on startup: the highest existing part for
    /// `date` if it is still uncompressed and under the size bound, otherwise
    /// the one after it.
    fn resume_part(&self, date: NaiveDate) -> u32 {
        let mut highest: Option<(u32, bool)> = None;
        for name in self.list_files() {
            let Some((file_date, part, compressed)) = self.parse_name(&name) else {
                continue;
            };
            if file_date != date {
                continue;
            }
            if highest.is_none_or(|(p, _)| part > p) {
                highest = Some((part, compressed));
            }
        }

        match highest {
            None => 0,
            Some((part, true)) => part + 1,
            Some((part, false)) => {
                let path = self.dir.join(self.file_name(date, part));
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if size < self.policy.max_bytes { part } else { part + 1 }
            }
        }
    }

    /// Compress parts from earlier days and delete files past retention.
    fn housekeeping(&self, today: NaiveDate) {
        let cutoff = today - Duration::days(i64::from(self.policy.retention_days));
        for name in self.list_files() {
            let Some((date, _, compressed)) = self.parse_name(&name) else {
                continue;
            };
            let path = self.dir.join(&name);
            if date < cutoff {
                match fs::remove_file(&path) {
                    Ok(()) => debug!(path = %path.display(), "Deleted expired log file"),
                    Err(e) => warn!(path = %path.display(), error = %e, "Failed to delete expired log file"),
                }
            } else if date < today && !compressed && self.policy.compression {
                compress_file(&path);
            }
        }
    }

    fn list_files(&self) -> Vec<String> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Failed to list log directory");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .collect()
    }

    /// Parse `{prefix}_{date}[.{part}].log[.gz]` into (date, part, compressed).
    fn parse_name(&self, name: &str) -> Option<(NaiveDate, u32, bool)> {
        let rest = name.strip_prefix(&self.prefix)?.strip_prefix('_')?;
        let (rest, compressed) = match rest.strip_suffix(".gz") {
            Some(stripped) => (stripped, true),
            None => (rest, false),
        };
        let rest = rest.strip_suffix(".log")?;
        let date_str = rest.get(..10)?;
        let date = NaiveDate::parse_from_str(date_str, DATE_FORMAT).ok()?;
        let part = match &rest[10..] {
            "" => 0,
            suffix => suffix.strip_prefix('.')?.parse().ok()?,
        };
        Some((date, part, compressed))
    }
}

impl Write for RotatingFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_on(Utc::now().date_naive(), buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.current.as_mut() {
            Some(open) => open.file.flush(),
            None => Ok(()),
        }
    }
}

/// Gzip `path` to `path.gz` and remove the original. Failures are logged.
fn compress_file(path: &Path) {
    if let Err(e) = try_compress(path) {
        warn!(path = %path.display(), error = %e, "Failed to compress log file");
    }
}

fn try_compress(path: &Path) -> io::Result<()> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");
    let gz_path = PathBuf::from(gz_name);

    let mut input = File::open(path)?;
    let output = File::create(&gz_path)?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)?;
    debug!(path = %gz_path.display(), "Compressed log file");
    Ok(())
}

#[cfg(test)]
#[path = "rotation_tests.rs"]
mod tests;
