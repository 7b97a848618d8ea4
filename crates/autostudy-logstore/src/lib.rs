//! # AutoStudy Log Store
//!
//! Structured, categorised log entries for the automation flows.
//!
//! ## Features
//!
//! - Bounded in-memory window with level/category queries
//! - Running statistics and grouped error summaries
//! - Filters and handlers for forwarding entries to other consumers
//! - Daily rotated JSON-lines files, gzip-compressed on rotation

pub mod analysis;
pub mod entry;
pub mod error;
pub mod rotation;
pub mod sinks;
pub mod store;

pub use analysis::{ErrorSummary, LogStats};
pub use entry::{LogCategory, LogContext, LogEntry, LogLevel, LogRecord};
pub use error::LogStoreError;
pub use rotation::{RotatingFileWriter, RotationPolicy};
pub use store::{HandlerError, LogStore, LogStoreConfig};
