//! # AutoStudy Config
//!
//! Configuration for the monitoring pipeline: log store, metrics collector,
//! detection loop, notification channels and alert rules.

mod error;
mod loader;
mod schema;
mod validator;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::*;
pub use validator::{ConfigValidator, ValidationError, ValidationResult, ValidationWarning};
