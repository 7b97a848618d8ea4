//! CLI definitions for AutoStudy.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// AutoStudy CLI.
#[derive(Parser)]
#[command(name = "autostudy")]
#[command(about = "Monitoring and alerting for the AutoStudy automation")]
#[command(version)]
pub(crate) struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config/autostudy.toml", global = true, env = "AUTOSTUDY_CONFIG")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Run the monitoring loops in foreground (default)
    Run {
        /// Stop after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration_secs: Option<u64>,

        /// Export metrics and logs to `<BASE>_metrics.json` / `<BASE>_logs.json` on exit
        #[arg(long, value_name = "BASE")]
        export: Option<PathBuf>,

        /// Hours of logs included in the export
        #[arg(long, default_value_t = 24)]
        export_hours: u32,
    },

    /// Sample the host once and print a health summary as JSON
    Health,

    /// Check the configuration file and report problems
    Validate,
}
