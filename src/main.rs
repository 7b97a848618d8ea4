//! AutoStudy - monitoring and alerting for the learning automation.
//!
//! Main entry point for the AutoStudy CLI.

mod cli;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use autostudy_config::{Config, ConfigLoader, ConfigValidator};
use autostudy_logstore::{LogCategory, LogEntry, LogLevel};
use autostudy_monitor::{DisplaySink, MetricsSample, MonitoringManager};

use crate::cli::{Cli, Commands};

/// Delay between the two host samples taken by `health`, so CPU usage has a baseline.
const HEALTH_SAMPLE_GAP: Duration = Duration::from_millis(500);

/// Initialize tracing with console and file output.
///
/// Log files are written to `<log_dir>/debug/` with daily rotation.
fn init_tracing(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let log_dir = PathBuf::from(ConfigLoader::expand_path(
        &config.logging.dir.to_string_lossy(),
    ))
    .join("debug");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix("autostudy")
        .filename_suffix("log")
        .max_log_files(30)
        .build(&log_dir)?;

    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // The writer thread flushes on guard drop; keep it for the whole process.
    static GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
        std::sync::OnceLock::new();
    let _ = GUARD.set(guard);

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_writer(non_blocking).with_ansi(false))
        .init();

    Ok(())
}

/// Prints a one-line status per sample and echoes warnings and errors.
struct TerminalSink;

impl DisplaySink for TerminalSink {
    fn on_status(&self, sample: &MetricsSample) {
        println!(
            "[{}] cpu {:>5.1}%  mem {:>5.1}%  disk {:>5.1}%  threads {:>3}  tasks {} running / {} failed  score {:.1}",
            sample.timestamp.format("%H:%M:%S"),
            sample.cpu_percent,
            sample.memory_percent,
            sample.disk_percent,
            sample.active_threads,
            sample.tasks.running,
            sample.tasks.failed,
            sample.performance_score(),
        );
    }

    fn on_log(&self, entry: &LogEntry) {
        if entry.level >= LogLevel::Warning {
            println!(
                "[{}] {} {}: {}",
                entry.timestamp.format("%H:%M:%S"),
                entry.level,
                entry.category,
                entry.message
            );
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = ConfigLoader::load_or_default(&cli.config)?;

    init_tracing(&config)?;

    match cli.command.unwrap_or(Commands::Run {
        duration_secs: None,
        export: None,
        export_hours: 24,
    }) {
        Commands::Run {
            duration_secs,
            export,
            export_hours,
        } => run_monitor(&cli.config, config, duration_secs, export, export_hours).await,
        Commands::Health => print_health(&config).await,
        Commands::Validate => validate_config(&cli.config, &config),
    }
}

/// Run the monitoring loops until Ctrl-C or the optional deadline.
async fn run_monitor(
    config_path: &Path,
    config: Config,
    duration_secs: Option<u64>,
    export: Option<PathBuf>,
    export_hours: u32,
) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting AutoStudy monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration: {}", config_path.display());

    let validation = ConfigValidator::validate(&config)?;
    for warning in &validation.warnings {
        warn!("Config warning at {}: {}", warning.path, warning.message);
    }
    for problem in &validation.errors {
        error!("Config error at {}: {}", problem.path, problem.message);
    }
    validation.into_result()?;

    let manager = MonitoringManager::from_config(&config)?;
    manager.add_display_sink(Arc::new(TerminalSink));
    manager.start();
    manager.info(LogCategory::System, "AutoStudy monitor running");

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {
                    info!("Run duration of {}s elapsed", secs);
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Interrupted");
                }
            }
        }
        None => {
            tokio::signal::ctrl_c().await?;
            info!("Interrupted");
        }
    }

    manager.stop().await;

    if let Some(base) = export {
        match manager.export_data(&base, export_hours) {
            Ok(paths) => {
                println!("Metrics exported to {}", paths.metrics.display());
                println!("Logs exported to {}", paths.logs.display());
            }
            Err(e) => error!("Export failed: {}", e),
        }
    }

    let health = manager.system_health();
    info!(
        score = health.performance_score,
        health = %health.health,
        errors = health.error_count,
        active_alerts = health.active_alerts,
        "Final system health"
    );

    manager.shutdown().await;
    Ok(())
}

/// Sample the host and print the health summary.
async fn print_health(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let manager = MonitoringManager::from_config(config)?;
    let collector = Arc::clone(manager.collector());

    let first = Arc::clone(&collector);
    tokio::task::spawn_blocking(move || first.tick()).await?;
    tokio::time::sleep(HEALTH_SAMPLE_GAP).await;
    tokio::task::spawn_blocking(move || collector.tick()).await?;

    let health = manager.system_health();
    println!("{}", serde_json::to_string_pretty(&health)?);

    manager.shutdown().await;
    Ok(())
}

/// Report configuration errors and warnings.
fn validate_config(path: &Path, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let result = ConfigValidator::validate(config)?;

    for warning in &result.warnings {
        println!("warning: {}: {}", warning.path, warning.message);
    }
    for error in &result.errors {
        println!("error: {}: {}", error.path, error.message);
    }

    if result.is_valid() {
        println!(
            "{} is valid ({} warning(s))",
            path.display(),
            result.warnings.len()
        );
        Ok(())
    } else {
        Err(format!(
            "{} has {} error(s)",
            path.display(),
            result.errors.len()
        )
        .into())
    }
}
