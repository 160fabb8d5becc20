//! Logging system configuration and initialization
//!
//! - Console output with optional file output
//! - Configuration based log level control with per-module filters
//! - Structured JSON logging (optional)
//! - Log files stored under the application data directory by default

use anyhow::{Result, anyhow};
use lazy_static::lazy_static;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::{EnvFilter, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub use crate::infrastructure::config::LoggingConfig;

// Global guard to keep the log file writer alive
lazy_static! {
    static ref LOG_GUARDS: Mutex<Vec<tracing_appender::non_blocking::WorkerGuard>> =
        Mutex::new(Vec::new());
}

/// Directory log files are written to
pub fn get_log_directory(config: &LoggingConfig) -> PathBuf {
    config
        .log_dir
        .clone()
        .unwrap_or_else(|| crate::infrastructure::config::app_data_dir().join("logs"))
}

/// Build the filter: `RUST_LOG` wins, otherwise the configured level plus module filters.
///
/// Dependency noise (SQL statements, HTTP internals) stays suppressed unless
/// the level is TRACE.
pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }

    let mut filter = EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("Invalid log level '{}': {}", config.level, e))?;

    if !config.level.to_lowercase().contains("trace") {
        let mut modules: Vec<_> = config.module_filters.iter().collect();
        modules.sort();
        for (module, level) in modules {
            let directive: Directive = format!("{module}={level}")
                .parse()
                .map_err(|e| anyhow!("Invalid log directive '{}={}': {}", module, level, e))?;
            filter = filter.add_directive(directive);
        }
        let sqlx_queries: Directive = "sqlx::query=warn"
            .parse()
            .map_err(|e| anyhow!("Invalid log directive: {}", e))?;
        filter = filter.add_directive(sqlx_queries);
    }

    Ok(filter)
}

/// Initialize logging with custom configuration
pub fn init_logging_with_config(config: &LoggingConfig) -> Result<()> {
    let env_filter = build_env_filter(config)?;
    let registry = Registry::default().with(env_filter);
    let log_dir = get_log_directory(config);

    match (config.file_output, config.console_output) {
        (true, console) => {
            std::fs::create_dir_all(&log_dir)
                .map_err(|e| anyhow!("Failed to create log directory {:?}: {}", log_dir, e))?;

            let file_appender = rolling::daily(&log_dir, &config.file_name);
            let (file_writer, file_guard) = non_blocking(file_appender);

            // Store the guard globally to prevent it from being dropped
            LOG_GUARDS
                .lock()
                .map_err(|_| anyhow!("Log guard registry poisoned"))?
                .push(file_guard);

            if config.json_format {
                let file_layer = fmt::Layer::new()
                    .json()
                    .with_writer(file_writer)
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_ansi(false);
                let console_layer = console.then(|| fmt::Layer::new().with_writer(std::io::stdout).with_target(false));
                registry
                    .with(file_layer)
                    .with(console_layer)
                    .try_init()
                    .map_err(|e| anyhow!("Failed to install subscriber: {}", e))?;
            } else {
                let file_layer = fmt::Layer::new()
                    .with_writer(file_writer)
                    .with_target(false)
                    .with_ansi(false);
                let console_layer = console.then(|| fmt::Layer::new().with_writer(std::io::stdout).with_target(false));
                registry
                    .with(file_layer)
                    .with(console_layer)
                    .try_init()
                    .map_err(|e| anyhow!("Failed to install subscriber: {}", e))?;
            }
        }
        (false, true) => {
            let console_layer = fmt::Layer::new().with_writer(std::io::stdout).with_target(false);
            registry
                .with(console_layer)
                .try_init()
                .map_err(|e| anyhow!("Failed to install subscriber: {}", e))?;
        }
        (false, false) => {
            return Err(anyhow!("No logging output configured"));
        }
    }

    info!("Logging system initialized");
    info!("Log level: {}", config.level);
    info!("JSON format: {}", config.json_format);
    if config.file_output {
        info!("Log directory: {:?}", log_dir);
    }

    Ok(())
}
