//! Centralized logging
//!
//! Console output always. With `logging.dir` set, also writes daily-rolling
//! files separated by log type:
//! - {dir}/main - all logs, JSON
//! - {dir}/error - warnings and errors only
//! - {dir}/store - store reads and writes
//! - {dir}/api - HTTP server logs

use crate::infrastructure::config::LoggingConfig;
use std::fs;
use std::io;
use std::path::Path;
use tracing::Subscriber;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
    EnvFilter,
};

const LOG_TYPES: [&str; 4] = ["main", "error", "store", "api"];

/// Install the global subscriber
///
/// `RUST_LOG` overrides `config.level`. Returns the WorkerGuards of the file
/// writers, which must be kept alive for the duration of the program.
pub fn init_logging(config: &LoggingConfig) -> io::Result<Vec<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let Some(dir) = config.dir.as_deref() else {
        console_subscriber(filter).try_init().map_err(io::Error::other)?;
        return Ok(Vec::new());
    };

    let (subscriber, guards) = file_subscriber(filter, dir)?;
    subscriber.try_init().map_err(io::Error::other)?;

    tracing::info!("Logging initialized, files in {}", dir.display());

    Ok(guards)
}

fn console_subscriber(filter: EnvFilter) -> impl Subscriber + Send + Sync + 'static {
    tracing_subscriber::registry().with(filter).with(console_layer())
}

/// Console plus the four rolling files under `dir`
fn file_subscriber(
    filter: EnvFilter,
    dir: &Path,
) -> io::Result<(impl Subscriber + Send + Sync + 'static, Vec<WorkerGuard>)> {
    create_log_dirs(dir)?;
    let mut guards = Vec::with_capacity(LOG_TYPES.len());

    let (main_appender, guard) = create_appender(dir, "main");
    guards.push(guard);
    let (error_appender, guard) = create_appender(dir, "error");
    guards.push(guard);
    let (store_appender, guard) = create_appender(dir, "store");
    guards.push(guard);
    let (api_appender, guard) = create_appender(dir, "api");
    guards.push(guard);

    let main_layer = tracing_subscriber::fmt::layer()
        .with_writer(main_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json();

    let error_layer = tracing_subscriber::fmt::layer()
        .with_writer(error_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

    let store_layer = tracing_subscriber::fmt::layer()
        .with_writer(store_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            is_store_target(metadata.target())
        }));

    let api_layer = tracing_subscriber::fmt::layer()
        .with_writer(api_appender)
        .with_ansi(false)
        .with_target(true)
        .with_level(true)
        .with_filter(tracing_subscriber::filter::filter_fn(|metadata| {
            is_api_target(metadata.target())
        }));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(main_layer)
        .with(error_layer)
        .with(store_layer)
        .with(api_layer)
        .with(console_layer());

    Ok((subscriber, guards))
}

/// Human-readable stdout layer, generic over the stack it joins
fn console_layer<S>() -> tracing_subscriber::fmt::Layer<S> {
    tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_level(true)
}

fn create_log_dirs(dir: &Path) -> io::Result<()> {
    for log_type in LOG_TYPES {
        fs::create_dir_all(dir.join(log_type))?;
    }
    Ok(())
}

/// Create a daily rolling file appender in `{dir}/{name}`
fn create_appender(dir: &Path, name: &str) -> (NonBlocking, WorkerGuard) {
    let appender = RollingFileAppender::new(Rotation::DAILY, dir.join(name), name);
    tracing_appender::non_blocking(appender)
}

fn is_store_target(target: &str) -> bool {
    target.contains("store") || target.contains("pool")
}

fn is_api_target(target: &str) -> bool {
    target.contains("api") || target.contains("tower_http")
}

/// Log macro helpers for specific log types
#[macro_export]
macro_rules! log_store {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "store", $level, $($arg)+)
    };
}

#[macro_export]
macro_rules! log_api {
    ($level:expr, $($arg:tt)+) => {
        tracing::event!(target: "api", $level, $($arg)+)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_directory_creation() {
        let test_dir = std::env::temp_dir().join(format!("shardcore-logs-{}", uuid::Uuid::new_v4()));

        create_log_dirs(&test_dir).unwrap();
        for log_type in LOG_TYPES {
            assert!(test_dir.join(log_type).is_dir());
        }

        fs::remove_dir_all(&test_dir).ok();
    }

    #[test]
    fn test_console_and_file_stacks_build() {
        tracing::subscriber::with_default(console_subscriber(EnvFilter::new("info")), || {
            tracing::info!("console only");
        });

        let dir = std::env::temp_dir().join(format!("shardcore-logs-{}", uuid::Uuid::new_v4()));
        let (subscriber, guards) = file_subscriber(EnvFilter::new("debug"), &dir).unwrap();
        assert_eq!(guards.len(), LOG_TYPES.len());
        tracing::subscriber::with_default(subscriber, || {
            crate::log_store!(tracing::Level::WARN, "store line");
            crate::log_api!(tracing::Level::INFO, "api line");
        });
        drop(guards);

        for log_type in LOG_TYPES {
            assert!(dir.join(log_type).is_dir());
        }
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_target_routing() {
        assert!(is_store_target("store"));
        assert!(is_store_target("shardcore::stores::postgres"));
        assert!(is_store_target("pool"));
        assert!(!is_store_target("api"));

        assert!(is_api_target("api"));
        assert!(is_api_target("tower_http::trace::on_response"));
        assert!(!is_api_target("reporter"));
    }
}
