//! Infrastructure - everything around the recorder
//!
//! - Logging and metrics
//! - Configuration management
//! - HTTP API
//! - Graceful shutdown

pub mod api;
pub mod config;
pub mod logging;
pub mod metrics;
pub mod shutdown;

pub use api::{router, start_server, AppState, RequestIds};
pub use config::{Config, ConfigError};
pub use logging::init_logging;
pub use metrics::MetricsCollector;
pub use shutdown::shutdown_signal;
