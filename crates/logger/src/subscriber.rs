use std::env::var;

use serde::{Deserialize, Serialize};
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{Layer, filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

/// `[logging]` section of the service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default directive when `RUST_LOG` is unset (e.g. "info", "debug").
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into(), format: LogFormat::Compact }
    }
}

/// Initialize tracing from the service's logging configuration.
///
/// `RUST_LOG` still wins over `config.level`, and `RUST_LOG_FORMAT` over
/// `config.format`, so operators can turn up verbosity without editing files.
pub fn init_with(config: &LoggingConfig) {
    let level = config.level.parse::<LevelFilter>().unwrap_or(LevelFilter::INFO);
    initialize_tracing(level, config.format);
}

fn initialize_tracing(level: LevelFilter, configured: LogFormat) {
    let env_filter = EnvFilter::builder().with_default_directive(level.into()).from_env_lossy();

    let format = resolve_format(var("RUST_LOG_FORMAT").ok().as_deref(), configured);

    let log_layer = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(env_filter).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_filter(env_filter)
            .boxed(),
    };

    if tracing_subscriber::registry().with(log_layer).try_init().is_err() {
        warn!("tracing subscriber already installed, keeping the existing one");
    }
}

fn resolve_format(from_env: Option<&str>, configured: LogFormat) -> LogFormat {
    match from_env {
        Some("json") => LogFormat::Json,
        Some("compact") => LogFormat::Compact,
        _ => configured,
    }
}
