use std::time::Duration;
use std::{env, fmt, fs, path};

use logger::{LogFormat, LoggingConfig};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::DEFAULT_STATUS_TTL;
use crate::notifications::dispatcher::{DEFAULT_MAX_CONCURRENT_SENDS, DEFAULT_SEND_TIMEOUT};
use crate::notifications::senders::SmtpConfig;

/// Overrides `[database] path`
pub const DATABASE_PATH_ENV: &str = "VIGIL_DATABASE_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {}: {source}", path.display())]
    ReadFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to write config {}: {source}", path.display())]
    WriteFailed { path: path::PathBuf, source: std::io::Error },
    #[error("Failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("No config directory: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database: Database,
    pub scheduler: SchedulerSettings,
    pub notifications: Notifications,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub path: path::PathBuf,
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub status_ttl_seconds: u64,
    pub shutdown_grace_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Notifications {
    pub max_concurrent_sends: usize,
    pub send_timeout_seconds: u64,
    pub smtp: Option<SmtpConfig>,
}

fn default_pool_size() -> usize {
    8
}

impl Default for Database {
    fn default() -> Self {
        Self { path: path::PathBuf::from("vigil.db"), pool_size: default_pool_size() }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self { status_ttl_seconds: DEFAULT_STATUS_TTL.as_secs(), shutdown_grace_seconds: 30 }
    }
}

impl Default for Notifications {
    fn default() -> Self {
        Self {
            max_concurrent_sends: DEFAULT_MAX_CONCURRENT_SENDS,
            send_timeout_seconds: DEFAULT_SEND_TIMEOUT.as_secs(),
            smtp: None,
        }
    }
}

impl SchedulerSettings {
    pub fn status_ttl(&self) -> Duration {
        Duration::from_secs(self.status_ttl_seconds)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

impl Notifications {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_seconds)
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Get default config path ($XDG_CONFIG_HOME/vigil/config.toml or
/// $HOME/.config/...)
fn default_config_path() -> Result<path::PathBuf, ConfigError> {
    let path = if let Ok(config_home) = env::var("XDG_CONFIG_HOME") {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = env::home_dir() {
        home_dir.join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("vigil/config.toml"))
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);
        let write_title_2 = write_title_indented(2);
        let write_2 = write_indented(2);

        writeln!(f, "Current Internal Configuration State:")?;
        write_title_1(f, "Database")?;
        write_1(f, "Path", &self.database.path.display())?;
        write_1(f, "Pool Size", &self.database.pool_size)?;

        write_title_1(f, "Scheduler")?;
        write_1(f, "Status TTL (s)", &self.scheduler.status_ttl_seconds)?;
        write_1(f, "Shutdown Grace (s)", &self.scheduler.shutdown_grace_seconds)?;

        write_title_1(f, "Notifications")?;
        write_1(f, "Max Concurrent Sends", &self.notifications.max_concurrent_sends)?;
        write_1(f, "Send Timeout (s)", &self.notifications.send_timeout_seconds)?;
        match &self.notifications.smtp {
            Some(smtp) => {
                write_title_2(f, "SMTP")?;
                write_2(f, "Host", &smtp.host)?;
                write_2(f, "Port", &smtp.port)?;
                write_2(f, "From", &smtp.from)?;
                write_2(f, "STARTTLS", &smtp.starttls)?;
                // Never echo the password
                write_2(f, "Authenticated", &smtp.username.is_some())?;
            }
            None => write_1(f, "SMTP", &"disabled")?,
        }

        write_title_1(f, "Logging")?;
        write_1(f, "Level", &self.logging.level)?;
        let format = match self.logging.format {
            LogFormat::Compact => "compact",
            LogFormat::Json => "json",
        };
        write_1(f, "Format", &format)?;

        Ok(())
    }
}

impl Config {
    /// Generate Config structure from file
    ///
    /// Creates a default config in ~/.config/vigil/config.toml
    ///  or the specified path, with the name config.toml if one does not exist.
    /// `VIGIL_DATABASE_PATH` overrides the database path afterwards.
    pub fn from_config(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        let config_path: path::PathBuf = if let Some(path) = optional_path {
            normalize_toml_path(path.as_ref())
        } else {
            default_config_path()?
        };

        let mut config = if config_path.exists() {
            let raw_string = fs::read_to_string(&config_path)
                .map_err(|source| ConfigError::ReadFailed { path: config_path.clone(), source })?;
            toml::from_str(raw_string.as_str())?
        } else {
            let config = Self::default();
            config.write_config(&config_path)?;
            config
        };

        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = env::var(DATABASE_PATH_ENV) {
            if !path.trim().is_empty() {
                self.database.path = path::PathBuf::from(path);
            }
        }
    }

    /// Serialize and write a config to a file
    pub fn write_config(&self, path: &path::Path) -> Result<(), ConfigError> {
        let config_str: String = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ConfigError::WriteFailed { path: parent.to_path_buf(), source })?;
        }

        fs::write(path, config_str)
            .map_err(|source| ConfigError::WriteFailed { path: path.to_path_buf(), source })
    }
}
