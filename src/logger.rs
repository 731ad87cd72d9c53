use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer, Registry};

#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct LogConfig {
    pub log_level: LogLevel,
    /// Also write a daily rolling log file into this directory.
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    /// Newline delimited JSON instead of plain text in the log file.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            log_dir: None,
            log_file: "logrelay.log".to_string(),
            json: false,
        }
    }
}

impl LogConfig {
    pub fn new(log_level: LogLevel, log_dir: Option<PathBuf>) -> Self {
        Self { log_level, log_dir, ..Self::default() }
    }

    /// `RUST_LOG` wins over the configured level.
    fn filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(self.log_level.as_ref()))
    }
}

/// Install the global tracing subscriber: stdout plus, when `log_dir` is set,
/// a daily rolling file. Fails if a subscriber is already installed.
pub fn init_tracing(config: &LogConfig) -> anyhow::Result<()> {
    let file_layer: Option<Box<dyn Layer<Registry> + Send + Sync>> = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.log_file);
            let layer = if config.json {
                fmt::layer().json().with_writer(appender).boxed()
            } else {
                fmt::layer().with_writer(appender).with_ansi(false).boxed()
            };
            Some(layer)
        }
        None => None,
    };

    Registry::default()
        .with(file_layer)
        .with(fmt::layer().with_thread_names(true))
        .with(config.filter())
        .try_init()?;

    tracing::info!(level = %config.log_level, log_dir = ?config.log_dir, "📝 logging initialised");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_log_config_from_yaml() {
        let yaml = "log_level: debug\nlog_dir: /var/log/relay\n";
        let config: LogConfig = serde_yaml_bw::from_str(yaml).unwrap();
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/relay")));
        assert_eq!(config.log_file, "logrelay.log");
        assert!(!config.json);
        assert_eq!(LogLevel::from_str("warn").unwrap(), LogLevel::Warn);
    }
}
