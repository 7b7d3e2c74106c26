use std::{path::Path, time::Duration};

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{BarrierConfig, DEFAULT_BROKER_URL};
use crate::{
    logging::{LogFormat, LoggingConfig},
    resp::BrokerEndpoint,
};

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Настройки процесса: слои значений по умолчанию, TOML-файла и переменных
/// окружения `RENDEZVOUS_*`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub broker_url: String,
    pub quantum_ms: u64,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
    pub write_timeout_ms: u64,
    pub log_level: String,
    pub log_format: String,
    pub log_dir: Option<String>,
}

impl Settings {
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_from(None)
    }

    /// Загружает настройки, накладывая `file` (если задан) поверх значений
    /// по умолчанию и окружение поверх файла.
    pub fn load_from(file: Option<&Path>) -> Result<Self, SettingsError> {
        let defaults = BarrierConfig::default();
        let mut builder = Config::builder()
            // Добавляем значения по умолчанию
            .set_default("broker_url", DEFAULT_BROKER_URL)?
            .set_default("quantum_ms", millis(defaults.quantum))?
            .set_default("connect_timeout_ms", millis(defaults.connect_timeout))?
            .set_default("read_timeout_ms", millis(defaults.read_timeout))?
            .set_default("write_timeout_ms", millis(defaults.write_timeout))?
            .set_default("log_level", "info")?
            .set_default("log_format", "compact")?;

        if let Some(path) = file {
            builder = builder.add_source(File::from(path).required(true));
        }

        // Добавляем переменные окружения с префиксом RENDEZVOUS_
        let cfg = builder
            .add_source(Environment::with_prefix("RENDEZVOUS").try_parsing(true))
            .build()?;

        let settings: Settings = cfg.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.quantum_ms == 0 {
            return Err(SettingsError::Invalid(
                "quantum_ms must be positive".to_string(),
            ));
        }
        BrokerEndpoint::parse(&self.broker_url)
            .map_err(|e| SettingsError::Invalid(e.to_string()))?;
        if self.log_format.parse::<LogFormat>().is_err() {
            return Err(SettingsError::Invalid(format!(
                "unknown log format '{}'",
                self.log_format
            )));
        }
        Ok(())
    }

    pub fn barrier_config(&self) -> BarrierConfig {
        BarrierConfig {
            broker_url: self.broker_url.clone(),
            quantum: Duration::from_millis(self.quantum_ms),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }

    pub fn logging_config(&self) -> LoggingConfig {
        let mut cfg = LoggingConfig {
            level: self.log_level.clone(),
            format: self.log_format.parse().unwrap_or_default(),
            ..LoggingConfig::default()
        };
        if let Some(dir) = &self.log_dir {
            cfg.file.enabled = true;
            cfg.file.directory = dir.into();
        }
        cfg
    }
}

/// Миллисекунды для значений по умолчанию `config`; насыщается на `i64::MAX`.
fn millis(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
