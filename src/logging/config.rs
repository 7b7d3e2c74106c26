use std::{path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

/// Переменная окружения, перекрывающая уровень логирования.
pub const LEVEL_ENV: &str = "RENDEZVOUS_LOG_LEVEL";
/// Переменная окружения, перекрывающая формат логов.
pub const FORMAT_ENV: &str = "RENDEZVOUS_LOG_FORMAT";

const LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

/// Формат вывода логов.
#[derive(Debug, Default, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
    #[default]
    Compact,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

/// Настройки консольного вывода.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ConsoleConfig {
    pub enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_line_numbers: bool,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            with_line_numbers: false,
        }
    }
}

/// Настройки файлового вывода (ежедневная ротация).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FileConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub filename: String,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("logs"),
            filename: "rendezvous.log".to_string(),
        }
    }
}

/// Конфигурация логирования.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Базовый уровень: trace/debug/info/warn/error/off
    pub level: String,
    pub format: LogFormat,
    pub console: ConsoleConfig,
    pub file: FileConfig,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::default(),
            console: ConsoleConfig::default(),
            file: FileConfig::default(),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl LoggingConfig {
    /// Применяет `RENDEZVOUS_LOG_LEVEL` и `RENDEZVOUS_LOG_FORMAT`.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var(LEVEL_ENV) {
            self.level = level;
        }
        if let Some(format) = std::env::var(FORMAT_ENV)
            .ok()
            .and_then(|f| f.parse().ok())
        {
            self.format = format;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let level = self.level.to_ascii_lowercase();
        if !LEVELS.contains(&level.as_str()) {
            return Err(format!("invalid log level '{}'", self.level));
        }
        if self.file.enabled && self.file.filename.is_empty() {
            return Err("file logging enabled without a file name".to_string());
        }
        Ok(())
    }

    /// Создаёт каталог для файлового вывода, если он включён.
    pub fn ensure_log_dir(&self) -> std::io::Result<()> {
        if self.file.enabled {
            std::fs::create_dir_all(&self.file.directory)?;
        }
        Ok(())
    }

    /// Директива для `EnvFilter`: уровень для этого крейта и `warn` для
    /// остальных.
    pub fn build_filter_directive(&self) -> String {
        let level = self.level.to_ascii_lowercase();
        format!("warn,rendezvous={level},rendezvous_cli={level}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_validate_levels() {
        let mut cfg = LoggingConfig::default();
        assert!(cfg.validate().is_ok());
        cfg.level = "loud".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_filter_directive() {
        let cfg = LoggingConfig {
            level: "DEBUG".to_string(),
            ..LoggingConfig::default()
        };
        assert_eq!(
            cfg.build_filter_directive(),
            "warn,rendezvous=debug,rendezvous_cli=debug"
        );
    }

    /// Тест проверяет, что каталог логов создаётся только при включённом
    /// файловом выводе.
    #[test]
    fn test_ensure_log_dir() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("logs");

        let mut cfg = LoggingConfig::default();
        cfg.file.directory = dir.clone();
        cfg.ensure_log_dir().unwrap();
        assert!(!dir.exists());

        cfg.file.enabled = true;
        cfg.ensure_log_dir().unwrap();
        assert!(dir.is_dir());
    }
}
