use std::time::Duration;

use crate::{ErrorExt, StatusCode};

/// Ошибки протокола рандеву.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BarrierError {
    /// Ожидание релиза не завершилось до дедлайна.
    Timeout { tag: String, waited: Duration },
    /// Пустой или зарезервированный тег
    InvalidTag { tag: String },
    /// Порог участников должен быть не меньше единицы
    InvalidCount { count: i64 },
    /// Помпа каналов остановлена и больше не принимает команды
    PumpStopped,
    /// Релиз не будет выполнен: помпа завершилась, не доставив сообщение
    ReleaseDropped { tag: String },
    /// Контекст барьера уже закрыт
    ContextClosed,
}

impl std::fmt::Display for BarrierError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::Timeout { tag, waited } => {
                write!(
                    f,
                    "Rendezvous '{tag}' was not released within {:.3}s",
                    waited.as_secs_f64()
                )
            }
            Self::InvalidTag { tag } => write!(f, "Invalid rendezvous tag '{tag}'"),
            Self::InvalidCount { count } => {
                write!(f, "Rendezvous count must be at least 1, got {count}")
            }
            Self::PumpStopped => write!(f, "Channel pump is stopped"),
            Self::ReleaseDropped { tag } => {
                write!(f, "Release for '{tag}' was dropped before delivery")
            }
            Self::ContextClosed => write!(f, "Barrier context is closed"),
        }
    }
}

impl std::error::Error for BarrierError {}

impl ErrorExt for BarrierError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Timeout { .. } => StatusCode::RendezvousTimeout,
            Self::InvalidTag { .. } => StatusCode::InvalidTag,
            Self::InvalidCount { .. } => StatusCode::InvalidCount,
            Self::PumpStopped => StatusCode::PumpStopped,
            Self::ReleaseDropped { .. } => StatusCode::ReleaseDropped,
            Self::ContextClosed => StatusCode::ContextClosed,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "barrier".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::Timeout { tag, .. }
            | Self::InvalidTag { tag }
            | Self::ReleaseDropped { tag } => {
                tags.push(("tag", tag.clone()));
            }
            _ => {}
        }

        tags
    }
}
