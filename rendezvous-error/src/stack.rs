use std::{fmt, panic::Location, sync::Arc};

use crate::{BarrierError, ErrorExt, LogLevel, StatusCode};

/// Основная ошибка крейта: корневая причина плюс цепочка контекстов.
///
/// Контекст добавляется по мере подъёма ошибки по стеку вызовов
/// (`ResultExt::context`), место вызова фиксируется через `#[track_caller]`.
#[derive(Clone)]
pub struct StackError {
    inner: Arc<dyn ErrorExt>,
    contexts: Arc<Vec<ErrorContext>>,
}

/// Контекст ошибки с местом вызова.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub message: String,
    pub location: Option<&'static Location<'static>>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StackError {
    /// Создаёт новую ошибку.
    #[track_caller]
    pub fn new<E: ErrorExt>(err: E) -> Self {
        Self {
            inner: Arc::new(err),
            contexts: Arc::new(Vec::new()),
        }
    }

    /// Добавляет контекст к ошибке.
    #[track_caller]
    pub fn context(
        mut self,
        msg: impl Into<String>,
    ) -> Self {
        let mut new_contexts = (*self.contexts).clone();
        new_contexts.push(ErrorContext {
            message: msg.into(),
            location: Some(Location::caller()),
        });
        self.contexts = Arc::new(new_contexts);
        self
    }

    /// Возвращает код статуса корневой ошибки.
    pub fn status_code(&self) -> StatusCode {
        self.inner.status_code()
    }

    /// Возвращает сообщение для внешнего потребителя.
    pub fn client_message(&self) -> String {
        self.inner.client_message()
    }

    /// Возвращает корневую ошибку.
    pub fn root(&self) -> &dyn ErrorExt {
        self.inner.as_ref()
    }

    /// Возвращает все контексты.
    pub fn contexts(&self) -> &[ErrorContext] {
        &self.contexts
    }

    pub fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        self.inner.metrics_tags()
    }

    /// Попытка downcast к конкретному типу ошибки.
    pub fn downcast_ref<T: ErrorExt + 'static>(&self) -> Option<&T> {
        self.inner.as_any().downcast_ref::<T>()
    }

    /// Истёк ли таймаут ожидания рандеву.
    ///
    /// Отличает "никто не пришёл вовремя" от любых проблем со связью:
    /// исполнитель задач переводит первое в провал задачи, а второе
    /// пробрасывает дальше.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.downcast_ref::<BarrierError>(),
            Some(BarrierError::Timeout { .. })
        )
    }

    /// Уровень логирования по коду статуса.
    pub fn log_level(&self) -> LogLevel {
        self.status_code().log_level()
    }

    pub fn is_critical(&self) -> bool {
        self.status_code().is_critical()
    }

    fn format_contexts(&self) -> Vec<String> {
        self.contexts
            .iter()
            .map(|ctx| {
                if let Some(loc) = ctx.location {
                    format!("{} ({}:{})", ctx.message, loc.file(), loc.line())
                } else {
                    ctx.message.clone()
                }
            })
            .collect()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StackError
////////////////////////////////////////////////////////////////////////////////

impl fmt::Debug for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        let mut debug = f.debug_struct("StackError");
        debug.field("inner", &self.inner.to_string());
        debug.field("status_code", &self.status_code());

        if !self.contexts.is_empty() {
            debug.field("contexts", &self.format_contexts());
        }

        debug.finish()
    }
}

impl fmt::Display for StackError {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        if !self.contexts.is_empty() {
            let contexts: Vec<&str> = self.contexts.iter().map(|c| c.message.as_str()).collect();
            write!(f, "{}: {}", contexts.join(" → "), self.inner)
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl std::error::Error for StackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner.as_ref())
    }
}

impl<E: ErrorExt> From<E> for StackError {
    #[track_caller]
    fn from(e: E) -> Self {
        StackError::new(e)
    }
}

impl From<StackError> for std::io::Error {
    fn from(e: StackError) -> Self {
        std::io::Error::other(e.to_string())
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::ClientError;

    #[test]
    fn test_context_chain() {
        let stack = StackError::new(ClientError::ConnectionClosed)
            .context("INCR visit-1")
            .context("barrier sync");

        assert_eq!(stack.contexts().len(), 2);
        assert_eq!(stack.contexts()[0].message, "INCR visit-1");
        assert!(stack.contexts()[0].location.is_some());
        assert_eq!(stack.status_code(), StatusCode::ConnectionClosed);
    }

    #[test]
    fn test_downcast() {
        let stack = StackError::new(BarrierError::PumpStopped);
        assert!(stack.downcast_ref::<BarrierError>().is_some());
        assert!(stack.downcast_ref::<ClientError>().is_none());
    }

    /// Тест проверяет, что `is_timeout` срабатывает только на таймаут
    /// рандеву, а не на сетевые таймауты.
    #[test]
    fn test_is_timeout_distinguishes_rendezvous_timeout() {
        let rendezvous = StackError::new(BarrierError::Timeout {
            tag: "visit".to_string(),
            waited: Duration::from_secs(1),
        })
        .context("sync");
        assert!(rendezvous.is_timeout());

        let network = StackError::new(ClientError::ReadTimeout);
        assert!(!network.is_timeout());
    }

    #[test]
    fn test_display() {
        let stack = StackError::new(BarrierError::ContextClosed).context("job gate");
        let display = stack.to_string();
        assert!(display.starts_with("job gate: "));
        assert!(display.contains("closed"));
    }
}
