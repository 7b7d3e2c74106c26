use std::fmt;

use num_enum::TryFromPrimitive;
#[cfg(feature = "strum_macros")]
use strum_macros::AsRefStr;

/// Коды статуса для категоризации ошибок.
///
/// # Диапазоны:
/// - 0xxx: Успех
/// - 1xxx: Общие ошибки
/// - 2xxx: Ошибки данных
/// - 3xxx: Авторизация на брокере
/// - 6xxx: Сеть / IO
/// - 8xxx: Протокольные ошибки (RESP)
/// - 9xxx: Ошибки рандеву (барьер, помпа каналов)
///
/// `num_enum::TryFromPrimitive` даёт нативную реализацию `TryFrom<u32>`,
/// поэтому код можно передавать как число (например, в коде выхода CLI или
/// в метаданных задачи).
#[cfg_attr(feature = "strum_macros", derive(AsRefStr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive)]
#[repr(u32)]
#[non_exhaustive]
pub enum StatusCode {
    // === 0xxx: Успех ===
    Success = 0,

    // === 1xxx: Общие ошибки ===
    Unknown = 1000,
    Unsupported = 1001,
    Unexpected = 1002,
    Internal = 1003,
    InvalidArgs = 1004,

    // === 2xxx: Ошибки данных ===
    NotFound = 2000,
    InvalidKey = 2003,
    InvalidValue = 2004,

    // === 3xxx: Авторизация ===
    AuthFailed = 3000,
    InvalidCredentials = 3006,

    // === 6xxx: Сеть/IO ===
    Io = 6000,
    ConnectionClosed = 6001,
    Timeout = 6002,
    ProtocolError = 6003,
    ConnectionFailed = 6004,
    ReadTimeout = 6005,
    WriteTimeout = 6006,
    UnexpectedEof = 6007,
    PoolClosed = 6008,

    // === 8xxx: Протокол ===
    InvalidFrame = 8000,
    InvalidCommand = 8001,
    InvalidUtf8 = 8004,
    InvalidInteger = 8005,
    SizeLimit = 8007,
    DepthLimit = 8008,
    ParseError = 8009,
    EncodingError = 8010,
    DecodingError = 8011,

    // === 9xxx: Рандеву ===
    RendezvousTimeout = 9000,
    InvalidTag = 9001,
    InvalidCount = 9002,
    PumpStopped = 9003,
    ReleaseDropped = 9004,
    ContextClosed = 9005,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl StatusCode {
    /// Числовое представление кода статуса.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Пытается получить вариант `StatusCode` из `u32`.
    ///
    /// Возвращает `None`, если значение не соответствует ни одному варианту.
    pub fn from_u32(v: u32) -> Option<Self> {
        Self::try_from(v).ok()
    }

    /// Возвращает `true`, если операцию с таким кодом имеет смысл повторить.
    ///
    /// Ядро барьера само ничего не повторяет: решение остаётся за
    /// вызывающим кодом, этот метод лишь подсказка для него.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::ReadTimeout
                | Self::WriteTimeout
                | Self::ConnectionFailed
                | Self::ConnectionClosed
        )
    }

    /// Вернёт `true`, если переданный `code` означает успешный результат.
    pub fn is_success(code: u32) -> bool {
        Self::Success as u32 == code
    }

    /// Ошибка вызывающей стороны: неверные аргументы или данные.
    pub fn is_client_error(&self) -> bool {
        let c = self.code();
        if (2000..=3999).contains(&c) {
            return true;
        }
        matches!(
            self,
            Self::InvalidArgs | Self::InvalidTag | Self::InvalidCount
        )
    }

    /// Внутренняя или инфраструктурная ошибка (диапазоны `1xxx` и `6xxx`).
    pub fn is_server_error(&self) -> bool {
        let c = self.code();
        matches!(c, 1000..=1999 | 6000..=6999)
    }

    /// Ошибка протокола или парсинга (диапазон 8xxx).
    pub fn is_protocol_error(&self) -> bool {
        (8000..=8999).contains(&self.code())
    }

    /// Ошибка уровня рандеву (диапазон 9xxx).
    pub fn is_rendezvous_error(&self) -> bool {
        (9000..=9999).contains(&self.code())
    }

    /// Требуется ли логировать как критическую ошибку.
    pub fn is_critical(&self) -> bool {
        matches!(self, Self::Internal | Self::PumpStopped)
    }

    /// Рекомендуемый уровень логирования для данного кода.
    pub fn log_level(&self) -> LogLevel {
        match self {
            Self::Success => LogLevel::Trace,
            Self::NotFound => LogLevel::Debug,
            Self::InvalidArgs
            | Self::InvalidKey
            | Self::InvalidValue
            | Self::InvalidTag
            | Self::InvalidCount
            | Self::AuthFailed => LogLevel::Info,
            Self::RendezvousTimeout | Self::Timeout | Self::ConnectionClosed => LogLevel::Warn,
            Self::Internal | Self::PumpStopped => LogLevel::Error,
            _ => LogLevel::Warn,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Общие реализации трейтов для StatusCode
////////////////////////////////////////////////////////////////////////////////

impl From<StatusCode> for u32 {
    fn from(c: StatusCode) -> Self {
        c.code()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        #[cfg(feature = "strum_macros")]
        {
            write!(f, "{} ({})", self.as_ref(), self.code())
        }
        #[cfg(not(feature = "strum_macros"))]
        {
            write!(f, "{:?} ({})", self, self.code())
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Тесты
////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что retryable-коды помечаются корректно.
    #[test]
    fn test_retryable() {
        assert!(StatusCode::Timeout.is_retryable());
        assert!(StatusCode::ConnectionFailed.is_retryable());
        assert!(!StatusCode::InvalidArgs.is_retryable());
        assert!(!StatusCode::RendezvousTimeout.is_retryable());
    }

    /// Тест проверяет разделение клиентских и серверных ошибок.
    #[test]
    fn test_client_vs_server() {
        assert!(StatusCode::InvalidArgs.is_client_error());
        assert!(StatusCode::InvalidCount.is_client_error());
        assert!(StatusCode::AuthFailed.is_client_error());
        assert!(StatusCode::Internal.is_server_error());
        assert!(StatusCode::ConnectionFailed.is_server_error());
        assert!(!StatusCode::RendezvousTimeout.is_server_error());
    }

    /// Тест проверяет конвертацию через `TryFrom<u32>` и `from_u32`.
    #[test]
    fn test_from_try_from_u32() {
        let n = StatusCode::RendezvousTimeout.code();
        assert_eq!(
            StatusCode::try_from(n).unwrap(),
            StatusCode::RendezvousTimeout
        );
        assert!(StatusCode::from_u32(99999).is_none());
    }

    #[test]
    fn test_code_and_into() {
        let c = StatusCode::NotFound;
        assert_eq!(c.code(), 2000);
        let n: u32 = c.into();
        assert_eq!(n, 2000);
        assert!(StatusCode::is_success(StatusCode::Success.code()));
        assert!(!StatusCode::is_success(StatusCode::NotFound.code()));
    }

    /// Тест проверяет определение диапазонов 8xxx и 9xxx.
    #[test]
    fn test_protocol_and_rendezvous_ranges() {
        assert!(StatusCode::InvalidFrame.is_protocol_error());
        assert!(!StatusCode::NotFound.is_protocol_error());
        assert!(StatusCode::PumpStopped.is_rendezvous_error());
        assert!(!StatusCode::Timeout.is_rendezvous_error());
    }

    /// Тест проверяет уровни логирования для разных кодов.
    #[test]
    fn test_log_level_mappings() {
        assert_eq!(StatusCode::Success.log_level(), LogLevel::Trace);
        assert_eq!(StatusCode::RendezvousTimeout.log_level(), LogLevel::Warn);
        assert_eq!(StatusCode::PumpStopped.log_level(), LogLevel::Error);
        assert_eq!(StatusCode::InvalidTag.log_level(), LogLevel::Info);
    }

    #[test]
    fn test_display_contains_name_and_code() {
        let s = format!("{}", StatusCode::RendezvousTimeout);
        assert!(s.contains("9000"), "got: {s}");
        assert!(s.contains("RendezvousTimeout"), "got: {s}");
    }
}
