use crate::{ErrorExt, StatusCode};

/// Ошибки разбора и кодирования фреймов RESP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Неизвестный байт типа фрейма
    UnknownType { byte: u8, position: usize },
    /// Некорректная длина bulk-строки или массива
    InvalidLength { value: String },
    /// Некорректное целое число
    InvalidInteger { value: String },
    /// Строка без завершающего `\r\n`
    MissingCrlf { position: usize },
    /// Превышена максимальная длина строки
    LineTooLong { max: usize },
    /// Превышен максимальный размер bulk-строки
    BulkTooLarge { len: usize, max: usize },
    /// Превышена глубина вложенности массивов
    DepthExceeded { max: usize },
    /// Простая строка содержит CR или LF
    InvalidSimpleString,
    /// Невалидный UTF-8 там, где ожидается текст
    InvalidUtf8,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::UnknownType { byte, position } => {
                write!(f, "Unknown RESP type byte 0x{byte:02x} at {position}")
            }
            Self::InvalidLength { value } => write!(f, "Invalid length: {value}"),
            Self::InvalidInteger { value } => write!(f, "Invalid integer: {value}"),
            Self::MissingCrlf { position } => write!(f, "Expected CRLF at {position}"),
            Self::LineTooLong { max } => write!(f, "Line exceeds {max} bytes"),
            Self::BulkTooLarge { len, max } => {
                write!(f, "Bulk string too large ({len} > {max})")
            }
            Self::DepthExceeded { max } => write!(f, "Max array depth exceeded ({max})"),
            Self::InvalidSimpleString => {
                write!(f, "Simple string contains CR or LF characters")
            }
            Self::InvalidUtf8 => write!(f, "Invalid UTF-8 in frame"),
        }
    }
}

impl std::error::Error for ProtocolError {}

impl ErrorExt for ProtocolError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::UnknownType { .. } | Self::MissingCrlf { .. } => StatusCode::InvalidFrame,
            Self::InvalidLength { .. } => StatusCode::ParseError,
            Self::InvalidInteger { .. } => StatusCode::InvalidInteger,
            Self::LineTooLong { .. } | Self::BulkTooLarge { .. } => StatusCode::SizeLimit,
            Self::DepthExceeded { .. } => StatusCode::DepthLimit,
            Self::InvalidSimpleString => StatusCode::EncodingError,
            Self::InvalidUtf8 => StatusCode::InvalidUtf8,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        vec![
            ("error_type", "protocol".to_string()),
            ("status_code", self.status_code().to_string()),
        ]
    }
}
