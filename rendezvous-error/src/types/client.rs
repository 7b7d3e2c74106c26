use std::io;

use crate::{ErrorExt, StatusCode};

/// Ошибки соединения с брокером.
///
/// Ядро барьера их не перехватывает и не повторяет: они доходят до
/// вызывающего кода как есть.
#[derive(Debug, Clone)]
pub enum ClientError {
    /// Ошибка подключения к брокеру
    ConnectionFailed { address: String, reason: String },
    /// Таймаут подключения
    ConnectionTimeout { address: String },
    /// Соединение закрыто (брокером или локально)
    ConnectionClosed,
    /// Брокер ответил ошибкой (`-ERR ...`)
    ServerError { message: String },
    /// Ответ не того типа, который ожидает команда
    UnexpectedResponse { command: String, response: String },
    /// Ошибка аутентификации
    AuthenticationFailed { reason: String },
    /// Неверный адрес брокера
    InvalidEndpoint { url: String, reason: String },
    /// Пул соединений уже отключён
    PoolClosed,
    /// Ошибка ввода-вывода
    Io {
        kind: io::ErrorKind,
        message: String,
    },
    /// Таймаут чтения
    ReadTimeout,
    /// Таймаут записи
    WriteTimeout,
}

impl std::fmt::Display for ClientError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { address, reason } => {
                write!(f, "Failed to connect to {address}: {reason}")
            }
            Self::ConnectionTimeout { address } => {
                write!(f, "Connection to {address} timed out")
            }
            Self::ConnectionClosed => write!(f, "Broker connection closed"),
            Self::ServerError { message } => write!(f, "Broker error: {message}"),
            Self::UnexpectedResponse { command, response } => {
                write!(f, "Unexpected reply to {command}: {response}")
            }
            Self::AuthenticationFailed { reason } => {
                write!(f, "Authentication failed: {reason}")
            }
            Self::InvalidEndpoint { url, reason } => {
                write!(f, "Invalid broker endpoint '{url}': {reason}")
            }
            Self::PoolClosed => write!(f, "Connection pool is disconnected"),
            Self::Io { kind, message } => write!(f, "I/O error ({kind:?}): {message}"),
            Self::ReadTimeout => write!(f, "Read timeout"),
            Self::WriteTimeout => write!(f, "Write timeout"),
        }
    }
}

impl std::error::Error for ClientError {}

impl ErrorExt for ClientError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. } => {
                StatusCode::ConnectionFailed
            }
            Self::ConnectionClosed => StatusCode::ConnectionClosed,
            Self::ServerError { .. } => StatusCode::Internal,
            Self::UnexpectedResponse { .. } => StatusCode::ProtocolError,
            Self::AuthenticationFailed { .. } => StatusCode::InvalidCredentials,
            Self::InvalidEndpoint { .. } => StatusCode::InvalidArgs,
            Self::PoolClosed => StatusCode::PoolClosed,
            Self::Io { kind, .. } => match kind {
                io::ErrorKind::ConnectionRefused => StatusCode::ConnectionFailed,
                io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe => StatusCode::ConnectionClosed,
                io::ErrorKind::TimedOut => StatusCode::Timeout,
                io::ErrorKind::UnexpectedEof => StatusCode::UnexpectedEof,
                _ => StatusCode::Io,
            },
            Self::ReadTimeout => StatusCode::ReadTimeout,
            Self::WriteTimeout => StatusCode::WriteTimeout,
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn client_message(&self) -> String {
        match self {
            Self::ConnectionFailed { address, .. } | Self::ConnectionTimeout { address } => {
                format!("Failed to connect to {address}")
            }
            Self::ServerError { message } => format!("Broker error: {message}"),
            Self::AuthenticationFailed { .. } => "Authentication failed".to_string(),
            Self::InvalidEndpoint { url, .. } => format!("Invalid broker endpoint '{url}'"),
            Self::Io { .. } => "Network error occurred".to_string(),
            _ => self.to_string(),
        }
    }

    fn metrics_tags(&self) -> Vec<(&'static str, String)> {
        let mut tags = vec![
            ("error_type", "client".to_string()),
            ("status_code", self.status_code().to_string()),
        ];

        match self {
            Self::ConnectionFailed { address, .. } | Self::ConnectionTimeout { address } => {
                tags.push(("address", address.clone()));
            }
            Self::UnexpectedResponse { command, .. } => {
                tags.push(("command", command.clone()));
            }
            Self::Io { kind, .. } => {
                tags.push(("io_kind", format!("{kind:?}")));
            }
            _ => {}
        }

        tags
    }
}

// Конверсия из io::Error
impl From<io::Error> for ClientError {
    fn from(err: io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, ErrorKind};

    use super::*;

    #[test]
    fn test_connection_failed() {
        let err = ClientError::ConnectionFailed {
            address: "localhost:6379".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ConnectionFailed);
        assert!(err.to_string().contains("localhost:6379"));
        assert!(err.client_message().contains("localhost:6379"));
        assert!(err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "address" && v == "localhost:6379"));
    }

    /// Тест проверяет, что причина отказа в аутентификации не попадает в
    /// внешнее сообщение.
    #[test]
    fn test_authentication_failed_hides_reason() {
        let err = ClientError::AuthenticationFailed {
            reason: "WRONGPASS invalid username-password pair".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::InvalidCredentials);
        assert!(!err.client_message().contains("WRONGPASS"));
    }

    #[test]
    fn test_io_error_conversion_and_tags() {
        let client_err: ClientError = io::Error::new(ErrorKind::BrokenPipe, "broken pipe").into();

        assert_eq!(client_err.status_code(), StatusCode::ConnectionClosed);
        assert!(client_err.to_string().contains("BrokenPipe"));
        assert!(client_err
            .metrics_tags()
            .iter()
            .any(|(k, v)| *k == "io_kind" && v.contains("BrokenPipe")));
    }

    #[test]
    fn test_timeouts_are_retryable() {
        assert!(ClientError::ReadTimeout.status_code().is_retryable());
        assert!(ClientError::WriteTimeout.status_code().is_retryable());
        assert!(!ClientError::PoolClosed.status_code().is_retryable());
    }

    #[test]
    fn test_unexpected_response_tags_command() {
        let err = ClientError::UnexpectedResponse {
            command: "INCR".to_string(),
            response: "+OK".to_string(),
        };
        assert_eq!(err.status_code(), StatusCode::ProtocolError);
        assert!(err.metrics_tags().iter().any(|(k, v)| *k == "command" && v == "INCR"));
    }
}
