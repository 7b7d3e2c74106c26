//! Типы фреймов RESP.
//!
//! Подмножество RESP2, которого достаточно для `INCR`, `PUBLISH`, `DEL`,
//! `AUTH`, `SELECT` и режима подписки.

use bytes::Bytes;

/// Фрейм протокола RESP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RespFrame {
    /// `+OK\r\n`
    Simple(String),
    /// `-ERR message\r\n`
    Error(String),
    /// `:42\r\n`
    Integer(i64),
    /// `$3\r\nfoo\r\n`
    Bulk(Bytes),
    /// `$-1\r\n` или `*-1\r\n`
    Null,
    /// `*2\r\n...`
    Array(Vec<RespFrame>),
}

impl RespFrame {
    /// Собирает команду: массив bulk-строк.
    pub fn command<I, A>(args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Bytes>,
    {
        RespFrame::Array(
            args.into_iter()
                .map(|a| RespFrame::Bulk(a.into()))
                .collect(),
        )
    }

    /// Байты bulk- или простой строки.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            RespFrame::Bulk(b) => Some(b),
            RespFrame::Simple(s) => Some(s.as_bytes()),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            RespFrame::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Краткое описание фрейма для сообщений об ошибках.
    pub fn describe(&self) -> String {
        match self {
            RespFrame::Simple(s) => format!("+{s}"),
            RespFrame::Error(e) => format!("-{e}"),
            RespFrame::Integer(n) => format!(":{n}"),
            RespFrame::Bulk(b) => match std::str::from_utf8(b) {
                Ok(s) if s.len() <= 64 => format!("${s:?}"),
                _ => format!("$<{} bytes>", b.len()),
            },
            RespFrame::Null => "null".to_string(),
            RespFrame::Array(items) => format!("*<{} items>", items.len()),
        }
    }
}
