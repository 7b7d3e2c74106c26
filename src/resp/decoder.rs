//! Инкрементальный декодер RESP.
//!
//! Декодер не хранит состояние между вызовами: он пытается разобрать фрейм
//! целиком из начала буфера и потребляет байты только при успехе. Если
//! данных не хватает, буфер остаётся нетронутым и вызов повторяется после
//! следующего чтения из сокета.

use std::io::Cursor;

use bytes::{Buf, Bytes, BytesMut};
use rendezvous_error::ProtocolError;

use super::RespFrame;

/// Максимальная длина строки (1mb).
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;
/// Максимальный размер bulk-строки (512mb).
pub const MAX_BULK_LENGTH: usize = 512 * 1024 * 1024;
/// Максимальная вложенность массивов (32 уровня).
pub const MAX_ARRAY_DEPTH: usize = 32;

/// Декодер с настраиваемыми пределами.
#[derive(Debug, Clone)]
pub struct RespDecoder {
    max_line: usize,
    max_bulk: usize,
    max_depth: usize,
}

impl Default for RespDecoder {
    fn default() -> Self {
        Self {
            max_line: MAX_LINE_LENGTH,
            max_bulk: MAX_BULK_LENGTH,
            max_depth: MAX_ARRAY_DEPTH,
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limits(
        max_line: usize,
        max_bulk: usize,
        max_depth: usize,
    ) -> Self {
        Self {
            max_line,
            max_bulk,
            max_depth,
        }
    }

    /// Пытается извлечь один фрейм из начала `buf`.
    ///
    /// # Возвращает
    /// - `Ok(Some(frame))`: фрейм разобран, его байты удалены из `buf`;
    /// - `Ok(None)`: данных пока недостаточно, `buf` не изменён;
    /// - `Err(_)`: поток повреждён, соединение следует закрыть.
    pub fn decode(
        &self,
        buf: &mut BytesMut,
    ) -> Result<Option<RespFrame>, ProtocolError> {
        let mut cursor = Cursor::new(&buf[..]);
        match self.parse_frame(&mut cursor, 0)? {
            Some(frame) => {
                let consumed = cursor.position() as usize;
                buf.advance(consumed);
                Ok(Some(frame))
            }
            None => Ok(None),
        }
    }

    fn parse_frame(
        &self,
        cur: &mut Cursor<&[u8]>,
        depth: usize,
    ) -> Result<Option<RespFrame>, ProtocolError> {
        if !cur.has_remaining() {
            return Ok(None);
        }

        let position = cur.position() as usize;
        match cur.get_u8() {
            b'+' => Ok(self.read_text(cur)?.map(RespFrame::Simple)),
            b'-' => Ok(self.read_text(cur)?.map(RespFrame::Error)),
            b':' => match self.read_line(cur)? {
                Some(line) => Ok(Some(RespFrame::Integer(parse_integer(line)?))),
                None => Ok(None),
            },
            b'$' => self.parse_bulk(cur),
            b'*' => self.parse_array(cur, depth),
            byte => Err(ProtocolError::UnknownType { byte, position }),
        }
    }

    fn parse_bulk(
        &self,
        cur: &mut Cursor<&[u8]>,
    ) -> Result<Option<RespFrame>, ProtocolError> {
        let Some(line) = self.read_line(cur)? else {
            return Ok(None);
        };
        let len = parse_length(line)?;
        let Some(len) = len else {
            return Ok(Some(RespFrame::Null));
        };
        if len > self.max_bulk {
            return Err(ProtocolError::BulkTooLarge {
                len,
                max: self.max_bulk,
            });
        }

        // Данные и завершающий CRLF должны прийти целиком.
        if cur.remaining() < len + 2 {
            return Ok(None);
        }
        let start = cur.position() as usize;
        let data: &[u8] = *cur.get_ref();
        if &data[start + len..start + len + 2] != b"\r\n" {
            return Err(ProtocolError::MissingCrlf {
                position: start + len,
            });
        }
        let payload = Bytes::copy_from_slice(&data[start..start + len]);
        cur.advance(len + 2);
        Ok(Some(RespFrame::Bulk(payload)))
    }

    fn parse_array(
        &self,
        cur: &mut Cursor<&[u8]>,
        depth: usize,
    ) -> Result<Option<RespFrame>, ProtocolError> {
        if depth >= self.max_depth {
            return Err(ProtocolError::DepthExceeded {
                max: self.max_depth,
            });
        }
        let Some(line) = self.read_line(cur)? else {
            return Ok(None);
        };
        let Some(len) = parse_length(line)? else {
            return Ok(Some(RespFrame::Null));
        };

        // Длину из сети не используем для предвыделения без ограничения.
        let mut items = Vec::with_capacity(len.min(1024));
        for _ in 0..len {
            match self.parse_frame(cur, depth + 1)? {
                Some(item) => items.push(item),
                None => return Ok(None),
            }
        }
        Ok(Some(RespFrame::Array(items)))
    }

    fn read_text(
        &self,
        cur: &mut Cursor<&[u8]>,
    ) -> Result<Option<String>, ProtocolError> {
        match self.read_line(cur)? {
            Some(line) => std::str::from_utf8(line)
                .map(|s| Some(s.to_owned()))
                .map_err(|_| ProtocolError::InvalidUtf8),
            None => Ok(None),
        }
    }

    /// Читает строку до CRLF (без него).
    fn read_line<'a>(
        &self,
        cur: &mut Cursor<&'a [u8]>,
    ) -> Result<Option<&'a [u8]>, ProtocolError> {
        let start = cur.position() as usize;
        let data: &'a [u8] = *cur.get_ref();
        let window = &data[start..];

        match window.windows(2).position(|w| w == b"\r\n") {
            Some(end) if end > self.max_line => Err(ProtocolError::LineTooLong {
                max: self.max_line,
            }),
            Some(end) => {
                cur.set_position((start + end + 2) as u64);
                Ok(Some(&window[..end]))
            }
            None if window.len() > self.max_line + 1 => Err(ProtocolError::LineTooLong {
                max: self.max_line,
            }),
            None => Ok(None),
        }
    }
}

fn parse_integer(line: &[u8]) -> Result<i64, ProtocolError> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| ProtocolError::InvalidInteger {
            value: String::from_utf8_lossy(line).into_owned(),
        })
}

/// Длина bulk-строки или массива; `None` для `-1` (null).
fn parse_length(line: &[u8]) -> Result<Option<usize>, ProtocolError> {
    let invalid = || ProtocolError::InvalidLength {
        value: String::from_utf8_lossy(line).into_owned(),
    };
    let n = parse_integer(line).map_err(|_| invalid())?;
    match n {
        -1 => Ok(None),
        n if n >= 0 => usize::try_from(n).map(Some).map_err(|_| invalid()),
        _ => Err(invalid()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(input: &[u8]) -> Result<Option<RespFrame>, ProtocolError> {
        let mut buf = BytesMut::from(input);
        RespDecoder::new().decode(&mut buf)
    }

    #[test]
    fn test_decode_scalars() {
        assert_eq!(
            decode_all(b"+OK\r\n").unwrap(),
            Some(RespFrame::Simple("OK".into()))
        );
        assert_eq!(
            decode_all(b"-ERR wrong\r\n").unwrap(),
            Some(RespFrame::Error("ERR wrong".into()))
        );
        assert_eq!(decode_all(b":1000\r\n").unwrap(), Some(RespFrame::Integer(1000)));
        assert_eq!(decode_all(b"$-1\r\n").unwrap(), Some(RespFrame::Null));
        assert_eq!(decode_all(b"*-1\r\n").unwrap(), Some(RespFrame::Null));
    }

    /// Тест проверяет разбор сообщения режима подписки.
    #[test]
    fn test_decode_pubsub_message() {
        let frame = decode_all(b"*3\r\n$7\r\nmessage\r\n$3\r\ntag\r\n$4\r\nBBBB\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(
            frame,
            RespFrame::Array(vec![
                RespFrame::Bulk(Bytes::from_static(b"message")),
                RespFrame::Bulk(Bytes::from_static(b"tag")),
                RespFrame::Bulk(Bytes::from_static(b"BBBB")),
            ])
        );
    }

    /// Тест проверяет, что неполные данные не потребляются, а после
    /// дочитывания фрейм разбирается, оставляя хвост следующего.
    #[test]
    fn test_partial_then_complete() {
        let decoder = RespDecoder::new();
        let mut buf = BytesMut::from(&b"*2\r\n$3\r\nfoo\r\n$3\r\nba"[..]);
        assert_eq!(decoder.decode(&mut buf).unwrap(), None);
        assert_eq!(buf.len(), 19);

        buf.extend_from_slice(b"r\r\n:7\r\n");
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(frame, RespFrame::Array(ref items) if items.len() == 2));
        assert_eq!(&buf[..], b":7\r\n");
        assert_eq!(decoder.decode(&mut buf).unwrap(), Some(RespFrame::Integer(7)));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bulk_without_crlf_is_error() {
        assert!(matches!(
            decode_all(b"$3\r\nfooXY"),
            Err(ProtocolError::MissingCrlf { .. })
        ));
    }

    #[test]
    fn test_unknown_type_byte() {
        assert_eq!(
            decode_all(b"!oops\r\n"),
            Err(ProtocolError::UnknownType {
                byte: b'!',
                position: 0
            })
        );
    }

    #[test]
    fn test_invalid_lengths_and_integers() {
        assert!(matches!(
            decode_all(b"$-7\r\n"),
            Err(ProtocolError::InvalidLength { .. })
        ));
        assert!(matches!(
            decode_all(b":12a\r\n"),
            Err(ProtocolError::InvalidInteger { .. })
        ));
    }

    /// Тест проверяет срабатывание пределов на строку, bulk и глубину.
    #[test]
    fn test_limits() {
        let decoder = RespDecoder::with_limits(8, 4, 2);

        let mut long = BytesMut::from(&b"+0123456789abcdef"[..]);
        assert!(matches!(
            decoder.decode(&mut long),
            Err(ProtocolError::LineTooLong { max: 8 })
        ));

        let mut bulk = BytesMut::from(&b"$5\r\nhello\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut bulk),
            Err(ProtocolError::BulkTooLarge { len: 5, max: 4 })
        );

        let mut deep = BytesMut::from(&b"*1\r\n*1\r\n*1\r\n:1\r\n"[..]);
        assert_eq!(
            decoder.decode(&mut deep),
            Err(ProtocolError::DepthExceeded { max: 2 })
        );
    }
}
