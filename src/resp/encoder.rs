//! Энкодер RESP.
//!
//! Проверяет простые строки и строки ошибок на CR/LF и ограничивает глубину
//! вложенности массивов теми же пределами, что и декодер.

use bytes::{BufMut, BytesMut};
use rendezvous_error::ProtocolError;

use super::{decoder::MAX_ARRAY_DEPTH, RespFrame};

/// Энкодер фреймов RESP.
pub struct RespEncoder;

impl RespEncoder {
    /// Кодирует фрейм в новый буфер.
    pub fn encode(frame: &RespFrame) -> Result<BytesMut, ProtocolError> {
        let mut out = BytesMut::new();
        Self::encode_into(frame, &mut out)?;
        Ok(out)
    }

    /// Дописывает закодированный фрейм в `out`.
    ///
    /// При ошибке `out` может содержать частично записанный фрейм.
    pub fn encode_into(
        frame: &RespFrame,
        out: &mut BytesMut,
    ) -> Result<(), ProtocolError> {
        Self::encode_frame(frame, out, 0)
    }

    fn encode_frame(
        frame: &RespFrame,
        out: &mut BytesMut,
        depth: usize,
    ) -> Result<(), ProtocolError> {
        if depth > MAX_ARRAY_DEPTH {
            return Err(ProtocolError::DepthExceeded {
                max: MAX_ARRAY_DEPTH,
            });
        }

        match frame {
            RespFrame::Simple(s) => {
                Self::validate_line(s)?;
                out.put_u8(b'+');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespFrame::Error(s) => {
                Self::validate_line(s)?;
                out.put_u8(b'-');
                out.put_slice(s.as_bytes());
                out.put_slice(b"\r\n");
            }
            RespFrame::Integer(n) => {
                out.put_slice(format!(":{n}\r\n").as_bytes());
            }
            RespFrame::Bulk(data) => {
                out.put_slice(format!("${}\r\n", data.len()).as_bytes());
                out.put_slice(data);
                out.put_slice(b"\r\n");
            }
            RespFrame::Null => out.put_slice(b"$-1\r\n"),
            RespFrame::Array(items) => {
                out.put_slice(format!("*{}\r\n", items.len()).as_bytes());
                for item in items {
                    Self::encode_frame(item, out, depth + 1)?;
                }
            }
        }
        Ok(())
    }

    fn validate_line(s: &str) -> Result<(), ProtocolError> {
        if s.contains('\r') || s.contains('\n') {
            Err(ProtocolError::InvalidSimpleString)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::*;

    #[test]
    fn test_encode_command() {
        let frame = RespFrame::command(["PUBLISH", "tag", "BBBB"]);
        let out = RespEncoder::encode(&frame).unwrap();
        assert_eq!(
            &out[..],
            b"*3\r\n$7\r\nPUBLISH\r\n$3\r\ntag\r\n$4\r\nBBBB\r\n"
        );
    }

    #[test]
    fn test_encode_scalars() {
        assert_eq!(
            &RespEncoder::encode(&RespFrame::Simple("OK".into())).unwrap()[..],
            b"+OK\r\n"
        );
        assert_eq!(
            &RespEncoder::encode(&RespFrame::Integer(-5)).unwrap()[..],
            b":-5\r\n"
        );
        assert_eq!(&RespEncoder::encode(&RespFrame::Null).unwrap()[..], b"$-1\r\n");
        assert_eq!(
            &RespEncoder::encode(&RespFrame::Bulk(Bytes::new())).unwrap()[..],
            b"$0\r\n\r\n"
        );
    }

    /// Тест проверяет, что CR/LF внутри простой строки отвергается.
    #[test]
    fn test_reject_crlf_in_simple_string() {
        let err = RespEncoder::encode(&RespFrame::Error("bad\r\nline".into())).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidSimpleString);
    }

    #[test]
    fn test_depth_limit() {
        let mut frame = RespFrame::Null;
        for _ in 0..=MAX_ARRAY_DEPTH + 1 {
            frame = RespFrame::Array(vec![frame]);
        }
        assert!(matches!(
            RespEncoder::encode(&frame),
            Err(ProtocolError::DepthExceeded { .. })
        ));
    }
}
