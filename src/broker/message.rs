use std::sync::Arc;

use bytes::Bytes;
use rendezvous_error::RendezvousResult;

/// Сообщение, доставленное подписчику канала.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: Arc<str>,
    pub payload: Bytes,
}

impl Message {
    pub fn new(
        channel: impl Into<Arc<str>>,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }

    /// Полезная нагрузка как UTF-8 строка.
    ///
    /// Сообщения релиза всегда текстовые; невалидный UTF-8 считается ошибкой
    /// публикующей стороны, а не повод подменять символы.
    pub fn payload_str(&self) -> RendezvousResult<String> {
        Ok(std::str::from_utf8(&self.payload)?.to_owned())
    }
}
