use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resp::ConnectionTimeouts;

/// Адрес брокера по умолчанию.
pub const DEFAULT_BROKER_URL: &str = "redis://127.0.0.1:6379/0";
/// Квант опроса помпы по умолчанию.
pub const DEFAULT_QUANTUM: Duration = Duration::from_millis(500);

/// Явная конфигурация контекста барьера.
///
/// Глобального пула по умолчанию нет: контекст получает этот объект
/// (или готовый пул) от вызывающего кода.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BarrierConfig {
    /// URL брокера, `redis://[:password@]host[:port][/db]`
    pub broker_url: String,
    /// Максимальное ожидание одного сообщения в цикле помпы
    #[serde(with = "millis")]
    pub quantum: Duration,
    #[serde(with = "millis")]
    pub connect_timeout: Duration,
    #[serde(with = "millis")]
    pub read_timeout: Duration,
    #[serde(with = "millis")]
    pub write_timeout: Duration,
}

impl Default for BarrierConfig {
    fn default() -> Self {
        let timeouts = ConnectionTimeouts::default();
        Self {
            broker_url: DEFAULT_BROKER_URL.to_string(),
            quantum: DEFAULT_QUANTUM,
            connect_timeout: timeouts.connect,
            read_timeout: timeouts.read,
            write_timeout: timeouts.write,
        }
    }
}

impl BarrierConfig {
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            broker_url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_quantum(
        mut self,
        quantum: Duration,
    ) -> Self {
        self.quantum = quantum;
        self
    }

    pub fn timeouts(&self) -> ConnectionTimeouts {
        ConnectionTimeouts {
            connect: self.connect_timeout,
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }
}

/// Длительности хранятся в конфиге как целые миллисекунды.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        d: &Duration,
        s: S,
    ) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
