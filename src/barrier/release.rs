//! Релиз: одноразовое обещание, которое исполняет помпа каналов.

use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rendezvous_error::{BarrierError, RendezvousResult};
use tokio::{sync::oneshot, time::Instant};
use tracing::{trace, warn};

use super::pump::{PumpHandle, WaiterId};

/// Сторона релиза, которую держит помпа.
///
/// Срабатывает не более одного раза; повторные вызовы `fire` ничего не
/// делают.
#[derive(Debug)]
pub struct ReleaseTrigger {
    tx: Option<oneshot::Sender<Bytes>>,
}

impl ReleaseTrigger {
    /// Записывает полезную нагрузку и будит ожидающего.
    ///
    /// # Возвращает
    /// `true`, если ожидающий ещё ждал релиз.
    pub fn fire(
        &mut self,
        payload: Bytes,
    ) -> bool {
        match self.tx.take() {
            Some(tx) => tx.send(payload).is_ok(),
            None => false,
        }
    }

    pub fn is_fired(&self) -> bool {
        self.tx.is_none()
    }
}

/// Ожидание одного релиза.
///
/// Состояния: ожидание → исполнен | истёк таймаут. Релиз, который
/// уничтожается неисполненным (таймаут, ошибка, отмена future), снимает свою
/// регистрацию в помпе.
#[derive(Debug)]
pub struct Release {
    tag: Arc<str>,
    waiter: WaiterId,
    rx: oneshot::Receiver<Bytes>,
    pump: PumpHandle,
    fulfilled: bool,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl Release {
    pub(crate) fn pair(
        tag: Arc<str>,
        waiter: WaiterId,
        pump: PumpHandle,
    ) -> (Self, ReleaseTrigger) {
        let (tx, rx) = oneshot::channel();
        let release = Self {
            tag,
            waiter,
            rx,
            pump,
            fulfilled: false,
        };
        (release, ReleaseTrigger { tx: Some(tx) })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn waiter(&self) -> WaiterId {
        self.waiter
    }

    /// Ждёт релиз не дольше `timeout` (без ограничения, если `None`).
    ///
    /// # Возвращает
    /// - полезную нагрузку сообщения релиза;
    /// - [`BarrierError::Timeout`], если дедлайн истёк;
    /// - [`BarrierError::ReleaseDropped`], если помпа завершилась или тег
    ///   был снят с прослушивания до доставки.
    pub async fn wait(
        mut self,
        timeout: Option<Duration>,
    ) -> RendezvousResult<Bytes> {
        let started = Instant::now();
        let received = match timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut self.rx).await {
                Ok(received) => received,
                Err(_) => {
                    let waited = started.elapsed();
                    warn!(tag = %self.tag, waiter = self.waiter, ?waited, "Rendezvous timed out");
                    return Err(BarrierError::Timeout {
                        tag: self.tag.to_string(),
                        waited,
                    }
                    .into());
                }
            },
            None => (&mut self.rx).await,
        };

        match received {
            Ok(payload) => {
                self.fulfilled = true;
                trace!(tag = %self.tag, waiter = self.waiter, "released");
                Ok(payload)
            }
            Err(_) => Err(BarrierError::ReleaseDropped {
                tag: self.tag.to_string(),
            }
            .into()),
        }
    }
}

impl Drop for Release {
    fn drop(&mut self) {
        // Исполненный релиз помпа уже сняла с регистрации при доставке.
        if !self.fulfilled {
            self.pump.unsubscribe_waiter(self.tag.clone(), self.waiter);
        }
    }
}
