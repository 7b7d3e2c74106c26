use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use rendezvous_error::{BarrierError, RendezvousResult};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{notifier::ReleaseNotifier, pump::NOOP_CHANNEL};
use crate::broker::CommandConnection;

/// Барьер рандеву поверх счётчика и канала брокера.
///
/// Клоны делят одно командное соединение и одну помпу; `sync` можно
/// вызывать из многих задач одновременно.
pub struct Barrier<C: CommandConnection> {
    inner: Arc<BarrierInner<C>>,
}

struct BarrierInner<C> {
    /// `None` после закрытия контекста
    commands: Mutex<Option<C>>,
    notifier: ReleaseNotifier,
}

impl<C: CommandConnection> Clone for Barrier<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: CommandConnection> std::fmt::Debug for Barrier<C> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // Занятая блокировка значит, что команда в полёте; состояние не ждём.
        let closed = self.inner.commands.try_lock().ok().map(|c| c.is_none());
        f.debug_struct("Barrier")
            .field("notifier", &self.inner.notifier)
            .field("closed", &closed)
            .finish()
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<C: CommandConnection> Barrier<C> {
    pub fn new(
        commands: C,
        notifier: ReleaseNotifier,
    ) -> Self {
        Self {
            inner: Arc::new(BarrierInner {
                commands: Mutex::new(Some(commands)),
                notifier,
            }),
        }
    }

    pub fn notifier(&self) -> &ReleaseNotifier {
        &self.inner.notifier
    }

    /// Ждёт, пока `count` участников с тегом `tag` не вызовут `sync`.
    ///
    /// Порядок шагов:
    /// 1. подписка на канал `tag` (до инкремента, иначе быстрый участник
    ///    может опубликовать релиз раньше, чем мы начнём слушать);
    /// 2. `INCR tag`;
    /// 3. участник, увидевший `n >= count`, публикует свой `message`;
    /// 4. все, включая публикующего, ждут релиз.
    ///
    /// # Возвращает
    /// Сообщение участника, чей инкремент достиг порога. Истечение `timeout`
    /// даёт [`BarrierError::Timeout`]; ошибки брокера пробрасываются как есть.
    pub async fn sync(
        &self,
        tag: &str,
        count: i64,
        message: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> RendezvousResult<String> {
        validate(tag, count)?;
        let message = message.into();

        let release = self.inner.notifier.listen(tag).await?;

        {
            let mut guard = self.inner.commands.lock().await;
            let conn = guard.as_mut().ok_or(BarrierError::ContextClosed)?;

            let n = conn.incr(tag).await?;
            debug!(tag, n, count, waiter = release.waiter(), "arrived");

            if n >= count {
                let receivers = conn.publish(tag, message).await?;
                info!(tag, n, count, receivers, "rendezvous complete, release published");
            }
        }

        let payload = release.wait(timeout).await?;
        Ok(String::from_utf8(payload.to_vec())?)
    }

    /// Удаляет счётчик тега, чтобы тег можно было использовать заново.
    ///
    /// # Возвращает
    /// `true`, если счётчик существовал.
    pub async fn reset(
        &self,
        tag: &str,
    ) -> RendezvousResult<bool> {
        validate(tag, 1)?;
        let mut guard = self.inner.commands.lock().await;
        let conn = guard.as_mut().ok_or(BarrierError::ContextClosed)?;
        conn.del(tag).await
    }

    /// Закрывает командное соединение. Последующие `sync` вернут
    /// [`BarrierError::ContextClosed`].
    pub async fn close(&self) -> RendezvousResult<()> {
        let conn = self.inner.commands.lock().await.take();
        match conn {
            Some(mut conn) => conn.close().await,
            None => Ok(()),
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.commands.lock().await.is_none()
    }
}

/// Проверка аргументов до любого обращения к брокеру.
fn validate(
    tag: &str,
    count: i64,
) -> RendezvousResult<()> {
    if tag.is_empty() || tag == NOOP_CHANNEL {
        return Err(BarrierError::InvalidTag {
            tag: tag.to_string(),
        }
        .into());
    }
    if count < 1 {
        return Err(BarrierError::InvalidCount { count }.into());
    }
    Ok(())
}
