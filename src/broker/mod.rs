//! Абстракция брокера.
//!
//! Барьеру от брокера нужно немного:
//! - атомарный `INCR` именованного счётчика и `PUBLISH` в канал
//!   (`CommandConnection`);
//! - подписка/отписка на каналы и ожидание следующего сообщения с
//!   ограниченным таймаутом (`SubscriptionConnection`);
//! - пул, выдающий оба вида соединений (`ConnectionPool`).
//!
//! Реализации:
//! - `memory`: брокер внутри процесса (тесты, бенчмарки, встраивание);
//! - [`crate::resp`]: сетевой брокер, говорящий на RESP.

pub mod memory;
pub mod message;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rendezvous_error::RendezvousResult;

pub use memory::{MemoryBroker, MemoryCommand, MemoryPool, MemorySubscriber};
pub use message::Message;

/// Соединение для обычных команд брокера.
#[async_trait]
pub trait CommandConnection: Send + 'static {
    /// Атомарно увеличивает счётчик `key` на единицу и возвращает новое
    /// значение. Отсутствующий счётчик считается равным нулю.
    async fn incr(
        &mut self,
        key: &str,
    ) -> RendezvousResult<i64>;

    /// Публикует `payload` в канал и возвращает число получателей.
    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> RendezvousResult<usize>;

    /// Удаляет ключ. Возвращает `true`, если ключ существовал.
    async fn del(
        &mut self,
        key: &str,
    ) -> RendezvousResult<bool>;

    /// Закрывает соединение. Повторный вызов допустим.
    async fn close(&mut self) -> RendezvousResult<()>;
}

/// Соединение в режиме подписки.
///
/// Не предназначено для конкурентного использования: им владеет ровно одна
/// задача (помпа каналов).
#[async_trait]
pub trait SubscriptionConnection: Send + 'static {
    /// Подписывается на канал и возвращается только после того, как брокер
    /// подтвердил подписку.
    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()>;

    /// Отписывается от канала. Отписка от неизвестного канала не ошибка.
    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()>;

    /// Ждёт следующее сообщение не дольше `wait`.
    ///
    /// `Ok(None)`: за отведённое время ничего не пришло. Future должна быть
    /// cancel-safe: отмена не теряет уже прочитанные байты.
    async fn next_message(
        &mut self,
        wait: Duration,
    ) -> RendezvousResult<Option<Message>>;

    /// Закрывает соединение. Повторный вызов допустим.
    async fn close(&mut self) -> RendezvousResult<()>;
}

/// Пул соединений с брокером.
#[async_trait]
pub trait ConnectionPool: Send + Sync + 'static {
    type Command: CommandConnection;
    type Subscriber: SubscriptionConnection;

    /// Выдаёт соединение для команд.
    async fn command(&self) -> RendezvousResult<Self::Command>;

    /// Выдаёт отдельное соединение для подписок.
    async fn subscriber(&self) -> RendezvousResult<Self::Subscriber>;

    /// Отключает пул: новые соединения не выдаются.
    async fn disconnect(&self);
}
