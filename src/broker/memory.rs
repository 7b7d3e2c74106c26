use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use rendezvous_error::{ClientError, RendezvousResult};
use tokio::sync::mpsc;
use tracing::trace;

use super::{CommandConnection, ConnectionPool, Message, SubscriptionConnection};

type ChannelKey = Arc<str>;
type ConnectionId = u64;

/// Брокер внутри процесса.
///
/// Повторяет семантику сетевого брокера, нужную барьеру:
/// - атомарные счётчики по ключу (`incr`/`del`);
/// - точные подписки по имени канала, по одной очереди на соединение;
/// - `publish` доставляет только текущим подписчикам, без повторной
///   доставки опоздавшим, и возвращает число получателей;
/// - пустые каналы удаляются автоматически.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    /// Канал → (id соединения → очередь соединения)
    channels: DashMap<ChannelKey, HashMap<ConnectionId, mpsc::UnboundedSender<Message>>>,
    /// Счётчики по ключу
    counters: DashMap<ChannelKey, i64>,
    next_connection_id: AtomicU64,
    /// Общее количество вызовов `publish`
    pub publish_count: AtomicUsize,
    /// Количество публикаций, не дошедших ни до одного подписчика
    pub send_error_count: AtomicUsize,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl MemoryBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Атомарно увеличивает счётчик и возвращает новое значение.
    ///
    /// Запись держит блокировку шарда `DashMap` на время инкремента, поэтому
    /// конкурентные вызовы никогда не увидят одно и то же значение.
    pub fn incr(
        &self,
        key: &str,
    ) -> i64 {
        let mut entry = self.counters.entry(Arc::from(key)).or_insert(0);
        *entry += 1;
        *entry
    }

    /// Текущее значение счётчика (без создания).
    pub fn counter(
        &self,
        key: &str,
    ) -> Option<i64> {
        self.counters.get(key).map(|v| *v)
    }

    pub fn del(
        &self,
        key: &str,
    ) -> bool {
        self.counters.remove(key).is_some()
    }

    /// Публикация сообщения в канал.
    ///
    /// Если ни один подписчик не получил сообщение, увеличивает
    /// `send_error_count`. Очереди закрытых соединений вычищаются по ходу.
    pub fn publish(
        &self,
        channel: &str,
        payload: Bytes,
    ) -> usize {
        self.publish_count.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut now_empty = false;
        if let Some(mut entry) = self.channels.get_mut(channel) {
            let msg = Message::new(entry.key().clone(), payload);
            entry.value_mut().retain(|_, tx| {
                let ok = tx.send(msg.clone()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            });
            now_empty = entry.value().is_empty();
        }

        if now_empty {
            self.channels.remove_if(channel, |_, subs| subs.is_empty());
        }
        if delivered == 0 {
            self.send_error_count.fetch_add(1, Ordering::Relaxed);
        }

        trace!(channel, delivered, "memory publish");
        delivered
    }

    /// Число соединений, подписанных на канал.
    pub fn subscriber_count(
        &self,
        channel: &str,
    ) -> usize {
        self.channels.get(channel).map_or(0, |subs| subs.len())
    }

    fn allocate_id(&self) -> ConnectionId {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn attach(
        &self,
        id: ConnectionId,
        channel: &str,
        tx: mpsc::UnboundedSender<Message>,
    ) {
        self.channels
            .entry(Arc::from(channel))
            .or_default()
            .insert(id, tx);
    }

    fn detach(
        &self,
        id: ConnectionId,
        channel: &str,
    ) {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.remove(&id);
        }
        self.channels.remove_if(channel, |_, subs| subs.is_empty());
    }
}

/// Пул соединений к [`MemoryBroker`].
///
/// Несколько пулов могут делить один брокер: так тесты моделируют
/// отдельные процессы-воркеры, говорящие с общим брокером.
#[derive(Debug, Clone)]
pub struct MemoryPool {
    broker: Arc<MemoryBroker>,
    closed: Arc<AtomicBool>,
}

impl MemoryPool {
    /// Пул над новым пустым брокером.
    pub fn new() -> Self {
        Self::with_broker(MemoryBroker::new())
    }

    pub fn with_broker(broker: Arc<MemoryBroker>) -> Self {
        Self {
            broker,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn broker(&self) -> &Arc<MemoryBroker> {
        &self.broker
    }

    pub fn is_disconnected(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Default for MemoryPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConnectionPool for MemoryPool {
    type Command = MemoryCommand;
    type Subscriber = MemorySubscriber;

    async fn command(&self) -> RendezvousResult<MemoryCommand> {
        if self.is_disconnected() {
            return Err(ClientError::PoolClosed.into());
        }
        Ok(MemoryCommand {
            broker: self.broker.clone(),
            pool_closed: self.closed.clone(),
            closed: false,
        })
    }

    async fn subscriber(&self) -> RendezvousResult<MemorySubscriber> {
        if self.is_disconnected() {
            return Err(ClientError::PoolClosed.into());
        }
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(MemorySubscriber {
            id: self.broker.allocate_id(),
            broker: self.broker.clone(),
            pool_closed: self.closed.clone(),
            tx,
            rx,
            channels: HashSet::new(),
            closed: false,
        })
    }

    async fn disconnect(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Командное соединение к [`MemoryBroker`].
#[derive(Debug)]
pub struct MemoryCommand {
    broker: Arc<MemoryBroker>,
    pool_closed: Arc<AtomicBool>,
    closed: bool,
}

impl MemoryCommand {
    fn ensure_open(&self) -> RendezvousResult<()> {
        if self.closed || self.pool_closed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CommandConnection for MemoryCommand {
    async fn incr(
        &mut self,
        key: &str,
    ) -> RendezvousResult<i64> {
        self.ensure_open()?;
        Ok(self.broker.incr(key))
    }

    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> RendezvousResult<usize> {
        self.ensure_open()?;
        Ok(self.broker.publish(channel, payload))
    }

    async fn del(
        &mut self,
        key: &str,
    ) -> RendezvousResult<bool> {
        self.ensure_open()?;
        Ok(self.broker.del(key))
    }

    async fn close(&mut self) -> RendezvousResult<()> {
        self.closed = true;
        Ok(())
    }
}

/// Соединение-подписчик к [`MemoryBroker`].
///
/// Все каналы соединения сливаются в одну очередь, как у сетевого
/// подписчика.
#[derive(Debug)]
pub struct MemorySubscriber {
    id: ConnectionId,
    broker: Arc<MemoryBroker>,
    pool_closed: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<Message>,
    rx: mpsc::UnboundedReceiver<Message>,
    channels: HashSet<ChannelKey>,
    closed: bool,
}

impl MemorySubscriber {
    fn ensure_open(&self) -> RendezvousResult<()> {
        if self.closed || self.pool_closed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed.into());
        }
        Ok(())
    }

    fn detach_all(&mut self) {
        for channel in self.channels.drain() {
            self.broker.detach(self.id, &channel);
        }
    }
}

#[async_trait]
impl SubscriptionConnection for MemorySubscriber {
    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()> {
        self.ensure_open()?;
        self.broker.attach(self.id, channel, self.tx.clone());
        self.channels.insert(Arc::from(channel));
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()> {
        self.ensure_open()?;
        if self.channels.remove(channel) {
            self.broker.detach(self.id, channel);
        }
        Ok(())
    }

    async fn next_message(
        &mut self,
        wait: Duration,
    ) -> RendezvousResult<Option<Message>> {
        self.ensure_open()?;
        // `recv` у mpsc cancel-safe: по таймауту сообщение не теряется.
        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(msg)) => Ok(Some(msg)),
            // Отправитель живёт в самом соединении, поэтому `None` значит
            // только одно: очередь закрыта.
            Ok(None) => Err(ClientError::ConnectionClosed.into()),
            Err(_) => Ok(None),
        }
    }

    async fn close(&mut self) -> RendezvousResult<()> {
        self.detach_all();
        self.closed = true;
        Ok(())
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.detach_all();
    }
}
