//! Помпа каналов.
//!
//! Единственный владелец соединения-подписчика. Все подписки, отписки и
//! доставка сообщений выполняются в одной задаче, поэтому соединение никогда
//! не используется конкурентно. Остальные задачи общаются с помпой только
//! через почтовый ящик команд (MPSC, FIFO).

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use rendezvous_error::{BarrierError, GenericError, RendezvousResult, StatusCode};
use tokio::{
    sync::{mpsc, oneshot, Notify},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use super::release::{Release, ReleaseTrigger};
use crate::broker::{Message, SubscriptionConnection};

/// Зарезервированный канал: подписка на него делается при старте, чтобы у
/// соединения всегда был хотя бы один активный канал.
pub const NOOP_CHANNEL: &str = "__dummy__";

/// Идентификатор ожидающего внутри одной помпы.
pub type WaiterId = u64;

/// Единица работы помпы.
#[derive(Debug)]
enum PumpCommand {
    /// Подписка с подтверждением выполнения
    Subscribe {
        channel: Arc<str>,
        waiter: WaiterId,
        trigger: ReleaseTrigger,
        ack: oneshot::Sender<RendezvousResult<()>>,
    },
    /// Отписка одного ожидающего
    UnsubscribeWaiter { channel: Arc<str>, waiter: WaiterId },
    /// Отписка канала целиком
    Unsubscribe { channel: Arc<str> },
}

/// Handle помпы: отправка команд и остановка. Дёшево клонируется.
#[derive(Debug, Clone)]
pub struct PumpHandle {
    tx: mpsc::UnboundedSender<PumpCommand>,
    shared: Arc<PumpShared>,
}

#[derive(Debug)]
struct PumpShared {
    running: AtomicBool,
    stop: Notify,
    next_waiter: AtomicU64,
}

/// Запущенная задача помпы.
#[derive(Debug)]
pub struct PumpTask {
    handle: PumpHandle,
    join: Option<JoinHandle<RendezvousResult<()>>>,
}

/// Цикл помпы. Владеет соединением-подписчиком.
pub struct ChannelPump<S: SubscriptionConnection> {
    conn: S,
    rx: mpsc::UnboundedReceiver<PumpCommand>,
    /// Канал → ожидающие на нём
    handlers: HashMap<Arc<str>, HashMap<WaiterId, ReleaseTrigger>>,
    quantum: Duration,
    shared: Arc<PumpShared>,
}

impl<S: SubscriptionConnection> std::fmt::Debug for ChannelPump<S> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let waiters: usize = self.handlers.values().map(HashMap::len).sum();
        f.debug_struct("ChannelPump")
            .field("channels", &self.handlers.len())
            .field("waiters", &waiters)
            .field("quantum", &self.quantum)
            .field("running", &self.shared.running.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

/// Длительность в целых миллисекундах для полей логов; насыщается на
/// `u64::MAX`.
pub(crate) fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

////////////////////////////////////////////////////////////////////////////////
// PumpHandle
////////////////////////////////////////////////////////////////////////////////

impl PumpHandle {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Регистрирует ожидающего на канале и возвращает его релиз.
    ///
    /// Возвращается только после того, как помпа выполнила подписку и брокер
    /// её подтвердил.
    pub async fn subscribe(
        &self,
        channel: Arc<str>,
    ) -> RendezvousResult<Release> {
        if !self.is_running() {
            return Err(BarrierError::PumpStopped.into());
        }

        let waiter = self.shared.next_waiter.fetch_add(1, Ordering::Relaxed) + 1;
        let (release, trigger) = Release::pair(channel.clone(), waiter, self.clone());
        let (ack, done) = oneshot::channel();

        self.tx
            .send(PumpCommand::Subscribe {
                channel,
                waiter,
                trigger,
                ack,
            })
            .map_err(|_| BarrierError::PumpStopped)?;

        match done.await {
            Ok(Ok(())) => Ok(release),
            Ok(Err(e)) => Err(e),
            // Помпа завершилась, не выполнив команду.
            Err(_) => Err(BarrierError::PumpStopped.into()),
        }
    }

    /// Снимает одного ожидающего. Не ждёт выполнения.
    pub fn unsubscribe_waiter(
        &self,
        channel: Arc<str>,
        waiter: WaiterId,
    ) {
        // Если помпа уже остановлена, снимать нечего.
        let _ = self
            .tx
            .send(PumpCommand::UnsubscribeWaiter { channel, waiter });
    }

    /// Снимает всех ожидающих канала. Не ждёт выполнения.
    pub fn unsubscribe(
        &self,
        channel: Arc<str>,
    ) {
        let _ = self.tx.send(PumpCommand::Unsubscribe { channel });
    }

    /// Просит цикл завершиться после текущей итерации.
    pub fn stop(&self) {
        self.shared.running.store(false, Ordering::Release);
        self.shared.stop.notify_one();
    }
}

////////////////////////////////////////////////////////////////////////////////
// PumpTask
////////////////////////////////////////////////////////////////////////////////

impl PumpTask {
    pub fn handle(&self) -> &PumpHandle {
        &self.handle
    }

    /// Останавливает помпу и дожидается завершения задачи.
    ///
    /// # Возвращает
    /// Ошибку брокера, если цикл завершился из-за неё.
    pub async fn stop_and_join(&mut self) -> RendezvousResult<()> {
        self.handle.stop();
        match self.join.take() {
            Some(join) => join.await.map_err(|e| {
                GenericError::new(StatusCode::Internal, format!("Channel pump task failed: {e}"))
            })?,
            None => Ok(()),
        }
    }
}

impl Drop for PumpTask {
    fn drop(&mut self) {
        // Без join: цикл сам закроет соединение на следующей итерации.
        if self.join.is_some() {
            self.handle.stop();
        }
    }
}

////////////////////////////////////////////////////////////////////////////////
// ChannelPump
////////////////////////////////////////////////////////////////////////////////

impl<S: SubscriptionConnection> ChannelPump<S> {
    /// Подписывает соединение на зарезервированный канал и запускает цикл
    /// помпы в отдельной задаче.
    pub async fn start(
        mut conn: S,
        quantum: Duration,
    ) -> RendezvousResult<PumpTask> {
        if let Err(e) = conn.subscribe(NOOP_CHANNEL).await {
            let _ = conn.close().await;
            return Err(e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(PumpShared {
            running: AtomicBool::new(true),
            stop: Notify::new(),
            next_waiter: AtomicU64::new(0),
        });
        let pump = ChannelPump {
            conn,
            rx,
            handlers: HashMap::new(),
            quantum,
            shared: shared.clone(),
        };

        let join = tokio::spawn(pump.run());
        debug!(quantum_ms = millis(quantum), "Channel pump started");

        Ok(PumpTask {
            handle: PumpHandle { tx, shared },
            join: Some(join),
        })
    }

    async fn run(mut self) -> RendezvousResult<()> {
        let result = self.run_loop().await;
        self.shared.running.store(false, Ordering::Release);

        if let Err(e) = &result {
            warn!(error = %e, "Channel pump stopped on broker failure");
        }

        // Ни одна команда не теряется молча: ожидающие подписки получают
        // PumpStopped, а сброс триггеров будит ожидающие релизы.
        self.rx.close();
        while let Ok(cmd) = self.rx.try_recv() {
            if let PumpCommand::Subscribe { ack, .. } = cmd {
                let _ = ack.send(Err(BarrierError::PumpStopped.into()));
            }
        }
        self.handlers.clear();

        if let Err(e) = self.conn.close().await {
            debug!(error = %e, "Failed to close subscription connection");
        }
        debug!("Channel pump stopped");
        result
    }

    async fn run_loop(&mut self) -> RendezvousResult<()> {
        while self.shared.running.load(Ordering::Acquire) {
            tokio::select! {
                biased;
                _ = self.shared.stop.notified() => break,
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => self.execute(cmd).await?,
                    // Все handle уничтожены: работы больше не будет.
                    None => break,
                },
                msg = self.conn.next_message(self.quantum) => {
                    if let Some(msg) = msg? {
                        self.deliver(msg).await?;
                    }
                }
            }
            self.drain_commands().await?;
        }
        Ok(())
    }

    /// Выполняет все команды, уже стоящие в очереди.
    async fn drain_commands(&mut self) -> RendezvousResult<()> {
        while let Ok(cmd) = self.rx.try_recv() {
            self.execute(cmd).await?;
        }
        Ok(())
    }

    async fn execute(
        &mut self,
        cmd: PumpCommand,
    ) -> RendezvousResult<()> {
        match cmd {
            PumpCommand::Subscribe {
                channel,
                waiter,
                trigger,
                ack,
            } => {
                if !self.handlers.contains_key(&channel) {
                    if let Err(e) = self.conn.subscribe(&channel).await {
                        let _ = ack.send(Err(e.clone()));
                        return Err(e);
                    }
                }
                self.handlers
                    .entry(channel.clone())
                    .or_default()
                    .insert(waiter, trigger);
                trace!(tag = %channel, waiter, "listen");
                // Вызывающий мог уже уйти (отмена); его Release снимет
                // регистрацию сам.
                let _ = ack.send(Ok(()));
            }
            PumpCommand::UnsubscribeWaiter { channel, waiter } => {
                self.remove_waiter(&channel, waiter).await?;
            }
            PumpCommand::Unsubscribe { channel } => {
                if self.handlers.remove(&channel).is_some() {
                    trace!(tag = %channel, "unlisten");
                    self.conn.unsubscribe(&channel).await?;
                }
            }
        }
        Ok(())
    }

    async fn remove_waiter(
        &mut self,
        channel: &Arc<str>,
        waiter: WaiterId,
    ) -> RendezvousResult<()> {
        let Some(waiters) = self.handlers.get_mut(channel) else {
            return Ok(());
        };
        if waiters.remove(&waiter).is_none() {
            return Ok(());
        }
        trace!(tag = %channel, waiter, "unlisten waiter");

        if waiters.is_empty() {
            self.handlers.remove(channel);
            self.conn.unsubscribe(channel).await?;
        }
        Ok(())
    }

    /// Исполняет релизы всех ожидающих канала и снимает их регистрацию.
    async fn deliver(
        &mut self,
        msg: Message,
    ) -> RendezvousResult<()> {
        if &*msg.channel == NOOP_CHANNEL {
            return Ok(());
        }
        let Some(waiters) = self.handlers.remove(&msg.channel) else {
            trace!(tag = %msg.channel, "message for unknown channel dropped");
            return Ok(());
        };

        let total = waiters.len();
        let mut delivered = 0;
        for (_, mut trigger) in waiters {
            if trigger.fire(msg.payload.clone()) {
                delivered += 1;
            }
        }
        debug!(tag = %msg.channel, delivered, total, "release delivered");

        self.conn.unsubscribe(&msg.channel).await
    }
}
