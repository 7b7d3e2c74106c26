use std::{future::Future, sync::Arc};

use rendezvous_error::RendezvousResult;
use tracing::{info, warn};

use super::{
    core::Barrier,
    notifier::ReleaseNotifier,
    pump::{millis, ChannelPump, PumpTask},
};
use crate::{
    broker::{CommandConnection, ConnectionPool},
    config::BarrierConfig,
    resp::RespPool,
};

/// Владелец пула, помпы и барьера.
///
/// Закрытие (`close`, `scope` или, в крайнем случае, `Drop`) всегда
/// останавливает помпу, дожидается её, и только потом освобождает
/// соединения: собственный пул отключается целиком, чужой пул не трогается,
/// закрываются только соединения контекста.
pub struct BarrierContext<P: ConnectionPool> {
    pool: Arc<P>,
    owns_pool: bool,
    barrier: Barrier<P::Command>,
    pump: PumpTask,
    closed: bool,
}

impl<P: ConnectionPool> std::fmt::Debug for BarrierContext<P> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BarrierContext")
            .field("owns_pool", &self.owns_pool)
            .field("closed", &self.closed)
            .field("barrier", &self.barrier)
            .field("pump", &self.pump)
            .finish_non_exhaustive()
    }
}

impl BarrierContext<RespPool> {
    /// Контекст с собственным пулом к брокеру из `config`.
    pub async fn connect(config: &BarrierConfig) -> RendezvousResult<Self> {
        let pool = RespPool::from_config(config)?;
        Self::open(Arc::new(pool), true, config).await
    }
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl<P: ConnectionPool> BarrierContext<P> {
    /// Контекст поверх пула вызывающего кода. При закрытии пул остаётся
    /// подключённым.
    pub async fn with_pool(
        pool: Arc<P>,
        config: &BarrierConfig,
    ) -> RendezvousResult<Self> {
        Self::open(pool, false, config).await
    }

    /// Контекст, который забирает пул себе и отключит его при закрытии.
    pub async fn owning(
        pool: P,
        config: &BarrierConfig,
    ) -> RendezvousResult<Self> {
        Self::open(Arc::new(pool), true, config).await
    }

    async fn open(
        pool: Arc<P>,
        owns_pool: bool,
        config: &BarrierConfig,
    ) -> RendezvousResult<Self> {
        let opened = open_parts(pool.as_ref(), config).await;

        let (commands, pump) = match opened {
            Ok(parts) => parts,
            Err(e) => {
                if owns_pool {
                    pool.disconnect().await;
                }
                return Err(e);
            }
        };

        let barrier = Barrier::new(commands, ReleaseNotifier::new(pump.handle().clone()));
        info!(owns_pool, quantum_ms = millis(config.quantum), "Barrier context opened");

        Ok(Self {
            pool,
            owns_pool,
            barrier,
            pump,
            closed: false,
        })
    }

    /// Барьер контекста. Клоны можно раздавать задачам.
    pub fn barrier(&self) -> Barrier<P::Command> {
        self.barrier.clone()
    }

    pub fn pool(&self) -> &Arc<P> {
        &self.pool
    }

    pub fn owns_pool(&self) -> bool {
        self.owns_pool
    }

    /// Останавливает помпу, дожидается её и освобождает соединения.
    ///
    /// Все шаги выполняются даже при ошибке одного из них; возвращается
    /// первая ошибка.
    pub async fn close(mut self) -> RendezvousResult<()> {
        self.closed = true;

        let pumped = self.pump.stop_and_join().await;
        let closed = self.barrier.close().await;
        if self.owns_pool {
            self.pool.disconnect().await;
        }
        info!(owns_pool = self.owns_pool, "Barrier context closed");

        pumped.and(closed)
    }

    /// Выполняет `f` с барьером контекста и закрывает контекст на любом
    /// исходе `f`.
    pub async fn scope<F, Fut, T>(
        self,
        f: F,
    ) -> RendezvousResult<T>
    where
        F: FnOnce(Barrier<P::Command>) -> Fut,
        Fut: Future<Output = RendezvousResult<T>>,
    {
        let result = f(self.barrier()).await;
        let closed = self.close().await;

        match (result, closed) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Barrier context cleanup failed after error");
                Err(e)
            }
        }
    }
}

impl<P: ConnectionPool> Drop for BarrierContext<P> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Отмена или паника: ждать нельзя. Помпа закроет своё соединение
        // сама, остальное отключаем в фоне, если есть рантайм.
        warn!("Barrier context dropped without close()");
        self.pump.handle().stop();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let barrier = self.barrier.clone();
        let pool = self.pool.clone();
        let owns_pool = self.owns_pool;
        runtime.spawn(async move {
            let _ = barrier.close().await;
            if owns_pool {
                pool.disconnect().await;
            }
        });
    }
}

/// Открывает командное соединение и запускает помпу. При ошибке уже
/// открытое закрывается.
async fn open_parts<P: ConnectionPool>(
    pool: &P,
    config: &BarrierConfig,
) -> RendezvousResult<(P::Command, PumpTask)> {
    let mut commands = pool.command().await?;
    let started = match pool.subscriber().await {
        Ok(subscriber) => ChannelPump::start(subscriber, config.quantum).await,
        Err(e) => Err(e),
    };
    match started {
        Ok(pump) => Ok((commands, pump)),
        Err(e) => {
            let _ = commands.close().await;
            Err(e)
        }
    }
}
