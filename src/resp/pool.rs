use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use rendezvous_error::{ClientError, RendezvousResult};
use tracing::{debug, info};

use super::{
    BrokerEndpoint, ConnectionTimeouts, RespCommandConnection, RespConnection, RespSubscriber,
};
use crate::{broker::ConnectionPool, config::BarrierConfig};

/// Сколько простаивающих командных соединений держит пул.
const DEFAULT_MAX_IDLE: usize = 8;

/// Общее состояние пула и выданных им соединений.
#[derive(Debug)]
pub(crate) struct PoolShared {
    endpoint: BrokerEndpoint,
    timeouts: ConnectionTimeouts,
    pub(crate) closed: AtomicBool,
    idle: Mutex<Vec<RespConnection>>,
    max_idle: usize,
}

impl PoolShared {
    /// Простаивающее соединение или новое, если простаивающих нет.
    pub(crate) async fn acquire(&self) -> RendezvousResult<RespConnection> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::PoolClosed.into());
        }
        let reused = self.idle.lock().pop();
        match reused {
            Some(conn) => Ok(conn),
            None => RespConnection::connect(&self.endpoint, self.timeouts).await,
        }
    }

    /// Возвращает исправное соединение в пул.
    pub(crate) fn release(
        &self,
        conn: RespConnection,
    ) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(conn);
        }
    }
}

/// Пул соединений к сетевому брокеру.
///
/// Командные соединения переиспользуются; соединение-подписчик всегда
/// открывается новое, так как режим подписки необратим для соединения.
/// Клоны пула делят одно состояние.
#[derive(Debug, Clone)]
pub struct RespPool {
    shared: Arc<PoolShared>,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespPool {
    pub fn new(
        endpoint: BrokerEndpoint,
        timeouts: ConnectionTimeouts,
    ) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                endpoint,
                timeouts,
                closed: AtomicBool::new(false),
                idle: Mutex::new(Vec::new()),
                max_idle: DEFAULT_MAX_IDLE,
            }),
        }
    }

    /// Пул по конфигурации барьера. Подключений здесь не происходит.
    pub fn from_config(config: &BarrierConfig) -> RendezvousResult<Self> {
        let endpoint = BrokerEndpoint::parse(&config.broker_url)?;
        Ok(Self::new(endpoint, config.timeouts()))
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.shared.endpoint
    }

    /// Число простаивающих соединений.
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> RendezvousResult<()> {
        if self.is_disconnected() {
            return Err(ClientError::PoolClosed.into());
        }
        Ok(())
    }
}

#[async_trait]
impl ConnectionPool for RespPool {
    type Command = RespCommandConnection;
    type Subscriber = RespSubscriber;

    async fn command(&self) -> RendezvousResult<RespCommandConnection> {
        let conn = self.shared.acquire().await?;
        Ok(RespCommandConnection::new(conn, self.shared.clone()))
    }

    async fn subscriber(&self) -> RendezvousResult<RespSubscriber> {
        self.ensure_open()?;
        let conn = RespConnection::connect(&self.shared.endpoint, self.shared.timeouts).await?;
        Ok(RespSubscriber::new(conn, self.shared.clone()))
    }

    async fn disconnect(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let idle: Vec<_> = std::mem::take(&mut *self.shared.idle.lock());
        let dropped = idle.len();
        for mut conn in idle {
            if let Err(e) = conn.shutdown().await {
                debug!(error = %e, "Failed to shut down idle connection");
            }
        }
        info!(endpoint = %self.shared.endpoint, dropped, "Connection pool disconnected");
    }
}

#[cfg(test)]
mod tests {
    use rendezvous_error::StatusCode;

    use super::*;

    #[tokio::test]
    async fn test_disconnected_pool_refuses_connections() {
        let pool = RespPool::new(
            BrokerEndpoint::parse("redis://127.0.0.1:1").unwrap(),
            ConnectionTimeouts::default(),
        );
        pool.disconnect().await;
        assert!(pool.is_disconnected());

        let err = pool.command().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PoolClosed);
        let err = pool.subscriber().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::PoolClosed);
    }

    #[test]
    fn test_from_config_rejects_bad_url() {
        let config = BarrierConfig {
            broker_url: "ftp://nowhere".to_string(),
            ..BarrierConfig::default()
        };
        assert!(RespPool::from_config(&config).is_err());
    }
}
