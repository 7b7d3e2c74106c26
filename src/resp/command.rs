use std::sync::{atomic::Ordering, Arc};

use async_trait::async_trait;
use bytes::Bytes;
use rendezvous_error::{ClientError, RendezvousResult};
use tracing::{debug, trace};

use super::{pool::PoolShared, RespConnection, RespFrame};
use crate::broker::CommandConnection;

/// Командное соединение из [`super::RespPool`].
///
/// На время команды сокет извлекается из `conn`. Если future команды
/// отменена до ответа, сокет с недочитанным ответом уничтожается вместе с
/// ней, и следующая команда берёт из пула новое соединение.
///
/// При drop без `close()` исправное соединение возвращается в пул простаивающих.
#[derive(Debug)]
pub struct RespCommandConnection {
    conn: Option<RespConnection>,
    pool: Arc<PoolShared>,
    /// Закрыто вызовом `close()`
    closed: bool,
}

impl RespCommandConnection {
    pub(super) fn new(
        conn: RespConnection,
        pool: Arc<PoolShared>,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool,
            closed: false,
        }
    }

    /// `PING`; полезно для проверки соединения.
    pub async fn ping(&mut self) -> RendezvousResult<()> {
        match self.call("PING", vec![Bytes::from_static(b"PING")]).await? {
            RespFrame::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected("PING", &other)),
        }
    }

    async fn call(
        &mut self,
        command: &str,
        args: Vec<Bytes>,
    ) -> RendezvousResult<RespFrame> {
        if self.closed || self.pool.closed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed.into());
        }
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => {
                debug!(command, "Previous command was interrupted, reconnecting");
                self.pool.acquire().await?
            }
        };

        trace!(command, "broker command");
        match conn.execute(args).await {
            Ok(reply) => {
                self.conn = Some(conn);
                Ok(reply)
            }
            Err(e) => {
                // Ответ `-ERR` прочитан целиком, поток цел. После остальных
                // ошибок соединение не переиспользуется.
                if matches!(
                    e.downcast_ref::<ClientError>(),
                    Some(ClientError::ServerError { .. })
                ) {
                    self.conn = Some(conn);
                }
                Err(e)
            }
        }
    }
}

fn unexpected(
    command: &str,
    reply: &RespFrame,
) -> rendezvous_error::StackError {
    ClientError::UnexpectedResponse {
        command: command.to_string(),
        response: reply.describe(),
    }
    .into()
}

fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

#[async_trait]
impl CommandConnection for RespCommandConnection {
    async fn incr(
        &mut self,
        key: &str,
    ) -> RendezvousResult<i64> {
        let reply = self
            .call("INCR", vec![Bytes::from_static(b"INCR"), arg(key)])
            .await?;
        reply.as_integer().ok_or_else(|| unexpected("INCR", &reply))
    }

    async fn publish(
        &mut self,
        channel: &str,
        payload: Bytes,
    ) -> RendezvousResult<usize> {
        let reply = self
            .call(
                "PUBLISH",
                vec![Bytes::from_static(b"PUBLISH"), arg(channel), payload],
            )
            .await?;
        reply
            .as_integer()
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| unexpected("PUBLISH", &reply))
    }

    async fn del(
        &mut self,
        key: &str,
    ) -> RendezvousResult<bool> {
        let reply = self
            .call("DEL", vec![Bytes::from_static(b"DEL"), arg(key)])
            .await?;
        reply
            .as_integer()
            .map(|n| n > 0)
            .ok_or_else(|| unexpected("DEL", &reply))
    }

    async fn close(&mut self) -> RendezvousResult<()> {
        self.closed = true;
        match self.conn.take() {
            Some(mut conn) => conn.shutdown().await,
            None => Ok(()),
        }
    }
}

impl Drop for RespCommandConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if !conn.has_buffered() {
                self.pool.release(conn);
            }
        }
    }
}
