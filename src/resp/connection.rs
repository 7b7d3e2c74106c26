use std::time::Duration;

use bytes::{Bytes, BytesMut};
use rendezvous_error::{ClientError, RendezvousResult, ResultExt};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt, BufWriter},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream,
    },
    time::{timeout, Instant},
};
use tracing::{debug, trace};

use super::{BrokerEndpoint, RespDecoder, RespEncoder, RespFrame};

/// Начальная ёмкость буфера чтения.
const READ_BUFFER_CAPACITY: usize = 8 * 1024;

/// Таймауты сетевого соединения.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionTimeouts {
    /// Таймаут подключения
    pub connect: Duration,
    /// Таймаут ожидания ответа на команду
    pub read: Duration,
    /// Таймаут записи
    pub write: Duration,
}

impl Default for ConnectionTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(30),
            write: Duration::from_secs(10),
        }
    }
}

/// TCP-соединение с брокером, говорящее на RESP.
///
/// Непрочитанные байты живут в `buffer` самого соединения, поэтому
/// [`RespConnection::read_frame_within`] можно отменять по таймауту без
/// потери данных.
pub struct RespConnection {
    /// Адрес брокера (для логов и ошибок)
    address: String,
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    buffer: BytesMut,
    decoder: RespDecoder,
    timeouts: ConnectionTimeouts,
}

////////////////////////////////////////////////////////////////////////////////
// Собственные методы
////////////////////////////////////////////////////////////////////////////////

impl RespConnection {
    /// Подключается к брокеру, выполняет `AUTH` и `SELECT`, если они заданы в
    /// адресе.
    pub async fn connect(
        endpoint: &BrokerEndpoint,
        timeouts: ConnectionTimeouts,
    ) -> RendezvousResult<Self> {
        let address = endpoint.address();
        debug!(%address, "Connecting to broker");

        let stream = timeout(timeouts.connect, TcpStream::connect(&address))
            .await
            .map_err(|_| ClientError::ConnectionTimeout {
                address: address.clone(),
            })?
            .map_err(|e| ClientError::ConnectionFailed {
                address: address.clone(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut conn = Self {
            address,
            reader: read_half,
            writer: BufWriter::new(write_half),
            buffer: BytesMut::with_capacity(READ_BUFFER_CAPACITY),
            decoder: RespDecoder::new(),
            timeouts,
        };

        if let Some(password) = &endpoint.password {
            let mut args = vec![Bytes::from_static(b"AUTH")];
            if let Some(user) = &endpoint.username {
                args.push(Bytes::copy_from_slice(user.as_bytes()));
            }
            args.push(Bytes::copy_from_slice(password.as_bytes()));

            match conn.execute(args).await {
                Ok(_) => {}
                Err(e) => match e.downcast_ref::<ClientError>() {
                    Some(ClientError::ServerError { message }) => {
                        return Err(ClientError::AuthenticationFailed {
                            reason: message.clone(),
                        }
                        .into())
                    }
                    _ => return Err(e),
                },
            }
        }

        if endpoint.db != 0 {
            conn.execute(vec![
                Bytes::from_static(b"SELECT"),
                Bytes::from(endpoint.db.to_string()),
            ])
            .await
            .context("Failed to select database")?;
        }

        debug!(address = %conn.address, db = endpoint.db, "Broker connection established");
        Ok(conn)
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Таймауты, с которыми открыто соединение.
    pub fn timeouts(&self) -> ConnectionTimeouts {
        self.timeouts
    }

    /// Есть ли в буфере непрочитанные байты.
    pub fn has_buffered(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Отправляет фрейм с таймаутом записи.
    pub async fn send(
        &mut self,
        frame: &RespFrame,
    ) -> RendezvousResult<()> {
        let encoded = RespEncoder::encode(frame)?;
        trace!(address = %self.address, frame = %frame.describe(), "send");

        timeout(self.timeouts.write, async {
            self.writer.write_all(&encoded).await?;
            self.writer.flush().await
        })
        .await
        .map_err(|_| ClientError::WriteTimeout)??;
        Ok(())
    }

    /// Читает следующий фрейм, ожидая не дольше таймаута чтения.
    pub async fn read_frame(&mut self) -> RendezvousResult<RespFrame> {
        let wait = self.timeouts.read;
        match self.read_frame_within(wait).await? {
            Some(frame) => Ok(frame),
            None => Err(ClientError::ReadTimeout.into()),
        }
    }

    /// Ждёт следующий фрейм не дольше `wait`; `Ok(None)` по истечении.
    pub async fn read_frame_within(
        &mut self,
        wait: Duration,
    ) -> RendezvousResult<Option<RespFrame>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(frame) = self.decoder.decode(&mut self.buffer)? {
                trace!(address = %self.address, frame = %frame.describe(), "recv");
                return Ok(Some(frame));
            }

            // `read_buf` cancel-safe: либо байты уже в буфере, либо ничего не
            // прочитано.
            let n = match tokio::time::timeout_at(deadline, self.reader.read_buf(&mut self.buffer))
                .await
            {
                Ok(res) => res?,
                Err(_) => return Ok(None),
            };
            if n == 0 {
                return Err(ClientError::ConnectionClosed.into());
            }
        }
    }

    /// Отправляет команду и возвращает ответ. Ответ `-ERR` становится
    /// [`ClientError::ServerError`].
    pub async fn execute(
        &mut self,
        args: Vec<Bytes>,
    ) -> RendezvousResult<RespFrame> {
        let frame = RespFrame::command(args);
        self.send(&frame).await?;
        match self.read_frame().await? {
            RespFrame::Error(message) => Err(ClientError::ServerError { message }.into()),
            reply => Ok(reply),
        }
    }

    /// Закрывает пишущую сторону соединения.
    pub async fn shutdown(&mut self) -> RendezvousResult<()> {
        debug!(address = %self.address, "Closing broker connection");
        self.writer.shutdown().await?;
        Ok(())
    }
}

impl std::fmt::Debug for RespConnection {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("RespConnection")
            .field("address", &self.address)
            .field("buffered", &self.buffer.len())
            .finish()
    }
}
