use std::{
    collections::{HashSet, VecDeque},
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use rendezvous_error::{ClientError, RendezvousResult};
use tokio::time::Instant;
use tracing::{debug, trace};

use super::{pool::PoolShared, RespConnection, RespFrame};
use crate::broker::{Message, SubscriptionConnection};

/// Разобранный push-фрейм режима подписки.
#[derive(Debug, PartialEq, Eq)]
enum Push {
    Message(Message),
    Subscribed(Bytes),
    Unsubscribed,
    Other,
}

impl Push {
    fn classify(frame: RespFrame) -> RendezvousResult<Self> {
        let items = match frame {
            RespFrame::Array(items) => items,
            RespFrame::Error(message) => return Err(ClientError::ServerError { message }.into()),
            _ => return Ok(Push::Other),
        };
        let mut items = items.into_iter();
        let kind = match items.next() {
            Some(RespFrame::Bulk(b)) => b,
            _ => return Ok(Push::Other),
        };

        match (&kind[..], items.next(), items.next()) {
            (b"message", Some(RespFrame::Bulk(channel)), Some(RespFrame::Bulk(payload))) => {
                let channel = String::from_utf8(channel.to_vec())?;
                Ok(Push::Message(Message::new(channel, payload)))
            }
            (b"subscribe", Some(RespFrame::Bulk(channel)), _) => Ok(Push::Subscribed(channel)),
            (b"unsubscribe", _, _) => Ok(Push::Unsubscribed),
            _ => Ok(Push::Other),
        }
    }
}

/// Соединение в режиме подписки.
///
/// `subscribe` дожидается подтверждения брокера. Сообщения, пришедшие пока
/// оно ожидалось, откладываются в `pending` и отдаются первыми.
#[derive(Debug)]
pub struct RespSubscriber {
    conn: Option<RespConnection>,
    pool: Arc<PoolShared>,
    pending: VecDeque<Message>,
    channels: HashSet<String>,
}

impl RespSubscriber {
    pub(super) fn new(
        conn: RespConnection,
        pool: Arc<PoolShared>,
    ) -> Self {
        Self {
            conn: Some(conn),
            pool,
            pending: VecDeque::new(),
            channels: HashSet::new(),
        }
    }

    /// Каналы, на которые соединение сейчас подписано.
    pub fn channels(&self) -> impl Iterator<Item = &str> {
        self.channels.iter().map(String::as_str)
    }

    fn conn(&mut self) -> RendezvousResult<&mut RespConnection> {
        if self.pool.closed.load(Ordering::Acquire) {
            return Err(ClientError::ConnectionClosed.into());
        }
        self.conn
            .as_mut()
            .ok_or_else(|| ClientError::ConnectionClosed.into())
    }
}

#[async_trait]
impl SubscriptionConnection for RespSubscriber {
    async fn subscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()> {
        let frame = RespFrame::command([
            Bytes::from_static(b"SUBSCRIBE"),
            Bytes::copy_from_slice(channel.as_bytes()),
        ]);
        self.conn()?.send(&frame).await?;

        loop {
            let reply = self.conn()?.read_frame().await?;
            match Push::classify(reply)? {
                Push::Subscribed(ch) if &ch[..] == channel.as_bytes() => break,
                Push::Message(msg) => self.pending.push_back(msg),
                _ => {}
            }
        }

        self.channels.insert(channel.to_string());
        debug!(channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(
        &mut self,
        channel: &str,
    ) -> RendezvousResult<()> {
        if !self.channels.remove(channel) {
            return Ok(());
        }
        // Подтверждение не ждём: оно отфильтруется в `next_message`.
        let frame = RespFrame::command([
            Bytes::from_static(b"UNSUBSCRIBE"),
            Bytes::copy_from_slice(channel.as_bytes()),
        ]);
        self.conn()?.send(&frame).await?;
        debug!(channel, "unsubscribed");
        Ok(())
    }

    async fn next_message(
        &mut self,
        wait: Duration,
    ) -> RendezvousResult<Option<Message>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }

        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let Some(frame) = self.conn()?.read_frame_within(remaining).await? else {
                return Ok(None);
            };
            match Push::classify(frame)? {
                Push::Message(msg) => {
                    trace!(channel = %msg.channel, "message");
                    return Ok(Some(msg));
                }
                _ => continue,
            }
        }
    }

    async fn close(&mut self) -> RendezvousResult<()> {
        self.channels.clear();
        self.pending.clear();
        match self.conn.take() {
            Some(mut conn) => conn.shutdown().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &'static str) -> RespFrame {
        RespFrame::Bulk(Bytes::from_static(s.as_bytes()))
    }

    #[test]
    fn test_classify_message() {
        let push = Push::classify(RespFrame::Array(vec![
            bulk("message"),
            bulk("tag"),
            bulk("AAAA"),
        ]))
        .unwrap();
        assert_eq!(push, Push::Message(Message::new("tag", "AAAA")));
    }

    /// Тест проверяет, что подтверждения подписки и отписки не выдаются за
    /// сообщения.
    #[test]
    fn test_classify_confirmations() {
        let sub = Push::classify(RespFrame::Array(vec![
            bulk("subscribe"),
            bulk("tag"),
            RespFrame::Integer(1),
        ]))
        .unwrap();
        assert_eq!(sub, Push::Subscribed(Bytes::from_static(b"tag")));

        let unsub = Push::classify(RespFrame::Array(vec![
            bulk("unsubscribe"),
            bulk("tag"),
            RespFrame::Integer(0),
        ]))
        .unwrap();
        assert_eq!(unsub, Push::Unsubscribed);

        assert_eq!(
            Push::classify(RespFrame::Simple("PONG".into())).unwrap(),
            Push::Other
        );
    }

    #[test]
    fn test_classify_error_reply() {
        let err = Push::classify(RespFrame::Error("ERR nope".into())).unwrap_err();
        assert!(err.downcast_ref::<ClientError>().is_some());
    }
}
