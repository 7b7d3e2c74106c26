//! Барьер поверх настоящего TCP и RESP.
//!
//! Вместо внешнего брокера поднимается маленький RESP-сервер, который
//! хранит состояние в `MemoryBroker`.

use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::Result;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use rendezvous::{
    broker::{MemorySubscriber, SubscriptionConnection},
    resp::{ConnectionTimeouts, RespDecoder, RespEncoder, RespFrame},
    BarrierConfig, BarrierContext, BrokerEndpoint, ClientError, CommandConnection, ConnectionPool,
    MemoryBroker, MemoryPool, Message, RendezvousResult, RespPool, StatusCode,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    time::Instant,
};

/// Тестовый RESP-сервер.
struct FakeServer {
    addr: SocketAddr,
    broker: Arc<MemoryBroker>,
    /// Все принятые команды в виде "NAME arg1 arg2"
    log: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
}

impl FakeServer {
    async fn start(password: Option<&'static str>) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let addr = listener.local_addr()?;
        let broker = MemoryBroker::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));

        let (b, l, c) = (broker.clone(), log.clone(), connections.clone());
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                c.fetch_add(1, Ordering::SeqCst);
                let session = Session {
                    pool: MemoryPool::with_broker(b.clone()),
                    broker: b.clone(),
                    log: l.clone(),
                    password,
                    authed: password.is_none(),
                    sub: None,
                    channels: HashSet::new(),
                };
                tokio::spawn(session.run(socket));
            }
        });

        Ok(Self {
            addr,
            broker,
            log,
            connections,
        })
    }

    fn url(&self) -> String {
        format!("redis://{}/0", self.addr)
    }

    fn saw(
        &self,
        command: &str,
    ) -> bool {
        self.log.lock().iter().any(|c| c == command)
    }

    async fn wait_for_counter(
        &self,
        tag: &str,
        value: i64,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while self.broker.counter(tag) != Some(value) {
            assert!(Instant::now() < deadline, "counter {tag} never reached {value}");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Состояние одного клиентского соединения сервера.
struct Session {
    pool: MemoryPool,
    broker: Arc<MemoryBroker>,
    log: Arc<Mutex<Vec<String>>>,
    password: Option<&'static str>,
    authed: bool,
    sub: Option<MemorySubscriber>,
    channels: HashSet<String>,
}

impl Session {
    async fn run(
        mut self,
        mut socket: TcpStream,
    ) -> Result<()> {
        let decoder = RespDecoder::new();
        let mut buf = BytesMut::new();

        loop {
            while let Some(frame) = decoder.decode(&mut buf)? {
                for reply in self.execute(frame).await? {
                    socket.write_all(&RespEncoder::encode(&reply)?).await?;
                }
            }

            tokio::select! {
                n = socket.read_buf(&mut buf) => {
                    if n? == 0 {
                        return Ok(());
                    }
                }
                msg = next_push(&mut self.sub) => {
                    if let Some(msg) = msg? {
                        socket.write_all(&RespEncoder::encode(&push(msg))?).await?;
                    }
                }
            }
        }
    }

    async fn execute(
        &mut self,
        frame: RespFrame,
    ) -> Result<Vec<RespFrame>> {
        let RespFrame::Array(items) = frame else {
            return Ok(vec![RespFrame::Error("ERR expected array".into())]);
        };
        let args: Vec<String> = items
            .iter()
            .map(|f| String::from_utf8_lossy(f.as_bytes().unwrap_or_default()).into_owned())
            .collect();
        let name = args.first().map(|s| s.to_uppercase()).unwrap_or_default();
        self.log.lock().push(
            std::iter::once(name.clone())
                .chain(args.iter().skip(1).cloned())
                .collect::<Vec<_>>()
                .join(" "),
        );

        if name == "AUTH" {
            return Ok(vec![match (self.password, args.last()) {
                (Some(expected), Some(given)) if expected == given => {
                    self.authed = true;
                    RespFrame::Simple("OK".into())
                }
                _ => RespFrame::Error("WRONGPASS invalid username-password pair".into()),
            }]);
        }
        if !self.authed {
            return Ok(vec![RespFrame::Error("NOAUTH Authentication required.".into())]);
        }

        let reply = match (name.as_str(), &args[1..]) {
            ("PING", _) => RespFrame::Simple("PONG".into()),
            ("SELECT", [_]) => RespFrame::Simple("OK".into()),
            ("INCR", [key]) => {
                // Медленный брокер для ключей `slow-*`: ответ приходит позже,
                // чем клиент готов ждать.
                if key.starts_with("slow-") {
                    tokio::time::sleep(Duration::from_millis(300)).await;
                }
                RespFrame::Integer(self.broker.incr(key))
            }
            ("DEL", [key]) => RespFrame::Integer(self.broker.del(key) as i64),
            ("PUBLISH", [channel, payload]) => RespFrame::Integer(
                self.broker
                    .publish(channel, Bytes::from(payload.clone()))
                    as i64,
            ),
            ("SUBSCRIBE", channels) => {
                if self.sub.is_none() {
                    self.sub = Some(self.pool.subscriber().await?);
                }
                let mut replies = Vec::new();
                for channel in channels {
                    if let Some(sub) = self.sub.as_mut() {
                        sub.subscribe(channel).await?;
                    }
                    self.channels.insert(channel.clone());
                    replies.push(confirmation("subscribe", channel, self.channels.len()));
                }
                return Ok(replies);
            }
            ("UNSUBSCRIBE", channels) => {
                let mut replies = Vec::new();
                for channel in channels {
                    if let Some(sub) = self.sub.as_mut() {
                        sub.unsubscribe(channel).await?;
                    }
                    self.channels.remove(channel);
                    replies.push(confirmation("unsubscribe", channel, self.channels.len()));
                }
                return Ok(replies);
            }
            _ => RespFrame::Error(format!("ERR unknown command '{name}'")),
        };
        Ok(vec![reply])
    }
}

async fn next_push(sub: &mut Option<MemorySubscriber>) -> RendezvousResult<Option<Message>> {
    match sub {
        Some(sub) => sub.next_message(Duration::from_millis(50)).await,
        None => std::future::pending().await,
    }
}

fn push(msg: Message) -> RespFrame {
    RespFrame::Array(vec![
        RespFrame::Bulk(Bytes::from_static(b"message")),
        RespFrame::Bulk(Bytes::copy_from_slice(msg.channel.as_bytes())),
        RespFrame::Bulk(msg.payload),
    ])
}

fn confirmation(
    kind: &'static str,
    channel: &str,
    count: usize,
) -> RespFrame {
    RespFrame::Array(vec![
        RespFrame::Bulk(Bytes::from_static(kind.as_bytes())),
        RespFrame::Bulk(Bytes::copy_from_slice(channel.as_bytes())),
        RespFrame::Integer(count as i64),
    ])
}

fn config(url: String) -> BarrierConfig {
    BarrierConfig::with_url(url).with_quantum(Duration::from_millis(20))
}

/// Тест проверяет рандеву двух независимых контекстов (как двух процессов)
/// через сетевой брокер.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_contexts_rendezvous_over_tcp() -> Result<()> {
    let server = FakeServer::start(None).await?;
    let cfg = config(server.url());

    let first = BarrierContext::connect(&cfg).await?;
    let second = BarrierContext::connect(&cfg).await?;

    let barrier = first.barrier();
    let early = tokio::spawn(async move {
        barrier
            .sync("visit-1", 2, "AAAA", Some(Duration::from_secs(5)))
            .await
    });
    server.wait_for_counter("visit-1", 1).await;

    let late = second
        .barrier()
        .sync("visit-1", 2, "BBBB", Some(Duration::from_secs(5)))
        .await?;
    let early = early.await??;

    assert_eq!(late, "BBBB");
    assert_eq!(early, "BBBB");
    assert!(server.saw("SUBSCRIBE __dummy__"));
    assert!(server.saw("PUBLISH visit-1 BBBB"));

    first.close().await?;
    second.close().await?;
    Ok(())
}

/// Тест проверяет, что пароль и номер базы из URL уходят брокеру как
/// AUTH и SELECT.
#[tokio::test]
async fn test_auth_and_select() -> Result<()> {
    let server = FakeServer::start(Some("secret")).await?;
    let url = format!("redis://:secret@{}/3", server.addr);

    let ctx = BarrierContext::connect(&config(url)).await?;
    let got = ctx
        .scope(|barrier| async move { barrier.sync("solo", 1, "go", None).await })
        .await?;

    assert_eq!(got, "go");
    assert!(server.saw("AUTH secret"));
    assert!(server.saw("SELECT 3"));
    Ok(())
}

#[tokio::test]
async fn test_wrong_password_is_reported() -> Result<()> {
    let server = FakeServer::start(Some("secret")).await?;
    let url = format!("redis://:nope@{}/0", server.addr);

    let err = match BarrierContext::connect(&config(url)).await {
        Ok(_) => panic!("connect must fail with a wrong password"),
        Err(e) => e,
    };
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::AuthenticationFailed { .. })
    ));
    Ok(())
}

/// Тест проверяет, что по таймауту участник отписывается от канала тега на
/// стороне брокера.
#[tokio::test]
async fn test_timeout_unsubscribes_over_tcp() -> Result<()> {
    let server = FakeServer::start(None).await?;
    let ctx = BarrierContext::connect(&config(server.url())).await?;

    let err = ctx
        .barrier()
        .sync("late", 2, "m", Some(Duration::from_millis(300)))
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(err.status_code(), StatusCode::RendezvousTimeout);

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.broker.subscriber_count("late") != 0 {
        assert!(Instant::now() < deadline, "tag channel still subscribed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(server.saw("UNSUBSCRIBE late"));

    ctx.close().await?;
    Ok(())
}

#[tokio::test]
async fn test_connection_refused() -> Result<()> {
    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let addr = listener.local_addr()?;
    drop(listener);

    let err = match BarrierContext::connect(&config(format!("redis://{addr}"))).await {
        Ok(_) => panic!("nothing listens on {addr}"),
        Err(e) => e,
    };
    assert!(matches!(
        err.downcast_ref::<ClientError>(),
        Some(ClientError::ConnectionFailed { .. } | ClientError::ConnectionTimeout { .. })
    ));
    Ok(())
}

/// Тест проверяет, что пул переиспользует командные соединения и после
/// отключения больше их не выдаёт.
#[tokio::test]
async fn test_pool_reuses_command_connections() -> Result<()> {
    let server = FakeServer::start(None).await?;
    let endpoint = BrokerEndpoint::parse(&server.url())?;
    let pool = RespPool::new(endpoint, ConnectionTimeouts::default());

    let mut conn = pool.command().await?;
    assert_eq!(conn.incr("reuse").await?, 1);
    drop(conn);
    assert_eq!(pool.idle_count(), 1);

    let mut conn = pool.command().await?;
    assert_eq!(conn.incr("reuse").await?, 2);
    drop(conn);
    assert_eq!(server.connections.load(Ordering::SeqCst), 1);

    pool.disconnect().await;
    assert!(pool.is_disconnected());
    assert_eq!(pool.idle_count(), 0);
    let err = pool.command().await.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::PoolClosed);
    Ok(())
}

/// Тест проверяет, что sync, отменённый посреди INCR, не портит командное
/// соединение контекста: следующий рандеву видит свои счётчики, а подписка
/// отменённого тега снята.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_sync_keeps_context_usable() -> Result<()> {
    let server = FakeServer::start(None).await?;
    // Устаревший ответ на INCR, если бы он достался следующей команде,
    // сразу превысил бы любой порог.
    for _ in 0..5 {
        server.broker.incr("slow-tag");
    }
    let ctx = BarrierContext::connect(&config(server.url())).await?;

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        ctx.barrier().sync("slow-tag", 2, "m", None),
    )
    .await;
    assert!(cancelled.is_err());

    let barrier = ctx.barrier();
    let early = tokio::spawn(async move {
        barrier
            .sync("next", 2, "AAAA", Some(Duration::from_secs(5)))
            .await
    });
    server.wait_for_counter("next", 1).await;
    let late = ctx
        .barrier()
        .sync("next", 2, "BBBB", Some(Duration::from_secs(5)))
        .await?;
    let early = early.await??;

    assert_eq!(early, "BBBB");
    assert_eq!(late, "BBBB");
    assert!(!server.saw("PUBLISH next AAAA"));

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.broker.subscriber_count("slow-tag") != 0 {
        assert!(Instant::now() < deadline, "cancelled tag still subscribed");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    ctx.close().await?;
    Ok(())
}
