//! Сетевой брокер на RESP.
//!
//! Кодек ([`RespEncoder`], [`RespDecoder`]), TCP-соединение с таймаутами и
//! реализации трейтов [`crate::broker`] поверх него.

pub mod command;
pub mod connection;
pub mod decoder;
pub mod encoder;
pub mod endpoint;
pub mod frame;
pub mod pool;
pub mod subscriber;

pub use command::RespCommandConnection;
pub use connection::{ConnectionTimeouts, RespConnection};
pub use decoder::RespDecoder;
pub use encoder::RespEncoder;
pub use endpoint::{BrokerEndpoint, DEFAULT_PORT};
pub use frame::RespFrame;
pub use pool::RespPool;
pub use subscriber::RespSubscriber;
