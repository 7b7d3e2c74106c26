//! Распределённый барьер (рандеву).
//!
//! Поток управления: [`BarrierContext`] → [`Barrier`] (+ [`ReleaseNotifier`])
//! → [`ChannelPump`] → брокер. Поток данных обратный: сообщения брокера →
//! помпа → [`Release`].

pub mod context;
pub mod core;
pub mod notifier;
pub mod pump;
pub mod release;

pub use self::core::Barrier;
pub use context::BarrierContext;
pub use notifier::ReleaseNotifier;
pub use pump::{ChannelPump, PumpHandle, PumpTask, WaiterId, NOOP_CHANNEL};
pub use release::{Release, ReleaseTrigger};
