/// Rendezvous barrier: channel pump, releases, notifier, context.
pub mod barrier;
/// Broker abstraction and the in-process broker.
pub mod broker;
/// Barrier and application configuration loading.
pub mod config;
/// Gating jobs of a task runner behind a barrier descriptor.
pub mod job;
/// Flexible logging (formatting, filters, file sink).
pub mod logging;
/// RESP client: codec, connections, pool.
pub mod resp;

// -----------------------------------------------------------------------------
//  Frequently used public types
// -----------------------------------------------------------------------------

/// Barrier API.
pub use barrier::{Barrier, BarrierContext, ChannelPump, Release, ReleaseNotifier};
/// Broker traits and the in-process implementation.
pub use broker::{
    CommandConnection, ConnectionPool, MemoryBroker, MemoryPool, Message, SubscriptionConnection,
};
/// config
pub use config::{BarrierConfig, Settings};
/// Task runner integration.
pub use job::{gate_job, run_gated, BarrierDescriptor, GateOutcome, BARRIER_KEY};
/// Logging setup.
pub use logging::{init_logging, LogFormat, LoggingConfig, LoggingHandle};
/// Network broker over RESP.
pub use resp::{BrokerEndpoint, RespPool};
/// Operation errors and result types.
pub use rendezvous_error::{BarrierError, ClientError, RendezvousResult, StackError, StatusCode};
