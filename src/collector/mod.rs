//! Leader-elected streaming collector engine
//!
//! Every replica of a collector runs the same [`CollectorPorter`]. The lock
//! store elects one master per collector name; only the master subscribes to
//! the broker, while every replica drains the shared overflow queue.
//!
//! ## Architecture Overview
//!
//! ```text
//!        broker channels
//!               │ (master only)
//!       ┌───────▼──────────┐   full    ┌─────────────────┐
//!       │ ChannelSubscriber├──────────►│  OverflowQueue  │ (lock store list)
//!       └───────┬──────────┘           └────────┬────────┘
//!               │ push / evict oldest           │ drain (every replica)
//!       ┌───────▼──────────┐◄──────────────────┘
//!       │  DispatchQueue   │◄─── mock injection
//!       └───────┬──────────┘
//!               │ pop
//!       ┌───────▼──────────┐
//!       │    WorkerPool    ├───► Analyzer::analyze
//!       └──────────────────┘
//! ```
//!
//! ## Tasks
//!
//! - **Master loop**: election rounds and subscription sessions
//! - **Workers**: one task per worker, panics contained per payload
//! - **Reset monitor**: resets workers while the dispatch queue stays saturated
//! - **Overflow pusher / drain**: move payloads into and out of the lock store
//! - **Health reporter**: publishes the channel status code
//! - **Host cache refresh**: only for porters that own a host cache
//!
//! Every task runs under [`run_with_recovery`] and observes the shared
//! [`Shutdown`] signal.

pub mod analyzer;
pub mod dispatch;
pub mod elector;
pub mod health;
pub mod overflow;
pub mod porter;
pub mod spill;
pub mod stats;
pub mod subscriber;
pub mod supervisor;
pub mod workers;

pub use analyzer::Analyzer;
pub use dispatch::{DispatchQueue, QueueFull};
pub use elector::{MasterElector, process_identifier};
pub use health::{ChannelStatus, HealthReporter};
pub use overflow::{OverflowPusher, OverflowQueue};
pub use porter::{CollectorPorter, Porter};
pub use spill::{Placement, Spill};
pub use stats::{PorterCounters, PorterStats};
pub use subscriber::{ChannelSubscriber, SessionEnd};
pub use supervisor::{
    Shutdown, ShutdownTrigger, install_panic_logger, run_with_recovery, shutdown_channel,
    spawn_supervised,
};
pub use workers::{ResetPolicy, WorkerPool};
