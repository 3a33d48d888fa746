// src/lib.rs
//
// Process-local telemetry agent.
//
// A `Sampler` snapshots the process runtime counters on a fixed period and
// hands each `Batch` through a single-slot channel to the `Dispatcher`,
// which paces deliveries over one `Transport`. A `Lifecycle` owns the
// cancellation token that stops both.

pub mod agent;
pub mod config;
pub mod dispatcher;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod transport;

pub use config::{AgentConfig, ConfigError, TransportKind};
pub use dispatcher::Dispatcher;
pub use lifecycle::{ExitStatus, Lifecycle, Shutdown};
pub use metrics::{
    Batch, CountingAllocator, MetricKind, MetricRecord, ProcessStats, RuntimeStats, Sampler,
    StatsSource,
};
pub use transport::{DeliveryError, HttpTransport, SetupError, Transport};
#[cfg(feature = "grpc")]
pub use transport::GrpcTransport;
