// src/agent.rs
//
// Composition root: binds one transport and runs the sampling pipeline
// until the lifecycle ends it.

use std::future::Future;

use log::info;

use crate::config::{AgentConfig, TransportKind};
use crate::dispatcher::Dispatcher;
use crate::lifecycle::{supervise, ExitStatus, Lifecycle};
use crate::metrics::{Sampler, StatsSource};
use crate::transport::{HttpTransport, SetupError, Transport};

/// Builds the configured transport and runs the agent for the current
/// process. Must be called inside a tokio runtime.
pub async fn run<F>(config: &AgentConfig, interrupt: F) -> Result<ExitStatus, SetupError>
where
    F: Future<Output = String>,
{
    let sampler = Sampler::for_current_process(config.poll_interval());
    match config.client.transport {
        TransportKind::Http => {
            let transport = HttpTransport::new(
                &config.client.address,
                config.user_agent(),
                config.call_timeout(),
            )?;
            Ok(run_with(config, transport, sampler, interrupt).await)
        }
        #[cfg(feature = "grpc")]
        TransportKind::Grpc => {
            let transport =
                crate::transport::GrpcTransport::new(&config.client.address, config.call_timeout())?;
            Ok(run_with(config, transport, sampler, interrupt).await)
        }
        #[cfg(not(feature = "grpc"))]
        TransportKind::Grpc => Err(SetupError::Unsupported("grpc")),
    }
}

/// Wires `sampler` → channel → dispatcher → `transport` under one lifecycle
/// and waits for it to end.
pub async fn run_with<T, S, F>(
    config: &AgentConfig,
    transport: T,
    sampler: Sampler<S>,
    interrupt: F,
) -> ExitStatus
where
    T: Transport,
    S: StatsSource,
    F: Future<Output = String>,
{
    let lifecycle = Lifecycle::new(config.lifetime());
    info!(
        "start metrics crawling: {} {}, poll every {:?}, send every {:?} over {} to {}",
        config.app.name,
        config.app.version,
        config.poll_interval(),
        config.send_interval(),
        transport.name(),
        config.client.address
    );

    let batches = sampler.start(lifecycle.token());
    let dispatcher = Dispatcher::new(
        transport,
        config.send_interval(),
        config.client.max_in_flight,
    )
    .spawn(lifecycle.token(), batches);

    lifecycle.wait_for_shutdown(interrupt).await;

    supervise(async move {
        if let Err(err) = dispatcher.await {
            if err.is_panic() {
                std::panic::resume_unwind(err.into_panic());
            }
        }
    })
    .await
}
