// src/lifecycle.rs
//
// Process lifetime: deadline, interrupt signal and the panic guard around
// shutdown.

use std::any::Any;
use std::future::{pending, Future};
use std::panic::AssertUnwindSafe;
use std::process::ExitCode;
use std::time::Duration;

use futures::FutureExt;
use log::{error, info, warn};
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// What ended the agent's run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Shutdown {
    Deadline,
    Interrupt(String),
    Cancelled,
}

pub struct Lifecycle {
    token: CancellationToken,
    lifetime: Option<Duration>,
}

impl Lifecycle {
    /// `None` means no deadline; only a signal or an explicit cancel ends the run.
    pub fn new(lifetime: Option<Duration>) -> Self {
        Lifecycle {
            token: CancellationToken::new(),
            lifetime,
        }
    }

    /// Root token observed by the sampler and the dispatcher.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Races the deadline against `interrupt` and an external cancel. The
    /// root token is cancelled whichever wins.
    pub async fn wait_for_shutdown<F>(&self, interrupt: F) -> Shutdown
    where
        F: Future<Output = String>,
    {
        let lifetime = self.lifetime;
        let deadline = async move {
            match lifetime {
                Some(lifetime) => sleep(lifetime).await,
                None => pending::<()>().await,
            }
        };

        let reason = select! {
            _ = deadline => Shutdown::Deadline,
            signal = interrupt => Shutdown::Interrupt(signal),
            _ = self.token.cancelled() => Shutdown::Cancelled,
        };
        self.token.cancel();

        match &reason {
            Shutdown::Deadline => info!("stop sampling: lifetime of {:?} elapsed", lifetime),
            Shutdown::Interrupt(signal) => info!("agent interrupted by signal {}", signal),
            Shutdown::Cancelled => info!("stop sampling: cancelled"),
        }
        reason
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    Clean,
    Fault,
}

impl ExitStatus {
    pub fn code(&self) -> u8 {
        match self {
            ExitStatus::Clean => 0,
            ExitStatus::Fault => 1,
        }
    }
}

impl From<ExitStatus> for ExitCode {
    fn from(status: ExitStatus) -> Self {
        ExitCode::from(status.code())
    }
}

/// Runs the shutdown sequence, mapping a panic inside it to [`ExitStatus::Fault`].
pub async fn supervise<F>(shutdown: F) -> ExitStatus
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(shutdown).catch_unwind().await {
        Ok(()) => {
            info!("agent shutdown");
            ExitStatus::Clean
        }
        Err(panic) => {
            error!("agent shutdown due to panic: {}", panic_message(panic.as_ref()));
            ExitStatus::Fault
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// Resolves with the name of the first termination signal received.
pub async fn interrupt_signal() -> String {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                select! {
                    name = ctrl_c() => name,
                    _ = terminate.recv() => "SIGTERM".to_string(),
                }
            }
            Err(err) => {
                warn!("unable to listen for SIGTERM: {}", err);
                ctrl_c().await
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> String {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "SIGINT".to_string(),
        Err(err) => {
            warn!("unable to listen for Ctrl-C: {}", err);
            pending().await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn deadline_cancels_root_token() {
        let lifecycle = Lifecycle::new(Some(Duration::from_millis(35)));
        let token = lifecycle.token();
        let started = Instant::now();

        let reason = lifecycle.wait_for_shutdown(pending::<String>()).await;

        assert_eq!(reason, Shutdown::Deadline);
        assert!(token.is_cancelled());
        assert_eq!(started.elapsed(), Duration::from_millis(35));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_beats_deadline() {
        let lifecycle = Lifecycle::new(Some(Duration::from_secs(60)));
        let interrupt = async {
            sleep(Duration::from_millis(5)).await;
            "SIGTERM".to_string()
        };

        let reason = lifecycle.wait_for_shutdown(interrupt).await;

        assert_eq!(reason, Shutdown::Interrupt("SIGTERM".to_string()));
        assert!(lifecycle.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn no_deadline_waits_for_external_cancel() {
        let lifecycle = Lifecycle::new(None);
        let token = lifecycle.token();
        tokio::spawn(async move {
            sleep(Duration::from_secs(3600)).await;
            token.cancel();
        });

        let reason = lifecycle.wait_for_shutdown(pending::<String>()).await;
        assert_eq!(reason, Shutdown::Cancelled);
    }

    #[tokio::test]
    async fn clean_shutdown_exits_zero() {
        let status = supervise(async {}).await;
        assert_eq!(status, ExitStatus::Clean);
        assert_eq!(status.code(), 0);
    }

    #[tokio::test]
    async fn panic_during_shutdown_exits_one() {
        let status = supervise(async { panic!("collector handle poisoned") }).await;
        assert_eq!(status, ExitStatus::Fault);
        assert_eq!(status.code(), 1);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }
}
