use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, trace};

use runstat_agent::agent;
use runstat_agent::lifecycle::interrupt_signal;
use runstat_agent::logging::{init_logging, LoggingOptions};
use runstat_agent::{AgentConfig, CountingAllocator};

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// Samples this process's runtime counters and ships them to a metrics
/// collector over HTTP or gRPC.
#[derive(Debug, Parser)]
#[command(name = "runstat-agent", version)]
struct Options {
    /// Path to the TOML config file. A missing file falls back to
    /// defaults and environment variables.
    #[arg(long, env = "AGENT_CONFIG", default_value = "config/config.toml")]
    config: PathBuf,

    #[command(flatten)]
    logging: LoggingOptions,
}

fn main() -> ExitCode {
    let options = Options::parse();
    init_logging(&options.logging)
        .map(|_| trace!("Logging system initialized."))
        .map_err(|err| eprintln!("Attempt to init global logger once more. {:?}", err))
        .ok();

    match run(options) {
        Ok(code) => code,
        Err(err) => {
            error!("{:#}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(options: Options) -> Result<ExitCode> {
    let config = AgentConfig::load(&options.config)
        .with_context(|| format!("loading {}", options.config.display()))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building tokio runtime")?;

    let status = runtime
        .block_on(agent::run(&config, interrupt_signal()))
        .context("starting transport")?;
    Ok(status.into())
}
