use clap::Args;

pub const RUST_LOG: &str = "RUST_LOG";
pub const RUST_LOG_STYLE: &str = "RUST_LOG_STYLE";

const CRATE_TARGET: &str = "runstat_agent";

#[derive(Debug, Clone, Args)]
pub struct LoggingOptions {
    /// Raises verbosity: -v debug, -vv trace for the agent,
    /// -vvv/-vvvv also open up the network stack.
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Log filters, same syntax as RUST_LOG.
    /// For complex filters see documentation: https://docs.rs/env_logger/#filtering-results
    #[arg(long = "log", env = RUST_LOG, default_value = "info", verbatim_doc_comment)]
    pub log_filters: String,

    /// Log colors: auto, always, never.
    #[arg(long = "log-color", env = RUST_LOG_STYLE, default_value = "auto")]
    pub log_style: String,
}

impl Default for LoggingOptions {
    fn default() -> Self {
        LoggingOptions {
            verbose: 0,
            log_filters: "info".to_string(),
            log_style: "auto".to_string(),
        }
    }
}

pub fn init_logging(opts: &LoggingOptions) -> Result<(), log::SetLoggerError> {
    logging_builder(opts).try_init()
}

pub fn logging_builder(opts: &LoggingOptions) -> env_logger::Builder {
    use env_logger::{Builder, Target};

    let mut builder = Builder::new();
    builder.parse_filters(&log_filters_with_verbosity(opts));
    builder.parse_write_style(&opts.log_style);
    builder.target(Target::Stdout);
    builder
}

fn log_level(level: u8) -> log::Level {
    use log::Level::*;
    match level {
        0 => Info,
        1 => Debug,
        _ => Trace,
    }
}

fn log_level_deps(level: u8) -> log::Level {
    use log::Level::*;
    match level {
        0..=2 => Info,
        3 => Debug,
        _ => Trace,
    }
}

fn log_filters_deps_format(level: u8) -> String {
    format!(
        "hyper={0},h2={0},reqwest={0},tonic={0},tower={0}",
        log_level_deps(level)
    )
}

fn log_filters_with_verbosity(opts: &LoggingOptions) -> String {
    match opts.verbose {
        0 => opts.log_filters.to_string(),
        _ => format!(
            "{},{}={},{}",
            opts.log_filters,
            CRATE_TARGET,
            log_level(opts.verbose),
            log_filters_deps_format(opts.verbose)
        ),
    }
}
