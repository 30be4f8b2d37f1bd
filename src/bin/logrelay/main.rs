// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tokio::select;
use tokio::signal::unix::{signal, Signal, SignalKind};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use logrelay::agent::Agent;
use logrelay::config::WatchConfig;
use logrelay::sink::{BatchSink, BatchSinkConfig, Sink, StdoutSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SinkArg {
    /// Print record batches as JSON to standard output
    Stdout,
}

#[derive(Debug, Parser)]
#[command(name = "logrelay", version, about = "Log-tailing agent")]
struct Arguments {
    /// Path to the YAML configuration file
    #[arg(long, env = "LOGRELAY_CONFIG", default_value = "configs/logrelay.yaml")]
    config: PathBuf,

    /// Override the state snapshot path from the configuration
    #[arg(long, env = "LOGRELAY_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error)
    #[arg(long, env = "LOGRELAY_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Downstream sink
    #[arg(value_enum, long, env = "LOGRELAY_SINK", default_value = "stdout")]
    sink: SinkArg,

    /// Disable batching in front of the sink
    #[arg(long, env = "LOGRELAY_BATCH_DISABLED", default_value = "false")]
    batch_disabled: bool,

    /// Records per delivered batch
    #[arg(long, env = "LOGRELAY_BATCH_MAX_SIZE", default_value = "100")]
    batch_max_size: usize,

    /// Seconds a non-empty batch waits before flushing
    #[arg(long, env = "LOGRELAY_BATCH_FLUSH_INTERVAL", default_value = "5")]
    batch_flush_interval: u64,
}

fn main() -> ExitCode {
    let opt = Arguments::parse();

    let _guard = setup_logging(&opt.log_level);

    match run_agent(opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Agent failed");
            ExitCode::from(1)
        }
    }
}

#[tokio::main]
async fn run_agent(opt: Arguments) -> Result<(), Box<dyn Error + Send + Sync>> {
    let raw = std::fs::read_to_string(&opt.config)
        .map_err(|e| format!("failed to read config {}: {}", opt.config.display(), e))?;
    let mut config: WatchConfig = serde_yaml::from_str(&raw)
        .map_err(|e| format!("failed to parse config {}: {}", opt.config.display(), e))?;

    if let Some(state_file) = opt.state_file {
        config.state_file_path = state_file;
    }
    config.validate()?;

    info!(
        config = %opt.config.display(),
        indexes = config.read_path.len(),
        state_file = %config.state_file_path.display(),
        "Starting logrelay.",
    );

    let inner: Arc<dyn Sink> = match opt.sink {
        SinkArg::Stdout => Arc::new(StdoutSink::new()),
    };
    let sink: Arc<dyn Sink> = if opt.batch_disabled {
        inner
    } else {
        Arc::new(BatchSink::new(
            inner,
            BatchSinkConfig {
                max_size: opt.batch_max_size,
                flush_interval: Duration::from_secs(opt.batch_flush_interval),
                ..Default::default()
            },
        ))
    };

    let cancel = CancellationToken::new();
    let agent = Agent::new(config, sink);
    let mut agent_task = tokio::spawn(agent.run(cancel.clone()));

    select! {
        _ = signal_wait() => {
            info!("Shutdown signal received.");
            cancel.cancel();
        }
        result = &mut agent_task => {
            // The agent only returns on its own when something went wrong
            // during startup or a subordinate died.
            result??;
            return Ok(());
        }
    }

    agent_task.await??;
    Ok(())
}

async fn signal_wait() {
    let mut sig_term = sig(SignalKind::terminate());
    let mut sig_int = sig(SignalKind::interrupt());

    select! {
        _ = sig_term.recv() => {},
        _ = sig_int.recv() => {},
    }
}

fn sig(kind: SignalKind) -> Signal {
    signal(kind).unwrap()
}

type LoggerGuard = tracing_appender::non_blocking::WorkerGuard;

fn setup_logging(log_level: &str) -> LoggerGuard {
    let (non_blocking_writer, guard) = tracing_appender::non_blocking(std::io::stderr());

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_writer)
        .with_target(false)
        .with_level(true)
        .compact();

    let subscriber = Registry::default()
        .with(EnvFilter::new(log_level))
        .with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).unwrap();

    guard
}
