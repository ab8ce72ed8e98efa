use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;
use wirelog::{PipelineConfig, PipelineController, PipelineState, PnetCapture};

#[derive(Parser)]
#[command(name = "wirelog")]
#[command(about = "Wirelog - summarizes live network traffic into an append-only log")]
struct Args {
    /// Network interface to capture on (e.g., eth0)
    #[arg(short, long)]
    interface: Option<String>,

    /// Capture filter (e.g., "tcp and port 80")
    #[arg(short, long)]
    filter: Option<String>,

    /// Log file to append summaries to
    #[arg(short, long)]
    log_path: Option<PathBuf>,

    /// Config file with key = value lines
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Lines buffered before a write waits on a flush
    #[arg(long)]
    buffer_capacity: Option<usize>,

    /// Maximum time a single receive blocks, in milliseconds
    #[arg(long)]
    poll_interval_ms: Option<u64>,

    /// Consecutive transient capture errors tolerated
    #[arg(long)]
    retry_limit: Option<u32>,

    /// Do not put the interface into promiscuous mode
    #[arg(long)]
    no_promiscuous: bool,

    /// List available interfaces and exit
    #[arg(long)]
    list_interfaces: bool,
}

impl Args {
    /// CLI flags take precedence over the config file and environment.
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(interface) = &self.interface {
            config.interface = interface.clone();
        }
        if let Some(filter) = &self.filter {
            config.filter = Some(filter.clone());
        }
        if let Some(log_path) = &self.log_path {
            config.log_path = log_path.clone();
        }
        if let Some(capacity) = self.buffer_capacity {
            config.buffer_capacity = capacity;
        }
        if let Some(poll) = self.poll_interval_ms {
            config.poll_interval_ms = poll;
        }
        if let Some(limit) = self.retry_limit {
            config.retry_limit = limit;
        }
        if self.no_promiscuous {
            config.promiscuous = false;
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> Result<PipelineState> {
    let mut config =
        PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    args.apply(&mut config);

    let mut controller = PipelineController::new(config);
    let handle = controller.handle();
    ctrlc::set_handler(move || {
        tracing::info!("Received interrupt, stopping capture");
        handle.stop();
    })
    .context("Failed to install signal handler")?;

    controller.start().context("Failed to start capture")?;
    tracing::info!(
        interface = %controller.config().interface,
        log_path = %controller.config().log_path.display(),
        "Capturing"
    );

    let state = controller.wait();
    tracing::info!(stats = ?controller.stats(), "Capture finished");
    Ok(state)
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging();

    if args.list_interfaces {
        for line in PnetCapture::list_interfaces() {
            println!("{}", line);
        }
        return ExitCode::SUCCESS;
    }

    match run(args) {
        Ok(PipelineState::Stopped) => ExitCode::SUCCESS,
        Ok(state) => {
            tracing::error!("Capture ended in state: {}", state);
            ExitCode::FAILURE
        }
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let args = Args::parse_from([
            "wirelog",
            "--interface",
            "eth1",
            "--filter",
            "udp",
            "--retry-limit",
            "2",
            "--no-promiscuous",
        ]);
        let mut config = PipelineConfig::for_interface("eth0");
        args.apply(&mut config);

        assert_eq!(config.interface, "eth1");
        assert_eq!(config.filter.as_deref(), Some("udp"));
        assert_eq!(config.retry_limit, 2);
        assert!(!config.promiscuous);
        assert_eq!(config.buffer_capacity, 1000);
    }

    #[test]
    fn test_unset_flags_keep_config() {
        let args = Args::parse_from(["wirelog"]);
        let mut config = PipelineConfig::for_interface("eth0");
        args.apply(&mut config);
        assert_eq!(config, PipelineConfig::for_interface("eth0"));
    }
}
