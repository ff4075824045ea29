//! Pulse governor: runs the write breaker and analysis scheduler against
//! simulated backends and logs their metrics.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pulse_core::SystemClock;
use pulse_governor::{Governor, GovernorConfig, GovernorConfigError, SimulatedEngines, SoakRunner};
use pulse_scheduler::Collaborators;

#[derive(Parser)]
#[command(name = "pulse-governor", version, about = "Soak the write breaker and analysis scheduler")]
struct Cli {
    /// Path to the TOML config file. Defaults apply when it does not exist.
    #[arg(long, env = "PULSE_CONFIG", default_value = "pulse.toml")]
    config: PathBuf,

    /// How long to generate traffic before shutting down.
    #[arg(long, env = "PULSE_SOAK_DURATION_SECS", default_value_t = 60)]
    duration_secs: u64,

    /// Seconds between metrics log lines.
    #[arg(long, env = "PULSE_REPORT_INTERVAL_SECS", default_value_t = 10)]
    report_interval_secs: u64,

    /// Print the final summary as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn load_config(path: &Path) -> anyhow::Result<GovernorConfig> {
    match GovernorConfig::from_file(path) {
        Ok(config) => {
            info!(path = %path.display(), "loaded governor config");
            Ok(config)
        }
        Err(GovernorConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "config file not found, using defaults");
            GovernorConfig::from_env().context("invalid config from environment")
        }
        Err(e) => Err(e).with_context(|| format!("failed to load config from {}", path.display())),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    pulse_core::load_dotenv();
    pulse_core::init_tracing("info");

    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    anyhow::ensure!(cli.report_interval_secs > 0, "--report-interval-secs must be greater than zero");

    let engines = Arc::new(SimulatedEngines::default());
    let collaborators = Collaborators::new(engines.clone(), engines.clone(), engines);
    let governor = Governor::new(config, SystemClock::shared(), collaborators);
    let runner = SoakRunner::new(governor);

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl-c, shutting down");
            on_signal.cancel();
        }
    });

    let summary = runner
        .run(
            Duration::from_secs(cli.duration_secs),
            Duration::from_secs(cli.report_interval_secs),
            shutdown,
        )
        .await;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to serialize soak summary")?
        );
    }
    info!(store_attempts = runner.store().attempts(), "pulse-governor exited cleanly");
    Ok(())
}
