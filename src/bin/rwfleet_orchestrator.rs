//! Fleet orchestrator - drives every worker through one random-walk run
//!
//! Usage:
//!   rwfleet-orchestrator <config.json> [--run-name NAME] [--walks N] [--wait-ms MS]
//!
//! Phases:
//!   CACHE_GEN -> barrier -> CACHE_READY, START_EXP, END_EXP -> barrier
//!
//! The max worker duration is appended to `<output_dir>/<run>_time.txt`.

use std::process;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use rwfleet::orchestrator::{cancellation, CancelHandle};
use rwfleet::roster::StaticInterfaces;
use rwfleet::{FleetConfig, FleetOrchestrator, HostRoster, ResultSink};

fn usage() -> ! {
    eprintln!("Usage: rwfleet-orchestrator <config.json> [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --run-name <name>   Result file prefix (overrides config)");
    eprintln!("  --walks <n>         Walks per vertex (overrides config)");
    eprintln!("  --wait-ms <ms>      Run length before END_EXP (overrides config)");
    process::exit(1);
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(|s| s.as_str())
}

fn load_config(args: &[String]) -> anyhow::Result<FleetConfig> {
    let mut config = FleetConfig::load(&args[1])
        .with_context(|| format!("load config {}", args[1]))?;

    if let Some(name) = flag(args, "--run-name") {
        config.run_name = name.to_string();
    }
    if let Some(walks) = flag(args, "--walks") {
        config.walk_count = walks.parse().context("parse --walks")?;
    }
    if let Some(wait) = flag(args, "--wait-ms") {
        config.run_ms = wait.parse().context("parse --wait-ms")?;
    }
    Ok(config)
}

fn install_signal_handler(handle: CancelHandle) -> anyhow::Result<()> {
    let mut signals = signal_hook::iterator::Signals::new([
        signal_hook::consts::SIGINT,
        signal_hook::consts::SIGTERM,
    ])
    .context("register signal handlers")?;

    std::thread::spawn(move || {
        for sig in signals.forever() {
            tracing::warn!("received signal {}, cancelling", sig);
            handle.cancel();
        }
    });
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        usage();
    }

    let config = load_config(&args)?;
    let resolver = StaticInterfaces::new(config.interfaces.clone());
    let roster = HostRoster::load(&config, &resolver).context("load host roster")?;

    let (handle, cancel) = cancellation();
    install_signal_handler(handle)?;

    let sink = ResultSink::from_config(&config);
    let mut orchestrator =
        FleetOrchestrator::new(config, roster, cancel).context("configure orchestrator")?;

    match orchestrator.run_lifecycle(&sink).await {
        Ok(summary) => {
            tracing::info!(
                "run complete: {} walkers finished, max duration {}s",
                summary.finished_sum,
                summary.max_elapsed_secs
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!("run failed in phase {}: {}", orchestrator.phase(), e);
            Err(e).context("fleet run")
        }
    }
}
