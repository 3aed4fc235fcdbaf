use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;

use pvexplore::engine::external::deck::DeckSimulator;
use pvexplore::run::{RunConfig, RunMode, RunOutcome, Runner};

// --- CLI Definitions ---

#[derive(Parser, Debug)]
#[command(author, version, about = "Photovoltaic device optimization driver", long_about = None)]
struct Args {
    /// Run configuration file (JSON)
    #[arg(short, long)]
    config: PathBuf,

    /// Override the configured run mode (snapshot, iterative, grid)
    #[arg(short, long)]
    mode: Option<String>,

    /// Validate the configuration and exit without running
    #[arg(long, default_value_t = false)]
    check: bool,
}

// --- Initialization Helpers ---

fn load_config(path: &Path) -> Result<RunConfig> {
    let file = File::open(path)
        .with_context(|| format!("cannot open configuration '{}'", path.display()))?;
    serde_json::from_reader(file)
        .with_context(|| format!("cannot parse configuration '{}'", path.display()))
}

fn parse_mode(mode: &str) -> Result<RunMode> {
    match mode.to_lowercase().as_str() {
        "snapshot" | "snap" => Ok(RunMode::Snapshot),
        "iterative" | "optim" => Ok(RunMode::Iterative),
        "grid" | "brute" => Ok(RunMode::Grid),
        other => Err(anyhow!("unknown mode '{}': expected snapshot, iterative or grid", other)),
    }
}

fn check_simulator(command: &str) -> Result<()> {
    // We attempt to launch the simulator once. If it is not in PATH the
    // whole run would die on the first evaluation, minutes from now.
    match Command::new(command).arg("help").output() {
        Ok(_) => Ok(()),
        Err(_) => Err(anyhow!(
            "simulator check failed: '{}' executable not found in PATH",
            command
        )),
    }
}

// --- Main ---

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = load_config(&args.config)?;
    if let Some(mode) = &args.mode {
        config.mode = parse_mode(mode)?;
    }

    if args.check {
        config
            .validate()
            .map_err(|e| anyhow!("configuration not valid: {}", e))?;
        info!("configuration '{}' is valid", args.config.display());
        return Ok(());
    }

    let deck = config
        .deck
        .clone()
        .ok_or_else(|| anyhow!("configuration has no 'deck' simulator section"))?;
    check_simulator(&deck.command)?;

    let params = config
        .params
        .iter()
        .map(|p| (p.name.clone(), p.format_short))
        .collect();
    let simulator = DeckSimulator::new(deck, params);

    let mut runner = Runner::new(config, simulator);
    match runner.run().context("optimization run failed")? {
        RunOutcome::Completed => info!("run completed"),
        RunOutcome::Interrupted => info!("run stopped on user request"),
        RunOutcome::Aborted => unreachable!("aborted runs return an error"),
    }
    Ok(())
}
