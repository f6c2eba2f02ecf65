//! Run the engine against two simulated venues.
//!
//! ## Example Usage
//!
//! ```bash
//! # Run until Ctrl+C with the default config
//! cargo run -p spread-hedge-cli -- run
//!
//! # Reproducible 10 minute session with the conservative profile
//! cargo run -p spread-hedge-cli -- run --seed 42 --duration-secs 600 --profile conservative
//! ```

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use spread_hedge_engine::{EngineConfig, HedgeEngine, PaperVenue};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

use super::load_config;
use super::stats::print_stats;

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Seed for the simulated price walks. Venue B uses seed + 1.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop after this many seconds. Runs until Ctrl+C if omitted.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Config profile layered over Config.toml (config/Config.<profile>.toml)
    #[arg(long, env = "HEDGE_PROFILE")]
    pub profile: Option<String>,
}

/// Overrides the paper venues' random-walk seeds.
fn apply_seed(config: &mut EngineConfig, seed: u64) {
    config.paper.venue_a.random_seed = Some(seed);
    config.paper.venue_b.random_seed = Some(seed.wrapping_add(1));
}

/// Runs the run command.
///
/// # Errors
/// Returns an error if the config is invalid or persisted state cannot be loaded.
pub async fn run_engine(args: RunArgs) -> Result<()> {
    let mut config = load_config(args.profile.as_deref())?;
    if let Some(seed) = args.seed {
        apply_seed(&mut config, seed);
    }

    info!(
        symbol = %config.pair.symbol,
        data_dir = %config.journal.data_dir.display(),
        seed = ?args.seed,
        duration_secs = ?args.duration_secs,
        "Starting paper session"
    );

    let venue_a = Arc::new(PaperVenue::new(
        config.pair.venue_a.clone(),
        config.paper.venue_a.clone(),
    ));
    let venue_b = Arc::new(PaperVenue::new(
        config.pair.venue_b.clone(),
        config.paper.venue_b.clone(),
    ));

    let engine = Arc::new(HedgeEngine::new(config, venue_a.clone(), venue_b.clone())?);

    let (stop_tx, stop_rx) = watch::channel(false);
    let runner = tokio::spawn(engine.clone().run(stop_rx));

    let deadline = async {
        match args.duration_secs {
            Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        () = deadline => {
            info!("Duration elapsed, initiating shutdown");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating shutdown");
        }
    }

    // The runner may already have exited; nothing to signal then.
    let _ = stop_tx.send(true);
    runner.await?;

    info!(
        venue_a_position = %venue_a.position(),
        venue_b_position = %venue_b.position(),
        venue_a_orders = venue_a.orders_submitted(),
        venue_b_orders = venue_b.orders_submitted(),
        "Paper session finished"
    );

    print_stats("TODAY", &engine.executor().journal().today_stats(Utc::now()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_seed_offsets_venue_b() {
        let mut config = EngineConfig::default();
        apply_seed(&mut config, 42);
        assert_eq!(config.paper.venue_a.random_seed, Some(42));
        assert_eq!(config.paper.venue_b.random_seed, Some(43));

        apply_seed(&mut config, u64::MAX);
        assert_eq!(config.paper.venue_b.random_seed, Some(0));
    }

    #[test]
    fn test_run_args_parse() {
        use clap::Parser;

        #[derive(Parser)]
        struct Wrapper {
            #[command(flatten)]
            args: RunArgs,
        }

        let parsed = Wrapper::parse_from(["run", "--seed", "7", "--duration-secs", "30"]);
        assert_eq!(parsed.args.seed, Some(7));
        assert_eq!(parsed.args.duration_secs, Some(30));
    }
}
