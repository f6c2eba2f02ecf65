//! Persisted position snapshot and open journal entries.

use anyhow::Result;
use clap::Args;
use spread_hedge_core::Leg;
use spread_hedge_engine::{ArbitragePosition, OpenTrade, PositionPersistence, TradeJournal};

use super::load_config;

/// Arguments for the positions command.
#[derive(Args, Debug, Clone)]
pub struct PositionsArgs {
    /// Config profile used to locate the data directory
    #[arg(long, env = "HEDGE_PROFILE")]
    pub profile: Option<String>,
}

/// Runs the positions command.
///
/// # Errors
/// Returns an error if the config, the snapshot, or the journal cannot be read.
pub fn run_positions(args: &PositionsArgs) -> Result<()> {
    let config = load_config(args.profile.as_deref())?;
    let snapshot = PositionPersistence::new(config.journal.snapshot_path())
        .load()?
        .unwrap_or_default();
    let journal = TradeJournal::open(config.journal.journal_path())?;

    println!();
    println!("{}", "=".repeat(72));
    println!("POSITIONS");
    println!("{}", "=".repeat(72));

    match &snapshot.active {
        Some(position) => {
            println!("Active:");
            print_position(position);
        }
        None => println!("Active: none (flat)"),
    }

    if snapshot.flagged.is_empty() {
        println!("Flagged: none");
    } else {
        println!("Flagged ({}) - operator action required:", snapshot.flagged.len());
        for position in &snapshot.flagged {
            print_position(position);
            println!(
                "    reason:   {}",
                position.inconsistency.as_deref().unwrap_or("unknown")
            );
        }
    }

    let open = journal.open_trades();
    println!();
    println!("Open journal entries: {}", open.len());
    for trade in &open {
        println!("  {}", journal_line(trade));
    }
    println!();

    Ok(())
}

fn print_position(position: &ArbitragePosition) {
    println!("  {} [{}] {}", position.id, position.status, position.direction);
    println!(
        "    {}: {} {} @ {}  (net {})",
        position.leg_a_venue,
        position.leg_a_side,
        position.amount,
        position.entry_price_a,
        position.net_exposure(Leg::A)
    );
    println!(
        "    {}: {} {} @ {}  (net {})",
        position.leg_b_venue,
        position.leg_b_side,
        position.amount,
        position.entry_price_b,
        position.net_exposure(Leg::B)
    );
    println!(
        "    spread {} | layers {} | opened {}",
        position.entry_spread,
        position.layers,
        position.open_time.format("%Y-%m-%d %H:%M:%S")
    );
}

fn journal_line(trade: &OpenTrade) -> String {
    format!(
        "{} {} {} / {} {} | amount {} | spread {} | layers {}",
        trade.id,
        trade.leg_a_side,
        trade.leg_a_venue,
        trade.leg_b_side,
        trade.leg_b_venue,
        trade.amount,
        trade.entry_spread,
        trade.layers
    )
}
