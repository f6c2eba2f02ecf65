//! Trade journal statistics.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use spread_hedge_engine::{JournalStats, TradeJournal};

use super::load_config;

/// Arguments for the stats command.
#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Include every journaled trade, not just today's (UTC)
    #[arg(long)]
    pub all: bool,

    /// Config profile used to locate the data directory
    #[arg(long, env = "HEDGE_PROFILE")]
    pub profile: Option<String>,
}

/// Runs the stats command.
///
/// # Errors
/// Returns an error if the config or the journal file cannot be read.
pub fn run_stats(args: &StatsArgs) -> Result<()> {
    let config = load_config(args.profile.as_deref())?;
    let journal = TradeJournal::open(config.journal.journal_path())?;

    if args.all {
        print_stats("ALL TIME", &journal.all_stats());
    } else {
        print_stats("TODAY (UTC)", &journal.today_stats(Utc::now()));
    }
    Ok(())
}

pub fn print_stats(title: &str, stats: &JournalStats) {
    println!();
    println!("{}", "=".repeat(48));
    println!("TRADE JOURNAL: {title}");
    println!("{}", "=".repeat(48));
    for (label, value) in stats_rows(stats) {
        println!("{label:<20} {value:>26}");
    }
    println!();
}

fn stats_rows(stats: &JournalStats) -> Vec<(&'static str, String)> {
    vec![
        ("Closed trades", stats.total_trades.to_string()),
        ("Open trades", stats.open_trades.to_string()),
        ("Volume", stats.total_volume.to_string()),
        ("Realized PnL", stats.total_pnl.round_dp(4).to_string()),
        ("Fees", stats.total_fees.round_dp(4).to_string()),
        ("Win rate", format!("{}%", stats.win_rate_pct.round_dp(1))),
        ("Average PnL", stats.avg_pnl.round_dp(4).to_string()),
        ("Best trade", stats.max_profit.round_dp(4).to_string()),
        ("Worst trade", stats.max_loss.round_dp(4).to_string()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_stats_rows() {
        let stats = JournalStats {
            total_trades: 4,
            open_trades: 1,
            total_pnl: dec!(12.34567),
            win_rate_pct: dec!(75),
            ..JournalStats::default()
        };
        let rows = stats_rows(&stats);
        assert_eq!(rows[0], ("Closed trades", "4".to_string()));
        assert_eq!(rows[3], ("Realized PnL", "12.3457".to_string()));
        assert_eq!(rows[5], ("Win rate", "75%".to_string()));
    }
}
