//! Trade journal: open and closed hedges with realized PnL.
//!
//! Every mutation is written through to a JSON file (atomic rewrite), and open
//! entries are reloaded on restart so a crash between open and close never
//! loses track of live exposure.
//!
//! Realized PnL per trade:
//!
//! ```text
//! pnl_leg = (exit_price - entry_price) * amount * sign(side)    (buy = +1, sell = -1)
//! pnl     = pnl_a + pnl_b - (open_fee_a + open_fee_b + close_fee_a + close_fee_b)
//! ```

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::Side;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::persistence::{read_json, write_json_atomic, PersistenceError};
use crate::position::ArbitragePosition;

// =============================================================================
// Errors
// =============================================================================

#[derive(Error, Debug)]
pub enum JournalError {
    /// Backing file could not be read or written.
    #[error("journal persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    /// No open entry with this id.
    #[error("no open trade with id {0}")]
    UnknownTrade(Uuid),

    /// An open entry with this id already exists.
    #[error("trade {0} is already open")]
    DuplicateTrade(Uuid),
}

// =============================================================================
// Records
// =============================================================================

/// Journal entry for an open hedge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenTrade {
    /// Position id.
    pub id: Uuid,
    pub leg_a_venue: String,
    pub leg_a_side: Side,
    pub leg_b_venue: String,
    pub leg_b_side: Side,
    pub amount: Decimal,
    pub entry_price_a: Decimal,
    pub entry_price_b: Decimal,
    pub entry_spread: Decimal,
    pub open_time: DateTime<Utc>,
    pub open_fee_a: Decimal,
    pub open_fee_b: Decimal,
    pub layers: u32,
}

impl OpenTrade {
    /// Builds the entry for a freshly opened position.
    #[must_use]
    pub fn from_position(position: &ArbitragePosition) -> Self {
        use spread_hedge_core::Leg;
        Self {
            id: position.id,
            leg_a_venue: position.leg_a_venue.clone(),
            leg_a_side: position.leg_a_side,
            leg_b_venue: position.leg_b_venue.clone(),
            leg_b_side: position.leg_b_side,
            amount: position.amount,
            entry_price_a: position.entry_price_a,
            entry_price_b: position.entry_price_b,
            entry_spread: position.entry_spread,
            open_time: position.open_time,
            open_fee_a: position.open_fees(Leg::A),
            open_fee_b: position.open_fees(Leg::B),
            layers: position.layers,
        }
    }
}

/// One add-on layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeLayer {
    pub amount: Decimal,
    pub price_a: Decimal,
    pub price_b: Decimal,
    pub fee_a: Decimal,
    pub fee_b: Decimal,
}

/// Exit details for closing an open trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeExit {
    pub id: Uuid,
    pub exit_price_a: Decimal,
    pub exit_price_b: Decimal,
    pub close_spread: Decimal,
    pub close_fee_a: Decimal,
    pub close_fee_b: Decimal,
    pub close_time: DateTime<Utc>,
    /// Closed by the holding-time limit rather than spread reversion.
    pub forced: bool,
}

/// Fees paid over the life of a trade.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeFees {
    pub open_fee_a: Decimal,
    pub open_fee_b: Decimal,
    pub close_fee_a: Decimal,
    pub close_fee_b: Decimal,
}

impl TradeFees {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.open_fee_a + self.open_fee_b + self.close_fee_a + self.close_fee_b
    }
}

/// Journal record of a completed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    pub id: Uuid,
    pub leg_a_venue: String,
    pub leg_a_side: Side,
    pub leg_b_venue: String,
    pub leg_b_side: Side,
    pub amount: Decimal,
    pub entry_price_a: Decimal,
    pub entry_price_b: Decimal,
    pub entry_spread: Decimal,
    pub open_time: DateTime<Utc>,
    pub close_time: DateTime<Utc>,
    pub close_spread: Decimal,
    pub exit_price_a: Decimal,
    pub exit_price_b: Decimal,
    pub fees: TradeFees,
    pub pnl: Decimal,
    pub hold_time_secs: i64,
    pub layers: u32,
    pub forced: bool,
}

/// Realized PnL of one leg.
#[must_use]
pub fn leg_pnl(side: Side, entry: Decimal, exit: Decimal, amount: Decimal) -> Decimal {
    (exit - entry) * amount * side.sign()
}

/// Realized PnL of a closed trade, net of fees.
#[must_use]
pub fn realized_pnl(open: &OpenTrade, exit: &TradeExit) -> Decimal {
    let gross = leg_pnl(open.leg_a_side, open.entry_price_a, exit.exit_price_a, open.amount)
        + leg_pnl(open.leg_b_side, open.entry_price_b, exit.exit_price_b, open.amount);
    gross - (open.open_fee_a + open.open_fee_b + exit.close_fee_a + exit.close_fee_b)
}

// =============================================================================
// Statistics
// =============================================================================

/// Aggregate journal statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JournalStats {
    pub total_trades: usize,
    pub open_trades: usize,
    /// Traded size across both legs, opens and closes.
    pub total_volume: Decimal,
    pub total_pnl: Decimal,
    pub total_fees: Decimal,
    /// Percentage of closed trades with positive PnL.
    pub win_rate_pct: Decimal,
    pub avg_pnl: Decimal,
    pub max_profit: Decimal,
    pub max_loss: Decimal,
}

impl JournalStats {
    fn from_trades<'a>(closed: impl Iterator<Item = &'a ClosedTrade>, open_trades: usize) -> Self {
        let mut stats = Self {
            open_trades,
            ..Self::default()
        };
        let mut wins = 0usize;

        for trade in closed {
            stats.total_trades += 1;
            // Each leg traded `amount` twice.
            stats.total_volume += trade.amount * dec!(4);
            stats.total_pnl += trade.pnl;
            stats.total_fees += trade.fees.total();
            stats.max_profit = stats.max_profit.max(trade.pnl);
            stats.max_loss = stats.max_loss.min(trade.pnl);
            if trade.pnl > Decimal::ZERO {
                wins += 1;
            }
        }

        if stats.total_trades > 0 {
            let n = Decimal::from(stats.total_trades);
            stats.win_rate_pct = Decimal::from(wins) / n * dec!(100);
            stats.avg_pnl = stats.total_pnl / n;
        }
        stats
    }
}

// =============================================================================
// Journal
// =============================================================================

/// On-disk journal format.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JournalFile {
    pub open_trades: Vec<OpenTrade>,
    pub closed_trades: Vec<ClosedTrade>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Write-through trade journal. Single writer: the executor.
#[derive(Debug)]
pub struct TradeJournal {
    path: Option<PathBuf>,
    state: RwLock<JournalFile>,
}

impl TradeJournal {
    /// Opens (or creates) a journal backed by `path`, reloading existing entries.
    ///
    /// # Errors
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, JournalError> {
        let path = path.into();
        let file: JournalFile = read_json(&path)?.unwrap_or_default();

        info!(
            path = %path.display(),
            open = file.open_trades.len(),
            closed = file.closed_trades.len(),
            "Trade journal loaded"
        );

        Ok(Self {
            path: Some(path),
            state: RwLock::new(file),
        })
    }

    /// Journal without a backing file.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: RwLock::new(JournalFile::default()),
        }
    }

    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn persist(&self, file: &JournalFile) -> Result<(), JournalError> {
        if let Some(path) = &self.path {
            write_json_atomic(path, file)?;
        }
        Ok(())
    }

    /// Records a newly opened trade.
    ///
    /// # Errors
    /// Returns `DuplicateTrade` if the id is already open, or a persistence error.
    pub fn record_open(&self, entry: OpenTrade) -> Result<(), JournalError> {
        let mut state = self.state.write();
        if state.open_trades.iter().any(|t| t.id == entry.id) {
            return Err(JournalError::DuplicateTrade(entry.id));
        }

        debug!(id = %entry.id, amount = %entry.amount, spread = %entry.entry_spread, "Journal open");
        state.open_trades.push(entry);
        state.last_update = Some(Utc::now());
        self.persist(&state)
    }

    /// Merges an add-on layer into an open trade.
    ///
    /// # Errors
    /// Returns `UnknownTrade` if the id is not open, or a persistence error.
    pub fn record_add_on(&self, id: Uuid, layer: TradeLayer) -> Result<(), JournalError> {
        let mut state = self.state.write();
        let trade = state
            .open_trades
            .iter_mut()
            .find(|t| t.id == id)
            .ok_or(JournalError::UnknownTrade(id))?;

        let total = trade.amount + layer.amount;
        if !total.is_zero() {
            trade.entry_price_a =
                (trade.entry_price_a * trade.amount + layer.price_a * layer.amount) / total;
            trade.entry_price_b =
                (trade.entry_price_b * trade.amount + layer.price_b * layer.amount) / total;
        }
        trade.amount = total;
        trade.open_fee_a += layer.fee_a;
        trade.open_fee_b += layer.fee_b;
        trade.layers += 1;

        debug!(id = %id, amount = %total, "Journal add-on");
        state.last_update = Some(Utc::now());
        self.persist(&state)
    }

    /// Closes an open trade and returns the completed record with realized PnL.
    ///
    /// # Errors
    /// Returns `UnknownTrade` if the id is not open, or a persistence error.
    pub fn record_close(&self, exit: TradeExit) -> Result<ClosedTrade, JournalError> {
        let mut state = self.state.write();
        let idx = state
            .open_trades
            .iter()
            .position(|t| t.id == exit.id)
            .ok_or(JournalError::UnknownTrade(exit.id))?;
        let open = state.open_trades.remove(idx);

        let pnl = realized_pnl(&open, &exit);
        let closed = ClosedTrade {
            id: open.id,
            leg_a_venue: open.leg_a_venue,
            leg_a_side: open.leg_a_side,
            leg_b_venue: open.leg_b_venue,
            leg_b_side: open.leg_b_side,
            amount: open.amount,
            entry_price_a: open.entry_price_a,
            entry_price_b: open.entry_price_b,
            entry_spread: open.entry_spread,
            open_time: open.open_time,
            close_time: exit.close_time,
            close_spread: exit.close_spread,
            exit_price_a: exit.exit_price_a,
            exit_price_b: exit.exit_price_b,
            fees: TradeFees {
                open_fee_a: open.open_fee_a,
                open_fee_b: open.open_fee_b,
                close_fee_a: exit.close_fee_a,
                close_fee_b: exit.close_fee_b,
            },
            pnl,
            hold_time_secs: (exit.close_time - open.open_time).num_seconds(),
            layers: open.layers,
            forced: exit.forced,
        };

        info!(
            id = %closed.id,
            pnl = %closed.pnl,
            fees = %closed.fees.total(),
            hold_secs = closed.hold_time_secs,
            forced = closed.forced,
            "Trade closed"
        );

        state.closed_trades.push(closed.clone());
        state.last_update = Some(Utc::now());
        self.persist(&state)?;
        Ok(closed)
    }

    #[must_use]
    pub fn open_trades(&self) -> Vec<OpenTrade> {
        self.state.read().open_trades.clone()
    }

    #[must_use]
    pub fn closed_trades(&self) -> Vec<ClosedTrade> {
        self.state.read().closed_trades.clone()
    }

    #[must_use]
    pub fn open_trade(&self, id: Uuid) -> Option<OpenTrade> {
        self.state.read().open_trades.iter().find(|t| t.id == id).cloned()
    }

    /// Statistics for trades closed on the UTC day of `now`.
    #[must_use]
    pub fn today_stats(&self, now: DateTime<Utc>) -> JournalStats {
        let today = now.date_naive();
        let state = self.state.read();
        JournalStats::from_trades(
            state
                .closed_trades
                .iter()
                .filter(|t| t.close_time.date_naive() == today),
            state.open_trades.len(),
        )
    }

    /// Statistics over the whole history.
    #[must_use]
    pub fn all_stats(&self) -> JournalStats {
        let state = self.state.read();
        JournalStats::from_trades(state.closed_trades.iter(), state.open_trades.len())
    }

    /// Realized PnL for the UTC day of `now`.
    #[must_use]
    pub fn today_pnl(&self, now: DateTime<Utc>) -> Decimal {
        self.today_stats(now).total_pnl
    }
}
