//! Simulated venue for paper trading and tests.
//!
//! [`PaperVenue`] implements [`VenueClient`] against an in-process book:
//! a mid price that is either set directly or driven by a seeded random walk,
//! taker fills at the touch, and a signed position tally that honors
//! reduce-only semantics. Failures and latency are injected through a
//! scripted outcome queue, falling back to a sticky failure once the queue
//! is drained.
//!
//! # Example
//!
//! ```ignore
//! let venue = PaperVenue::new("paper-a", PaperVenueConfig::default().with_mid(dec!(60000)));
//! venue.script([ScriptedOutcome::Fill, ScriptedOutcome::Fail(VenueError::timeout("order", 1500))]);
//! ```

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use spread_hedge_core::serde_duration::millis;
use spread_hedge_core::{
    Fill, Leg, Liquidity, PricePoint, PriceTickSender, Side, VenueClient, VenueError,
};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Paper venue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaperVenueConfig {
    /// Starting mid price.
    pub initial_mid: Decimal,

    /// Half of the bid/ask spread, in quote units.
    /// Default: 0 (fills at mid)
    pub half_spread: Decimal,

    /// Taker fee as a fraction of notional.
    /// Default: 0.0005 (5 bps)
    pub fee_rate: Decimal,

    /// Maximum random-walk step per tick, in basis points. Zero disables the walk.
    /// Default: 0
    pub volatility_bps: f64,

    /// Interval between pushed price ticks.
    /// Default: 250ms
    #[serde(with = "millis")]
    pub tick_interval: Duration,

    /// Latency added to every order.
    /// Default: 0
    #[serde(with = "millis")]
    pub latency: Duration,

    /// Optional random seed for reproducible walks.
    pub random_seed: Option<u64>,
}

impl Default for PaperVenueConfig {
    fn default() -> Self {
        Self {
            initial_mid: dec!(60000),
            half_spread: Decimal::ZERO,
            fee_rate: dec!(0.0005),
            volatility_bps: 0.0,
            tick_interval: Duration::from_millis(250),
            latency: Duration::ZERO,
            random_seed: None,
        }
    }
}

impl PaperVenueConfig {
    #[must_use]
    pub fn with_mid(mut self, mid: Decimal) -> Self {
        self.initial_mid = mid;
        self
    }

    #[must_use]
    pub fn with_fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.fee_rate = fee_rate;
        self
    }

    /// Enables the seeded random walk.
    #[must_use]
    pub fn with_random_walk(mut self, volatility_bps: f64, seed: u64) -> Self {
        self.volatility_bps = volatility_bps;
        self.random_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

/// Injected behavior for the next order.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptedOutcome {
    /// Fill normally.
    Fill,
    /// Fill only this fraction of the requested size.
    PartialFill(Decimal),
    /// Fail with the given error.
    Fail(VenueError),
    /// Sleep, then fill. Longer than the leg timeout simulates a stalled call.
    Delay(Duration),
}

// =============================================================================
// Internal State
// =============================================================================

#[derive(Debug)]
struct PaperState {
    mid: Decimal,
    price_available: bool,
    position: Decimal,
    script: VecDeque<ScriptedOutcome>,
    sticky_failure: Option<VenueError>,
    position_failure: Option<VenueError>,
    fills: Vec<Fill>,
    orders_submitted: u32,
    orders_filled: u32,
    orders_failed: u32,
}

struct PaperInner {
    name: String,
    config: PaperVenueConfig,
    state: RwLock<PaperState>,
    rng: RwLock<StdRng>,
}

impl PaperInner {
    fn quote(&self) -> Option<PricePoint> {
        let state = self.state.read();
        if !state.price_available {
            return None;
        }
        let half = self.config.half_spread;
        PricePoint::from_quote(
            Leg::A,
            Some(state.mid - half),
            Some(state.mid + half),
            Some(state.mid),
            Utc::now(),
        )
    }

    /// Advances the random walk one step and returns the new mid.
    fn step(&self) -> Decimal {
        let bps = self.config.volatility_bps;
        if bps <= 0.0 {
            return self.state.read().mid;
        }
        let r: f64 = self.rng.write().gen_range(-bps..=bps);
        let factor = Decimal::ONE + Decimal::try_from(r / 10_000.0).unwrap_or_default();
        let mut state = self.state.write();
        state.mid = (state.mid * factor).round_dp(2);
        state.mid
    }
}

// =============================================================================
// Paper Venue
// =============================================================================

/// In-process venue simulation.
#[derive(Clone)]
pub struct PaperVenue {
    inner: Arc<PaperInner>,
}

impl std::fmt::Debug for PaperVenue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaperVenue")
            .field("name", &self.inner.name)
            .field("config", &self.inner.config)
            .field("state", &*self.inner.state.read())
            .finish_non_exhaustive()
    }
}

impl PaperVenue {
    #[must_use]
    pub fn new(name: impl Into<String>, config: PaperVenueConfig) -> Self {
        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            inner: Arc::new(PaperInner {
                name: name.into(),
                state: RwLock::new(PaperState {
                    mid: config.initial_mid,
                    price_available: true,
                    position: Decimal::ZERO,
                    script: VecDeque::new(),
                    sticky_failure: None,
                    position_failure: None,
                    fills: Vec::new(),
                    orders_submitted: 0,
                    orders_filled: 0,
                    orders_failed: 0,
                }),
                rng: RwLock::new(rng),
                config,
            }),
        }
    }

    #[must_use]
    pub fn config(&self) -> &PaperVenueConfig {
        &self.inner.config
    }

    #[must_use]
    pub fn mid(&self) -> Decimal {
        self.inner.state.read().mid
    }

    pub fn set_mid(&self, mid: Decimal) {
        self.inner.state.write().mid = mid;
    }

    /// Makes `get_mid_price` fail with `NoPrice` while false.
    pub fn set_price_available(&self, available: bool) {
        self.inner.state.write().price_available = available;
    }

    /// Signed position held on this venue.
    #[must_use]
    pub fn position(&self) -> Decimal {
        self.inner.state.read().position
    }

    /// Overrides the position, simulating activity outside the engine.
    pub fn set_position(&self, position: Decimal) {
        self.inner.state.write().position = position;
    }

    /// Queues outcomes for the next orders, in order.
    pub fn script(&self, outcomes: impl IntoIterator<Item = ScriptedOutcome>) {
        self.inner.state.write().script.extend(outcomes);
    }

    /// Fails every order once the script is drained, until cleared.
    pub fn fail_orders(&self, error: VenueError) {
        self.inner.state.write().sticky_failure = Some(error);
    }

    pub fn clear_failure(&self) {
        self.inner.state.write().sticky_failure = None;
    }

    /// Fails position snapshots until cleared.
    pub fn fail_position_queries(&self, error: Option<VenueError>) {
        self.inner.state.write().position_failure = error;
    }

    #[must_use]
    pub fn fills(&self) -> Vec<Fill> {
        self.inner.state.read().fills.clone()
    }

    #[must_use]
    pub fn orders_submitted(&self) -> u32 {
        self.inner.state.read().orders_submitted
    }

    #[must_use]
    pub fn orders_filled(&self) -> u32 {
        self.inner.state.read().orders_filled
    }

    #[must_use]
    pub fn orders_failed(&self) -> u32 {
        self.inner.state.read().orders_failed
    }

    /// Advances the random walk one step. Returns the new mid.
    pub fn step(&self) -> Decimal {
        self.inner.step()
    }

    fn next_outcome(&self) -> ScriptedOutcome {
        let mut state = self.inner.state.write();
        state.orders_submitted += 1;
        if let Some(outcome) = state.script.pop_front() {
            return outcome;
        }
        match &state.sticky_failure {
            Some(e) => ScriptedOutcome::Fail(e.clone()),
            None => ScriptedOutcome::Fill,
        }
    }

    fn fill(&self, side: Side, amount: Decimal, reduce_only: bool) -> Result<Fill, VenueError> {
        if amount <= Decimal::ZERO {
            return Err(VenueError::InvalidOrder(format!(
                "amount must be positive, got {amount}"
            )));
        }

        let mut state = self.inner.state.write();

        let size = if reduce_only {
            let reduces = match side {
                Side::Buy => state.position < Decimal::ZERO,
                Side::Sell => state.position > Decimal::ZERO,
            };
            if !reduces {
                return Err(VenueError::Rejected(format!(
                    "reduce-only {side} would increase position {}",
                    state.position
                )));
            }
            amount.min(state.position.abs())
        } else {
            amount
        };

        let half = self.inner.config.half_spread;
        let price = match side {
            Side::Buy => state.mid + half,
            Side::Sell => state.mid - half,
        };
        let fee = (price * size * self.inner.config.fee_rate).round_dp(8);

        state.position += size * side.sign();
        state.orders_filled += 1;

        let fill = Fill {
            id: Uuid::new_v4().to_string(),
            order_id: format!("paper-{}", Uuid::new_v4()),
            side,
            size,
            price,
            fee,
            fee_asset: "USDC".to_string(),
            liquidity: Liquidity::Taker,
            timestamp: Utc::now(),
        };
        state.fills.push(fill.clone());
        Ok(fill)
    }
}

#[async_trait]
impl VenueClient for PaperVenue {
    fn name(&self) -> &str {
        &self.inner.name
    }

    async fn get_mid_price(&self) -> Result<Decimal, VenueError> {
        let state = self.inner.state.read();
        if state.price_available {
            Ok(state.mid)
        } else {
            Err(VenueError::NoPrice(self.inner.name.clone()))
        }
    }

    async fn subscribe_price_ticks(&self, sink: PriceTickSender) -> Result<(), VenueError> {
        let inner = self.inner.clone();
        let mut ticker = tokio::time::interval(inner.config.tick_interval);
        info!(venue = %inner.name, interval_ms = inner.config.tick_interval.as_millis() as u64, "Paper price feed started");

        tokio::spawn(async move {
            loop {
                ticker.tick().await;
                inner.step();
                let Some(point) = inner.quote() else {
                    continue;
                };
                if sink.send(point).is_err() {
                    debug!(venue = %inner.name, "Price subscriber dropped, stopping feed");
                    return;
                }
            }
        });
        Ok(())
    }

    async fn place_market_order(
        &self,
        side: Side,
        amount: Decimal,
        reduce_only: bool,
    ) -> Result<Fill, VenueError> {
        if !self.inner.config.latency.is_zero() {
            tokio::time::sleep(self.inner.config.latency).await;
        }

        let result = match self.next_outcome() {
            ScriptedOutcome::Fill => self.fill(side, amount, reduce_only),
            ScriptedOutcome::PartialFill(fraction) => {
                self.fill(side, (amount * fraction).round_dp(8), reduce_only)
            }
            ScriptedOutcome::Fail(e) => Err(e),
            ScriptedOutcome::Delay(delay) => {
                tokio::time::sleep(delay).await;
                self.fill(side, amount, reduce_only)
            }
        };

        match &result {
            Ok(fill) => debug!(
                venue = %self.inner.name,
                %side,
                size = %fill.size,
                price = %fill.price,
                reduce_only,
                "Paper fill"
            ),
            Err(e) => {
                self.inner.state.write().orders_failed += 1;
                debug!(venue = %self.inner.name, %side, %amount, error = %e, "Paper order failed");
            }
        }
        result
    }

    async fn get_position(&self) -> Result<Decimal, VenueError> {
        let state = self.inner.state.read();
        match &state.position_failure {
            Some(e) => Err(e.clone()),
            None => Ok(state.position),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn venue() -> PaperVenue {
        PaperVenue::new("paper", PaperVenueConfig::default().with_mid(dec!(60000)))
    }

    // ==================== Order Tests ====================

    #[tokio::test]
    async fn test_market_order_fills_at_mid_with_fee() {
        let v = venue();
        let fill = v.place_market_order(Side::Buy, dec!(0.02), false).await.unwrap();

        assert_eq!(fill.price, dec!(60000));
        assert_eq!(fill.size, dec!(0.02));
        assert_eq!(fill.fee, dec!(0.6));
        assert_eq!(v.position(), dec!(0.02));
    }

    #[tokio::test]
    async fn test_reduce_only_clamps_and_rejects() {
        let v = venue();
        v.place_market_order(Side::Sell, dec!(0.02), false).await.unwrap();

        // Same direction is rejected.
        let err = v.place_market_order(Side::Sell, dec!(0.01), true).await.unwrap_err();
        assert!(matches!(err, VenueError::Rejected(_)));

        // Oversized reduce is clamped to the position.
        let fill = v.place_market_order(Side::Buy, dec!(0.05), true).await.unwrap();
        assert_eq!(fill.size, dec!(0.02));
        assert_eq!(v.position(), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_script_then_sticky_failure() {
        let v = venue();
        v.script([
            ScriptedOutcome::Fail(VenueError::Network("down".to_string())),
            ScriptedOutcome::Fill,
        ]);
        v.fail_orders(VenueError::Rejected("halted".to_string()));

        assert!(v.place_market_order(Side::Buy, dec!(0.01), false).await.is_err());
        assert!(v.place_market_order(Side::Buy, dec!(0.01), false).await.is_ok());
        assert!(v.place_market_order(Side::Buy, dec!(0.01), false).await.is_err());

        v.clear_failure();
        assert!(v.place_market_order(Side::Buy, dec!(0.01), false).await.is_ok());
        assert_eq!(v.orders_submitted(), 4);
        assert_eq!(v.orders_failed(), 2);
        assert_eq!(v.position(), dec!(0.02));
    }

    #[tokio::test]
    async fn test_partial_fill() {
        let v = venue();
        v.script([ScriptedOutcome::PartialFill(dec!(0.5))]);
        let fill = v.place_market_order(Side::Buy, dec!(0.02), false).await.unwrap();
        assert_eq!(fill.size, dec!(0.01));
    }

    // ==================== Price Tests ====================

    #[tokio::test]
    async fn test_price_unavailable() {
        let v = venue();
        v.set_price_available(false);
        assert!(matches!(v.get_mid_price().await, Err(VenueError::NoPrice(_))));
        v.set_price_available(true);
        assert_eq!(v.get_mid_price().await.unwrap(), dec!(60000));
    }

    #[test]
    fn test_random_walk_is_seeded() {
        let config = PaperVenueConfig::default().with_random_walk(5.0, 7);
        let a = PaperVenue::new("a", config.clone());
        let b = PaperVenue::new("b", config);

        let walk_a: Vec<Decimal> = (0..20).map(|_| a.step()).collect();
        let walk_b: Vec<Decimal> = (0..20).map(|_| b.step()).collect();
        assert_eq!(walk_a, walk_b);
        assert!(walk_a.iter().any(|m| *m != dec!(60000)));
    }

    #[test]
    fn test_no_walk_without_volatility() {
        let v = venue();
        assert_eq!(v.step(), dec!(60000));
    }

    #[tokio::test]
    async fn test_subscribe_pushes_ticks() {
        let v = PaperVenue::new(
            "paper",
            PaperVenueConfig::default().with_tick_interval(Duration::from_millis(5)),
        );
        let (tx, mut rx) = spread_hedge_core::price_tick_channel();
        v.subscribe_price_ticks(tx).await.unwrap();

        let tick = rx.recv().await.unwrap();
        assert_eq!(tick.mid, dec!(60000));
    }

    #[tokio::test]
    async fn test_position_query_failure() {
        let v = venue();
        v.fail_position_queries(Some(VenueError::timeout("get_position", 5000)));
        assert!(v.get_position().await.is_err());
        v.fail_position_queries(None);
        assert_eq!(v.get_position().await.unwrap(), Decimal::ZERO);
    }
}
