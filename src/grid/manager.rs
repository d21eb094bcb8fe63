//! ═══════════════════════════════════════════════════════════════════════════
//! Grid Model - Price level generation, pairing and the per-level state machine
//!
//! Owns the sorted price levels, the central (trigger) price, the
//! buy/sell-eligible subsets per strategy variant, and every legal state
//! transition. Pairings are indices into the dense level vector; the vector
//! is append-only between rebuilds so indices stay stable.
//! ═══════════════════════════════════════════════════════════════════════════

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::config::{
    GridStrategyConfig, OrderSizingType, RangeMode, SpacingType, StrategyType,
};
use crate::grid::level::{GridCycleState, GridLevel};
use crate::trading::{Order, OrderSide};

/// Direction of a level pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingKind {
    /// `source` is a sell level being paired with a `target` buy level.
    Buy,
    /// `source` is a buy level being paired with a `target` sell level.
    Sell,
}

/// Grid price levels plus their state machines.
pub struct GridModel {
    strategy_type: StrategyType,
    spacing: SpacingType,
    sizing: OrderSizingType,
    range_mode: RangeMode,
    num_grids: usize,
    configured_bottom: Option<f64>,
    configured_top: Option<f64>,

    bottom: f64,
    top: f64,
    central_price: f64,
    levels: Vec<GridLevel>,
    /// Buy-eligible level indices, ascending by price.
    sorted_buy_grids: Vec<usize>,
    /// Sell-eligible level indices, ascending by price.
    sorted_sell_grids: Vec<usize>,

    auto_take_profit: Option<f64>,
    auto_stop_loss: Option<f64>,
}

impl GridModel {
    pub fn new(config: &GridStrategyConfig) -> Self {
        Self {
            strategy_type: config.strategy_type,
            spacing: config.spacing,
            sizing: config.order_sizing,
            range_mode: config.range.mode,
            num_grids: config.num_grids,
            configured_bottom: config.range.bottom,
            configured_top: config.range.top,
            bottom: 0.0,
            top: 0.0,
            central_price: 0.0,
            levels: Vec::new(),
            sorted_buy_grids: Vec::new(),
            sorted_sell_grids: Vec::new(),
            auto_take_profit: None,
            auto_stop_loss: None,
        }
    }

    /// Build the price levels and assign birth states.
    ///
    /// `first_price` is required in crypto-zero range mode, where the range
    /// is derived as [P/5, 9P/5] from the first observed price and the
    /// take-profit / stop-loss thresholds are auto-set to top / zero.
    pub fn initialize(&mut self, first_price: Option<f64>) -> Result<()> {
        let (bottom, top) = self.resolve_range(first_price)?;
        self.bottom = bottom;
        self.top = top;
        self.rebuild_levels();

        info!(
            "📊 Grid initialized: {} levels, trigger ${:.2}",
            self.levels.len(),
            self.central_price
        );
        debug!("Range: ${:.2} - ${:.2}", self.bottom, self.top);
        debug!(
            "Buy levels: {}, Sell levels: {}",
            self.sorted_buy_grids.len(),
            self.sorted_sell_grids.len()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        !self.levels.is_empty()
    }

    fn resolve_range(&mut self, first_price: Option<f64>) -> Result<(f64, f64)> {
        match self.range_mode {
            RangeMode::CryptoZero => {
                let price = match first_price {
                    Some(p) if p > 0.0 => p,
                    _ => bail!("crypto_zero range mode requires the first observed price"),
                };
                let bottom = price / 5.0;
                let top = price + (price - bottom);
                self.auto_take_profit = Some(top);
                self.auto_stop_loss = Some(0.0);
                info!(
                    "CryptoZero range: first_price={price:.2}, bottom={bottom:.2}, top={top:.2} (TP={top:.2}, SL=0)"
                );
                Ok((bottom, top))
            }
            RangeMode::Manual => {
                let bottom = self
                    .configured_bottom
                    .ok_or_else(|| anyhow::anyhow!("manual range mode requires range.bottom"))?;
                let top = self
                    .configured_top
                    .ok_or_else(|| anyhow::anyhow!("manual range mode requires range.top"))?;
                Ok((bottom, top))
            }
        }
    }

    /// Generate level prices and birth states from the resolved range.
    ///
    /// An even configured count gets one extra midpoint level so a central
    /// price exists; the simple grid then drops that midpoint again after
    /// recording it, the hedged grid keeps it.
    fn rebuild_levels(&mut self) {
        let even = self.num_grids % 2 == 0;
        let effective = if even { self.num_grids + 1 } else { self.num_grids };

        let mut prices: Vec<f64> = match self.spacing {
            SpacingType::Arithmetic => {
                let step = (self.top - self.bottom) / (effective - 1) as f64;
                (0..effective)
                    .map(|i| self.bottom + step * i as f64)
                    .collect()
            }
            SpacingType::Geometric => {
                let ratio = (self.top / self.bottom).powf(1.0 / (effective - 1) as f64);
                let mut price = self.bottom;
                (0..effective)
                    .map(|_| {
                        let current = price;
                        price *= ratio;
                        current
                    })
                    .collect()
            }
        };

        let central_index = prices.len() / 2;
        self.central_price = prices[central_index];

        if even && self.strategy_type == StrategyType::SimpleGrid {
            prices.remove(central_index);
        }

        self.levels = match self.strategy_type {
            StrategyType::SimpleGrid => prices
                .iter()
                .map(|&price| {
                    let state = if price <= self.central_price {
                        GridCycleState::ReadyToBuy
                    } else {
                        GridCycleState::ReadyToSell
                    };
                    GridLevel::new(price, state)
                })
                .collect(),
            StrategyType::HedgedGrid => {
                let top_index = prices.len() - 1;
                prices
                    .iter()
                    .enumerate()
                    .map(|(i, &price)| {
                        let state = if i == top_index {
                            GridCycleState::ReadyToSell
                        } else {
                            GridCycleState::ReadyToBuyOrSell
                        };
                        GridLevel::new(price, state)
                    })
                    .collect()
            }
        };

        self.rebuild_subsets();
    }

    /// Recompute the buy/sell-eligible index lists from the current levels.
    fn rebuild_subsets(&mut self) {
        let mut by_price: Vec<usize> = (0..self.levels.len()).collect();
        by_price.sort_by(|&a, &b| {
            self.levels[a]
                .price
                .partial_cmp(&self.levels[b].price)
                .expect("grid prices are finite")
        });

        match self.strategy_type {
            StrategyType::SimpleGrid => {
                self.sorted_buy_grids = by_price
                    .iter()
                    .copied()
                    .filter(|&i| self.levels[i].price <= self.central_price)
                    .collect();
                self.sorted_sell_grids = by_price
                    .iter()
                    .copied()
                    .filter(|&i| self.levels[i].price > self.central_price)
                    .collect();
            }
            StrategyType::HedgedGrid => {
                // Buys: all except the topmost. Sells: all except the bottom.
                self.sorted_buy_grids = by_price[..by_price.len() - 1].to_vec();
                self.sorted_sell_grids = by_price[1..].to_vec();
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // ACCESSORS
    // ═══════════════════════════════════════════════════════════════════════

    pub fn strategy_type(&self) -> StrategyType {
        self.strategy_type
    }

    /// The central price is the trigger for initial placement.
    pub fn trigger_price(&self) -> f64 {
        self.central_price
    }

    pub fn level(&self, index: usize) -> &GridLevel {
        &self.levels[index]
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    pub fn sorted_buy_grids(&self) -> &[usize] {
        &self.sorted_buy_grids
    }

    pub fn sorted_sell_grids(&self) -> &[usize] {
        &self.sorted_sell_grids
    }

    pub fn buy_prices(&self) -> Vec<f64> {
        self.sorted_buy_grids.iter().map(|&i| self.levels[i].price).collect()
    }

    pub fn sell_prices(&self) -> Vec<f64> {
        self.sorted_sell_grids.iter().map(|&i| self.levels[i].price).collect()
    }

    pub fn min_price(&self) -> f64 {
        self.levels.iter().map(|l| l.price).fold(f64::INFINITY, f64::min)
    }

    pub fn max_price(&self) -> f64 {
        self.levels.iter().map(|l| l.price).fold(f64::NEG_INFINITY, f64::max)
    }

    /// Auto-derived take-profit threshold (crypto-zero mode only).
    pub fn auto_take_profit(&self) -> Option<f64> {
        self.auto_take_profit
    }

    /// Auto-derived stop-loss threshold (crypto-zero mode only).
    pub fn auto_stop_loss(&self) -> Option<f64> {
        self.auto_stop_loss
    }

    // ═══════════════════════════════════════════════════════════════════════
    // SIZING
    // ═══════════════════════════════════════════════════════════════════════

    /// Order quantity for a level given the current total portfolio value.
    pub fn order_size_for_level(&self, total_value: f64, grid_price: f64) -> f64 {
        let total_grids = self.levels.len() as f64;
        match self.sizing {
            OrderSizingType::EqualDollar => (total_value / total_grids) / grid_price,
            OrderSizingType::EqualCrypto => (total_value / total_grids) / self.central_price,
        }
    }

    /// Initial market-buy quantity targeting a 50/50 portfolio split.
    pub fn initial_order_quantity(
        &self,
        fiat_balance: f64,
        crypto_balance: f64,
        current_price: f64,
    ) -> f64 {
        let crypto_value = crypto_balance * current_price;
        let total_value = fiat_balance + crypto_value;
        let target_allocation = total_value / 2.0;
        let fiat_to_spend = (target_allocation - crypto_value).clamp(0.0, fiat_balance);
        fiat_to_spend / current_price
    }

    // ═══════════════════════════════════════════════════════════════════════
    // STATE MACHINE
    // ═══════════════════════════════════════════════════════════════════════

    /// Whether an order of the given side may be placed at this level now.
    pub fn can_place_order(&self, index: usize, side: OrderSide) -> bool {
        let state = self.levels[index].state;
        match self.strategy_type {
            StrategyType::SimpleGrid => match side {
                OrderSide::Buy => state == GridCycleState::ReadyToBuy,
                OrderSide::Sell => state == GridCycleState::ReadyToSell,
            },
            StrategyType::HedgedGrid => match side {
                OrderSide::Buy => matches!(
                    state,
                    GridCycleState::ReadyToBuy | GridCycleState::ReadyToBuyOrSell
                ),
                OrderSide::Sell => matches!(
                    state,
                    GridCycleState::ReadyToSell | GridCycleState::ReadyToBuyOrSell
                ),
            },
        }
    }

    /// Attach a freshly placed order and move the level to its waiting state.
    pub fn mark_order_pending(&mut self, index: usize, order: &Order) {
        let level = &mut self.levels[index];
        level.attach_order(&order.id);

        match order.side {
            OrderSide::Buy => {
                level.state = GridCycleState::WaitingForBuyFill;
                debug!("Buy order pending at grid level {:.4}", level.price);
            }
            OrderSide::Sell => {
                level.state = GridCycleState::WaitingForSellFill;
                debug!("Sell order pending at grid level {:.4}", level.price);
            }
        }
    }

    /// Transition a level after its order filled.
    ///
    /// In the hedged grid a completion also touches the paired level: a buy
    /// readies its paired sell level, a sell readies its paired buy level.
    pub fn complete_order(&mut self, index: usize, side: OrderSide) {
        match self.strategy_type {
            StrategyType::SimpleGrid => {
                let level = &mut self.levels[index];
                level.state = match side {
                    OrderSide::Buy => GridCycleState::ReadyToSell,
                    OrderSide::Sell => GridCycleState::ReadyToBuy,
                };
                debug!(
                    "{side} completed at grid level {:.4}, now {:?}",
                    level.price, level.state
                );
            }
            StrategyType::HedgedGrid => {
                self.levels[index].state = GridCycleState::ReadyToBuyOrSell;
                match side {
                    OrderSide::Buy => {
                        if let Some(sell_index) = self.levels[index].paired_sell {
                            self.levels[sell_index].state = GridCycleState::ReadyToSell;
                            debug!(
                                "Paired sell level {:.4} is now READY_TO_SELL",
                                self.levels[sell_index].price
                            );
                        }
                    }
                    OrderSide::Sell => {
                        if let Some(buy_index) = self.levels[index].paired_buy {
                            self.levels[buy_index].state = GridCycleState::ReadyToBuy;
                            debug!(
                                "Paired buy level {:.4} is now READY_TO_BUY",
                                self.levels[buy_index].price
                            );
                        }
                    }
                }
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // PAIRING
    // ═══════════════════════════════════════════════════════════════════════

    /// Record a pairing between two levels, in both directions.
    pub fn pair_levels(&mut self, source: usize, target: usize, kind: PairingKind) {
        match kind {
            PairingKind::Buy => {
                self.levels[source].paired_buy = Some(target);
                self.levels[target].paired_sell = Some(source);
                debug!(
                    "Paired sell level {:.4} with buy level {:.4}",
                    self.levels[source].price, self.levels[target].price
                );
            }
            PairingKind::Sell => {
                self.levels[source].paired_sell = Some(target);
                self.levels[target].paired_buy = Some(source);
                debug!(
                    "Paired buy level {:.4} with sell level {:.4}",
                    self.levels[source].price, self.levels[target].price
                );
            }
        }
    }

    /// The sell level to pair with a just-filled buy level.
    ///
    /// Simple grid: the first sell level above the buy price that is still
    /// eligible to place a sell. Hedged grid: the immediate next higher
    /// level regardless of state.
    pub fn paired_sell_level(&self, buy_index: usize) -> Option<usize> {
        let buy_price = self.levels[buy_index].price;
        match self.strategy_type {
            StrategyType::SimpleGrid => {
                for &sell_index in &self.sorted_sell_grids {
                    if !self.can_place_order(sell_index, OrderSide::Sell) {
                        continue;
                    }
                    if self.levels[sell_index].price > buy_price {
                        return Some(sell_index);
                    }
                }
                warn!("No suitable sell level found above {buy_price:.4}");
                None
            }
            StrategyType::HedgedGrid => {
                let mut by_price: Vec<usize> = (0..self.levels.len()).collect();
                by_price.sort_by(|&a, &b| {
                    self.levels[a]
                        .price
                        .partial_cmp(&self.levels[b].price)
                        .expect("grid prices are finite")
                });
                let position = by_price.iter().position(|&i| i == buy_index)?;
                by_price.get(position + 1).copied()
            }
        }
    }

    /// The level immediately below the given one by price, if any.
    pub fn level_below(&self, index: usize) -> Option<usize> {
        let price = self.levels[index].price;
        let mut best: Option<usize> = None;
        for (i, level) in self.levels.iter().enumerate() {
            if level.price < price {
                match best {
                    Some(b) if self.levels[b].price >= level.price => {}
                    _ => best = Some(i),
                }
            }
        }
        best
    }

    // ═══════════════════════════════════════════════════════════════════════
    // DYNAMIC RESTART SUPPORT
    // ═══════════════════════════════════════════════════════════════════════

    /// Rebuild the grid centered on a new price, keeping the configured
    /// width (arithmetic) or ratio span (geometric). All level state and
    /// pairings are reset; callers release reservations first.
    pub fn recenter(&mut self, price: f64) {
        match self.range_mode {
            RangeMode::CryptoZero => {
                self.bottom = price / 5.0;
                self.top = price + (price - self.bottom);
                self.auto_take_profit = Some(self.top);
                self.auto_stop_loss = Some(0.0);
            }
            RangeMode::Manual => match self.spacing {
                SpacingType::Arithmetic => {
                    let width = self.top - self.bottom;
                    let mut bottom = price - width / 2.0;
                    if bottom <= 0.0 {
                        // Recentred range would cross zero; fall back to the
                        // crypto-zero shape so every level stays positive.
                        bottom = price / 5.0;
                    }
                    self.bottom = bottom;
                    self.top = bottom + width;
                }
                SpacingType::Geometric => {
                    let span = self.top / self.bottom;
                    self.bottom = price / span.sqrt();
                    self.top = price * span.sqrt();
                }
            },
        }

        self.rebuild_levels();
        info!(
            "🔄 Grid recentered on ${price:.2}: {} levels over [${:.2}, ${:.2}]",
            self.levels.len(),
            self.bottom,
            self.top
        );
    }

    /// Append buy-only levels below the current bottom, continuing the
    /// existing spacing. Returns the indices of the new levels, lowest last.
    ///
    /// New levels are born READY_TO_BUY and optimistically paired (for
    /// profit taking) with the closest level above them.
    pub fn extend_below(&mut self, count: usize) -> Vec<usize> {
        if count == 0 || self.levels.len() < 2 {
            return Vec::new();
        }

        let mut prices: Vec<f64> = self.levels.iter().map(|l| l.price).collect();
        prices.sort_by(|a, b| a.partial_cmp(b).expect("grid prices are finite"));
        let lowest = prices[0];
        let second = prices[1];

        let mut appended = Vec::new();
        let mut previous_price = lowest;
        for _ in 0..count {
            let next_price = match self.spacing {
                SpacingType::Arithmetic => previous_price - (second - lowest),
                SpacingType::Geometric => previous_price / (second / lowest),
            };
            if next_price <= 0.0 {
                warn!("Stopping downward extension: next level would be non-positive");
                break;
            }

            let new_index = self.levels.len();
            self.levels
                .push(GridLevel::new(next_price, GridCycleState::ReadyToBuy));

            // Nearest existing higher level takes the profit side.
            let above = self
                .level_above_price(next_price)
                .expect("an extended level always has a neighbor above");
            self.pair_levels(new_index, above, PairingKind::Sell);

            appended.push(new_index);
            previous_price = next_price;
        }

        if !appended.is_empty() {
            self.bottom = previous_price;
            self.rebuild_subsets();
            info!(
                "📉 Extended grid downward by {} level(s), new bottom ${:.4}",
                appended.len(),
                previous_price
            );
        }
        appended
    }

    fn level_above_price(&self, price: f64) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, level) in self.levels.iter().enumerate() {
            if level.price > price {
                match best {
                    Some(b) if self.levels[b].price <= level.price => {}
                    _ => best = Some(i),
                }
            }
        }
        best
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════
