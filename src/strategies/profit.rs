//! Profit tracking - per-buy-level cost basis and realized grid gains
//!
//! Each buy fill accrues quantity and cost (fees included) against its
//! level. A paired sell debits that basis proportionally and credits the
//! net difference to cumulative profit. Sells without a usable paired
//! basis fall back to lower levels with outstanding quantity, then to the
//! initial-purchase basis.

use std::collections::HashMap;

use log::debug;

#[derive(Debug, Default, Clone, Copy)]
struct CostBasis {
    quantity: f64,
    cost: f64,
}

impl CostBasis {
    fn average_cost(&self) -> f64 {
        if self.quantity > 0.0 {
            self.cost / self.quantity
        } else {
            0.0
        }
    }

    /// Remove up to `quantity` units, returning (taken, cost of taken).
    fn debit(&mut self, quantity: f64) -> (f64, f64) {
        let taken = quantity.min(self.quantity);
        let cost = self.average_cost() * taken;
        self.quantity -= taken;
        self.cost -= cost;
        (taken, cost)
    }
}

pub struct ProfitTracker {
    trading_fee: f64,
    level_basis: HashMap<usize, CostBasis>,
    initial_basis: CostBasis,
    cumulative_profit: f64,
}

impl ProfitTracker {
    pub fn new(trading_fee: f64) -> Self {
        Self {
            trading_fee,
            level_basis: HashMap::new(),
            initial_basis: CostBasis::default(),
            cumulative_profit: 0.0,
        }
    }

    pub fn cumulative_profit(&self) -> f64 {
        self.cumulative_profit
    }

    /// Accrue a buy fill against its level, or against the initial basis
    /// for non-grid buys (initial purchase, rebalances).
    pub fn record_buy(&mut self, level: Option<usize>, quantity: f64, price: f64) {
        let fee = self.trading_fee * quantity * price;
        let basis = match level {
            Some(index) => self.level_basis.entry(index).or_default(),
            None => &mut self.initial_basis,
        };
        basis.quantity += quantity;
        basis.cost += quantity * price + fee;
        debug!(
            "Cost basis accrued at level {level:?}: +{quantity:.6} @ {price:.4} (fee {fee:.4})"
        );
    }

    /// Realize profit for a grid sell fill.
    ///
    /// The cost side is drained from the first candidate basis with
    /// outstanding quantity, walking `primary` then `fallbacks` (nearest
    /// lower levels first); whatever quantity remains uncovered is costed
    /// against the initial-purchase basis.
    pub fn settle_sell(
        &mut self,
        quantity: f64,
        price: f64,
        primary: Option<usize>,
        fallbacks: &[usize],
    ) -> f64 {
        let fee = self.trading_fee * quantity * price;
        let net_revenue = quantity * price - fee;

        let mut remaining = quantity;
        let mut cost_basis = 0.0;

        for index in primary.into_iter().chain(fallbacks.iter().copied()) {
            if remaining <= 0.0 {
                break;
            }
            if let Some(basis) = self.level_basis.get_mut(&index) {
                let (taken, cost) = basis.debit(remaining);
                remaining -= taken;
                cost_basis += cost;
            }
        }

        if remaining > 0.0 {
            // Quantity beyond every recorded basis carries zero cost.
            let (_, cost) = self.initial_basis.debit(remaining);
            cost_basis += cost;
        }

        let profit = net_revenue - cost_basis;
        self.cumulative_profit += profit;
        debug!(
            "Realized {profit:.4} on sell of {quantity:.6} @ {price:.4} (cost basis {cost_basis:.4})"
        );
        profit
    }

    /// Fold every per-level basis into the initial basis.
    ///
    /// Called when the grid is rebuilt: level indices change meaning, but
    /// the crypto behind them is still owned.
    pub fn collapse_into_initial(&mut self) {
        for (_, basis) in self.level_basis.drain() {
            self.initial_basis.quantity += basis.quantity;
            self.initial_basis.cost += basis.cost;
        }
        debug!(
            "Collapsed level bases into initial: {:.6} units at {:.4} total cost",
            self.initial_basis.quantity, self.initial_basis.cost
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_realizes_spread_minus_fees() {
        let mut tracker = ProfitTracker::new(0.001);
        tracker.record_buy(Some(0), 2.0, 100.0);

        let profit = tracker.settle_sell(2.0, 110.0, Some(0), &[]);

        let buy_fee = 0.001 * 200.0;
        let sell_fee = 0.001 * 220.0;
        let expected = (110.0 - 100.0) * 2.0 - buy_fee - sell_fee;
        assert!((profit - expected).abs() < 1e-9);
        assert!((tracker.cumulative_profit() - expected).abs() < 1e-9);
    }

    #[test]
    fn partial_sell_debits_proportionally() {
        let mut tracker = ProfitTracker::new(0.0);
        tracker.record_buy(Some(0), 4.0, 100.0);

        tracker.settle_sell(1.0, 120.0, Some(0), &[]);
        // Three quarters of the basis remains for later sells.
        let profit = tracker.settle_sell(3.0, 120.0, Some(0), &[]);
        assert!((profit - 60.0).abs() < 1e-9);
        assert!((tracker.cumulative_profit() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn fallback_walks_lower_levels_then_initial() {
        let mut tracker = ProfitTracker::new(0.0);
        tracker.record_buy(None, 1.0, 90.0); // initial purchase
        tracker.record_buy(Some(1), 1.0, 100.0);

        // Primary level 2 has no basis; level 1 covers one unit, the
        // initial basis the rest.
        let profit = tracker.settle_sell(2.0, 120.0, Some(2), &[1, 0]);
        let expected = 2.0 * 120.0 - (100.0 + 90.0);
        assert!((profit - expected).abs() < 1e-9);
    }

    #[test]
    fn uncovered_quantity_has_zero_cost() {
        let mut tracker = ProfitTracker::new(0.0);
        let profit = tracker.settle_sell(1.0, 50.0, None, &[]);
        assert!((profit - 50.0).abs() < 1e-9);
    }

    #[test]
    fn collapse_preserves_totals() {
        let mut tracker = ProfitTracker::new(0.0);
        tracker.record_buy(Some(0), 1.0, 100.0);
        tracker.record_buy(Some(1), 2.0, 150.0);
        tracker.collapse_into_initial();

        // The old level indices no longer resolve; the initial basis does.
        let profit = tracker.settle_sell(3.0, 200.0, Some(0), &[]);
        let expected = 3.0 * 200.0 - 400.0;
        assert!((profit - expected).abs() < 1e-9);
    }
}
