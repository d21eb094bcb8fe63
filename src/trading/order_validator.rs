//! Order Validation - quantity adjustment against venue constraints
//!
//! Adjusts requested quantities so they fit the available balance (fees
//! included) and the venue's minimum order sizes before anything reaches
//! the execution backend. A quantity that cannot be made valid is a typed
//! failure the caller handles by skipping the order.

use log::debug;

use crate::error::BalanceError;

/// Tolerance applied when an order has to be shrunk to fit the balance,
/// leaving headroom for venue rounding.
const ADJUSTMENT_TOLERANCE: f64 = 0.999;

/// Venue minimum order size in base units. Anything smaller is rejected
/// outright rather than rounded up.
const MIN_ORDER_QUANTITY: f64 = 1e-6;

#[derive(Debug, Clone, Copy)]
pub struct OrderValidator {
    fee_rate: f64,
    tolerance: f64,
    min_quantity: f64,
}

impl OrderValidator {
    pub fn new(fee_rate: f64) -> Self {
        Self {
            fee_rate,
            tolerance: ADJUSTMENT_TOLERANCE,
            min_quantity: MIN_ORDER_QUANTITY,
        }
    }

    /// Validate a buy quantity against the free fiat balance.
    ///
    /// The balance has to fund the notional plus the trading fee. If the
    /// full quantity does not fit, it is shrunk to what the balance can
    /// fund (with tolerance headroom). Fails when even the shrunk quantity
    /// is below the venue minimum.
    pub fn adjust_and_validate_buy_quantity(
        &self,
        balance: f64,
        order_quantity: f64,
        price: f64,
    ) -> Result<f64, BalanceError> {
        let unit_cost = price * (1.0 + self.fee_rate);
        let required = order_quantity * unit_cost;

        let quantity = if required <= balance {
            order_quantity
        } else {
            let adjusted = (balance * self.tolerance) / unit_cost;
            debug!(
                "Buy quantity {order_quantity:.6} does not fit balance {balance:.2}, adjusted to {adjusted:.6}"
            );
            adjusted
        };

        if quantity < self.min_quantity || quantity * unit_cost > balance {
            return Err(BalanceError::InsufficientBalance {
                available: balance,
                required,
            });
        }
        Ok(quantity)
    }

    /// Validate a sell quantity against the free crypto balance.
    /// The fee comes out of the proceeds, so only the quantity must fit.
    pub fn adjust_and_validate_sell_quantity(
        &self,
        crypto_balance: f64,
        order_quantity: f64,
    ) -> Result<f64, BalanceError> {
        let quantity = if order_quantity <= crypto_balance {
            order_quantity
        } else {
            let adjusted = crypto_balance * self.tolerance;
            debug!(
                "Sell quantity {order_quantity:.6} exceeds crypto balance {crypto_balance:.6}, adjusted to {adjusted:.6}"
            );
            adjusted
        };

        if quantity < self.min_quantity {
            return Err(BalanceError::InsufficientCryptoBalance {
                available: crypto_balance,
                required: order_quantity,
            });
        }
        Ok(quantity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fitting_buy_quantity_passes_through() {
        let validator = OrderValidator::new(0.001);
        let quantity = validator
            .adjust_and_validate_buy_quantity(1000.0, 5.0, 100.0)
            .unwrap();
        assert_eq!(quantity, 5.0);
    }

    #[test]
    fn oversized_buy_is_shrunk_to_fee_inclusive_balance() {
        let validator = OrderValidator::new(0.001);
        let quantity = validator
            .adjust_and_validate_buy_quantity(500.0, 10.0, 100.0)
            .unwrap();
        assert!(quantity < 5.0);
        // Notional plus fee still fits the balance.
        assert!(quantity * 100.0 * 1.001 <= 500.0);
        assert!(quantity > 4.9);
    }

    #[test]
    fn dust_buy_is_rejected() {
        let validator = OrderValidator::new(0.001);
        let err = validator
            .adjust_and_validate_buy_quantity(0.00001, 1.0, 100.0)
            .unwrap_err();
        assert!(matches!(err, BalanceError::InsufficientBalance { .. }));
    }

    #[test]
    fn oversized_sell_is_shrunk_to_holdings() {
        let validator = OrderValidator::new(0.001);
        let quantity = validator
            .adjust_and_validate_sell_quantity(2.0, 5.0)
            .unwrap();
        assert!(quantity <= 2.0);
        assert!(quantity > 1.99);
    }

    #[test]
    fn dust_sell_is_rejected() {
        let validator = OrderValidator::new(0.001);
        let err = validator
            .adjust_and_validate_sell_quantity(0.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, BalanceError::InsufficientCryptoBalance { .. }));
    }

    #[test]
    fn zero_fee_buy_uses_full_balance() {
        let validator = OrderValidator::new(0.0);
        let quantity = validator
            .adjust_and_validate_buy_quantity(1000.0, 10.0, 100.0)
            .unwrap();
        assert_eq!(quantity, 10.0);
    }
}
