//! Order book - every order the session has placed, indexed by side and
//! by grid level. Entries are never removed; completed orders stay around
//! for reporting.

use std::collections::HashMap;

use crate::trading::{Order, OrderSide, OrderStatus};

#[derive(Default)]
pub struct OrderBook {
    buy_orders: Vec<Order>,
    sell_orders: Vec<Order>,
    /// Orders not attached to any grid level (initial buy, TP, SL).
    non_grid_order_ids: Vec<String>,
    /// Order id → grid level index.
    order_to_grid: HashMap<String, usize>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a placed order, optionally attached to a grid level.
    pub fn add_order(&mut self, order: Order, grid_level: Option<usize>) {
        match grid_level {
            Some(index) => {
                self.order_to_grid.insert(order.id.clone(), index);
            }
            None => self.non_grid_order_ids.push(order.id.clone()),
        }

        match order.side {
            OrderSide::Buy => self.buy_orders.push(order),
            OrderSide::Sell => self.sell_orders.push(order),
        }
    }

    pub fn all_buy_orders(&self) -> &[Order] {
        &self.buy_orders
    }

    pub fn all_sell_orders(&self) -> &[Order] {
        &self.sell_orders
    }

    /// Orders that are not linked to any grid level (initial purchase,
    /// take-profit, stop-loss).
    pub fn non_grid_orders(&self) -> Vec<Order> {
        self.buy_orders
            .iter()
            .chain(self.sell_orders.iter())
            .filter(|o| self.non_grid_order_ids.contains(&o.id))
            .cloned()
            .collect()
    }

    /// All orders still waiting on the venue, buys then sells.
    pub fn open_orders(&self) -> Vec<Order> {
        self.buy_orders
            .iter()
            .chain(self.sell_orders.iter())
            .filter(|o| o.is_open())
            .cloned()
            .collect()
    }

    pub fn completed_orders(&self) -> Vec<Order> {
        self.buy_orders
            .iter()
            .chain(self.sell_orders.iter())
            .filter(|o| o.is_filled())
            .cloned()
            .collect()
    }

    pub fn buy_orders_with_grid(&self) -> Vec<(Order, Option<usize>)> {
        self.buy_orders
            .iter()
            .map(|o| (o.clone(), self.order_to_grid.get(&o.id).copied()))
            .collect()
    }

    pub fn sell_orders_with_grid(&self) -> Vec<(Order, Option<usize>)> {
        self.sell_orders
            .iter()
            .map(|o| (o.clone(), self.order_to_grid.get(&o.id).copied()))
            .collect()
    }

    /// Grid level index for an order.
    ///
    /// Lookup is by id, so it also resolves a freshly fetched copy of an
    /// order whose local instance was replaced by the venue's version.
    pub fn grid_level_for(&self, order: &Order) -> Option<usize> {
        self.order_to_grid.get(&order.id).copied()
    }

    /// Mutate an order's status in place.
    pub fn update_order_status(&mut self, order_id: &str, status: OrderStatus) {
        if let Some(order) = self.find_mut(order_id) {
            order.status = status;
        }
    }

    /// Mark an order completely filled at `timestamp` (epoch ms) and return
    /// the updated copy. Used by the replay simulator so the book is always
    /// updated before the fill event goes out.
    pub fn apply_fill(&mut self, order_id: &str, timestamp: i64) -> Option<Order> {
        let order = self.find_mut(order_id)?;
        order.filled = order.amount;
        order.remaining = 0.0;
        order.status = OrderStatus::Closed;
        order.timestamp = timestamp;
        order.last_trade_timestamp = Some(timestamp);
        if order.average.is_none() {
            order.average = Some(order.price);
        }
        Some(order.clone())
    }

    fn find_mut(&mut self, order_id: &str) -> Option<&mut Order> {
        self.buy_orders
            .iter_mut()
            .chain(self.sell_orders.iter_mut())
            .find(|o| o.id == order_id)
    }
}
