//! ═══════════════════════════════════════════════════════════════════════════
//! Event Bus - In-process pub/sub for order lifecycle events
//!
//! Handlers are async closures registered per event kind. `publish` awaits
//! every handler in subscription order; a failing handler is logged and the
//! remaining handlers still run. Sequential delivery is load-bearing: the
//! balance ledger subscribes before the order manager, so balances are
//! settled before any counter-order reserves funds.
//! ═══════════════════════════════════════════════════════════════════════════

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use log::{debug, error, warn};
use tokio::sync::RwLock;

use crate::trading::Order;

/// Events published on the bus during a trading session.
#[derive(Debug, Clone)]
pub enum BotEvent {
    OrderFilled(Order),
    OrderCancelled(Order),
    StartBot(String),
    StopBot(String),
}

impl BotEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::OrderFilled(_) => EventKind::OrderFilled,
            Self::OrderCancelled(_) => EventKind::OrderCancelled,
            Self::StartBot(_) => EventKind::StartBot,
            Self::StopBot(_) => EventKind::StopBot,
        }
    }
}

/// Discriminant used as the subscription key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    OrderFilled,
    OrderCancelled,
    StartBot,
    StopBot,
}

type EventHandler = Arc<dyn Fn(BotEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// In-process pub/sub bus. Cheap to clone; clones share the registry.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<HashMap<EventKind, Vec<(String, EventHandler)>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for one event kind.
    ///
    /// The `name` is only used in log lines so a failing callback can be
    /// identified. Handlers run in the order they were subscribed.
    pub async fn subscribe<F>(&self, kind: EventKind, name: &str, handler: F)
    where
        F: Fn(BotEvent) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let mut subscribers = self.subscribers.write().await;
        subscribers
            .entry(kind)
            .or_default()
            .push((name.to_string(), Arc::new(handler)));
        debug!("Callback '{name}' subscribed to event {kind:?}");
    }

    /// Publish an event, awaiting every subscribed handler.
    ///
    /// Handler errors are caught and logged, never propagated. This is the
    /// only delivery path; an `OrderFilled` reaches each subscriber exactly
    /// once per publish.
    pub async fn publish(&self, event: BotEvent) {
        let kind = event.kind();
        let handlers: Vec<(String, EventHandler)> = {
            let subscribers = self.subscribers.read().await;
            match subscribers.get(&kind) {
                Some(handlers) => handlers.clone(),
                None => {
                    warn!("No subscribers for event {kind:?}");
                    return;
                }
            }
        };

        debug!("Publishing event {kind:?} to {} subscriber(s)", handlers.len());
        for (name, handler) in handlers {
            if let Err(e) = handler(event.clone()).await {
                error!("Error in event callback '{name}' for {kind:?}: {e:#}");
            }
        }
    }

    /// Number of handlers currently registered for an event kind.
    pub async fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers
            .read()
            .await
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }
}
