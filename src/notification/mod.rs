//! Notification dispatch - webhook fan-out for important events
//!
//! Sends are offloaded onto the runtime so a slow webhook never stalls a
//! trading callback. Disabled silently in backtests and when no URLs are
//! configured.

use std::sync::Arc;

use log::{debug, error, info};
use reqwest::Client;
use serde_json::json;

use crate::config::TradingMode;

/// The events worth pushing to an external channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationKind {
    OrderPlaced,
    OrderFilled,
    OrderFailed,
    OrderCancelled,
    TakeProfitTriggered,
    StopLossTriggered,
    ErrorOccurred,
}

impl NotificationKind {
    fn title(&self) -> &'static str {
        match self {
            Self::OrderPlaced => "📌 Order Placed",
            Self::OrderFilled => "✅ Order Filled",
            Self::OrderFailed => "❌ Order Failed",
            Self::OrderCancelled => "🚫 Order Cancelled",
            Self::TakeProfitTriggered => "🎯 Take Profit Triggered",
            Self::StopLossTriggered => "🛑 Stop Loss Triggered",
            Self::ErrorOccurred => "🚨 Error Occurred",
        }
    }
}

/// Fan-out sender over the configured webhook URLs.
#[derive(Clone)]
pub struct NotificationHandler {
    urls: Arc<Vec<String>>,
    client: Client,
    enabled: bool,
}

impl NotificationHandler {
    /// `urls` is the raw comma-separated `APPRISE_NOTIFICATION_URLS` value.
    /// Notifications only fire for modes that trade against a venue.
    pub fn new(urls: Option<String>, trading_mode: TradingMode) -> Self {
        let urls: Vec<String> = urls
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        let enabled = !urls.is_empty() && trading_mode.requires_exchange();
        if enabled {
            info!("🔔 Notifications enabled for {} channel(s)", urls.len());
        } else {
            debug!("Notifications disabled (mode: {trading_mode}, urls: {})", urls.len());
        }

        Self {
            urls: Arc::new(urls),
            client: Client::new(),
            enabled,
        }
    }

    pub fn disabled() -> Self {
        Self {
            urls: Arc::new(Vec::new()),
            client: Client::new(),
            enabled: false,
        }
    }

    /// Fire-and-forget a notification; the actual sends run on a spawned
    /// task so callers never block on webhook latency.
    pub fn notify(&self, kind: NotificationKind, details: impl Into<String>) {
        if !self.enabled {
            return;
        }

        let handler = self.clone();
        let details = details.into();
        tokio::spawn(async move {
            handler.send_all(kind, &details).await;
        });
    }

    async fn send_all(&self, kind: NotificationKind, details: &str) {
        let message = format!("{}\n{}", kind.title(), details);
        for url in self.urls.iter() {
            let result = self
                .client
                .post(url)
                .json(&json!({ "text": message }))
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    debug!("Notification delivered to {url}");
                }
                Ok(response) => {
                    error!("Notification endpoint {url} returned {}", response.status());
                }
                Err(e) => {
                    error!("Failed to deliver notification to {url}: {e}");
                }
            }
        }
    }
}
