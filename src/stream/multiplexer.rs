//! Change stream multiplexer
//!
//! Fans one beneficiary's watched tables into a single pair of
//! outputs: a coalesced "something changed" signal that drives wallet
//! refreshes, and a per-event feed for notification classification.
//!
//! ```text
//!   point_entries ─┐
//!   offers        ─┤                    ┌─> refresh signal (coalesced)
//!   redemptions   ─┼─> MultiplexHandle ─┤
//!   wishes        ─┤                    └─> event feed (per event)
//!   notifications ─┘
//! ```
//!
//! Exactly one handle should be live per logical consumer; rebinding
//! to another beneficiary means shutting this handle down first so no
//! trailing events from the old key cross into the new one.

use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::stream::{
    ChangeEvent, ChannelFilter, PushChannel, BENEFICIARY_COLUMN, TABLE_NOTIFICATIONS,
    WALLET_TABLES,
};

/// Configuration for the change stream multiplexer
#[derive(Debug, Clone)]
pub struct MultiplexerConfig {
    /// Tables whose changes move wallet figures
    pub wallet_tables: Vec<String>,
    /// Table carrying notification rows for classification
    pub notification_table: String,
    /// Column subscriptions filter on
    pub beneficiary_column: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            wallet_tables: WALLET_TABLES.iter().map(|t| t.to_string()).collect(),
            notification_table: TABLE_NOTIFICATIONS.to_string(),
            beneficiary_column: BENEFICIARY_COLUMN.to_string(),
        }
    }
}

impl MultiplexerConfig {
    fn all_tables(&self) -> Vec<String> {
        let mut tables = self.wallet_tables.clone();
        tables.push(self.notification_table.clone());
        tables
    }
}

/// Opens per-table subscriptions for a beneficiary and merges them
pub struct ChangeMultiplexer {
    channel: Arc<dyn PushChannel>,
    config: MultiplexerConfig,
}

impl ChangeMultiplexer {
    pub fn new(channel: Arc<dyn PushChannel>) -> Self {
        Self::with_config(channel, MultiplexerConfig::default())
    }

    pub fn with_config(channel: Arc<dyn PushChannel>, config: MultiplexerConfig) -> Self {
        Self { channel, config }
    }

    /// Subscribe all watched tables for one beneficiary key.
    ///
    /// Subscriptions are opened concurrently. A table that refuses to
    /// subscribe is logged and skipped; the beneficiary just misses
    /// live updates from that table until remount. Only a fully dead
    /// channel yields a handle with no live tables, which still works
    /// for manual refreshes.
    pub async fn open(&self, beneficiary_key: &str) -> MultiplexHandle {
        let tables = self.config.all_tables();
        let attempts = join_all(tables.iter().map(|table| {
            let filter = ChannelFilter {
                column: self.config.beneficiary_column.clone(),
                equals: beneficiary_key.to_string(),
            };
            async move { (table.clone(), self.channel.subscribe(table, filter).await) }
        }))
        .await;

        let refresh = Arc::new(Notify::new());
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let mut tasks = Vec::new();
        let mut live_tables = Vec::new();

        for (table, attempt) in attempts {
            let mut subscription = match attempt {
                Ok(sub) => sub,
                Err(e) => {
                    warn!(
                        table = %table,
                        beneficiary = %beneficiary_key,
                        error = %e,
                        "Subscription failed, table will not deliver live updates"
                    );
                    continue;
                }
            };
            live_tables.push(table);

            let refresh = refresh.clone();
            let event_tx = event_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = subscription.next_event().await {
                    // Refresh first: even an event the classifier
                    // cannot use must still nudge the wallet
                    refresh.notify_one();
                    if event_tx.send(event).is_err() {
                        break;
                    }
                }
            }));
        }
        // Pump tasks hold the only remaining senders, so the event
        // feed closes when the last pump ends
        drop(event_tx);

        debug!(
            beneficiary = %beneficiary_key,
            live_tables = live_tables.len(),
            "Multiplexer opened"
        );

        MultiplexHandle {
            beneficiary_key: beneficiary_key.to_string(),
            refresh,
            events: event_rx,
            tasks,
            live_tables,
        }
    }
}

/// Live multiplexed subscription for one beneficiary key.
///
/// Dropping the handle tears everything down; `shutdown` does the
/// same explicitly and synchronously.
pub struct MultiplexHandle {
    beneficiary_key: String,
    refresh: Arc<Notify>,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
    tasks: Vec<JoinHandle<()>>,
    live_tables: Vec<String>,
}

impl MultiplexHandle {
    pub fn beneficiary_key(&self) -> &str {
        &self.beneficiary_key
    }

    /// The coalesced refresh signal. Bursts collapse into a single
    /// pending permit, so one `notified().await` per burst.
    pub fn refresh_signal(&self) -> Arc<Notify> {
        self.refresh.clone()
    }

    /// Next change event in arrival order across all live tables.
    /// `None` after shutdown or once every table subscription closed.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// Tables that actually subscribed
    pub fn live_tables(&self) -> &[String] {
        &self.live_tables
    }

    /// Synchronously stop all pump tasks and drop their
    /// subscriptions. Buffered events are discarded; nothing flows
    /// after this returns.
    pub fn shutdown(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.live_tables.clear();
        self.events.close();
        while self.events.try_recv().is_ok() {}
        debug!(beneficiary = %self.beneficiary_key, "Multiplexer shut down");
    }
}

impl Drop for MultiplexHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}
