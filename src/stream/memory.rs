//! In-memory push channel
//!
//! Reference `PushChannel` provider: a process-local broker that
//! routes published events to matching table subscriptions. Used by
//! the test suites and by hosts that feed events from their own
//! transport.

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use crate::stream::{ChangeEvent, ChannelFilter, PushChannel, Subscription};
use crate::types::{JubileeError, Result};

struct Route {
    filter: ChannelFilter,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
pub struct MemoryChannel {
    routes: DashMap<String, Vec<Route>>,
    fail_subscribe: AtomicBool,
    fail_tables: DashSet<String>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next subscribe calls fail, for degradation tests
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Make subscribe calls on one table fail while the rest keep
    /// working, for partial-failure tests
    pub fn set_fail_subscribe_for(&self, table: &str, fail: bool) {
        if fail {
            self.fail_tables.insert(table.to_string());
        } else {
            self.fail_tables.remove(table);
        }
    }

    /// Deliver an event to every live matching subscription on its
    /// table. Returns how many subscriptions received it. Dead routes
    /// (dropped subscriptions) are pruned on the way through.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        let Some(mut routes) = self.routes.get_mut(&event.table) else {
            return 0;
        };
        routes.retain(|route| !route.sender.is_closed());

        let mut delivered = 0;
        for route in routes.iter() {
            if route.filter.matches(&event) && route.sender.send(event.clone()).is_ok() {
                delivered += 1;
            }
        }
        debug!(
            table = %event.table,
            op = ?event.op,
            delivered,
            "Published change event"
        );
        delivered
    }

    /// Live subscriptions on a table
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.routes
            .get(table)
            .map(|routes| {
                routes
                    .iter()
                    .filter(|route| !route.sender.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }
}

#[async_trait]
impl PushChannel for MemoryChannel {
    async fn subscribe(&self, table: &str, filter: ChannelFilter) -> Result<Subscription> {
        if self.fail_subscribe.load(Ordering::SeqCst) || self.fail_tables.contains(table) {
            return Err(JubileeError::Channel(format!(
                "subscribe refused for table {}",
                table
            )));
        }

        let (sender, subscription) = Subscription::channel(table);
        self.routes
            .entry(table.to_string())
            .or_default()
            .push(Route { filter, sender });
        debug!(
            table = %table,
            subscription_id = %subscription.id(),
            "Opened subscription"
        );
        Ok(subscription)
    }
}
