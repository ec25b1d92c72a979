//! Push channel types
//!
//! The backend exposes realtime row changes per table. This module
//! defines the normalized event shape, the `(table, filter)` keyed
//! subscription primitive, and the table names the engine watches.
//! Transport is a collaborator concern: any provider that can deliver
//! `ChangeEvent`s through a `Subscription` plugs in here.

pub mod memory;
pub mod multiplexer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::types::Result;

// ============================================================================
// Watched Tables
// ============================================================================

pub const TABLE_POINT_ENTRIES: &str = "point_entries";
pub const TABLE_OFFERS: &str = "offers";
pub const TABLE_REDEMPTIONS: &str = "redemptions";
pub const TABLE_WISHES: &str = "wishes";
pub const TABLE_NOTIFICATIONS: &str = "notifications";

/// Column the backend writes the beneficiary id into on every watched
/// table
pub const BENEFICIARY_COLUMN: &str = "child_id";

/// Tables whose row changes can move wallet figures
pub const WALLET_TABLES: [&str; 4] = [
    TABLE_POINT_ENTRIES,
    TABLE_OFFERS,
    TABLE_REDEMPTIONS,
    TABLE_WISHES,
];

// ============================================================================
// Change Events
// ============================================================================

/// Row operation carried by a push event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
    /// Catch-all echoed by providers that subscribe with `*`
    Wildcard,
}

/// Normalized push event for one row change.
///
/// Ephemeral: events are consumed in arrival order and never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub table: String,
    pub op: ChangeOp,
    /// Beneficiary id the subscription was filtered on
    pub beneficiary_key: String,
    /// Row image before the change, when the provider sends one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old: Option<serde_json::Value>,
    /// Row image after the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new: Option<serde_json::Value>,
}

impl ChangeEvent {
    pub fn insert(table: &str, beneficiary_key: &str, row: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Insert,
            beneficiary_key: beneficiary_key.to_string(),
            old: None,
            new: Some(row),
        }
    }

    pub fn update(
        table: &str,
        beneficiary_key: &str,
        old: serde_json::Value,
        new: serde_json::Value,
    ) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Update,
            beneficiary_key: beneficiary_key.to_string(),
            old: Some(old),
            new: Some(new),
        }
    }

    pub fn delete(table: &str, beneficiary_key: &str, old: serde_json::Value) -> Self {
        Self {
            table: table.to_string(),
            op: ChangeOp::Delete,
            beneficiary_key: beneficiary_key.to_string(),
            old: Some(old),
            new: None,
        }
    }

    /// The row image to inspect: the new image when present, else the
    /// old one (deletes only carry the old image)
    pub fn payload(&self) -> Option<&serde_json::Value> {
        self.new.as_ref().or(self.old.as_ref())
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// Row filter a subscription is keyed on: `column = value`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFilter {
    pub column: String,
    pub equals: String,
}

impl ChannelFilter {
    /// The standard filter: rows belonging to one beneficiary
    pub fn beneficiary(key: &str) -> Self {
        Self {
            column: BENEFICIARY_COLUMN.to_string(),
            equals: key.to_string(),
        }
    }

    /// Whether an event's row passes this filter. Falls back to the
    /// event's beneficiary key when the payload lacks the column.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        let check = |image: &serde_json::Value| {
            image.get(&self.column).map(|col| match col.as_str() {
                Some(s) => s == self.equals,
                None => col.to_string() == self.equals,
            })
        };
        if let Some(hit) = event.new.as_ref().and_then(check) {
            return hit;
        }
        if let Some(hit) = event.old.as_ref().and_then(check) {
            return hit;
        }
        event.beneficiary_key == self.equals
    }
}

/// One live subscription on a single table.
///
/// Dropping the subscription is the unsubscribe: the provider prunes
/// the dead delivery handle on its next publish.
#[derive(Debug)]
pub struct Subscription {
    id: Uuid,
    table: String,
    events: mpsc::UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    /// Build a subscription plus the sender a provider delivers into
    pub fn channel(table: &str) -> (mpsc::UnboundedSender<ChangeEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                id: Uuid::new_v4(),
                table: table.to_string(),
                events: rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Next event in arrival order; `None` once the provider side is
    /// gone
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }
}

/// Push channel provider interface.
///
/// Implementations deliver row changes for `(table, filter)` pairs.
/// Each call opens an independent subscription; teardown is dropping
/// the returned `Subscription`.
#[async_trait]
pub trait PushChannel: Send + Sync {
    async fn subscribe(&self, table: &str, filter: ChannelFilter) -> Result<Subscription>;
}
