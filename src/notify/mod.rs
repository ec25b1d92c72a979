//! Notification classification and celebration dedup
//!
//! Turns raw notification-table change events into celebration items
//! or transient toasts. The two paths are mutually exclusive per
//! event, and celebrations pass through a cooldown gate so a backend
//! writing several rows for one logical event cannot storm the queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::celebration::CelebrationItem;
use crate::stream::{ChangeEvent, ChangeOp, TABLE_NOTIFICATIONS};

/// Default minimum gap between two accepted celebrations
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(1000);

/// The closed set of "good news" notification categories.
///
/// A configuration constant rather than business logic: hosts extend
/// or replace it without touching classification.
#[derive(Debug, Clone)]
pub struct CelebrationVocabulary {
    categories: HashSet<String>,
}

impl Default for CelebrationVocabulary {
    fn default() -> Self {
        Self::custom([
            "wish_fulfilled",
            "reward_approved",
            "reward_fulfilled",
            "redemption_approved",
            "redemption_fulfilled",
            "wishlist_approved",
        ])
    }
}

impl CelebrationVocabulary {
    pub fn custom<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, category: &str) -> bool {
        self.categories.contains(category)
    }
}

/// A notification row lifted out of a change event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationCandidate {
    pub id: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl NotificationCandidate {
    /// Lift a candidate out of an event payload.
    ///
    /// Parsing is tolerant of backend drift: ids may arrive as
    /// strings or numbers, timestamps fall back to arrival time, and
    /// blank text fields are treated as absent. Rows missing an id or
    /// category are not candidates at all.
    pub fn from_event(event: &ChangeEvent) -> Option<Self> {
        let payload = event.payload()?;
        let id = scalar_as_string(payload.get("id")?)?;
        let category = scalar_as_string(payload.get("category")?)?;
        let timestamp = payload
            .get("created_at")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        Some(Self {
            id,
            category,
            title: text_field(payload, "title"),
            message: text_field(payload, "message"),
            timestamp,
        })
    }

    fn has_text(&self) -> bool {
        self.title.is_some() || self.message.is_some()
    }
}

fn scalar_as_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text_field(payload: &serde_json::Value, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn toast_from_event(event: &ChangeEvent) -> Option<Toast> {
    let payload = event.payload()?;
    let title = text_field(payload, "title");
    let message = text_field(payload, "message");
    if title.is_none() && message.is_none() {
        return None;
    }
    Some(Toast { title, message })
}

/// A transient, low-cost informational surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Toast {
    pub title: Option<String>,
    pub message: Option<String>,
}

/// Outcome of classifying one change event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Celebration-worthy, enqueue it
    Celebration(CelebrationItem),
    /// Surface transiently, then forget
    Informational(Toast),
    /// Celebration-worthy but dropped by the cooldown gate
    Suppressed,
    /// Wrong table, wrong operation, or unusable payload
    Ignored,
}

/// Configuration for the classifier
#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Window after an accepted celebration in which further
    /// celebration candidates are dropped
    pub cooldown: Duration,
    pub vocabulary: CelebrationVocabulary,
    /// Table whose events carry notification rows
    pub notification_table: String,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            vocabulary: CelebrationVocabulary::default(),
            notification_table: TABLE_NOTIFICATIONS.to_string(),
        }
    }
}

/// Stateful classifier and dedup gate for one beneficiary session.
///
/// The gate tracks when a celebration was last accepted; suppressed
/// candidates do not move that mark, so the window is measured from
/// enqueue to enqueue.
pub struct Classifier {
    config: ClassifierConfig,
    last_enqueue: Option<Instant>,
}

impl Classifier {
    pub fn new() -> Self {
        Self::with_config(ClassifierConfig::default())
    }

    pub fn with_config(config: ClassifierConfig) -> Self {
        Self {
            config,
            last_enqueue: None,
        }
    }

    /// Classify one change event. Exactly one of the four outcomes
    /// applies; a single event never produces both a celebration and
    /// a toast.
    pub fn classify(&mut self, event: &ChangeEvent) -> Classification {
        if event.table != self.config.notification_table {
            return Classification::Ignored;
        }
        // A notification is surfaced when its row appears. Edits and
        // deletions of the row only refresh the wallet upstream.
        if !matches!(event.op, ChangeOp::Insert | ChangeOp::Wildcard) {
            return Classification::Ignored;
        }
        let Some(candidate) = NotificationCandidate::from_event(event) else {
            // Rows missing an id or category can never celebrate, but
            // whatever text they carry still surfaces
            if let Some(toast) = toast_from_event(event) {
                return Classification::Informational(toast);
            }
            debug!(op = ?event.op, "Notification event payload unusable, ignoring");
            return Classification::Ignored;
        };

        if self.config.vocabulary.contains(&candidate.category) {
            if let Some(last) = self.last_enqueue {
                if last.elapsed() < self.config.cooldown {
                    debug!(
                        id = %candidate.id,
                        category = %candidate.category,
                        elapsed_ms = last.elapsed().as_millis() as u64,
                        "Celebration suppressed by cooldown"
                    );
                    return Classification::Suppressed;
                }
            }
            self.last_enqueue = Some(Instant::now());
            info!(
                id = %candidate.id,
                category = %candidate.category,
                "Celebration accepted"
            );
            return Classification::Celebration(CelebrationItem {
                id: Some(candidate.id),
                title: candidate.title,
                message: candidate.message,
            });
        }

        if candidate.has_text() {
            return Classification::Informational(Toast {
                title: candidate.title,
                message: candidate.message,
            });
        }
        Classification::Ignored
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new()
    }
}
