//! Celebration queue types

pub mod audio;
pub mod bus;
pub mod overlay;

use serde::{Deserialize, Serialize};

/// A queued "good news" entry awaiting display.
///
/// Every field is optional: items synthesized from programmatic
/// triggers may carry only a title, only a message, or nothing but an
/// id. The overlay renders whatever is present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelebrationItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Programmatic "show this celebration now" request.
///
/// Issued by feature areas outside the notification stream. When `id`
/// names a queued item that item is opened; otherwise an item is
/// synthesized from the request itself.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CelebrationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CelebrationRequest {
    pub fn by_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: None,
            message: None,
        }
    }
}

impl From<CelebrationRequest> for CelebrationItem {
    fn from(request: CelebrationRequest) -> Self {
        Self {
            id: request.id,
            title: request.title,
            message: request.message,
        }
    }
}

/// Overlay display state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverlayState {
    /// Queue empty, nothing shown
    Idle,
    /// Pending items behind a collapsed indicator
    Queued,
    /// One item actively displayed
    Open,
}

/// Renderable snapshot of the celebration surface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayView {
    pub state: OverlayState,
    /// The item on display while `Open`
    pub open: Option<CelebrationItem>,
    /// Count badge for the collapsed indicator
    pub queued: usize,
}

impl Default for OverlayView {
    fn default() -> Self {
        Self {
            state: OverlayState::Idle,
            open: None,
            queued: 0,
        }
    }
}
