//! Celebration queue and playback state machine
//!
//! Holds pending celebration items and drives the overlay through
//! `Idle -> Queued -> Open` and back. Arrival order is FIFO, manual
//! "open next" takes the newest item first, and programmatic opens
//! address items by id. Opening fires gated audio and a confetti
//! burst; an auto-dismiss timer closes the overlay unless the user
//! does so first.
//!
//! All mutation funnels through one lock and every transition is
//! published on a watch channel, so any number of UI surfaces can
//! render the same state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::celebration::audio::{play_gated, AudioCue, AudioSink, EffectSink, InteractionGate};
use crate::celebration::{CelebrationItem, CelebrationRequest, OverlayState, OverlayView};

/// Configuration for the celebration overlay
#[derive(Debug, Clone)]
pub struct OverlayConfig {
    /// How long an opened item stays up before closing itself.
    /// Zero disables auto-dismiss entirely.
    pub auto_dismiss: Duration,
    /// Window after opening in which backdrop dismiss gestures are
    /// ignored, so the tap that opened the overlay cannot close it
    pub backdrop_grace: Duration,
    /// How long the confetti effect runs per open
    pub confetti_duration: Duration,
    /// Sound asset played on open
    pub cue: AudioCue,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            auto_dismiss: Duration::from_secs(8),
            backdrop_grace: Duration::from_millis(250),
            confetti_duration: Duration::from_millis(2500),
            cue: AudioCue::default(),
        }
    }
}

/// How a dismissal was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissKind {
    /// Explicit close control
    Close,
    /// Tap/click outside the overlay; subject to the grace period
    Backdrop,
    /// Escape key
    Escape,
    /// Timer expiry
    Auto,
}

struct OpenEntry {
    item: CelebrationItem,
    opened_at: Instant,
    generation: u64,
}

struct OverlayInner {
    queue: VecDeque<CelebrationItem>,
    open: Option<OpenEntry>,
    /// Bumped per open; a stale timer cannot dismiss a later item
    generation: u64,
    timer: Option<JoinHandle<()>>,
    closed: bool,
}

impl OverlayInner {
    fn view(&self) -> OverlayView {
        match &self.open {
            Some(entry) => OverlayView {
                state: OverlayState::Open,
                open: Some(entry.item.clone()),
                queued: self.queue.len(),
            },
            None if !self.queue.is_empty() => OverlayView {
                state: OverlayState::Queued,
                open: None,
                queued: self.queue.len(),
            },
            None => OverlayView::default(),
        }
    }

    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// The celebration surface for one beneficiary session
pub struct CelebrationOverlay {
    config: OverlayConfig,
    inner: Mutex<OverlayInner>,
    view_tx: watch::Sender<OverlayView>,
    audio: Arc<dyn AudioSink>,
    effects: Arc<dyn EffectSink>,
    gate: InteractionGate,
}

impl CelebrationOverlay {
    pub fn new(
        audio: Arc<dyn AudioSink>,
        effects: Arc<dyn EffectSink>,
        gate: InteractionGate,
    ) -> Arc<Self> {
        Self::with_config(OverlayConfig::default(), audio, effects, gate)
    }

    pub fn with_config(
        config: OverlayConfig,
        audio: Arc<dyn AudioSink>,
        effects: Arc<dyn EffectSink>,
        gate: InteractionGate,
    ) -> Arc<Self> {
        let (view_tx, _) = watch::channel(OverlayView::default());
        Arc::new(Self {
            config,
            inner: Mutex::new(OverlayInner {
                queue: VecDeque::new(),
                open: None,
                generation: 0,
                timer: None,
                closed: false,
            }),
            view_tx,
            audio,
            effects,
            gate,
        })
    }

    /// Watch the overlay state. Every transition is published.
    pub fn subscribe_view(&self) -> watch::Receiver<OverlayView> {
        self.view_tx.subscribe()
    }

    /// The state as of now
    pub fn current_view(&self) -> OverlayView {
        self.view_tx.borrow().clone()
    }

    pub async fn queued_count(&self) -> usize {
        self.inner.lock().await.queue.len()
    }

    /// Append an item to the queue. The overlay stays wherever it is;
    /// only the pending count changes.
    pub async fn enqueue(&self, item: CelebrationItem) {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return;
        }
        debug!(id = ?item.id, queued = inner.queue.len() + 1, "Celebration enqueued");
        inner.queue.push_back(item);
        self.view_tx.send_replace(inner.view());
    }

    /// Open the most recently enqueued item (the newest is the most
    /// relevant when the user chooses to engage). No-op on an empty
    /// queue.
    pub async fn open_next(self: &Arc<Self>) -> Option<CelebrationItem> {
        let item = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return None;
            }
            inner.queue.pop_back()?
        };
        self.install_open(item.clone()).await;
        Some(item)
    }

    /// Open a specific item. When the request's id matches a queued
    /// item, that item is pulled out of the queue wherever it sits;
    /// otherwise an item synthesized from the request itself opens
    /// without consuming the queue.
    pub async fn open_specific(self: &Arc<Self>, request: CelebrationRequest) -> Option<CelebrationItem> {
        let item = {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return None;
            }
            let queued_at = request.id.as_deref().and_then(|id| {
                inner
                    .queue
                    .iter()
                    .position(|queued| queued.id.as_deref() == Some(id))
            });
            match queued_at {
                Some(position) => inner
                    .queue
                    .remove(position)
                    .unwrap_or_else(|| CelebrationItem::from(request.clone())),
                None => CelebrationItem::from(request),
            }
        };
        self.install_open(item.clone()).await;
        Some(item)
    }

    /// Dismiss the open item. Backdrop gestures inside the grace
    /// period are ignored; every other kind closes immediately.
    /// Returns whether a dismissal actually happened.
    pub async fn dismiss(&self, kind: DismissKind) -> bool {
        let mut inner = self.inner.lock().await;
        let Some(open) = inner.open.as_ref() else {
            return false;
        };
        if kind == DismissKind::Backdrop && open.opened_at.elapsed() < self.config.backdrop_grace {
            debug!(
                elapsed_ms = open.opened_at.elapsed().as_millis() as u64,
                "Backdrop dismiss inside grace period, ignored"
            );
            return false;
        }
        inner.abort_timer();
        inner.open = None;
        self.view_tx.send_replace(inner.view());
        debug!(kind = ?kind, "Celebration dismissed");
        true
    }

    /// Clear the overlay back to `Idle` but keep it usable. Called
    /// when the session rebinds: the previous beneficiary's pending
    /// celebrations must not surface for the new one.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.abort_timer();
        inner.open = None;
        inner.queue.clear();
        self.view_tx.send_replace(inner.view());
        debug!("Celebration overlay reset");
    }

    /// Tear the overlay down: cancel the timer, drop everything
    /// pending, and refuse further work. Nothing fires after this
    /// returns.
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        inner.abort_timer();
        inner.open = None;
        inner.queue.clear();
        self.view_tx.send_replace(inner.view());
        debug!("Celebration overlay shut down");
    }

    async fn install_open(self: &Arc<Self>, item: CelebrationItem) {
        {
            let mut inner = self.inner.lock().await;
            if inner.closed {
                return;
            }
            inner.abort_timer();
            inner.generation += 1;
            let generation = inner.generation;
            inner.open = Some(OpenEntry {
                item: item.clone(),
                opened_at: Instant::now(),
                generation,
            });
            if !self.config.auto_dismiss.is_zero() {
                let overlay = self.clone();
                inner.timer = Some(tokio::spawn(async move {
                    tokio::time::sleep(overlay.config.auto_dismiss).await;
                    overlay.dismiss_expired(generation).await;
                }));
            }
            self.view_tx.send_replace(inner.view());
        }
        info!(id = ?item.id, "Celebration opened");

        let overlay = self.clone();
        tokio::spawn(async move {
            play_gated(overlay.audio.as_ref(), &overlay.config.cue, &overlay.gate).await;
        });
        let overlay = self.clone();
        tokio::spawn(async move {
            overlay
                .effects
                .confetti(overlay.config.confetti_duration)
                .await;
        });
    }

    /// Timer path: only dismisses the item it was armed for
    async fn dismiss_expired(&self, generation: u64) {
        let mut inner = self.inner.lock().await;
        let still_open = inner
            .open
            .as_ref()
            .is_some_and(|open| open.generation == generation);
        if !still_open {
            return;
        }
        inner.timer = None;
        inner.open = None;
        self.view_tx.send_replace(inner.view());
        debug!("Celebration auto-dismissed");
    }
}
