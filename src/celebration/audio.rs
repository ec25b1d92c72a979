//! Celebration side effects: audio and visual sinks
//!
//! The engine never touches an audio device or a canvas itself; hosts
//! hand in sinks. Playback is gated behind the first user interaction
//! of the session (autoplay policy) and the sound asset is resolved by
//! trying the primary path then alternate extensions, so a host that
//! ships only `.ogg` still gets sound.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::types::Result;

/// Plays short one-shot sound assets
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Whether the asset at `path` can be loaded at all
    async fn can_load(&self, path: &str) -> bool;

    /// Play the asset once. Errors degrade to a silent celebration at
    /// the call site.
    async fn play(&self, path: &str) -> Result<()>;
}

/// Runs the visual celebration effect
#[async_trait]
pub trait EffectSink: Send + Sync {
    /// Run the particle burst for `duration`, then self-terminate
    async fn confetti(&self, duration: Duration);
}

/// Sink for hosts without audio output
pub struct NullAudioSink;

#[async_trait]
impl AudioSink for NullAudioSink {
    async fn can_load(&self, _path: &str) -> bool {
        false
    }

    async fn play(&self, _path: &str) -> Result<()> {
        Ok(())
    }
}

/// Sink for hosts without a visual surface
pub struct NullEffectSink;

#[async_trait]
impl EffectSink for NullEffectSink {
    async fn confetti(&self, _duration: Duration) {}
}

/// Sound asset with extension fallbacks
#[derive(Debug, Clone)]
pub struct AudioCue {
    /// Preferred asset path
    pub primary: String,
    /// Extensions to swap in when the primary does not load
    pub fallback_exts: Vec<String>,
}

impl Default for AudioCue {
    fn default() -> Self {
        Self {
            primary: "sounds/celebration.mp3".to_string(),
            fallback_exts: vec!["ogg".to_string(), "wav".to_string()],
        }
    }
}

impl AudioCue {
    /// Candidate paths in resolution order: the primary first, then
    /// the primary with each fallback extension swapped in
    pub fn candidates(&self) -> Vec<String> {
        let stem = match self.primary.rsplit_once('.') {
            Some((stem, _ext)) => stem,
            None => self.primary.as_str(),
        };
        let mut paths = vec![self.primary.clone()];
        for ext in &self.fallback_exts {
            let candidate = format!("{}.{}", stem, ext);
            if !paths.contains(&candidate) {
                paths.push(candidate);
            }
        }
        paths
    }

    /// First candidate the sink can load, if any
    pub async fn resolve(&self, sink: &dyn AudioSink) -> Option<String> {
        for candidate in self.candidates() {
            if sink.can_load(&candidate).await {
                return Some(candidate);
            }
        }
        None
    }
}

/// "User has interacted at least once" flag for the session.
///
/// Hosts mark it on the first pointer or key event; until then every
/// playback attempt is skipped.
#[derive(Clone, Default)]
pub struct InteractionGate {
    interacted: Arc<AtomicBool>,
}

impl InteractionGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_interacted(&self) {
        self.interacted.store(true, Ordering::SeqCst);
    }

    pub fn interacted(&self) -> bool {
        self.interacted.load(Ordering::SeqCst)
    }
}

/// Attempt gated playback of a cue. Never fails: a closed gate, an
/// unresolvable asset, or a sink error all end in silence.
pub async fn play_gated(sink: &dyn AudioSink, cue: &AudioCue, gate: &InteractionGate) {
    if !gate.interacted() {
        debug!("Playback skipped, no user interaction yet");
        return;
    }
    match cue.resolve(sink).await {
        Some(path) => {
            if let Err(e) = sink.play(&path).await {
                warn!(path = %path, error = %e, "Playback failed, celebrating silently");
            }
        }
        None => debug!(primary = %cue.primary, "No loadable audio candidate"),
    }
}
