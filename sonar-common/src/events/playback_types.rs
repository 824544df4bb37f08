//! Playback-related type definitions
//!
//! Supporting types for the ensemble state machine and per-track lifecycle.

use serde::{Deserialize, Serialize};

/// Ensemble playback state
///
/// Transitions:
/// - `Stop → Loading → Play` (first start, while urgent tracks decode)
/// - `Play ⇄ Pause`, `Play → Stop`, `Pause → Stop`
/// - `Play → End → Stop` (last track finished)
/// - `* → Destroy` (terminal)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    /// Not playing, position reset to zero
    Stop,
    /// Start requested, waiting for material to become ready
    Loading,
    /// Clock running, ready tracks mounted
    Play,
    /// Clock frozen, nothing mounted
    Pause,
    /// Last track finished (transient, followed by Stop)
    End,
    /// Terminal state, no transitions out
    Destroy,
}

impl PlaybackState {
    /// True once the engine has been destroyed
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Destroy)
    }
}

impl std::fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlaybackState::Stop => write!(f, "stop"),
            PlaybackState::Loading => write!(f, "loading"),
            PlaybackState::Play => write!(f, "play"),
            PlaybackState::Pause => write!(f, "pause"),
            PlaybackState::End => write!(f, "end"),
            PlaybackState::Destroy => write!(f, "destroy"),
        }
    }
}

/// Track loading / mounting lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Lifecycle {
    /// No decoded buffer
    Unloaded,
    /// Fetch + decode in flight
    Loading,
    /// Decoded buffer present, not in the mix
    Loaded,
    /// Playback source live in the mixing graph
    Mounted,
    /// Was mounted, source discarded (buffer retained)
    Unmounted,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Lifecycle::Unloaded => write!(f, "unloaded"),
            Lifecycle::Loading => write!(f, "loading"),
            Lifecycle::Loaded => write!(f, "loaded"),
            Lifecycle::Mounted => write!(f, "mounted"),
            Lifecycle::Unmounted => write!(f, "unmounted"),
        }
    }
}
