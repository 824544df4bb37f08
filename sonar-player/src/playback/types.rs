//! Playback-related type definitions

use serde::{Deserialize, Serialize};
use sonar_common::Lifecycle;

/// Load urgency of a track relative to the playhead
///
/// Ordered low → high; the scheduler always drains the highest
/// priority present before looking at anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Start is near but not inside the preload window
    None = 0,
    /// Start lies beyond the pending horizon
    Pending = 1,
    /// Window already passed
    Low = 2,
    /// Start is inside the preload window
    Normal = 3,
    /// Playhead is inside the window (audible now)
    High = 4,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::None => write!(f, "none"),
            Priority::Pending => write!(f, "pending"),
            Priority::Low => write!(f, "low"),
            Priority::Normal => write!(f, "normal"),
            Priority::High => write!(f, "high"),
        }
    }
}

/// Point-in-time view of one track
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackSnapshot {
    /// Position in construction order
    pub index: usize,
    pub src: String,
    pub start_time: f64,
    pub end_time: Option<f64>,
    pub looping: bool,
    pub lifecycle: Lifecycle,
    /// Priority from the most recent scheduling pass
    pub priority: Priority,
    /// Decoded buffer present
    pub ready: bool,
    /// Source live in the mix
    pub mounted: bool,
    /// Failed load attempts so far
    pub load_attempts: u32,
}
