//! Playback engine
//!
//! Bottom-up: [`clock`] (timeline math), [`priority`] (pure ranking),
//! [`loader`] (bounded priority queue), [`track`] (per-clip load and
//! mount), [`sound`] (state machine) and `schedule` (the loop tying
//! them together).

pub mod clock;
pub mod loader;
pub mod priority;
mod schedule;
pub mod sound;
pub mod track;
pub mod types;

pub use clock::TimelineClock;
pub use loader::{LoadQueue, LoadTask};
pub use priority::{priority, window_priority};
pub use sound::{Sound, SoundBuilder};
pub use track::{LoadContext, Track};
pub use types::{Priority, TrackSnapshot};
