//! # Sonar Player
//!
//! Multi-track scheduling and mixing engine. A [`Sound`] places audio
//! clips on a shared timeline and plays, pauses, seeks and rate-shifts
//! them together, decoding only the clips near the playhead.
//!
//! ```no_run
//! use sonar_player::{Sound, TrackConfig};
//!
//! # async fn demo() -> sonar_player::Result<()> {
//! let sound = Sound::builder(vec![
//!     TrackConfig::new("https://example.com/a.mp3", 0.0, 10.0).with_fade_in(2.0),
//!     TrackConfig::new("https://example.com/b.mp3", 8.0, 20.0),
//! ])
//! .build()?;
//!
//! sound.play();
//! # Ok(())
//! # }
//! ```

pub mod audio;
pub mod cache;
pub mod config;
pub mod error;
pub mod playback;

pub use cache::{CacheStats, DecodeCache};
pub use config::{CacheConfig, ScheduleOptions, SessionFile, SoundConfig, TrackConfig};
pub use error::{Error, Result};
pub use playback::{Priority, Sound, SoundBuilder, TrackSnapshot};
pub use sonar_common::events::{PlaybackState, SoundEvent, SubscriptionId, Topic};
pub use sonar_common::Lifecycle;
