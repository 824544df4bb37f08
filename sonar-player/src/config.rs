//! Track descriptors, ensemble options and session files
//!
//! Descriptors accept both snake_case (TOML session files) and camelCase
//! (JSON track lists produced by web front ends) field names.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sonar_common::config::{load_toml, LoggingConfig};
use std::path::Path;
use std::time::Duration;

/// Lowest accepted playback rate
pub const MIN_RATE: f64 = 0.5;
/// Highest accepted playback rate
pub const MAX_RATE: f64 = 2.0;

/// One clip on the shared timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    /// Source locator (URL or file path)
    #[serde(default)]
    pub src: String,

    /// Timeline start in seconds (required unless looping)
    #[serde(default, alias = "startTime")]
    pub start_time: Option<f64>,

    /// Timeline end in seconds (required unless looping)
    #[serde(default, alias = "endTime")]
    pub end_time: Option<f64>,

    #[serde(default, alias = "fadeInDuration")]
    pub fade_in_duration: Option<f64>,

    #[serde(default, alias = "fadeOutDuration")]
    pub fade_out_duration: Option<f64>,

    /// Clip volume (0.0-1.0)
    #[serde(default = "default_volume")]
    pub volume: f32,

    /// Loop continuously instead of playing a window
    #[serde(default, rename = "loop")]
    pub looping: bool,
}

fn default_volume() -> f32 {
    1.0
}

impl TrackConfig {
    /// Windowed clip playing `src` over `[start, end]`
    pub fn new(src: impl Into<String>, start: f64, end: f64) -> Self {
        Self {
            src: src.into(),
            start_time: Some(start),
            end_time: Some(end),
            fade_in_duration: None,
            fade_out_duration: None,
            volume: default_volume(),
            looping: false,
        }
    }

    /// Looping clip over the whole buffer
    pub fn looped(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            start_time: None,
            end_time: None,
            fade_in_duration: None,
            fade_out_duration: None,
            volume: default_volume(),
            looping: true,
        }
    }

    pub fn with_fade_in(mut self, seconds: f64) -> Self {
        self.fade_in_duration = Some(seconds);
        self
    }

    pub fn with_fade_out(mut self, seconds: f64) -> Self {
        self.fade_out_duration = Some(seconds);
        self
    }

    pub fn with_volume(mut self, volume: f32) -> Self {
        self.volume = volume;
        self
    }

    /// Timeline start (0 for loops without one)
    pub fn start(&self) -> f64 {
        self.start_time.unwrap_or(0.0)
    }

    /// Timeline end, if bounded
    pub fn end(&self) -> Option<f64> {
        self.end_time
    }

    /// `end - start` for windowed clips
    pub fn window(&self) -> Option<f64> {
        self.end_time.map(|end| end - self.start())
    }

    /// Loop bounds `(start, end)` if both are given and ordered
    pub fn loop_bounds(&self) -> Option<(f64, f64)> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if end > start => Some((start, end)),
            _ => None,
        }
    }

    /// Rejects descriptors that cannot be scheduled
    pub fn validate(&self) -> Result<()> {
        if self.src.trim().is_empty() {
            return Err(Error::Config("track is missing src".to_string()));
        }

        for (name, value) in [
            ("start_time", self.start_time),
            ("end_time", self.end_time),
            ("fade_in_duration", self.fade_in_duration),
            ("fade_out_duration", self.fade_out_duration),
        ] {
            if let Some(v) = value {
                if !v.is_finite() || v < 0.0 {
                    return Err(Error::Config(format!(
                        "track {}: {} must be a non-negative number, got {}",
                        self.src, name, v
                    )));
                }
            }
        }

        if !self.volume.is_finite() || self.volume < 0.0 {
            return Err(Error::Config(format!(
                "track {}: volume must be non-negative, got {}",
                self.src, self.volume
            )));
        }

        if self.looping {
            return Ok(());
        }

        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) if start > end => Err(Error::Config(format!(
                "track {}: start_time {} is after end_time {}",
                self.src, start, end
            ))),
            (Some(_), Some(_)) => Ok(()),
            _ => Err(Error::Config(format!(
                "track {}: start_time and end_time are required for non-looping tracks",
                self.src
            ))),
        }
    }

    /// Parse a JSON array of descriptors
    pub fn list_from_json(json: &str) -> Result<Vec<TrackConfig>> {
        let tracks: Vec<TrackConfig> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid track list: {}", e)))?;
        for track in &tracks {
            track.validate()?;
        }
        Ok(tracks)
    }
}

/// Scheduling knobs for the lazy loader
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleOptions {
    /// Seconds ahead of the playhead a clip start is loaded eagerly
    #[serde(default = "default_preload_before", alias = "preloadBefore")]
    pub preload_before: f64,

    /// Seconds ahead of the playhead beyond which a clip is only Pending
    #[serde(default = "default_pending_after", alias = "pendingAfter")]
    pub pending_after: f64,

    /// Concurrent fetch+decode tasks
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Delay between scheduling passes
    #[serde(default = "default_reschedule_interval_ms", alias = "rescheduleIntervalMs")]
    pub reschedule_interval_ms: u64,

    /// Grace period before a pending start is reported as Loading
    #[serde(default = "default_loading_grace_ms", alias = "loadingGraceMs")]
    pub loading_grace_ms: u64,

    /// Give up on a track after this many failed loads (None: retry forever)
    #[serde(default, alias = "maxLoadAttempts")]
    pub max_load_attempts: Option<u32>,
}

fn default_preload_before() -> f64 {
    10.0
}

fn default_pending_after() -> f64 {
    30.0
}

fn default_concurrency() -> usize {
    3
}

fn default_reschedule_interval_ms() -> u64 {
    1000
}

fn default_loading_grace_ms() -> u64 {
    200
}

impl Default for ScheduleOptions {
    fn default() -> Self {
        Self {
            preload_before: default_preload_before(),
            pending_after: default_pending_after(),
            concurrency: default_concurrency(),
            reschedule_interval_ms: default_reschedule_interval_ms(),
            loading_grace_ms: default_loading_grace_ms(),
            max_load_attempts: None,
        }
    }
}

impl ScheduleOptions {
    pub fn reschedule_interval(&self) -> Duration {
        Duration::from_millis(self.reschedule_interval_ms)
    }

    pub fn loading_grace(&self) -> Duration {
        Duration::from_millis(self.loading_grace_ms)
    }

    /// `pending_after` widened so it never undercuts `preload_before`
    pub fn effective_pending_after(&self) -> f64 {
        self.pending_after.max(self.preload_before)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.preload_before.is_finite() || self.preload_before < 0.0 {
            return Err(Error::Config(format!(
                "preload_before must be non-negative, got {}",
                self.preload_before
            )));
        }
        if !self.pending_after.is_finite() || self.pending_after < 0.0 {
            return Err(Error::Config(format!(
                "pending_after must be non-negative, got {}",
                self.pending_after
            )));
        }
        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be at least 1".to_string()));
        }
        if self.reschedule_interval_ms == 0 {
            return Err(Error::Config(
                "reschedule_interval_ms must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Ensemble-wide options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoundConfig {
    /// Initial playback rate, clamped to [0.5, 2.0]
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Initial master volume, clamped to [0.0, 1.0]
    #[serde(default = "default_volume")]
    pub volume: f32,

    #[serde(default, alias = "scheduleOptions")]
    pub schedule: ScheduleOptions,
}

fn default_rate() -> f64 {
    1.0
}

impl Default for SoundConfig {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            volume: default_volume(),
            schedule: ScheduleOptions::default(),
        }
    }
}

impl SoundConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rate.is_nan() {
            return Err(Error::Config("rate must be a number".to_string()));
        }
        if self.volume.is_nan() {
            return Err(Error::Config("volume must be a number".to_string()));
        }
        self.schedule.validate()
    }
}

/// Decoded-buffer cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of decoded buffers kept
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Seconds an entry stays valid after insertion
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_cache_capacity() -> usize {
    64
}

fn default_cache_ttl_secs() -> u64 {
    600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// A complete session: ensemble options plus its tracks
///
/// ```toml
/// [sound]
/// rate = 1.0
///
/// [logging]
/// level = "debug"
///
/// [[tracks]]
/// src = "intro.mp3"
/// start_time = 0.0
/// end_time = 10.0
/// fade_in_duration = 2.0
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionFile {
    #[serde(default)]
    pub sound: SoundConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub tracks: Vec<TrackConfig>,
}

impl SessionFile {
    /// Parse and validate a session document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let session: SessionFile =
            toml::from_str(content).map_err(sonar_common::Error::from)?;
        session.validate()?;
        Ok(session)
    }

    /// Load a session file; relative track paths resolve against its directory
    pub fn load(path: &Path) -> Result<Self> {
        let mut session: SessionFile = load_toml(path)?;
        if let Some(base) = path.parent() {
            session.resolve_relative_sources(base);
        }
        session.validate()?;
        Ok(session)
    }

    pub fn validate(&self) -> Result<()> {
        self.sound.validate()?;
        for track in &self.tracks {
            track.validate()?;
        }
        Ok(())
    }

    fn resolve_relative_sources(&mut self, base: &Path) {
        for track in &mut self.tracks {
            if track.src.contains("://") || track.src.is_empty() {
                continue;
            }
            let path = Path::new(&track.src);
            if path.is_relative() {
                track.src = base.join(path).to_string_lossy().into_owned();
            }
        }
    }
}
