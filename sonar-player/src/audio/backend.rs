//! Output backend interface
//!
//! The engine never touches a device directly. It talks to an
//! [`OutputBackend`] that owns the host clock and the mixing graph:
//! one [`MixBus`] per sound and single-use [`PlaybackSource`]s started on
//! it. A source cannot be restarted; pausing discards it and resuming
//! starts a new one at the derived buffer offset.
//!
//! Ended callbacks run outside any call on the source they belong to, so
//! a callback may stop or disconnect its own source.

use crate::audio::types::SampleBuffer;
use crate::error::Result;
use sonar_common::GainEnvelope;
use std::sync::Arc;

/// Invoked once when a one-shot source reaches the end of its window
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Loop bounds in buffer seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopRegion {
    pub start: f64,
    pub end: f64,
}

/// Everything needed to start one source
#[derive(Debug, Clone)]
pub struct SourceRequest {
    /// Diagnostic label (the track locator)
    pub label: String,

    pub buffer: Arc<SampleBuffer>,

    /// Host time at which output begins; past values mean "now"
    pub when: f64,

    /// Buffer position (seconds) output begins at
    pub offset: f64,

    /// Buffer seconds to play from `offset`; `None` plays to the end
    pub duration: Option<f64>,

    /// Playback rate (1.0 = normal)
    pub rate: f64,

    /// Loop instead of ending; `duration` is ignored
    pub looping: Option<LoopRegion>,

    /// Gain curve in host time; `None` means unity gain
    pub envelope: Option<GainEnvelope>,
}

/// A live, single-use playback source
pub trait PlaybackSource: Send + Sync {
    /// Backend-assigned identifier
    fn id(&self) -> u64;

    /// Changes rate without restarting
    fn set_rate(&self, rate: f64);

    /// Halts output; never fires the ended callback
    fn stop(&self);

    /// Removes the source from the graph
    fn disconnect(&self);

    /// Replaces (or with `None` clears) the ended callback
    fn set_on_ended(&self, callback: Option<EndedCallback>);
}

/// One gain stage feeding the device
pub trait MixBus: Send + Sync {
    fn set_gain(&self, gain: f32);

    fn gain(&self) -> f32;

    fn start_source(&self, request: SourceRequest) -> Result<Box<dyn PlaybackSource>>;

    /// Detaches the bus; sources on it fall silent
    fn disconnect(&self);
}

/// Host clock plus mixing graph
pub trait OutputBackend: Send + Sync {
    /// Monotonic host time in seconds
    fn current_time(&self) -> f64;

    fn create_bus(&self, gain: f32) -> Result<Box<dyn MixBus>>;

    /// Freezes the clock and all output
    fn suspend(&self);

    fn resume(&self);

    /// Releases the device; later calls are no-ops or errors
    fn close(&self);

    fn is_closed(&self) -> bool;
}
