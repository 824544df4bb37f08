//! Sound ensemble: the orchestrator
//!
//! A [`Sound`] owns a fixed set of tracks, the mixing bus, the timeline
//! clock and the playback state machine:
//!
//! ```text
//! Stop ──play──▶ (Loading) ──▶ Play ◀──▶ Pause
//!   ▲                           │  │
//!   └──────── stop ─────────────┘  └── last track ends ──▶ End ──▶ Stop
//! any ──destroy──▶ Destroy (terminal)
//! ```
//!
//! Every public operation is infallible: invalid requests are logged and
//! ignored. All mutations happen under one lock; events are collected while
//! it is held and emitted after it is released, so listeners may call back
//! into the sound.

use crate::audio::backend::{MixBus, OutputBackend};
use crate::audio::decoder::{AudioDecoder, SymphoniaDecoder};
use crate::audio::fetch::{Fetcher, HttpFetcher};
use crate::audio::virtual_backend::VirtualBackend;
use crate::cache::DecodeCache;
use crate::config::{ScheduleOptions, SoundConfig, TrackConfig, MAX_RATE, MIN_RATE};
use crate::error::{Error, Result};
use crate::playback::clock::TimelineClock;
use crate::playback::loader::LoadQueue;
use crate::playback::schedule;
use crate::playback::track::{EndedHook, LoadContext, Track};
use crate::playback::types::TrackSnapshot;
use sonar_common::events::{EventBus, PlaybackState, SoundEvent, SubscriptionId, Topic};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Broadcast backlog for stream subscribers
const EVENT_CAPACITY: usize = 256;

/// Mutable ensemble state, guarded by one lock
pub(crate) struct SoundCore {
    pub(crate) state: PlaybackState,
    pub(crate) clock: TimelineClock,
    pub(crate) volume: f32,
    pub(crate) bus: Option<Box<dyn MixBus>>,
    /// Non-looping track with the greatest end time
    pub(crate) last_track: Option<usize>,
    /// play() requested from Stop, waiting for urgent material
    pub(crate) starting: bool,
    /// Playing but an audible track is not mounted yet
    pub(crate) stalled: bool,
    pub(crate) scheduler: Option<JoinHandle<()>>,
    pub(crate) watchdog: Option<JoinHandle<()>>,
}

pub(crate) struct SoundShared {
    pub(crate) id: Uuid,
    pub(crate) tracks: Vec<Arc<Track>>,
    pub(crate) core: Mutex<SoundCore>,
    pub(crate) events: EventBus,
    pub(crate) backend: Arc<dyn OutputBackend>,
    pub(crate) loader: LoadQueue,
    pub(crate) load_ctx: LoadContext,
    pub(crate) options: ScheduleOptions,
    pub(crate) runtime: Handle,
    pub(crate) wake: Notify,
    weak_self: Weak<SoundShared>,
    ended_hook: EndedHook,
}

/// Multi-track ensemble on one timeline
///
/// Cheap to clone; clones share the same ensemble.
#[derive(Clone)]
pub struct Sound {
    shared: Arc<SoundShared>,
}

/// Builder for [`Sound`]
///
/// Collaborators default to a [`VirtualBackend`], an [`HttpFetcher`], a
/// [`SymphoniaDecoder`] and a private [`DecodeCache`]. Pass the same cache
/// to several builders to share decoded buffers between sounds.
pub struct SoundBuilder {
    tracks: Vec<TrackConfig>,
    config: SoundConfig,
    backend: Option<Arc<dyn OutputBackend>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    decoder: Option<Arc<dyn AudioDecoder>>,
    cache: Option<Arc<DecodeCache>>,
}

impl SoundBuilder {
    pub fn config(mut self, config: SoundConfig) -> Self {
        self.config = config;
        self
    }

    pub fn schedule(mut self, options: ScheduleOptions) -> Self {
        self.config.schedule = options;
        self
    }

    pub fn backend(mut self, backend: Arc<dyn OutputBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn decoder(mut self, decoder: Arc<dyn AudioDecoder>) -> Self {
        self.decoder = Some(decoder);
        self
    }

    pub fn cache(mut self, cache: Arc<DecodeCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates every descriptor and wires the ensemble
    ///
    /// Must be called inside a tokio runtime; loads and the scheduling
    /// loop are spawned onto it.
    pub fn build(self) -> Result<Sound> {
        for track in &self.tracks {
            track.validate()?;
        }
        self.config.validate()?;

        let runtime = Handle::try_current().map_err(|_| {
            Error::InvalidState("Sound must be built inside a tokio runtime".to_string())
        })?;

        let rate = self.config.rate.clamp(MIN_RATE, MAX_RATE);
        let volume = self.config.volume.clamp(0.0, 1.0);
        let options = self.config.schedule;

        let backend = self
            .backend
            .unwrap_or_else(|| Arc::new(VirtualBackend::new()));
        let bus = backend.create_bus(volume)?;

        let load_ctx = LoadContext {
            fetcher: self.fetcher.unwrap_or_else(|| Arc::new(HttpFetcher::new())),
            decoder: self.decoder.unwrap_or_else(|| Arc::new(SymphoniaDecoder::new())),
            cache: self.cache.unwrap_or_default(),
        };

        let tracks: Vec<Arc<Track>> = self
            .tracks
            .into_iter()
            .enumerate()
            .map(|(index, config)| Arc::new(Track::new(index, config, rate)))
            .collect();
        let last_track = find_last_track(&tracks);

        let id = Uuid::new_v4();
        let loader = LoadQueue::new(options.concurrency, runtime.clone());

        let shared = Arc::new_cyclic(|weak: &Weak<SoundShared>| {
            let hook_target = weak.clone();
            let ended_hook: EndedHook = Arc::new(move |index, mount_id| {
                if let Some(shared) = hook_target.upgrade() {
                    shared.handle_track_ended(index, mount_id);
                }
            });

            SoundShared {
                id,
                tracks,
                core: Mutex::new(SoundCore {
                    state: PlaybackState::Stop,
                    clock: TimelineClock::new(rate),
                    volume,
                    bus: Some(bus),
                    last_track,
                    starting: false,
                    stalled: false,
                    scheduler: None,
                    watchdog: None,
                }),
                events: EventBus::new(EVENT_CAPACITY),
                backend,
                loader,
                load_ctx,
                options,
                runtime,
                wake: Notify::new(),
                weak_self: weak.clone(),
                ended_hook,
            }
        });

        info!(
            "Sound {} created with {} track(s), rate {}, volume {}",
            id,
            shared.tracks.len(),
            rate,
            volume
        );

        Ok(Sound { shared })
    }
}

/// Non-looping track with the greatest end time (later index wins ties)
fn find_last_track(tracks: &[Arc<Track>]) -> Option<usize> {
    tracks
        .iter()
        .filter(|t| !t.config().looping)
        .filter_map(|t| t.config().end().map(|end| (t.index(), end)))
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(index, _)| index)
}

impl Sound {
    /// Starts building a sound from track descriptors
    pub fn builder(tracks: Vec<TrackConfig>) -> SoundBuilder {
        SoundBuilder {
            tracks,
            config: SoundConfig::default(),
            backend: None,
            fetcher: None,
            decoder: None,
            cache: None,
        }
    }

    /// Sound with default collaborators
    pub fn new(tracks: Vec<TrackConfig>, config: SoundConfig) -> Result<Self> {
        Self::builder(tracks).config(config).build()
    }

    /// Session id used in log lines
    pub fn id(&self) -> Uuid {
        self.shared.id
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.core().state
    }

    pub fn is_playing(&self) -> bool {
        self.state() == PlaybackState::Play
    }

    pub fn is_paused(&self) -> bool {
        self.state() == PlaybackState::Pause
    }

    pub fn is_stopped(&self) -> bool {
        self.state() == PlaybackState::Stop
    }

    /// Playing while an audible track is still unmounted
    pub fn is_stalled(&self) -> bool {
        let core = self.shared.core();
        core.state == PlaybackState::Play && core.stalled
    }

    pub fn is_destroyed(&self) -> bool {
        self.state().is_terminal()
    }

    /// Starts or resumes playback
    ///
    /// From Stop this hands over to the scheduling loop when an audible
    /// track still has to load; playback begins once it is ready. While
    /// Play or Loading this is a no-op.
    pub fn play(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut core = shared.core();
            match core.state {
                PlaybackState::Destroy => {
                    debug!("Sound {}: play() after destroy ignored", shared.id);
                    return;
                }
                PlaybackState::Play | PlaybackState::Loading => return,
                PlaybackState::Stop if core.starting => return,
                PlaybackState::Stop => {
                    if shared.has_urgent_work(&core) {
                        info!("Sound {}: waiting for audible tracks to load", shared.id);
                        core.starting = true;
                    } else {
                        shared.begin_playback_locked(&mut core, &mut events);
                    }
                    shared.ensure_scheduler_locked(&mut core);
                }
                PlaybackState::Pause | PlaybackState::End => {
                    shared.begin_playback_locked(&mut core, &mut events);
                    shared.ensure_scheduler_locked(&mut core);
                }
            }
            shared.arm_watchdog_locked(&mut core);
        }
        shared.emit_all(events);
    }

    /// Freezes the timeline, unmounts every track and suspends the output
    pub fn pause(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut core = shared.core();
            match core.state {
                PlaybackState::Play => shared.pause_locked(&mut core, &mut events),
                PlaybackState::Loading | PlaybackState::Stop
                    if core.starting || core.state == PlaybackState::Loading =>
                {
                    // Start abandoned before it began; position unchanged
                    core.starting = false;
                    shared.backend.suspend();
                    events.push(SoundEvent::Pause);
                    shared.set_state_locked(&mut core, PlaybackState::Pause, &mut events);
                }
                _ => return,
            }
        }
        shared.emit_all(events);
    }

    /// Unmounts every track and rewinds to zero
    ///
    /// Stopping an already stopped sound emits nothing.
    pub fn stop(&self) {
        let shared = &self.shared;
        let mut events = Vec::new();
        {
            let mut core = shared.core();
            match core.state {
                PlaybackState::Destroy => return,
                PlaybackState::Stop => {
                    if core.starting {
                        debug!("Sound {}: pending start cancelled", shared.id);
                        core.starting = false;
                    }
                    core.clock.reset();
                    return;
                }
                _ => shared.stop_locked(&mut core, &mut events),
            }
        }
        shared.emit_all(events);
    }

    /// Moves the playhead; out-of-range or non-finite positions are ignored
    pub fn seek(&self, time: f64) {
        let shared = &self.shared;
        let duration = self.duration();
        if !time.is_finite() || time < 0.0 || time > duration {
            debug!(
                "Sound {}: seek to {} ignored (duration {})",
                shared.id, time, duration
            );
            return;
        }

        let mut events = Vec::new();
        {
            let mut core = shared.core();
            match core.state {
                PlaybackState::Destroy => return,
                PlaybackState::Play => {
                    shared.pause_locked(&mut core, &mut events);
                    core.clock.seek(time);
                    shared.begin_playback_locked(&mut core, &mut events);
                    shared.arm_watchdog_locked(&mut core);
                }
                _ => core.clock.seek(time),
            }
            debug!("Sound {}: seek to {:.3}", shared.id, time);
            shared.ensure_scheduler_locked(&mut core);
        }
        shared.emit_all(events);
    }

    /// Sets the playback rate, clamped to [0.5, 2.0]
    ///
    /// While playing this pauses, applies the rate and resumes, so the
    /// timeline position is preserved.
    pub fn set_rate(&self, rate: f64) {
        if rate.is_nan() {
            debug!("Sound {}: NaN rate ignored", self.shared.id);
            return;
        }
        let rate = rate.clamp(MIN_RATE, MAX_RATE);
        let shared = &self.shared;
        let mut events = vec![SoundEvent::Rate(rate)];
        {
            let mut core = shared.core();
            if core.state == PlaybackState::Destroy {
                return;
            }
            if core.state == PlaybackState::Play {
                shared.pause_locked(&mut core, &mut events);
                shared.apply_rate_locked(&mut core, rate);
                shared.begin_playback_locked(&mut core, &mut events);
                shared.arm_watchdog_locked(&mut core);
            } else {
                shared.apply_rate_locked(&mut core, rate);
            }
        }
        shared.emit_all(events);
    }

    pub fn rate(&self) -> f64 {
        self.shared.core().clock.rate
    }

    /// Sets the master volume, clamped to [0.0, 1.0]
    pub fn set_volume(&self, volume: f32) {
        if volume.is_nan() {
            debug!("Sound {}: NaN volume ignored", self.shared.id);
            return;
        }
        let volume = volume.clamp(0.0, 1.0);
        {
            let mut core = self.shared.core();
            if core.state == PlaybackState::Destroy {
                return;
            }
            core.volume = volume;
            if let Some(bus) = core.bus.as_ref() {
                bus.set_gain(volume);
            }
        }
        self.shared.events.emit(SoundEvent::Volume(volume));
    }

    pub fn volume(&self) -> f32 {
        self.shared.core().volume
    }

    /// Timeline position in seconds
    pub fn current_time(&self) -> f64 {
        let core = self.shared.core();
        let now = self.shared.backend.current_time();
        core.clock
            .current_time(now, core.state == PlaybackState::Play)
    }

    /// Greatest end time over non-looping tracks
    ///
    /// Also refreshes which track is last. Without any non-looping track
    /// the duration is 0 and a warning is logged.
    pub fn duration(&self) -> f64 {
        let last = find_last_track(&self.shared.tracks);
        self.shared.core().last_track = last;
        match last {
            Some(index) => self.shared.tracks[index].config().end().unwrap_or(0.0),
            None => {
                warn!(
                    "Sound {}: no non-looping track, duration is 0",
                    self.shared.id
                );
                0.0
            }
        }
    }

    /// Tears the ensemble down; idempotent and terminal
    ///
    /// Stops the scheduling loop, drops queued loads (running loads finish
    /// but their results are discarded), unmounts everything, closes the
    /// output, emits `destroy` and then removes all listeners.
    pub fn destroy(&self) {
        let shared = &self.shared;
        {
            let mut core = shared.core();
            if core.state == PlaybackState::Destroy {
                return;
            }
            if let Some(handle) = core.scheduler.take() {
                handle.abort();
            }
            if let Some(handle) = core.watchdog.take() {
                handle.abort();
            }
            shared.loader.clear();
            for track in &shared.tracks {
                track.stop();
                track.retire();
            }
            if let Some(bus) = core.bus.take() {
                bus.disconnect();
            }
            shared.backend.close();
            core.starting = false;
            core.stalled = false;
            core.state = PlaybackState::Destroy;
        }
        info!("Sound {} destroyed", shared.id);

        shared.events.emit(SoundEvent::Destroy);
        shared.events.emit(SoundEvent::State(PlaybackState::Destroy));
        shared.events.clear();
    }

    /// Snapshot of every track in construction order
    pub fn tracks(&self) -> Vec<TrackSnapshot> {
        self.shared.tracks.iter().map(|t| t.snapshot()).collect()
    }

    /// Index of the track whose end terminates playback
    pub fn last_track(&self) -> Option<usize> {
        self.shared.core().last_track
    }

    /// Cache used for decoded buffers
    pub fn cache(&self) -> Arc<DecodeCache> {
        Arc::clone(&self.shared.load_ctx.cache)
    }

    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    pub fn on<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.shared.events.on(topic, handler)
    }

    pub fn once<F>(&self, topic: Topic, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.shared.events.once(topic, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> SubscriptionId
    where
        F: Fn(&SoundEvent) + Send + Sync + 'static,
    {
        self.shared.events.on_any(handler)
    }

    pub fn off(&self, id: SubscriptionId) -> bool {
        self.shared.events.off(id)
    }

    /// Async stream of every event
    pub fn subscribe(&self) -> broadcast::Receiver<SoundEvent> {
        self.shared.events.subscribe_stream()
    }
}

impl std::fmt::Debug for Sound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sound")
            .field("id", &self.shared.id)
            .field("state", &self.state())
            .field("tracks", &self.shared.tracks.len())
            .finish()
    }
}

impl SoundShared {
    pub(crate) fn core(&self) -> MutexGuard<'_, SoundCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn emit_all(&self, events: Vec<SoundEvent>) {
        for event in events {
            self.events.emit(event);
        }
    }

    pub(crate) fn set_state_locked(
        &self,
        core: &mut SoundCore,
        state: PlaybackState,
        events: &mut Vec<SoundEvent>,
    ) {
        if core.state != state {
            info!("Sound {}: {} -> {}", self.id, core.state, state);
            core.state = state;
            events.push(SoundEvent::State(state));
        }
    }

    /// Whether the track has used up its load attempts
    pub(crate) fn is_exhausted(&self, track: &Track) -> bool {
        self.options
            .max_load_attempts
            .map(|max| track.load_attempts() >= max)
            .unwrap_or(false)
    }

    /// Timeline position, treating a pending start as not playing
    pub(crate) fn position_locked(&self, core: &SoundCore) -> f64 {
        core.clock.current_time(
            self.backend.current_time(),
            core.state == PlaybackState::Play,
        )
    }

    /// An unloaded track is audible at the current position
    pub(crate) fn has_urgent_work(&self, core: &SoundCore) -> bool {
        self.has_audible_gap(self.position_locked(core))
    }

    /// Resumes the output, re-anchors the clock at host now, enters Play
    /// and mounts ready tracks
    pub(crate) fn begin_playback_locked(&self, core: &mut SoundCore, events: &mut Vec<SoundEvent>) {
        self.backend.resume();
        let now = self.backend.current_time();
        core.clock.start(now);
        core.starting = false;
        core.stalled = false;
        events.push(SoundEvent::Play);
        self.set_state_locked(core, PlaybackState::Play, events);
        self.mount_ready_locked(core);
    }

    /// Mounts every ready, unmounted track (no-op unless playing)
    pub(crate) fn mount_ready_locked(&self, core: &SoundCore) -> usize {
        if core.state != PlaybackState::Play {
            return 0;
        }
        let Some(bus) = core.bus.as_deref() else {
            return 0;
        };

        let now = self.backend.current_time();
        let mut mounted = 0;
        for track in &self.tracks {
            let hook = (core.last_track == Some(track.index())).then_some(&self.ended_hook);
            match track.mount(bus, &core.clock, now, hook) {
                Ok(true) => mounted += 1,
                Ok(false) => {}
                Err(e) => warn!("Sound {}: failed to mount {}: {}", self.id, track.src(), e),
            }
        }
        if mounted > 0 {
            debug!("Sound {}: mounted {} track(s)", self.id, mounted);
        }
        mounted
    }

    pub(crate) fn pause_locked(&self, core: &mut SoundCore, events: &mut Vec<SoundEvent>) {
        let now = self.backend.current_time();
        core.clock.pause(now);
        self.backend.suspend();
        core.stalled = false;
        for track in &self.tracks {
            track.stop();
        }
        if let Some(handle) = core.watchdog.take() {
            handle.abort();
        }
        events.push(SoundEvent::Pause);
        self.set_state_locked(core, PlaybackState::Pause, events);
    }

    pub(crate) fn stop_locked(&self, core: &mut SoundCore, events: &mut Vec<SoundEvent>) {
        for track in &self.tracks {
            track.stop();
        }
        core.clock.reset();
        core.starting = false;
        core.stalled = false;
        if let Some(handle) = core.watchdog.take() {
            handle.abort();
        }
        events.push(SoundEvent::Stop);
        self.set_state_locked(core, PlaybackState::Stop, events);
    }

    fn apply_rate_locked(&self, core: &mut SoundCore, rate: f64) {
        core.clock.rate = rate;
        for track in &self.tracks {
            track.set_rate(rate);
        }
    }

    /// Starts the scheduling loop, or wakes it if already running
    pub(crate) fn ensure_scheduler_locked(&self, core: &mut SoundCore) {
        if core.scheduler.is_some() {
            self.wake.notify_one();
            return;
        }
        let pending = self
            .tracks
            .iter()
            .any(|t| !t.is_ready() && !self.is_exhausted(t));
        if !pending && !core.starting {
            return;
        }
        debug!("Sound {}: starting scheduling loop", self.id);
        core.scheduler = Some(
            self.runtime
                .spawn(schedule::run(self.weak_self.clone())),
        );
    }

    /// Restarts the loading watchdog
    pub(crate) fn arm_watchdog_locked(&self, core: &mut SoundCore) {
        if let Some(handle) = core.watchdog.take() {
            handle.abort();
        }
        core.watchdog = Some(self.runtime.spawn(schedule::watchdog(
            self.weak_self.clone(),
            self.options.loading_grace(),
        )));
    }

    /// Ended callback of the last track's source
    ///
    /// Ignored unless playing and `mount_id` is the track's live mount, so a
    /// callback from a source discarded by pause or seek never ends playback.
    fn handle_track_ended(&self, index: usize, mount_id: u64) {
        let mut events = Vec::new();
        {
            let mut core = self.core();
            if core.state != PlaybackState::Play {
                debug!("Sound {}: stale end of track {} ignored", self.id, index);
                return;
            }
            let live = self
                .tracks
                .get(index)
                .and_then(|t| t.current_mount_id());
            if live != Some(mount_id) {
                debug!("Sound {}: stale end of track {} ignored", self.id, index);
                return;
            }

            info!("Sound {}: last track finished", self.id);
            events.push(SoundEvent::End);
            self.set_state_locked(&mut core, PlaybackState::End, &mut events);
            self.stop_locked(&mut core, &mut events);
        }
        self.emit_all(events);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_build_rejects_invalid_track() {
        let result = Sound::builder(vec![TrackConfig::new("a.wav", 5.0, 1.0)]).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_build_requires_runtime() {
        let result = Sound::builder(vec![TrackConfig::new("a.wav", 0.0, 1.0)]).build();
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_last_track_is_greatest_non_looping_end() {
        let sound = Sound::builder(vec![
            TrackConfig::new("a.wav", 0.0, 10.0),
            TrackConfig::new("b.wav", 8.0, 20.0),
            TrackConfig::looped("bed.wav"),
        ])
        .build()
        .unwrap();

        assert_eq!(sound.last_track(), Some(1));
        assert_eq!(sound.duration(), 20.0);
    }

    #[tokio::test]
    async fn test_duration_without_windowed_tracks_is_zero() {
        let sound = Sound::builder(vec![TrackConfig::looped("bed.wav")])
            .build()
            .unwrap();
        assert_eq!(sound.duration(), 0.0);
        assert_eq!(sound.last_track(), None);
    }

    #[tokio::test]
    async fn test_initial_rate_and_volume_are_clamped() {
        let config = SoundConfig {
            rate: 4.0,
            volume: 1.5,
            ..Default::default()
        };
        let sound = Sound::builder(vec![TrackConfig::new("a.wav", 0.0, 1.0)])
            .config(config)
            .build()
            .unwrap();

        assert_eq!(sound.rate(), MAX_RATE);
        assert_eq!(sound.volume(), 1.0);
        assert!(sound.is_stopped());
    }
}
