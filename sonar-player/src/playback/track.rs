//! One clip on the timeline
//!
//! A track owns its immutable [`TrackConfig`] and the runtime state the
//! scheduler drives: decoded buffer, last computed priority, lifecycle and,
//! while mounted, the live source handle. Sources are single-use; every
//! mount creates a fresh one positioned from the timeline clock.

use crate::audio::backend::{EndedCallback, LoopRegion, MixBus, PlaybackSource, SourceRequest};
use crate::audio::decoder::{extension_hint, AudioDecoder};
use crate::audio::fetch::Fetcher;
use crate::audio::types::SampleBuffer;
use crate::cache::DecodeCache;
use crate::config::TrackConfig;
use crate::error::{Error, Result};
use crate::playback::clock::TimelineClock;
use crate::playback::types::{Priority, TrackSnapshot};
use sonar_common::{GainEnvelope, Lifecycle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

/// Tolerance for "nothing left to play"
const EPSILON: f64 = 1e-9;

/// Collaborators needed to load a track
#[derive(Clone)]
pub struct LoadContext {
    pub fetcher: Arc<dyn Fetcher>,
    pub decoder: Arc<dyn AudioDecoder>,
    pub cache: Arc<DecodeCache>,
}

/// Called with `(track index, mount id)` when the last track's source ends
pub type EndedHook = Arc<dyn Fn(usize, u64) + Send + Sync>;

struct Mount {
    id: u64,
    source: Box<dyn PlaybackSource>,
}

struct TrackRuntime {
    buffer: Option<Arc<SampleBuffer>>,
    priority: Priority,
    lifecycle: Lifecycle,
    rate: f64,
    mount: Option<Mount>,
    attempts: u32,
    next_mount_id: u64,
}

/// A scheduled clip
pub struct Track {
    index: usize,
    config: TrackConfig,
    runtime: Mutex<TrackRuntime>,
    retired: AtomicBool,
}

impl Track {
    pub fn new(index: usize, config: TrackConfig, rate: f64) -> Self {
        Self {
            index,
            config,
            runtime: Mutex::new(TrackRuntime {
                buffer: None,
                priority: Priority::None,
                lifecycle: Lifecycle::Unloaded,
                rate,
                mount: None,
                attempts: 0,
                next_mount_id: 0,
            }),
            retired: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackRuntime> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &TrackConfig {
        &self.config
    }

    pub fn src(&self) -> &str {
        &self.config.src
    }

    /// Decoded buffer present
    pub fn is_ready(&self) -> bool {
        self.lock().buffer.is_some()
    }

    pub fn is_mounted(&self) -> bool {
        self.lock().mount.is_some()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().lifecycle
    }

    pub fn priority(&self) -> Priority {
        self.lock().priority
    }

    pub fn set_priority(&self, priority: Priority) {
        self.lock().priority = priority;
    }

    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    /// Failed load attempts so far
    pub fn load_attempts(&self) -> u32 {
        self.lock().attempts
    }

    /// Id of the live mount, used to discard stale ended callbacks
    pub fn current_mount_id(&self) -> Option<u64> {
        self.lock().mount.as_ref().map(|m| m.id)
    }

    /// Marks the owning sound as gone; in-flight loads discard their result
    pub fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    /// Flags the track as part of a submitted load batch
    pub fn mark_loading(&self) {
        let mut rt = self.lock();
        if rt.buffer.is_none() {
            rt.lifecycle = Lifecycle::Loading;
        }
    }

    /// Fetches and decodes the source unless already loaded
    ///
    /// A cache hit never fetches. On failure the track returns to
    /// `Unloaded` and its attempt counter grows.
    pub async fn load(&self, ctx: &LoadContext) -> Result<()> {
        {
            let mut rt = self.lock();
            if rt.buffer.is_some() {
                return Ok(());
            }
            rt.lifecycle = Lifecycle::Loading;
        }

        let result = self.fetch_and_decode(ctx).await;

        let mut rt = self.lock();
        match result {
            Ok(_) if self.is_retired() => {
                debug!("Discarding load of {} for retired track", self.config.src);
                rt.lifecycle = Lifecycle::Unloaded;
                Ok(())
            }
            Ok(buffer) => {
                rt.buffer = Some(buffer);
                rt.lifecycle = Lifecycle::Loaded;
                Ok(())
            }
            Err(e) => {
                rt.lifecycle = Lifecycle::Unloaded;
                rt.attempts += 1;
                Err(e)
            }
        }
    }

    async fn fetch_and_decode(&self, ctx: &LoadContext) -> Result<Arc<SampleBuffer>> {
        let src = self.config.src.clone();

        if let Some(buffer) = ctx.cache.get(&src) {
            debug!("Cache hit for {}", src);
            return Ok(buffer);
        }

        let bytes = ctx.fetcher.fetch(&src).await?;

        let decoder = Arc::clone(&ctx.decoder);
        let hint = extension_hint(&src).map(str::to_owned);
        let buffer = tokio::task::spawn_blocking(move || decoder.decode(bytes, hint.as_deref()))
            .await
            .map_err(|e| Error::Decode(format!("decode task failed: {}", e)))??;

        let buffer = Arc::new(buffer);
        ctx.cache.insert(src, Arc::clone(&buffer));
        Ok(buffer)
    }

    /// Starts a source for the current timeline position
    ///
    /// No-op (returns false) unless loaded and not already mounted. A
    /// windowed track whose window has fully passed is not mounted either,
    /// except when it is the last track: then it mounts with nothing left
    /// to play so its end is reported.
    pub fn mount(
        &self,
        bus: &dyn MixBus,
        clock: &TimelineClock,
        now: f64,
        ended: Option<&EndedHook>,
    ) -> Result<bool> {
        let mut rt = self.lock();
        if self.is_retired() || rt.mount.is_some() {
            return Ok(false);
        }
        let Some(buffer) = rt.buffer.clone() else {
            return Ok(false);
        };

        let rate = rt.rate;
        let position = clock.current_time(now, true);

        let request = if self.config.looping {
            self.loop_request(buffer, position, now, rate)
        } else {
            match self.window_request(buffer, clock, position, now, rate, ended.is_some()) {
                Some(request) => request,
                None => {
                    trace!("Window of {} already passed at {:.3}", self.config.src, position);
                    return Ok(false);
                }
            }
        };

        let source = bus.start_source(request)?;

        rt.next_mount_id += 1;
        let mount_id = rt.next_mount_id;

        if let (Some(hook), false) = (ended, self.config.looping) {
            let hook = Arc::clone(hook);
            let index = self.index;
            let callback: EndedCallback = Box::new(move || hook(index, mount_id));
            source.set_on_ended(Some(callback));
        }

        debug!(
            "Mounted {} (source {}) at position {:.3}",
            self.config.src,
            source.id(),
            position
        );

        rt.mount = Some(Mount {
            id: mount_id,
            source,
        });
        rt.lifecycle = Lifecycle::Mounted;
        Ok(true)
    }

    fn loop_request(
        &self,
        buffer: Arc<SampleBuffer>,
        position: f64,
        now: f64,
        rate: f64,
    ) -> SourceRequest {
        let buffer_duration = buffer.duration();
        let region = self
            .config
            .loop_bounds()
            .map(|(start, end)| LoopRegion {
                start: start.min(buffer_duration),
                end: end.min(buffer_duration),
            })
            .filter(|r| r.end - r.start > EPSILON)
            .unwrap_or(LoopRegion {
                start: 0.0,
                end: buffer_duration,
            });

        let span = region.end - region.start;
        let offset = if span > EPSILON {
            region.start + position.max(0.0).rem_euclid(span)
        } else {
            region.start
        };

        SourceRequest {
            label: self.config.src.clone(),
            buffer,
            when: now,
            offset,
            duration: None,
            rate,
            looping: Some(region),
            envelope: Some(GainEnvelope::constant(self.config.volume)),
        }
    }

    fn window_request(
        &self,
        buffer: Arc<SampleBuffer>,
        clock: &TimelineClock,
        position: f64,
        now: f64,
        rate: f64,
        is_last: bool,
    ) -> Option<SourceRequest> {
        let start = self.config.start();
        let window = self.config.window().unwrap_or(0.0).max(0.0);

        // Host instant the clip's timeline start occurs (may be in the past)
        let host_start = clock.host_time_for(start);
        let envelope = GainEnvelope::for_clip(
            host_start,
            window,
            self.config.fade_in_duration,
            self.config.fade_out_duration,
            self.config.volume,
            rate,
        );

        let (when, offset, duration) = if start > position {
            (host_start, 0.0, window)
        } else {
            let elapsed = position - start;
            let remaining = window - elapsed;
            if remaining <= EPSILON && !is_last {
                return None;
            }
            (now, elapsed, remaining.max(0.0))
        };

        Some(SourceRequest {
            label: self.config.src.clone(),
            buffer,
            when,
            offset,
            duration: Some(duration),
            rate,
            looping: None,
            envelope: Some(envelope),
        })
    }

    /// Discards the live source; idempotent
    pub fn unmount(&self) {
        let mut rt = self.lock();
        if let Some(mount) = rt.mount.take() {
            mount.source.set_on_ended(None);
            mount.source.disconnect();
            rt.lifecycle = Lifecycle::Unmounted;
            trace!("Unmounted {}", self.config.src);
        }
    }

    /// Halts the live source, then unmounts
    pub fn stop(&self) {
        {
            let rt = self.lock();
            if let Some(mount) = rt.mount.as_ref() {
                mount.source.set_on_ended(None);
                mount.source.stop();
            }
        }
        self.unmount();
    }

    /// Stores the rate and applies it to a live source
    pub fn set_rate(&self, rate: f64) {
        let mut rt = self.lock();
        rt.rate = rate;
        if let Some(mount) = rt.mount.as_ref() {
            mount.source.set_rate(rate);
        }
    }

    pub fn snapshot(&self) -> TrackSnapshot {
        let rt = self.lock();
        TrackSnapshot {
            index: self.index,
            src: self.config.src.clone(),
            start_time: self.config.start(),
            end_time: self.config.end(),
            looping: self.config.looping,
            lifecycle: rt.lifecycle,
            priority: rt.priority,
            ready: rt.buffer.is_some(),
            mounted: rt.mount.is_some(),
            load_attempts: rt.attempts,
        }
    }
}

impl std::fmt::Debug for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Track")
            .field("index", &self.index)
            .field("src", &self.config.src)
            .field("lifecycle", &self.lifecycle())
            .finish()
    }
}
