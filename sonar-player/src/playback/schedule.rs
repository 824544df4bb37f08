//! Scheduling loop and loading watchdog
//!
//! The loop runs as a tokio task per sound. Each pass ranks the unready
//! tracks against the playhead, submits every track sharing the highest
//! priority present to the load queue, waits for the queue to drain and
//! then mounts what became ready. It sleeps a fixed interval between
//! passes (or less when woken by play/seek) and exits once nothing is
//! left to load. Both tasks hold only a weak reference to the sound, so
//! dropping or destroying it ends them.

use crate::playback::priority::priority;
use crate::playback::sound::SoundShared;
use crate::playback::track::Track;
use crate::playback::types::Priority;
use futures::FutureExt;
use sonar_common::events::{PlaybackState, SoundEvent};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

/// What the loop does after a pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PassOutcome {
    /// Tracks remain unready; run again after the interval
    Again,
    /// Nothing left to do; the loop has deregistered itself
    Done,
}

/// Scheduling loop body
pub(crate) async fn run(sound: Weak<SoundShared>) {
    loop {
        let Some(shared) = sound.upgrade() else {
            return;
        };

        if shared.schedule_pass().await == PassOutcome::Done {
            debug!("Sound {}: scheduling loop finished", shared.id);
            return;
        }

        let interval = shared.options.reschedule_interval();
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shared.wake.notified() => {}
        }
    }
}

/// Reports Loading when playback has not actually begun after `grace`
pub(crate) async fn watchdog(sound: Weak<SoundShared>, grace: Duration) {
    tokio::time::sleep(grace).await;
    if let Some(shared) = sound.upgrade() {
        shared.check_loading();
    }
}

impl SoundShared {
    /// Unready tracks still worth loading
    fn pending_tracks(&self) -> Vec<&Arc<Track>> {
        self.tracks
            .iter()
            .filter(|t| !t.is_ready() && !self.is_exhausted(t))
            .collect()
    }

    /// An unready track should be audible at `position`
    pub(crate) fn has_audible_gap(&self, position: f64) -> bool {
        self.tracks.iter().any(|track| {
            !track.is_ready()
                && !self.is_exhausted(track)
                && priority(track.config(), position, &self.options) == Priority::High
        })
    }

    /// One scheduling pass
    pub(crate) async fn schedule_pass(&self) -> PassOutcome {
        let mut events = Vec::new();

        // Rank under the lock; decide Done atomically with deregistering
        let batch = {
            let mut core = self.core();
            if core.state == PlaybackState::Destroy {
                core.scheduler = None;
                return PassOutcome::Done;
            }
            if core.state == PlaybackState::Stop && !core.starting {
                core.scheduler = None;
                return PassOutcome::Done;
            }

            let position = self.position_locked(&core);
            let pending = self.pending_tracks();
            if pending.is_empty() {
                if core.starting {
                    self.begin_playback_locked(&mut core, &mut events);
                }
                core.scheduler = None;
                drop(core);
                self.emit_all(events);
                return PassOutcome::Done;
            }

            let mut top = Priority::None;
            for track in &pending {
                let p = priority(track.config(), position, &self.options);
                track.set_priority(p);
                top = top.max(p);
            }

            // Nothing audible is missing; no reason to hold the start back
            if core.starting && top < Priority::High {
                self.begin_playback_locked(&mut core, &mut events);
            }

            if top == Priority::None {
                debug!(
                    "Sound {}: pass at {:.3}s, nothing due ({} unready)",
                    self.id,
                    position,
                    pending.len()
                );
                Vec::new()
            } else {
                let batch: Vec<Arc<Track>> = pending
                    .into_iter()
                    .filter(|t| t.priority() == top)
                    .cloned()
                    .collect();
                for track in &batch {
                    track.mark_loading();
                }
                debug!(
                    "Sound {}: pass at {:.3}s, loading {} track(s) at {} priority",
                    self.id,
                    position,
                    batch.len(),
                    top
                );
                self.submit_batch(top, &batch);
                batch
            }
        };
        self.emit_all(std::mem::take(&mut events));

        if batch.is_empty() {
            return PassOutcome::Again;
        }

        self.loader.wait_idle().await;

        {
            let mut core = self.core();
            match core.state {
                PlaybackState::Destroy => {
                    core.scheduler = None;
                    return PassOutcome::Done;
                }
                PlaybackState::Stop | PlaybackState::Loading if core.starting => {
                    let missing = batch
                        .iter()
                        .filter(|t| {
                            !t.is_ready()
                                && !self.is_exhausted(t)
                                && t.priority() == Priority::High
                        })
                        .count();
                    let loaded = batch.iter().any(|t| t.is_ready());
                    if missing > 0 && !loaded {
                        debug!("Sound {}: audible tracks still loading", self.id);
                    } else {
                        self.begin_playback_locked(&mut core, &mut events);
                        if missing > 0 {
                            // Failed tracks are retried and mounted mid-clip
                            info!(
                                "Sound {}: started without {} unloaded track(s)",
                                self.id, missing
                            );
                            core.stalled = true;
                            events.push(SoundEvent::Stalled);
                        }
                    }
                }
                PlaybackState::Play => {
                    self.mount_ready_locked(&core);
                    let position = self.position_locked(&core);
                    if core.stalled && !self.has_audible_gap(position) {
                        info!("Sound {}: audible tracks ready", self.id);
                        core.stalled = false;
                        events.push(SoundEvent::Recovered);
                    }
                }
                _ => {}
            }

            if self.pending_tracks().is_empty() {
                core.scheduler = None;
                drop(core);
                self.emit_all(events);
                return PassOutcome::Done;
            }
        }
        self.emit_all(events);
        PassOutcome::Again
    }

    fn submit_batch(&self, top: Priority, batch: &[Arc<Track>]) {
        let tasks = batch.iter().map(|track| {
            let track = Arc::clone(track);
            let ctx = self.load_ctx.clone();
            let events = self.events.clone();
            let id = self.id;
            async move {
                match track.load(&ctx).await {
                    Ok(()) if track.is_ready() => {
                        debug!("Sound {}: loaded {}", id, track.src());
                        events.emit(SoundEvent::Loaded {
                            track: track.index(),
                        });
                    }
                    Ok(()) => {}
                    Err(e) => {
                        warn!(
                            "Sound {}: failed to load {} (attempt {}): {}",
                            id,
                            track.src(),
                            track.load_attempts(),
                            e
                        );
                        events.emit(SoundEvent::LoadFailed {
                            track: track.index(),
                            message: e.to_string(),
                        });
                    }
                }
            }
            .boxed()
        });
        self.loader.submit(top, tasks);
    }

    /// Watchdog check after the grace period
    ///
    /// A pending start enters Loading. While playing, a missing audible
    /// track is reported as a stall; the state stays Play.
    pub(crate) fn check_loading(&self) {
        let mut events = Vec::new();
        {
            let mut core = self.core();
            core.watchdog = None;
            match core.state {
                PlaybackState::Stop if core.starting => {
                    self.set_state_locked(&mut core, PlaybackState::Loading, &mut events);
                }
                PlaybackState::Play if !core.stalled => {
                    let position = self.position_locked(&core);
                    if self.has_audible_gap(position) {
                        info!(
                            "Sound {}: audible track not ready at {:.3}s",
                            self.id, position
                        );
                        core.stalled = true;
                        events.push(SoundEvent::Stalled);
                    }
                }
                _ => {}
            }
        }
        self.emit_all(events);
    }
}
