//! Shared fixtures for sonar-player integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use sonar_player::audio::{AudioDecoder, Fetcher, SampleBuffer, VirtualBackend};
use sonar_player::{
    DecodeCache, Error, Result, ScheduleOptions, Sound, SoundConfig, SoundEvent, TrackConfig,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Sample rate used for stub buffers; low to keep allocations small
pub const STUB_SAMPLE_RATE: u32 = 100;

/// Bytes a [`StubDecoder`] turns into `seconds` of silence
pub fn clip(seconds: f64) -> Vec<u8> {
    seconds.to_string().into_bytes()
}

/// In-memory fetcher with per-source failures and delays
#[derive(Default)]
pub struct MemoryFetcher {
    clips: Mutex<HashMap<String, Vec<u8>>>,
    /// Remaining failures per source (`u32::MAX` fails forever)
    failures: Mutex<HashMap<String, u32>>,
    delay: Mutex<Option<Duration>>,
    fetches: Mutex<HashMap<String, usize>>,
    /// Sources in the order their fetches began
    order: Mutex<Vec<String>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetcher serving a `seconds`-long clip for each source
    pub fn with_clips(clips: &[(&str, f64)]) -> Arc<Self> {
        let fetcher = Self::new();
        for (src, seconds) in clips {
            fetcher.add(src, *seconds);
        }
        Arc::new(fetcher)
    }

    pub fn add(&self, src: &str, seconds: f64) {
        self.clips
            .lock()
            .unwrap()
            .insert(src.to_string(), clip(seconds));
    }

    pub fn fail_times(&self, src: &str, times: u32) {
        self.failures
            .lock()
            .unwrap()
            .insert(src.to_string(), times);
    }

    pub fn fail_always(&self, src: &str) {
        self.fail_times(src, u32::MAX);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn fetch_count(&self, src: &str) -> usize {
        self.fetches.lock().unwrap().get(src).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }

    pub fn fetch_order(&self) -> Vec<String> {
        self.order.lock().unwrap().clone()
    }
}

#[async_trait]
impl Fetcher for MemoryFetcher {
    async fn fetch(&self, src: &str) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(src.to_string())
            .or_default() += 1;
        self.order.lock().unwrap().push(src.to_string());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let fail = {
            let mut failures = self.failures.lock().unwrap();
            match failures.get_mut(src) {
                Some(remaining) if *remaining > 0 => {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    true
                }
                _ => false,
            }
        };
        if fail {
            return Err(Error::Fetch {
                src: src.to_string(),
                reason: "simulated network failure".to_string(),
            });
        }

        self.clips
            .lock()
            .unwrap()
            .get(src)
            .cloned()
            .ok_or_else(|| Error::Fetch {
                src: src.to_string(),
                reason: "404 Not Found".to_string(),
            })
    }
}

/// Decodes the ASCII seconds written by [`clip`] into silence
pub struct StubDecoder;

impl AudioDecoder for StubDecoder {
    fn decode(&self, bytes: Vec<u8>, _hint: Option<&str>) -> Result<SampleBuffer> {
        let seconds: f64 = String::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| Error::Decode("not a stub clip".to_string()))?;
        Ok(SampleBuffer::silence(seconds, STUB_SAMPLE_RATE, 1))
    }
}

/// Fast scheduling for tests driven by a manual clock
pub fn fast_options() -> ScheduleOptions {
    ScheduleOptions {
        reschedule_interval_ms: 10,
        loading_grace_ms: 50,
        ..Default::default()
    }
}

/// A sound wired to in-memory collaborators
pub struct Fixture {
    pub sound: Sound,
    pub backend: VirtualBackend,
    pub fetcher: Arc<MemoryFetcher>,
    pub events: EventLog,
}

pub fn build_sound(
    tracks: Vec<TrackConfig>,
    fetcher: Arc<MemoryFetcher>,
    options: ScheduleOptions,
) -> Fixture {
    build_sound_with(tracks, fetcher, options, Arc::new(DecodeCache::default()), 1.0)
}

pub fn build_sound_with(
    tracks: Vec<TrackConfig>,
    fetcher: Arc<MemoryFetcher>,
    options: ScheduleOptions,
    cache: Arc<DecodeCache>,
    rate: f64,
) -> Fixture {
    let backend = VirtualBackend::new();
    let sound = Sound::builder(tracks)
        .config(SoundConfig {
            rate,
            schedule: options,
            ..Default::default()
        })
        .backend(Arc::new(backend.clone()))
        .fetcher(fetcher.clone())
        .decoder(Arc::new(StubDecoder))
        .cache(cache)
        .build()
        .expect("fixture sound must build");
    let events = EventLog::attach(&sound);
    Fixture {
        sound,
        backend,
        fetcher,
        events,
    }
}

/// Records every event a sound emits
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SoundEvent>>>,
}

impl EventLog {
    pub fn attach(sound: &Sound) -> Self {
        let log = Self::default();
        let sink = log.events.clone();
        sound.on_any(move |event| sink.lock().unwrap().push(event.clone()));
        log
    }

    pub fn all(&self) -> Vec<SoundEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: &SoundEvent) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| *e == event)
            .count()
    }

    pub fn contains(&self, event: &SoundEvent) -> bool {
        self.count(event) > 0
    }

    pub fn position(&self, event: &SoundEvent) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Polls `condition` until it holds, panicking after `timeout`
pub async fn wait_until<F>(what: &str, timeout: Duration, mut condition: F)
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Default wait used by scenario tests
pub const WAIT: Duration = Duration::from_secs(3);

pub fn approx(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}
