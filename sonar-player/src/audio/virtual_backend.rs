//! Software-clock output backend
//!
//! Keeps the mixing graph in memory and moves the host clock only when
//! told to (`advance`), or from a realtime driver task. Nothing is
//! rendered; the graph can be inspected instead, which is what tests and
//! the CLI dry run rely on.

use crate::audio::backend::{
    EndedCallback, LoopRegion, MixBus, OutputBackend, PlaybackSource, SourceRequest,
};
use crate::error::{Error, Result};
use sonar_common::GainEnvelope;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Tolerance when comparing positions against window ends
const EPSILON: f64 = 1e-9;

struct SourceState {
    label: String,
    bus: u64,
    buffer_duration: f64,
    when: f64,
    offset: f64,
    duration: Option<f64>,
    rate: f64,
    looping: Option<LoopRegion>,
    envelope: Option<GainEnvelope>,
    /// Host time from which `anchor_pos` advances at `rate`
    anchor_time: f64,
    anchor_pos: f64,
    stopped: bool,
    ended: bool,
    on_ended: Option<EndedCallback>,
}

impl SourceState {
    /// Unwrapped buffer position at host time `t`
    fn raw_position(&self, t: f64) -> f64 {
        if t <= self.anchor_time {
            self.anchor_pos
        } else {
            self.anchor_pos + (t - self.anchor_time) * self.rate
        }
    }

    fn position(&self, t: f64) -> f64 {
        let raw = self.raw_position(t);
        match self.looping {
            Some(region) if raw >= region.end => {
                let span = region.end - region.start;
                if span <= EPSILON {
                    region.start
                } else {
                    region.start + (raw - region.start).rem_euclid(span)
                }
            }
            _ => raw,
        }
    }

    fn end_position(&self) -> f64 {
        match self.duration {
            Some(d) => (self.offset + d).min(self.buffer_duration),
            None => self.buffer_duration,
        }
    }

    fn has_finished(&self, t: f64) -> bool {
        self.looping.is_none()
            && t >= self.anchor_time
            && self.raw_position(t) >= self.end_position() - EPSILON
    }
}

struct BusState {
    gain: f32,
    connected: bool,
}

#[derive(Default)]
struct Graph {
    now: f64,
    suspended: bool,
    closed: bool,
    next_id: u64,
    buses: BTreeMap<u64, BusState>,
    sources: BTreeMap<u64, SourceState>,
}

impl Graph {
    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn is_audible(&self, source: &SourceState) -> bool {
        !source.stopped
            && !source.ended
            && self
                .buses
                .get(&source.bus)
                .map(|bus| bus.connected)
                .unwrap_or(false)
    }
}

type SharedGraph = Arc<Mutex<Graph>>;

fn lock(graph: &SharedGraph) -> MutexGuard<'_, Graph> {
    graph.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Snapshot of one source for inspection
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub id: u64,
    pub label: String,
    pub bus: u64,
    pub when: f64,
    pub offset: f64,
    pub duration: Option<f64>,
    pub rate: f64,
    pub looping: Option<LoopRegion>,
    pub envelope: Option<GainEnvelope>,
    /// Buffer position at the current host time
    pub position: f64,
    /// True once the host clock has reached `when`
    pub started: bool,
}

/// In-memory backend with a manually driven clock
#[derive(Clone, Default)]
pub struct VirtualBackend {
    graph: SharedGraph,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Moves the host clock forward and fires ended callbacks
    ///
    /// No-op while suspended or closed. Callbacks run after the graph lock
    /// is released, in source creation order.
    pub fn advance(&self, seconds: f64) {
        let callbacks = {
            let mut graph = lock(&self.graph);
            if graph.suspended || graph.closed || seconds <= 0.0 {
                return;
            }
            graph.now += seconds;
            let now = graph.now;

            let mut callbacks = Vec::new();
            let finished: Vec<u64> = graph
                .sources
                .iter()
                .filter(|(_, s)| !s.stopped && !s.ended && s.has_finished(now))
                .map(|(id, _)| *id)
                .collect();

            for id in finished {
                if let Some(source) = graph.sources.get_mut(&id) {
                    source.ended = true;
                    trace!("Source {} ({}) ended at {:.3}", id, source.label, now);
                    if let Some(callback) = source.on_ended.take() {
                        callbacks.push(callback);
                    }
                }
            }
            callbacks
        };

        for callback in callbacks {
            callback();
        }
    }

    /// Advances in `step` increments until `seconds` have elapsed
    ///
    /// Gives ended callbacks a chance to run at intermediate times.
    pub fn advance_by_steps(&self, seconds: f64, step: f64) {
        let mut remaining = seconds;
        while remaining > EPSILON {
            let delta = remaining.min(step);
            self.advance(delta);
            remaining -= delta;
        }
    }

    /// Drives the clock from wall time every `tick` until closed
    pub fn spawn_realtime(&self, tick: Duration) -> JoinHandle<()> {
        let backend = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            let mut last = tokio::time::Instant::now();
            loop {
                interval.tick().await;
                if backend.is_closed() {
                    break;
                }
                let now = tokio::time::Instant::now();
                backend.advance(now.duration_since(last).as_secs_f64());
                last = now;
            }
            debug!("Realtime driver stopped");
        })
    }

    fn info(id: u64, source: &SourceState, now: f64) -> SourceInfo {
        SourceInfo {
            id,
            label: source.label.clone(),
            bus: source.bus,
            when: source.when,
            offset: source.offset,
            duration: source.duration,
            rate: source.rate,
            looping: source.looping,
            envelope: source.envelope,
            position: source.position(now),
            started: now >= source.anchor_time,
        }
    }

    /// Sources that are neither stopped, ended, disconnected nor on a
    /// detached bus
    pub fn active_sources(&self) -> Vec<SourceInfo> {
        let graph = lock(&self.graph);
        graph
            .sources
            .iter()
            .filter(|(_, s)| graph.is_audible(s))
            .map(|(id, s)| Self::info(*id, s, graph.now))
            .collect()
    }

    /// Active sources whose label matches
    pub fn active_sources_labelled(&self, label: &str) -> Vec<SourceInfo> {
        self.active_sources()
            .into_iter()
            .filter(|s| s.label == label)
            .collect()
    }

    pub fn source_info(&self, id: u64) -> Option<SourceInfo> {
        let graph = lock(&self.graph);
        graph
            .sources
            .get(&id)
            .map(|s| Self::info(id, s, graph.now))
    }

    /// Envelope gain of a source at host time `t`
    pub fn gain_at(&self, id: u64, t: f64) -> Option<f32> {
        let graph = lock(&self.graph);
        graph
            .sources
            .get(&id)
            .map(|s| s.envelope.map(|e| e.value_at(t)).unwrap_or(1.0))
    }

    /// Gains of all connected buses, in creation order
    pub fn bus_gains(&self) -> Vec<f32> {
        lock(&self.graph)
            .buses
            .values()
            .filter(|b| b.connected)
            .map(|b| b.gain)
            .collect()
    }

    /// True while the owning sound is paused
    pub fn is_suspended(&self) -> bool {
        lock(&self.graph).suspended
    }
}

impl std::fmt::Debug for VirtualBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let graph = lock(&self.graph);
        f.debug_struct("VirtualBackend")
            .field("now", &graph.now)
            .field("buses", &graph.buses.len())
            .field("sources", &graph.sources.len())
            .finish()
    }
}

impl OutputBackend for VirtualBackend {
    fn current_time(&self) -> f64 {
        lock(&self.graph).now
    }

    fn create_bus(&self, gain: f32) -> Result<Box<dyn MixBus>> {
        let mut graph = lock(&self.graph);
        if graph.closed {
            return Err(Error::Backend("output closed".to_string()));
        }
        let id = graph.allocate_id();
        graph.buses.insert(
            id,
            BusState {
                gain,
                connected: true,
            },
        );
        Ok(Box::new(VirtualBus {
            id,
            graph: Arc::clone(&self.graph),
        }))
    }

    fn suspend(&self) {
        lock(&self.graph).suspended = true;
    }

    fn resume(&self) {
        lock(&self.graph).suspended = false;
    }

    fn close(&self) {
        let mut graph = lock(&self.graph);
        graph.closed = true;
        for source in graph.sources.values_mut() {
            source.stopped = true;
            source.on_ended = None;
        }
    }

    fn is_closed(&self) -> bool {
        lock(&self.graph).closed
    }
}

struct VirtualBus {
    id: u64,
    graph: SharedGraph,
}

impl MixBus for VirtualBus {
    fn set_gain(&self, gain: f32) {
        if let Some(bus) = lock(&self.graph).buses.get_mut(&self.id) {
            bus.gain = gain;
        }
    }

    fn gain(&self) -> f32 {
        lock(&self.graph)
            .buses
            .get(&self.id)
            .map(|b| b.gain)
            .unwrap_or(0.0)
    }

    fn start_source(&self, request: SourceRequest) -> Result<Box<dyn PlaybackSource>> {
        let mut graph = lock(&self.graph);
        if graph.closed {
            return Err(Error::Backend("output closed".to_string()));
        }
        let bus_connected = graph
            .buses
            .get(&self.id)
            .map(|b| b.connected)
            .unwrap_or(false);
        if !bus_connected {
            return Err(Error::Backend("bus disconnected".to_string()));
        }

        let id = graph.allocate_id();
        let now = graph.now;
        let anchor_time = request.when.max(now);
        trace!(
            "Starting source {} ({}) at {:.3} offset {:.3} rate {}",
            id,
            request.label,
            anchor_time,
            request.offset,
            request.rate
        );

        graph.sources.insert(
            id,
            SourceState {
                label: request.label,
                bus: self.id,
                buffer_duration: request.buffer.duration(),
                when: request.when,
                offset: request.offset,
                duration: request.duration,
                rate: request.rate,
                looping: request.looping,
                envelope: request.envelope,
                anchor_time,
                anchor_pos: request.offset,
                stopped: false,
                ended: false,
                on_ended: None,
            },
        );

        Ok(Box::new(VirtualSource {
            id,
            graph: Arc::clone(&self.graph),
        }))
    }

    fn disconnect(&self) {
        if let Some(bus) = lock(&self.graph).buses.get_mut(&self.id) {
            bus.connected = false;
        }
    }
}

struct VirtualSource {
    id: u64,
    graph: SharedGraph,
}

impl PlaybackSource for VirtualSource {
    fn id(&self) -> u64 {
        self.id
    }

    fn set_rate(&self, rate: f64) {
        let mut graph = lock(&self.graph);
        let now = graph.now;
        if let Some(source) = graph.sources.get_mut(&self.id) {
            if now > source.anchor_time {
                source.anchor_pos = source.raw_position(now);
                source.anchor_time = now;
            }
            source.rate = rate;
        }
    }

    fn stop(&self) {
        if let Some(source) = lock(&self.graph).sources.get_mut(&self.id) {
            source.stopped = true;
            source.on_ended = None;
        }
    }

    fn disconnect(&self) {
        lock(&self.graph).sources.remove(&self.id);
    }

    fn set_on_ended(&self, callback: Option<EndedCallback>) {
        if let Some(source) = lock(&self.graph).sources.get_mut(&self.id) {
            source.on_ended = callback;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::types::SampleBuffer;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(seconds: f64, when: f64, offset: f64, duration: Option<f64>) -> SourceRequest {
        SourceRequest {
            label: "clip".to_string(),
            buffer: Arc::new(SampleBuffer::silence(seconds, 100, 1)),
            when,
            offset,
            duration,
            rate: 1.0,
            looping: None,
            envelope: None,
        }
    }

    fn counter_callback(counter: &Arc<AtomicUsize>) -> EndedCallback {
        let counter = Arc::clone(counter);
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_clock_advances_only_when_driven() {
        let backend = VirtualBackend::new();
        assert_eq!(backend.current_time(), 0.0);
        backend.advance(1.5);
        assert_eq!(backend.current_time(), 1.5);
    }

    #[test]
    fn test_suspend_freezes_clock() {
        let backend = VirtualBackend::new();
        backend.suspend();
        backend.advance(1.0);
        assert_eq!(backend.current_time(), 0.0);
        backend.resume();
        backend.advance(1.0);
        assert_eq!(backend.current_time(), 1.0);
    }

    #[test]
    fn test_source_fires_ended_once_at_window_end() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(1.0).unwrap();
        let source = bus.start_source(request(10.0, 2.0, 0.0, Some(5.0))).unwrap();

        let ended = Arc::new(AtomicUsize::new(0));
        source.set_on_ended(Some(counter_callback(&ended)));

        backend.advance(6.9);
        assert_eq!(ended.load(Ordering::SeqCst), 0);
        backend.advance(0.1);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        backend.advance(10.0);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
        assert!(backend.active_sources().is_empty());
    }

    #[test]
    fn test_stop_never_fires_ended() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(1.0).unwrap();
        let source = bus.start_source(request(1.0, 0.0, 0.0, None)).unwrap();

        let ended = Arc::new(AtomicUsize::new(0));
        source.set_on_ended(Some(counter_callback(&ended)));
        source.stop();
        backend.advance(5.0);

        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rate_change_reanchors_position() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(1.0).unwrap();
        let source = bus.start_source(request(20.0, 0.0, 0.0, None)).unwrap();

        backend.advance(2.0);
        source.set_rate(2.0);
        backend.advance(1.0);

        let info = backend.source_info(source.id()).unwrap();
        assert!((info.position - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_loop_wraps_and_never_ends() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(1.0).unwrap();
        let mut req = request(4.0, 0.0, 0.0, None);
        req.looping = Some(LoopRegion {
            start: 1.0,
            end: 3.0,
        });
        let source = bus.start_source(req).unwrap();

        let ended = Arc::new(AtomicUsize::new(0));
        source.set_on_ended(Some(counter_callback(&ended)));
        backend.advance(3.5);

        let info = backend.source_info(source.id()).unwrap();
        assert!((info.position - 1.5).abs() < 1e-9);
        assert_eq!(ended.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_disconnected_bus_silences_sources() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(0.5).unwrap();
        bus.start_source(request(4.0, 0.0, 0.0, None)).unwrap();

        assert_eq!(backend.bus_gains(), vec![0.5]);
        assert_eq!(backend.active_sources().len(), 1);

        bus.disconnect();
        assert!(backend.active_sources().is_empty());
        assert!(bus.start_source(request(4.0, 0.0, 0.0, None)).is_err());
    }

    #[test]
    fn test_closed_backend_rejects_work() {
        let backend = VirtualBackend::new();
        backend.close();
        assert!(backend.is_closed());
        assert!(backend.create_bus(1.0).is_err());
    }

    #[test]
    fn test_callback_may_touch_its_own_source() {
        let backend = VirtualBackend::new();
        let bus = backend.create_bus(1.0).unwrap();
        let source: Arc<dyn PlaybackSource> =
            Arc::from(bus.start_source(request(1.0, 0.0, 0.0, None)).unwrap());

        let inner = Arc::clone(&source);
        source.set_on_ended(Some(Box::new(move || {
            inner.stop();
            inner.disconnect();
        })));

        backend.advance(2.0);
        assert!(backend.source_info(source.id()).is_none());
    }
}
