//! Timeline clock
//!
//! Maps host time to timeline position. While playing the position is
//! `(host_now - origin_time) * rate + offset_time`; otherwise it is
//! `offset_time`. This is the only source of truth for "where are we".

/// Host-time anchored timeline position
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelineClock {
    /// Host instant the timeline last (re)started
    pub origin_time: f64,
    /// Timeline position accumulated while not playing
    pub offset_time: f64,
    pub rate: f64,
}

impl Default for TimelineClock {
    fn default() -> Self {
        Self {
            origin_time: 0.0,
            offset_time: 0.0,
            rate: 1.0,
        }
    }
}

impl TimelineClock {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            ..Default::default()
        }
    }

    /// Timeline position at host time `now`
    pub fn current_time(&self, now: f64, playing: bool) -> f64 {
        if playing {
            (now - self.origin_time) * self.rate + self.offset_time
        } else {
            self.offset_time
        }
    }

    /// Host time at which timeline position `t` is reached (while playing)
    pub fn host_time_for(&self, t: f64) -> f64 {
        self.origin_time + (t - self.offset_time) / self.rate
    }

    /// Re-anchors the timeline to start advancing at host time `now`
    pub fn start(&mut self, now: f64) {
        self.origin_time = now;
    }

    /// Folds the span played since `origin_time` into `offset_time`
    pub fn pause(&mut self, now: f64) {
        self.offset_time += (now - self.origin_time) * self.rate;
        self.origin_time = now;
    }

    /// Moves the timeline position (only meaningful while not playing)
    pub fn seek(&mut self, t: f64) {
        self.offset_time = t;
    }

    pub fn reset(&mut self) {
        self.offset_time = 0.0;
    }
}
