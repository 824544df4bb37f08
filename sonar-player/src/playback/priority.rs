//! Track load priority
//!
//! Pure function of a track window and the playhead. The partition is
//! exhaustive and non-overlapping: for a window `[start, end]` and
//! playhead `t`, with `pending = max(pending_after, preload_before)`:
//!
//! | condition                                   | priority |
//! |---------------------------------------------|----------|
//! | `start <= t <= end`                         | High     |
//! | `t < start < t + preload_before`            | Normal   |
//! | `t + preload_before <= start <= t + pending`| None     |
//! | `start > t + pending`                       | Pending  |
//! | `t > end`                                   | Low      |
//!
//! Looping tracks are always High: they have no window to wait for.

use crate::config::{ScheduleOptions, TrackConfig};
use crate::playback::types::Priority;

/// Priority of a window `[start, end]` at playhead `t`
pub fn window_priority(start: f64, end: f64, t: f64, options: &ScheduleOptions) -> Priority {
    let pending_after = options.effective_pending_after();

    if t >= start && t <= end {
        return Priority::High;
    }

    if t < start {
        if start <= t + pending_after && t + options.preload_before > start {
            return Priority::Normal;
        }
        if start > t + pending_after {
            return Priority::Pending;
        }
        return Priority::None;
    }

    Priority::Low
}

/// Priority of a track at playhead `t`
pub fn priority(track: &TrackConfig, t: f64, options: &ScheduleOptions) -> Priority {
    if track.looping {
        return Priority::High;
    }
    let start = track.start();
    let end = track.end().unwrap_or(start);
    window_priority(start, end, t, options)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(preload_before: f64, pending_after: f64) -> ScheduleOptions {
        ScheduleOptions {
            preload_before,
            pending_after,
            ..Default::default()
        }
    }

    #[test]
    fn test_inside_window_is_high() {
        let o = opts(10.0, 30.0);
        assert_eq!(window_priority(5.0, 10.0, 5.0, &o), Priority::High);
        assert_eq!(window_priority(5.0, 10.0, 7.5, &o), Priority::High);
        assert_eq!(window_priority(5.0, 10.0, 10.0, &o), Priority::High);
    }

    #[test]
    fn test_just_outside_window_is_lower() {
        let o = opts(10.0, 30.0);
        let before = window_priority(5.0, 10.0, 5.0 - 1e-6, &o);
        let after = window_priority(5.0, 10.0, 10.0 + 1e-6, &o);
        assert!(before < Priority::High);
        assert!(after < Priority::High);
        assert_eq!(before, Priority::Normal);
        assert_eq!(after, Priority::Low);
    }

    #[test]
    fn test_future_bands() {
        let o = opts(10.0, 30.0);
        // start 5s ahead: inside preload window
        assert_eq!(window_priority(25.0, 40.0, 20.0, &o), Priority::Normal);
        // start exactly preload_before ahead: not Normal any more
        assert_eq!(window_priority(30.0, 40.0, 20.0, &o), Priority::None);
        // between preload window and pending horizon
        assert_eq!(window_priority(45.0, 60.0, 20.0, &o), Priority::None);
        // exactly at the pending horizon
        assert_eq!(window_priority(50.0, 60.0, 20.0, &o), Priority::None);
        // beyond the pending horizon
        assert_eq!(window_priority(50.5, 60.0, 20.0, &o), Priority::Pending);
    }

    #[test]
    fn test_pending_after_widened_to_preload_before() {
        // pending_after smaller than preload_before is treated as equal
        let o = opts(10.0, 2.0);
        assert_eq!(window_priority(8.0, 9.0, 0.0, &o), Priority::Normal);
        assert_eq!(window_priority(10.0, 12.0, 0.0, &o), Priority::None);
        assert_eq!(window_priority(10.5, 12.0, 0.0, &o), Priority::Pending);
    }

    #[test]
    fn test_partition_is_exhaustive() {
        let o = opts(3.0, 7.0);
        let mut t = -5.0;
        while t < 25.0 {
            let p = window_priority(5.0, 10.0, t, &o);
            let expected = if (5.0..=10.0).contains(&t) {
                Priority::High
            } else if t > 10.0 {
                Priority::Low
            } else if 5.0 - t < 3.0 {
                Priority::Normal
            } else if 5.0 - t > 7.0 {
                Priority::Pending
            } else {
                Priority::None
            };
            assert_eq!(p, expected, "t = {}", t);
            t += 0.25;
        }
    }

    #[test]
    fn test_zero_length_window() {
        let o = opts(10.0, 30.0);
        assert_eq!(window_priority(4.0, 4.0, 4.0, &o), Priority::High);
        assert_eq!(window_priority(4.0, 4.0, 4.5, &o), Priority::Low);
    }

    #[test]
    fn test_looping_track_is_always_high() {
        let o = ScheduleOptions::default();
        let track = TrackConfig::looped("bed.ogg");
        assert_eq!(priority(&track, 0.0, &o), Priority::High);
        assert_eq!(priority(&track, 1000.0, &o), Priority::High);
    }

    #[test]
    fn test_track_priority_uses_its_window() {
        let o = ScheduleOptions::default();
        let track = TrackConfig::new("a.mp3", 8.0, 20.0);
        assert_eq!(priority(&track, 0.0, &o), Priority::Normal);
        assert_eq!(priority(&track, 9.0, &o), Priority::High);
        assert_eq!(priority(&track, 21.0, &o), Priority::Low);
    }
}
