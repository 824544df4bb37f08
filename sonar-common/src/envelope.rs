//! Linear gain envelopes for clip fade-in / fade-out
//!
//! An envelope is expressed in host-clock seconds: it starts at the host
//! instant the clip's timeline start occurs and lasts for the clip's
//! (rate-scaled) window. The gain at any instant is the clip volume times
//! the smaller of the fade-in and fade-out multipliers, so overlapping
//! fades on very short clips never exceed the clip volume.

use serde::{Deserialize, Serialize};

/// Piecewise-linear gain curve for one mounted clip
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GainEnvelope {
    /// Host time at which the clip window starts
    pub start: f64,
    /// Host time at which the clip window ends
    pub end: f64,
    /// Fade-in length in host seconds
    pub fade_in: Option<f64>,
    /// Fade-out length in host seconds
    pub fade_out: Option<f64>,
    /// Target volume (0.0-1.0)
    pub volume: f32,
}

impl GainEnvelope {
    /// Flat envelope with no fades; holds `volume` forever
    pub fn constant(volume: f32) -> Self {
        Self {
            start: f64::NEG_INFINITY,
            end: f64::INFINITY,
            fade_in: None,
            fade_out: None,
            volume,
        }
    }

    /// Envelope for a clip whose window starts at host time `start`
    ///
    /// `window` and fade durations are timeline seconds; they are divided
    /// by `rate` to get host seconds. Zero or negative fade durations
    /// disable that fade.
    pub fn for_clip(
        start: f64,
        window: f64,
        fade_in: Option<f64>,
        fade_out: Option<f64>,
        volume: f32,
        rate: f64,
    ) -> Self {
        let scale = |d: f64| d / rate;
        Self {
            start,
            end: start + scale(window),
            fade_in: fade_in.filter(|d| *d > 0.0).map(scale),
            fade_out: fade_out.filter(|d| *d > 0.0).map(scale),
            volume,
        }
    }

    /// Gain at host time `t`
    pub fn value_at(&self, t: f64) -> f32 {
        let mut factor: f64 = 1.0;

        if let Some(fade_in) = self.fade_in {
            let progress = ((t - self.start) / fade_in).clamp(0.0, 1.0);
            factor = factor.min(progress);
        }

        if let Some(fade_out) = self.fade_out {
            let fade_start = self.end - fade_out;
            let remaining = 1.0 - ((t - fade_start) / fade_out).clamp(0.0, 1.0);
            factor = factor.min(remaining);
        }

        self.volume * factor as f32
    }
}
