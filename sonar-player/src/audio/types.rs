//! Core audio data types

/// Decoded PCM held in memory for the lifetime of a cache entry
///
/// **Format:**
/// - Samples are f32 (-1.0 to 1.0)
/// - Interleaved by channel: [L, R, L, R, ...] for stereo
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    /// Interleaved PCM samples
    pub samples: Vec<f32>,

    /// Source sample rate in Hz
    pub sample_rate: u32,

    /// Channel count (1=mono, 2=stereo, ...)
    pub channels: u16,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples,
            sample_rate,
            channels,
        }
    }

    /// Buffer of `seconds` of silence
    pub fn silence(seconds: f64, sample_rate: u32, channels: u16) -> Self {
        let frames = (seconds * sample_rate as f64).round().max(0.0) as usize;
        Self::new(vec![0.0; frames * channels as usize], sample_rate, channels)
    }

    /// Number of frames (samples per channel)
    pub fn frame_count(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / self.channels as usize
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frame_count() as f64 / self.sample_rate as f64
    }

    /// Approximate heap size in bytes
    pub fn size_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_from_frames() {
        let buffer = SampleBuffer::new(vec![0.0; 44100 * 2], 44100, 2);
        assert_eq!(buffer.frame_count(), 44100);
        assert!((buffer.duration() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_silence_length() {
        let buffer = SampleBuffer::silence(2.5, 8000, 1);
        assert_eq!(buffer.frame_count(), 20000);
        assert!((buffer.duration() - 2.5).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_buffers() {
        assert_eq!(SampleBuffer::new(vec![0.0; 4], 0, 2).duration(), 0.0);
        assert_eq!(SampleBuffer::new(vec![0.0; 4], 8000, 0).frame_count(), 0);
    }
}
