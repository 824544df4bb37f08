//! Audio decoder using symphonia
//!
//! Decodes in-memory encoded bytes (MP3, FLAC, AAC, Vorbis, WAV) to
//! interleaved f32 PCM. Decoding is CPU bound; callers run it on the
//! blocking pool.

use crate::audio::types::SampleBuffer;
use crate::error::{Error, Result};
use std::io::Cursor;
use symphonia::core::audio::SampleBuffer as InterleavedBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// Turns encoded bytes into a [`SampleBuffer`]
pub trait AudioDecoder: Send + Sync {
    /// `hint` is a file extension ("mp3", "wav", ...) used to speed up probing
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<SampleBuffer>;
}

/// File extension of a locator, ignoring any query string or fragment
pub fn extension_hint(src: &str) -> Option<&str> {
    let path = src.split(['?', '#']).next().unwrap_or(src);
    let file_name = path.rsplit('/').next()?;
    let (stem, ext) = file_name.rsplit_once('.')?;
    if stem.is_empty() || ext.is_empty() {
        None
    } else {
        Some(ext)
    }
}

/// Default decoder backed by symphonia's bundled codecs
#[derive(Debug, Default, Clone, Copy)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self
    }
}

impl AudioDecoder for SymphoniaDecoder {
    fn decode(&self, bytes: Vec<u8>, hint: Option<&str>) -> Result<SampleBuffer> {
        debug!("Decoding {} bytes (hint: {:?})", bytes.len(), hint);

        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut format_hint = Hint::new();
        if let Some(ext) = hint {
            format_hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &format_hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::Decode(format!("Failed to probe format: {}", e)))?;

        let mut format = probed.format;

        // Get the default audio track
        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::Decode("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let mut sample_rate = codec_params.sample_rate;
        let mut channels = codec_params.channels.map(|c| c.count() as u16);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| Error::Decode(format!("Failed to create decoder: {}", e)))?;

        let mut samples = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break;
                }
                Err(e) => {
                    warn!("Error reading packet: {}", e);
                    break;
                }
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate.get_or_insert(spec.rate);
                    channels.get_or_insert(spec.channels.count() as u16);

                    let mut interleaved =
                        InterleavedBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    interleaved.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(interleaved.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet; skip it and keep going
                    warn!("Decode error: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(Error::Decode(format!("Decoder failed: {}", e)));
                }
            }
        }

        let sample_rate =
            sample_rate.ok_or_else(|| Error::Decode("Sample rate not found".to_string()))?;
        let channels =
            channels.ok_or_else(|| Error::Decode("Channel count not found".to_string()))?;

        let buffer = SampleBuffer::new(samples, sample_rate, channels);
        debug!(
            "Decoded {} frames at {} Hz, {} channel(s) ({:.2}s)",
            buffer.frame_count(),
            sample_rate,
            channels,
            buffer.duration()
        );

        Ok(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..frames {
            let value = ((i as f32 * 0.05).sin() * i16::MAX as f32 * 0.5) as i16;
            for _ in 0..channels {
                writer.write_sample(value).unwrap();
            }
        }
        writer.finalize().unwrap();

        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_decode_wav_mono() {
        let bytes = wav_bytes(8000, 1, 800);
        let buffer = SymphoniaDecoder::new().decode(bytes, Some("wav")).unwrap();

        assert_eq!(buffer.sample_rate, 8000);
        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.frame_count(), 800);
        assert!((buffer.duration() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_decode_wav_stereo_without_hint() {
        let bytes = wav_bytes(22050, 2, 2205);
        let buffer = SymphoniaDecoder::new().decode(bytes, None).unwrap();

        assert_eq!(buffer.channels, 2);
        assert_eq!(buffer.samples.len(), 2205 * 2);
        assert!(buffer.samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let result = SymphoniaDecoder::new().decode(vec![0x42; 512], Some("mp3"));
        assert!(matches!(result, Err(Error::Decode(_))));
    }

    #[test]
    fn test_extension_hint() {
        assert_eq!(extension_hint("https://cdn/x/intro.mp3?sig=abc"), Some("mp3"));
        assert_eq!(extension_hint("/music/bed.ogg"), Some("ogg"));
        assert_eq!(extension_hint("file:///tmp/a.b/c.wav#t=1"), Some("wav"));
        assert_eq!(extension_hint("https://cdn/stream"), None);
        assert_eq!(extension_hint("/music/.hidden"), None);
    }
}
