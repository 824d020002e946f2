//! Speech segmentation over raw PCM frames.
//!
//! Detects whether an utterance contains speech and where, using RMS
//! thresholding over fixed-size frames of 16-bit little-endian PCM. The
//! pipeline receives complete utterance frames from the client, so span
//! detection runs over the whole payload at once rather than as a
//! streaming state machine.

use serde::{Deserialize, Serialize};

fn default_speech_threshold() -> f32 {
    0.01
}

fn default_frame_ms() -> u64 {
    20
}

fn default_min_speech_ms() -> u64 {
    200
}

fn default_sample_rate() -> u32 {
    16_000
}

/// Configuration for the RMS speech segmenter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// RMS threshold above which a frame counts as speech (0.0 to 1.0).
    #[serde(default = "default_speech_threshold")]
    pub speech_threshold: f32,
    /// Analysis frame length in milliseconds.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u64,
    /// Minimum speech-span duration for the utterance to count as speech.
    /// Shorter bursts are treated as noise.
    #[serde(default = "default_min_speech_ms")]
    pub min_speech_ms: u64,
    /// Input sample rate in Hz.
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            speech_threshold: default_speech_threshold(),
            frame_ms: default_frame_ms(),
            min_speech_ms: default_min_speech_ms(),
            sample_rate: default_sample_rate(),
        }
    }
}

/// The detected speech span, in milliseconds from the start of the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpeechSegment {
    pub start_ms: u64,
    pub end_ms: u64,
}

/// RMS-based speech segmenter.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    config: SegmenterConfig,
}

impl Segmenter {
    pub fn new(config: SegmenterConfig) -> Self {
        Self { config }
    }

    /// Detects the speech span in `audio` (16-bit little-endian PCM).
    ///
    /// Returns `None` when no frame exceeds the threshold or the detected
    /// span is shorter than the configured minimum; that is the normal
    /// "no speech" outcome, not an error.
    pub fn detect(&self, audio: &[u8]) -> Option<SpeechSegment> {
        let samples = pcm_samples(audio);
        if samples.is_empty() {
            return None;
        }

        let samples_per_frame =
            (self.config.sample_rate as u64 * self.config.frame_ms / 1000).max(1) as usize;

        let mut first_speech_frame = None;
        let mut last_speech_frame = None;

        for (index, frame) in samples.chunks(samples_per_frame).enumerate() {
            if calculate_rms(frame) > self.config.speech_threshold {
                first_speech_frame.get_or_insert(index);
                last_speech_frame = Some(index);
            }
        }

        let (first, last) = (first_speech_frame?, last_speech_frame?);
        let start_ms = first as u64 * self.config.frame_ms;
        let end_ms = (last as u64 + 1) * self.config.frame_ms;

        if end_ms - start_ms < self.config.min_speech_ms {
            return None;
        }

        Some(SpeechSegment { start_ms, end_ms })
    }

    /// Returns the byte range of `audio` covering `segment`.
    pub fn slice<'a>(&self, audio: &'a [u8], segment: SpeechSegment) -> &'a [u8] {
        let bytes_per_ms = self.config.sample_rate as u64 * 2 / 1000;
        let start = (segment.start_ms * bytes_per_ms) as usize;
        let end = ((segment.end_ms * bytes_per_ms) as usize).min(audio.len());
        // Stay on a sample boundary.
        &audio[start.min(end) & !1..end & !1]
    }
}

/// Interprets raw bytes as 16-bit little-endian PCM samples. A trailing
/// odd byte is ignored.
fn pcm_samples(audio: &[u8]) -> Vec<i16> {
    audio
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Root-mean-square level of the samples, normalized to 0.0..=1.0.
fn calculate_rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f64 = samples
        .iter()
        .map(|&s| {
            let normalized = f64::from(s) / f64::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f64).sqrt() as f32
}
