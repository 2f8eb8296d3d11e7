//! Decoded PCM audio held in memory.

use crate::error::SignalError;

/// Planar PCM audio: one `Vec<f32>` per channel, all the same length.
///
/// Transforms never mutate in place; every operation in this crate returns a
/// new buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl AudioBuffer {
    /// Build a buffer from planar channel data.
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, SignalError> {
        if sample_rate == 0 {
            return Err(SignalError::ZeroSampleRate);
        }
        let first = channels.first().ok_or(SignalError::NoChannels)?;
        if channels.iter().any(|c| c.len() != first.len()) {
            return Err(SignalError::RaggedChannels);
        }
        Ok(Self {
            channels,
            sample_rate,
        })
    }

    /// Single-channel buffer.
    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            channels: vec![samples],
            sample_rate: sample_rate.max(1),
        }
    }

    /// Digital silence of the given duration.
    pub fn silent(duration_ms: u64, sample_rate: u32, channel_count: usize) -> Self {
        let sample_rate = sample_rate.max(1);
        let frames = ms_to_frames(duration_ms, sample_rate);
        Self {
            channels: vec![vec![0.0; frames]; channel_count.max(1)],
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Number of sample frames (samples per channel).
    pub fn frames(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Duration in whole milliseconds (rounded down).
    pub fn len_ms(&self) -> u64 {
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }

    /// Frame index corresponding to a millisecond offset in this buffer.
    pub fn frame_at(&self, ms: u64) -> usize {
        ms_to_frames(ms, self.sample_rate)
    }

    /// True when both buffers share channel count and sample rate.
    pub fn same_layout(&self, other: &AudioBuffer) -> bool {
        self.channel_count() == other.channel_count() && self.sample_rate == other.sample_rate
    }

    /// Error unless `other` can be combined sample-for-sample with `self`.
    pub fn check_layout(&self, other: &AudioBuffer) -> Result<(), SignalError> {
        if self.same_layout(other) {
            Ok(())
        } else {
            Err(SignalError::LayoutMismatch {
                left_channels: self.channel_count(),
                left_rate: self.sample_rate,
                right_channels: other.channel_count(),
                right_rate: other.sample_rate,
            })
        }
    }

    pub fn is_finite(&self) -> bool {
        self.channels.iter().flatten().all(|s| s.is_finite())
    }

    /// Copy of frames `[start, end)`, clamped to valid bounds.
    pub fn slice_frames(&self, start: usize, end: usize) -> AudioBuffer {
        let n = self.frames();
        let end = end.min(n);
        let start = start.min(end);
        Self {
            channels: self
                .channels
                .iter()
                .map(|c| c[start..end].to_vec())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    /// Copy of the `[start_ms, end_ms)` range, clamped to valid bounds.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> AudioBuffer {
        self.slice_frames(self.frame_at(start_ms), self.frame_at(end_ms))
    }

    /// The first `ms` milliseconds (or the whole buffer if shorter).
    pub fn truncate_ms(&self, ms: u64) -> AudioBuffer {
        self.slice_ms(0, ms)
    }

    /// Apply `f(frame_index, sample)` to every sample of every channel.
    pub fn map_samples<F>(&self, f: F) -> AudioBuffer
    where
        F: Fn(usize, f32) -> f32,
    {
        Self {
            channels: self
                .channels
                .iter()
                .map(|c| c.iter().enumerate().map(|(i, &s)| f(i, s)).collect())
                .collect(),
            sample_rate: self.sample_rate,
        }
    }

    pub(crate) fn from_parts(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        debug_assert!(!channels.is_empty());
        Self {
            channels,
            sample_rate,
        }
    }
}

/// Frames needed to cover `ms` milliseconds (rounded up so that
/// `len_ms` of an `ms`-long slice reports exactly `ms`).
pub fn ms_to_frames(ms: u64, sample_rate: u32) -> usize {
    let num = ms as u128 * sample_rate as u128;
    num.div_ceil(1000) as usize
}
