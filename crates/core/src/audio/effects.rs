//! Audio effects: gain, fades, crossfaded joins, overlay, looping,
//! low-pass filtering, peak normalization.

use crate::error::SignalError;

use super::analysis::{db_to_amplitude, peak};
use super::buffer::AudioBuffer;

/// Change level by `db` decibels.
pub fn apply_gain(buffer: &AudioBuffer, db: f64) -> AudioBuffer {
    if db.abs() < 1e-9 {
        return buffer.clone();
    }
    let gain = db_to_amplitude(db) as f32;
    buffer.map_samples(|_, s| s * gain)
}

/// Linear fade from silence over the first `duration_ms`.
///
/// A fade longer than the buffer covers the whole buffer.
pub fn fade_in(buffer: &AudioBuffer, duration_ms: u64) -> AudioBuffer {
    let fade = buffer.frame_at(duration_ms).min(buffer.frames());
    if fade == 0 {
        return buffer.clone();
    }
    buffer.map_samples(|i, s| {
        if i < fade {
            s * (i as f32 / fade as f32)
        } else {
            s
        }
    })
}

/// Linear fade to silence over the last `duration_ms`.
pub fn fade_out(buffer: &AudioBuffer, duration_ms: u64) -> AudioBuffer {
    let n = buffer.frames();
    let fade = buffer.frame_at(duration_ms).min(n);
    if fade == 0 {
        return buffer.clone();
    }
    let start = n - fade;
    buffer.map_samples(|i, s| {
        if i >= start {
            let remaining = (n - 1 - i) as f32;
            s * (remaining / fade as f32)
        } else {
            s
        }
    })
}

/// Join `b` after `a`, overlapping `crossfade_ms` of `a`'s tail with `b`'s
/// head. The overlap is clamped to the shorter of the two buffers.
///
/// Result length is `a + b - overlap` frames.
pub fn append_crossfade(
    a: &AudioBuffer,
    b: &AudioBuffer,
    crossfade_ms: u64,
) -> Result<AudioBuffer, SignalError> {
    a.check_layout(b)?;
    let cf = a.frame_at(crossfade_ms).min(a.frames()).min(b.frames());

    let channels = a
        .channels()
        .iter()
        .zip(b.channels())
        .map(|(left, right)| {
            let mut out = Vec::with_capacity(left.len() + right.len() - cf);
            let head = left.len() - cf;
            out.extend_from_slice(&left[..head]);
            for i in 0..cf {
                let t = i as f32 / cf as f32;
                out.push(left[head + i] * (1.0 - t) + right[i] * t);
            }
            out.extend_from_slice(&right[cf..]);
            out
        })
        .collect();

    Ok(AudioBuffer::from_parts(channels, a.sample_rate()))
}

/// Sum `top` into `base` starting at `position_ms`.
///
/// Output keeps the length of `base`; anything in `top` past the end of `base`
/// is dropped.
pub fn overlay(
    base: &AudioBuffer,
    top: &AudioBuffer,
    position_ms: u64,
) -> Result<AudioBuffer, SignalError> {
    base.check_layout(top)?;
    let offset = base.frame_at(position_ms);
    let channels = base
        .channels()
        .iter()
        .zip(top.channels())
        .map(|(b, t)| {
            let mut out = b.clone();
            if offset < out.len() {
                for (dst, src) in out[offset..].iter_mut().zip(t.iter()) {
                    *dst += *src;
                }
            }
            out
        })
        .collect();
    Ok(AudioBuffer::from_parts(channels, base.sample_rate()))
}

/// Back-to-back copies of `buffer`, `times` in total.
pub fn repeat(buffer: &AudioBuffer, times: usize) -> AudioBuffer {
    let channels = buffer.channels().iter().map(|c| c.repeat(times)).collect();
    AudioBuffer::from_parts(channels, buffer.sample_rate())
}

/// Repeat `buffer` end-to-end until it covers `duration_ms`, then cut to
/// exactly that length. An empty buffer yields silence.
pub fn loop_to_duration(buffer: &AudioBuffer, duration_ms: u64) -> AudioBuffer {
    if buffer.is_empty() {
        return AudioBuffer::silent(duration_ms, buffer.sample_rate(), buffer.channel_count());
    }
    let needed = buffer.frame_at(duration_ms);
    let copies = needed.div_ceil(buffer.frames()).max(1);
    repeat(buffer, copies).slice_frames(0, needed)
}

/// One-pole RC low-pass filter.
pub fn low_pass(buffer: &AudioBuffer, cutoff_hz: f64) -> Result<AudioBuffer, SignalError> {
    if cutoff_hz.is_nan() || cutoff_hz <= 0.0 {
        return Err(SignalError::invalid("cutoff_hz", "must be positive"));
    }
    let rc = 1.0 / (cutoff_hz * std::f64::consts::TAU);
    let dt = 1.0 / buffer.sample_rate() as f64;
    let alpha = (dt / (rc + dt)) as f32;

    let channels = buffer
        .channels()
        .iter()
        .map(|c| {
            let mut out = Vec::with_capacity(c.len());
            let mut last = match c.first() {
                Some(&s) => s,
                None => return out,
            };
            out.push(last);
            for &s in &c[1..] {
                last += alpha * (s - last);
                out.push(last);
            }
            out
        })
        .collect();
    Ok(AudioBuffer::from_parts(channels, buffer.sample_rate()))
}

/// Scale so the loudest sample sits `headroom_db` below full scale.
/// Silence is returned unchanged.
pub fn peak_normalize(buffer: &AudioBuffer, headroom_db: f64) -> AudioBuffer {
    let p = peak(buffer);
    if p <= 0.0 || !p.is_finite() {
        return buffer.clone();
    }
    let target = db_to_amplitude(-headroom_db.abs());
    let gain = (target / p) as f32;
    buffer.map_samples(|_, s| s * gain)
}
