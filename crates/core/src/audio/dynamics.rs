//! Dynamic-range compression and loudness targeting.

use serde::{Deserialize, Serialize};

use crate::error::SignalError;

use super::analysis::{db_to_amplitude, dbfs};
use super::buffer::AudioBuffer;
use super::effects::apply_gain;

/// Feed-forward compressor parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompressorSettings {
    pub threshold_db: f64,
    pub ratio: f64,
    pub attack_ms: u64,
    pub release_ms: u64,
}

impl CompressorSettings {
    /// Peak tamer run after a loudness gain stage.
    pub const SOFT_CLIP: CompressorSettings = CompressorSettings {
        threshold_db: -3.0,
        ratio: 4.0,
        attack_ms: 5,
        release_ms: 80,
    };

    /// Gentle "glue" pass over a finished mix.
    pub const MIX_GLUE: CompressorSettings = CompressorSettings {
        threshold_db: -6.0,
        ratio: 3.0,
        attack_ms: 5,
        release_ms: 50,
    };

    fn validate(&self) -> Result<(), SignalError> {
        if !self.threshold_db.is_finite() {
            return Err(SignalError::invalid("threshold_db", "must be finite"));
        }
        if !(self.ratio.is_finite() && self.ratio >= 1.0) {
            return Err(SignalError::invalid("ratio", format!("{} < 1", self.ratio)));
        }
        if self.attack_ms == 0 {
            return Err(SignalError::invalid("attack_ms", "must be non-zero"));
        }
        if self.release_ms == 0 {
            return Err(SignalError::invalid("release_ms", "must be non-zero"));
        }
        Ok(())
    }
}

/// Compress peaks above the threshold.
///
/// The detector is the RMS of the preceding attack window across all
/// channels. Attenuation ramps towards `(1 - 1/ratio) * dB-over-threshold`
/// over the attack time. Once the detector drops, it falls back to the new
/// target (zero below threshold) within the release time.
pub fn compress(
    buffer: &AudioBuffer,
    settings: &CompressorSettings,
) -> Result<AudioBuffer, SignalError> {
    settings.validate()?;
    if !buffer.is_finite() {
        return Err(SignalError::NonFinite);
    }

    let n = buffer.frames();
    let channels = buffer.channels();
    let channel_count = channels.len() as f64;
    let threshold = db_to_amplitude(settings.threshold_db);
    let look = buffer.frame_at(settings.attack_ms).max(1);
    let attack_frames = look as f64;
    let release_frames = buffer.frame_at(settings.release_ms).max(1) as f64;
    let slope = 1.0 - 1.0 / settings.ratio;

    let frame_energy =
        |i: usize| -> f64 { channels.iter().map(|c| (c[i] as f64) * (c[i] as f64)).sum() };

    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(n); channels.len()];
    let mut window_sum = 0.0f64;
    let mut attenuation = 0.0f64;
    let mut release_from = 0.0f64;

    for i in 0..n {
        // Detector covers frames [i - look, i)
        let window_len = i.min(look);
        let rms = if window_len == 0 {
            0.0
        } else {
            (window_sum.max(0.0) / (window_len as f64 * channel_count)).sqrt()
        };

        let over_db = if rms > 0.0 {
            (20.0 * (rms / threshold).log10()).max(0.0)
        } else {
            0.0
        };
        let max_attenuation = slope * over_db;

        if attenuation < max_attenuation {
            attenuation = (attenuation + max_attenuation / attack_frames).min(max_attenuation);
            release_from = attenuation;
        } else if attenuation > max_attenuation {
            // Release slope is fixed by the level it started from
            attenuation = (attenuation - release_from / release_frames).max(max_attenuation);
        }

        let gain = if attenuation != 0.0 {
            db_to_amplitude(-attenuation) as f32
        } else {
            1.0
        };
        for (dst, src) in out.iter_mut().zip(channels) {
            dst.push(src[i] * gain);
        }

        window_sum += frame_energy(i);
        if i >= look {
            window_sum -= frame_energy(i - look);
        }
    }

    AudioBuffer::new(out, buffer.sample_rate())
}

/// Bring the buffer's RMS loudness to `target_dbfs`.
///
/// Silence is returned unchanged. With `soft_clip`, a compressor
/// ([`CompressorSettings::SOFT_CLIP`]) follows the gain stage.
pub fn set_target_loudness(buffer: &AudioBuffer, target_dbfs: f64, soft_clip: bool) -> AudioBuffer {
    let limiter = soft_clip.then_some(&CompressorSettings::SOFT_CLIP);
    set_target_loudness_with(buffer, target_dbfs, limiter)
}

/// [`set_target_loudness`] with an explicit post-gain compressor.
///
/// If the compressor cannot run, the gain-adjusted buffer is returned.
pub fn set_target_loudness_with(
    buffer: &AudioBuffer,
    target_dbfs: f64,
    limiter: Option<&CompressorSettings>,
) -> AudioBuffer {
    let current = dbfs(buffer);
    if !current.is_finite() {
        if current == f64::NEG_INFINITY {
            log::debug!("Loudness target skipped: buffer is silent");
        } else {
            log::warn!("Loudness target skipped: level is {}", current);
        }
        return buffer.clone();
    }

    let gained = apply_gain(buffer, target_dbfs - current);
    let Some(settings) = limiter else {
        return gained;
    };

    match compress(&gained, settings) {
        Ok(compressed) => compressed,
        Err(e) => {
            log::warn!("Soft-clip compression skipped: {}", e);
            gained
        }
    }
}
