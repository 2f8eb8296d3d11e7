//! Layer mixing: plain overlays of equal-length layers, and a bed with
//! one-shot layers staggered across it.

use serde::{Deserialize, Serialize};

use crate::audio::buffer::AudioBuffer;
use crate::audio::dynamics::{compress, CompressorSettings};
use crate::audio::effects::{apply_gain, fade_in, fade_out, overlay, peak_normalize};
use crate::error::SignalError;

pub use crate::audio::effects::loop_to_duration;

/// Overlays are never placed so that less than this much of them fits.
pub const STAGGER_ATTACK_MS: u64 = 5000;
/// Local fades around a staggered overlay.
pub const STAGGER_FADE_IN_MS: u64 = 300;
pub const STAGGER_FADE_OUT_MS: u64 = 700;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MixSettings {
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
    pub compressor: CompressorSettings,
    /// Headroom left by peak normalization.
    pub normalize_headroom_db: f64,
    /// Extra gain reduction after normalization.
    pub headroom_db: f64,
}

impl Default for MixSettings {
    fn default() -> Self {
        Self {
            fade_in_ms: 3000,
            fade_out_ms: 4000,
            compressor: CompressorSettings::MIX_GLUE,
            normalize_headroom_db: 0.1,
            headroom_db: 1.0,
        }
    }
}

/// Overlay `layers` into one composite.
///
/// Every layer is cut to the shortest one first. The sum is faded, glued
/// with a gentle compressor, peak-normalized and pulled down by
/// `headroom_db`.
///
/// # Panics
///
/// If `layers` is empty or the layers do not share a layout.
pub fn mix(layers: &[AudioBuffer], settings: &MixSettings) -> AudioBuffer {
    assert!(!layers.is_empty(), "mix requires at least one layer");
    let summed = match sum_layers(layers) {
        Ok(s) => s,
        Err(e) => panic!("mix layers must share one layout: {}", e),
    };

    let faded = fade_out(&fade_in(&summed, settings.fade_in_ms), settings.fade_out_ms);
    let glued = match compress(&faded, &settings.compressor) {
        Ok(c) => c,
        Err(e) => {
            log::warn!("Mix compression skipped: {}", e);
            faded
        }
    };
    let normalized = peak_normalize(&glued, settings.normalize_headroom_db);
    apply_gain(&normalized, -settings.headroom_db.abs())
}

/// Sum of all layers, truncated to the shortest.
pub fn sum_layers(layers: &[AudioBuffer]) -> Result<AudioBuffer, SignalError> {
    let Some(first) = layers.first() else {
        return Err(SignalError::invalid("layers", "nothing to mix"));
    };
    let shortest = layers.iter().map(AudioBuffer::frames).min().unwrap_or(0);

    let mut acc = first.slice_frames(0, shortest);
    for layer in &layers[1..] {
        acc = overlay(&acc, &layer.slice_frames(0, shortest), 0)?;
    }
    Ok(acc)
}

/// Evenly spaced placements for one-shot layers across a bed.
///
/// Layer `i` (counting from 1) goes at `i * bed_ms / (n + 1)`, pulled back
/// so that at least `min(len, 5 s)` of it fits before the bed ends.
pub fn stagger_positions(bed_ms: u64, layer_lens_ms: &[u64]) -> Vec<u64> {
    let step = bed_ms / (layer_lens_ms.len() as u64 + 1);
    layer_lens_ms
        .iter()
        .enumerate()
        .map(|(i, &len)| {
            let latest = bed_ms.saturating_sub(len.min(STAGGER_ATTACK_MS));
            ((i as u64 + 1) * step).min(latest)
        })
        .collect()
}

/// Lay `overlays` across `bed` at [`stagger_positions`], each with short
/// local fades. The result keeps the bed's length.
pub fn staggered_overlay(
    bed: &AudioBuffer,
    overlays: &[AudioBuffer],
) -> Result<AudioBuffer, SignalError> {
    let lens: Vec<u64> = overlays.iter().map(AudioBuffer::len_ms).collect();
    let positions = stagger_positions(bed.len_ms(), &lens);

    let mut out = bed.clone();
    for (layer, position) in overlays.iter().zip(positions) {
        let shaped = fade_out(&fade_in(layer, STAGGER_FADE_IN_MS), STAGGER_FADE_OUT_MS);
        log::debug!("Placing {} ms overlay at {} ms", layer.len_ms(), position);
        out = overlay(&out, &shaped, position)?;
    }
    Ok(out)
}
