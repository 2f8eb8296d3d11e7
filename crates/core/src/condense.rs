//! Key-moment condensation: shrink long recordings to their most energetic,
//! well-spaced passages, kept in chronological order.

use serde::{Deserialize, Serialize};

use crate::audio::analysis::rms_windows;
use crate::audio::buffer::AudioBuffer;
use crate::audio::effects::{append_crossfade, fade_in, fade_out};
use crate::error::SignalError;

/// Edge fade applied to every condensed result (shortened for short results).
const EDGE_FADE_MS: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CondenseSettings {
    /// Length of the condensed result.
    pub target_ms: u64,
    /// RMS analysis window.
    pub window_ms: u64,
    /// Length of each extracted passage.
    pub segment_ms: u64,
    /// Minimum distance between two selected centers.
    pub min_gap_ms: u64,
    pub crossfade_ms: u64,
}

impl Default for CondenseSettings {
    fn default() -> Self {
        Self {
            target_ms: 600_000,
            window_ms: 2000,
            segment_ms: 60_000,
            min_gap_ms: 30_000,
            crossfade_ms: 800,
        }
    }
}

impl CondenseSettings {
    /// Centers to select: enough segments to cover the target plus two spare.
    pub fn wanted_centers(&self) -> usize {
        (self.target_ms.div_ceil(self.segment_ms.max(1)) + 2) as usize
    }

    fn validate(&self) -> Result<(), SignalError> {
        if self.target_ms == 0 {
            return Err(SignalError::invalid("target_ms", "must be non-zero"));
        }
        if self.window_ms == 0 {
            return Err(SignalError::invalid("window_ms", "must be non-zero"));
        }
        if self.segment_ms == 0 {
            return Err(SignalError::invalid("segment_ms", "must be non-zero"));
        }
        Ok(())
    }
}

/// One extracted passage of the source buffer.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub start_ms: u64,
    pub end_ms: u64,
    pub source: &'a AudioBuffer,
}

impl Segment<'_> {
    /// A `segment_ms` span centered on `center_ms`, shifted to stay inside
    /// the source.
    fn around(source: &AudioBuffer, center_ms: u64, segment_ms: u64) -> Segment<'_> {
        let total = source.len_ms();
        let mut start_ms = center_ms.saturating_sub(segment_ms / 2);
        let mut end_ms = start_ms + segment_ms;
        if end_ms > total {
            end_ms = total;
            start_ms = total.saturating_sub(segment_ms);
        }
        Segment {
            start_ms,
            end_ms,
            source,
        }
    }

    pub fn audio(&self) -> AudioBuffer {
        self.source.slice_ms(self.start_ms, self.end_ms)
    }
}

/// Condense `buffer` to at most `settings.target_ms`.
///
/// Buffers already within the target are returned as-is. Any processing
/// error degrades to hard truncation of the input.
pub fn condense(buffer: &AudioBuffer, settings: &CondenseSettings) -> AudioBuffer {
    if buffer.len_ms() <= settings.target_ms {
        return buffer.clone();
    }

    match try_condense(buffer, settings) {
        Ok(out) => out,
        Err(e) => {
            log::warn!(
                "Condensing failed ({}), truncating to {} ms",
                e,
                settings.target_ms
            );
            buffer.truncate_ms(settings.target_ms)
        }
    }
}

/// Energy-ranked center selection with non-maximum suppression.
///
/// Returns window start times in selection order (loudest first).
pub fn select_centers(buffer: &AudioBuffer, settings: &CondenseSettings) -> Vec<u64> {
    let mut windows = rms_windows(buffer, settings.window_ms);
    // Stable sort: equal energies keep the earlier window first
    windows.sort_by(|a, b| b.1.total_cmp(&a.1));

    let wanted = settings.wanted_centers();
    let mut centers: Vec<u64> = Vec::with_capacity(wanted);
    for (start_ms, _) in windows {
        if centers
            .iter()
            .all(|&c| c.abs_diff(start_ms) >= settings.min_gap_ms)
        {
            centers.push(start_ms);
            if centers.len() >= wanted {
                break;
            }
        }
    }
    centers
}

fn try_condense(
    buffer: &AudioBuffer,
    settings: &CondenseSettings,
) -> Result<AudioBuffer, SignalError> {
    settings.validate()?;
    if !buffer.is_finite() {
        return Err(SignalError::NonFinite);
    }

    let target = settings.target_ms;
    let centers = select_centers(buffer, settings);

    let mut segments: Vec<Segment> = centers
        .iter()
        .map(|&c| Segment::around(buffer, c, settings.segment_ms))
        .filter(|s| s.end_ms > s.start_ms)
        .collect();
    segments.sort_by_key(|s| s.start_ms);

    let assembled = if segments.is_empty() {
        log::debug!("No full analysis window in input, truncating");
        buffer.truncate_ms(target)
    } else {
        let mut acc = segments[0].audio().truncate_ms(target);
        for segment in &segments[1..] {
            let have = acc.len_ms();
            if have >= target {
                break;
            }
            let piece = segment
                .audio()
                .truncate_ms(target - have + settings.crossfade_ms);
            acc = append_crossfade(&acc, &piece, settings.crossfade_ms)?;
        }
        acc.truncate_ms(target)
    };

    log::debug!(
        "Condensed {} ms to {} ms from {} segments",
        buffer.len_ms(),
        assembled.len_ms(),
        segments.len()
    );

    let edge = EDGE_FADE_MS.min(assembled.len_ms() / 10);
    Ok(fade_out(&fade_in(&assembled, edge), edge))
}
