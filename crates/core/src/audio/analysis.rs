//! Level measurements: RMS energy, dBFS loudness, peak.

use super::buffer::AudioBuffer;

/// RMS across all channels of a buffer.
pub fn buffer_rms(buffer: &AudioBuffer) -> f64 {
    frame_range_rms(buffer, 0, buffer.frames())
}

/// RMS over frames `[start, end)` across all channels.
pub fn frame_range_rms(buffer: &AudioBuffer, start: usize, end: usize) -> f64 {
    let end = end.min(buffer.frames());
    if start >= end {
        return 0.0;
    }
    let mut sum_sq = 0.0f64;
    for channel in buffer.channels() {
        sum_sq += channel[start..end]
            .iter()
            .map(|&s| (s as f64) * (s as f64))
            .sum::<f64>();
    }
    let count = (end - start) * buffer.channel_count();
    (sum_sq / count as f64).sqrt()
}

/// Loudness in dBFS; `-inf` for silence.
pub fn dbfs(buffer: &AudioBuffer) -> f64 {
    amplitude_to_db(buffer_rms(buffer))
}

/// Absolute peak sample value across all channels.
pub fn peak(buffer: &AudioBuffer) -> f64 {
    buffer
        .channels()
        .iter()
        .flatten()
        .map(|s| s.abs() as f64)
        .fold(0.0f64, f64::max)
}

/// Peak level in dBFS; `-inf` for silence.
pub fn peak_dbfs(buffer: &AudioBuffer) -> f64 {
    amplitude_to_db(peak(buffer))
}

pub fn amplitude_to_db(amplitude: f64) -> f64 {
    if amplitude <= 0.0 {
        return f64::NEG_INFINITY;
    }
    20.0 * amplitude.log10()
}

pub fn db_to_amplitude(db: f64) -> f64 {
    10.0f64.powf(db / 20.0)
}

/// RMS of consecutive, non-overlapping windows.
///
/// Returns `(start_ms, rms)` per window. A trailing window shorter than
/// `window_ms` is skipped.
pub fn rms_windows(buffer: &AudioBuffer, window_ms: u64) -> Vec<(u64, f64)> {
    if window_ms == 0 {
        return vec![];
    }
    let total_ms = buffer.len_ms();
    let mut windows = Vec::with_capacity((total_ms / window_ms) as usize);
    let mut start_ms = 0u64;
    while start_ms + window_ms <= total_ms {
        let start = buffer.frame_at(start_ms);
        let end = buffer.frame_at(start_ms + window_ms);
        windows.push((start_ms, frame_range_rms(buffer, start, end)));
        start_ms += window_ms;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_rms_silence() {
        assert_eq!(buffer_rms(&AudioBuffer::mono(Vec::new(), 1000)), 0.0);
        assert_eq!(buffer_rms(&AudioBuffer::mono(vec![0.0; 100], 1000)), 0.0);
    }

    #[test]
    fn test_buffer_rms_sine() {
        let samples: Vec<f32> = (0..16000)
            .map(|i| (i as f64 / 16000.0 * 440.0 * std::f64::consts::TAU).sin() as f32)
            .collect();
        let rms = buffer_rms(&AudioBuffer::mono(samples, 16000));
        assert!(
            (rms - std::f64::consts::FRAC_1_SQRT_2).abs() < 0.01,
            "Expected ~0.707, got {}",
            rms
        );
    }

    #[test]
    fn test_dbfs_known_level() {
        let buf = AudioBuffer::mono(vec![0.5; 1000], 1000);
        assert!((dbfs(&buf) - (-6.0206)).abs() < 0.001);
    }

    #[test]
    fn test_dbfs_silence_is_neg_infinity() {
        let buf = AudioBuffer::silent(100, 1000, 2);
        assert_eq!(dbfs(&buf), f64::NEG_INFINITY);
        assert_eq!(peak_dbfs(&buf), f64::NEG_INFINITY);
    }

    #[test]
    fn test_rms_across_channels() {
        let buf = AudioBuffer::new(vec![vec![1.0; 10], vec![0.0; 10]], 1000).unwrap();
        assert!((buffer_rms(&buf) - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn test_peak() {
        let buf = AudioBuffer::mono(vec![0.1, -0.8, 0.3], 1000);
        assert!((peak(&buf) - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_rms_windows_skips_trailing_remainder() {
        // 5.5 seconds at 1 kHz with 2 s windows -> windows at 0 and 2000 only
        let buf = AudioBuffer::mono(vec![0.25; 5500], 1000);
        let windows = rms_windows(&buf, 2000);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].0, 0);
        assert_eq!(windows[1].0, 2000);
        assert!((windows[1].1 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_rms_windows_zero_window() {
        let buf = AudioBuffer::mono(vec![0.25; 100], 1000);
        assert!(rms_windows(&buf, 0).is_empty());
    }

    #[test]
    fn test_db_roundtrip() {
        assert!((db_to_amplitude(-6.0) - 0.501).abs() < 0.001);
        assert!((amplitude_to_db(db_to_amplitude(-18.0)) + 18.0).abs() < 1e-9);
    }
}
