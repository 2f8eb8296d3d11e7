//! Audio I/O: decoding any supported format into the working layout,
//! resampling, WAV writing.

use std::path::Path;

use anyhow::{Context, Result};
use hound::{SampleFormat, WavSpec, WavWriter};

use super::buffer::AudioBuffer;

/// Decode an audio file (MP3, AAC/MP4, WAV, FLAC) via symphonia.
///
/// The result is converted to `channels` channels at `sample_rate` Hz so all
/// layers of a mix share one layout.
pub fn decode_file(path: &Path, sample_rate: u32, channels: usize) -> Result<AudioBuffer> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
    use symphonia::core::errors::Error as SymphError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open: {}", path.display()))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .with_context(|| format!("Unsupported format: {}", path.display()))?;

    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .context("No audio track found")?;

    let track_id = track.id;
    let mut source_sr = track.codec_params.sample_rate.unwrap_or(44100);
    let mut source_channels = track.codec_params.channels.map(|c| c.count()).unwrap_or(1);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .context("Unsupported codec")?;

    let mut planar: Vec<Vec<f32>> = vec![Vec::new(); source_channels];

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let frame_channels = spec.channels.count();
                if frame_channels != source_channels {
                    // Some MP3 streams only report their layout once decoding starts
                    if planar.iter().all(Vec::is_empty) {
                        source_channels = frame_channels;
                        planar = vec![Vec::new(); source_channels];
                    } else {
                        anyhow::bail!(
                            "Channel count changed mid-stream in {}",
                            path.display()
                        );
                    }
                }
                source_sr = spec.rate;

                let num_frames = decoded.frames();
                let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
                sample_buf.copy_interleaved_ref(decoded);
                for frame in sample_buf.samples().chunks_exact(source_channels) {
                    for (ch, &s) in planar.iter_mut().zip(frame) {
                        ch.push(s);
                    }
                }
            }
            Err(SymphError::DecodeError(e)) => {
                log::debug!("Skipping undecodable packet in {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }

    if planar.first().map(Vec::is_empty).unwrap_or(true) {
        anyhow::bail!("No audio decoded from {}", path.display());
    }

    let conformed = conform_channels(planar, channels);
    let resampled = resample(conformed, source_sr, sample_rate)?;
    AudioBuffer::new(resampled, sample_rate)
        .with_context(|| format!("Decoded audio is malformed: {}", path.display()))
}

/// Convert planar audio to `target` channels.
///
/// Mono sources are duplicated, extra channels are dropped (front left/right
/// come first in every common layout), and a mono target averages all
/// channels.
pub fn conform_channels(planar: Vec<Vec<f32>>, target: usize) -> Vec<Vec<f32>> {
    let target = target.max(1);
    let source = planar.len();
    if source == target || source == 0 {
        return planar;
    }
    if target == 1 {
        let frames = planar[0].len();
        let mut mono = vec![0.0f32; frames];
        for ch in &planar {
            for (dst, &s) in mono.iter_mut().zip(ch) {
                *dst += s;
            }
        }
        let scale = 1.0 / source as f32;
        mono.iter_mut().for_each(|s| *s *= scale);
        return vec![mono];
    }
    if source > target {
        return planar.into_iter().take(target).collect();
    }
    (0..target).map(|i| planar[i % source].clone()).collect()
}

/// Resample planar audio from `from_sr` to `to_sr`.
///
/// Uses rubato's sinc resampler in fixed-size chunks so hour-long sources do
/// not need one giant scratch buffer.
pub fn resample(channels: Vec<Vec<f32>>, from_sr: u32, to_sr: u32) -> Result<Vec<Vec<f32>>> {
    if from_sr == to_sr {
        return Ok(channels);
    }
    let len = channels.first().map(Vec::len).unwrap_or(0);
    if len == 0 {
        return Ok(channels);
    }

    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType,
        WindowFunction,
    };

    const CHUNK: usize = 8192;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_sr as f64 / from_sr as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, CHUNK, channels.len())?;

    let expected = (len as f64 * ratio).round() as usize;
    let delay = resampler.output_delay();
    let mut out: Vec<Vec<f32>> = vec![Vec::with_capacity(expected + delay); channels.len()];

    fn append(out: &mut [Vec<f32>], produced: Vec<Vec<f32>>) {
        for (dst, src) in out.iter_mut().zip(produced) {
            dst.extend_from_slice(&src);
        }
    }

    let mut pos = 0;
    while pos + CHUNK <= len {
        let input: Vec<&[f32]> = channels.iter().map(|c| &c[pos..pos + CHUNK]).collect();
        append(&mut out, resampler.process(&input, None)?);
        pos += CHUNK;
    }
    if pos < len {
        let input: Vec<&[f32]> = channels.iter().map(|c| &c[pos..]).collect();
        append(&mut out, resampler.process_partial(Some(&input), None)?);
    }
    // Flush the filter tail until the expected length is covered
    while out[0].len() < expected + delay {
        let before = out[0].len();
        append(&mut out, resampler.process_partial(None::<&[Vec<f32>]>, None)?);
        if out[0].len() == before {
            break;
        }
    }

    Ok(out
        .into_iter()
        .map(|c| c.into_iter().skip(delay).take(expected).collect())
        .collect())
}

/// Write a buffer as 16-bit PCM WAV.
///
/// Clips values to [-1, 1] before conversion. Creates parent directories if
/// needed.
pub fn write_wav(path: &Path, buffer: &AudioBuffer) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }

    let spec = WavSpec {
        channels: buffer.channel_count() as u16,
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)
        .with_context(|| format!("Failed to create WAV file: {}", path.display()))?;

    for i in 0..buffer.frames() {
        for channel in buffer.channels() {
            let clipped = channel[i].clamp(-1.0, 1.0);
            writer.write_sample((clipped * 32767.0) as i16)?;
        }
    }

    writer.finalize().context("Failed to finalize WAV file")?;
    Ok(())
}
