//! Writing finished soundscapes to disk.
//!
//! Every export lands in a temp file next to its destination and is renamed
//! into place, so an interrupted run never leaves a file that satisfies the
//! completion marker.

use std::path::Path;
use std::process::Command;

use anyhow::{bail, Context, Result};

use crate::audio::buffer::AudioBuffer;
use crate::audio::io::write_wav;
use crate::config::{ExportFormat, ExportSettings};
use crate::layout::make_readable;

/// Export `buffer` to `dest` in the configured format.
pub fn export(buffer: &AudioBuffer, dest: &Path, settings: &ExportSettings) -> Result<()> {
    let dir = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;

    let staged = tempfile::Builder::new()
        .prefix(".export-")
        .suffix(&format!(".{}", settings.format.extension()))
        .tempfile_in(dir)
        .context("Failed to create temp file")?;

    match settings.format {
        ExportFormat::Wav => write_wav(staged.path(), buffer)?,
        ExportFormat::Mp3 => encode_mp3(buffer, staged.path(), dir, settings)?,
    }

    make_readable(staged.path())
        .with_context(|| format!("Failed to set permissions on {}", staged.path().display()))?;
    staged
        .persist(dest)
        .with_context(|| format!("Failed to move export into place: {}", dest.display()))?;
    log::info!("Exported {} ({} ms)", dest.display(), buffer.len_ms());
    Ok(())
}

/// Encode through ffmpeg: WAV intermediate in `scratch_dir`, MP3 at `out`.
fn encode_mp3(buffer: &AudioBuffer, out: &Path, scratch_dir: &Path, settings: &ExportSettings) -> Result<()> {
    let wav = tempfile::Builder::new()
        .prefix(".encode-")
        .suffix(".wav")
        .tempfile_in(scratch_dir)
        .context("Failed to create temp file")?;
    write_wav(wav.path(), buffer)?;

    let bitrate = format!("{}k", settings.bitrate_kbps);
    let output = Command::new(&settings.ffmpeg)
        .args(["-y", "-hide_banner", "-loglevel", "error", "-i"])
        .arg(wav.path())
        .args(["-codec:a", "libmp3lame", "-b:a", &bitrate, "-f", "mp3"])
        .arg(out)
        .output()
        .with_context(|| format!("Failed to run {} (is it installed?)", settings.ffmpeg))?;

    if !output.status.success() {
        bail!(
            "{} failed with {}: {}",
            settings.ffmpeg,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(())
}
