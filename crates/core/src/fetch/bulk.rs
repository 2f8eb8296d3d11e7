//! Bulk media downloads through an external tool (yt-dlp).
//!
//! Each download is tried with an ordered list of strategies (client
//! identities); the first one that produces the output file wins.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::config::BulkSettings;
use crate::error::FetchError;
use crate::layout::exists_nonempty;

/// One way of running the bulk download tool.
pub trait BulkBackend {
    /// Backend name for logs.
    fn name(&self) -> &str;

    /// Download `url` as `<base>.mp3` using `strategy`.
    fn attempt(&self, url: &str, base: &Path, strategy: &str) -> Result<(), FetchError>;
}

/// yt-dlp, extracting audio to MP3.
pub struct YtDlp {
    program: String,
    audio_quality: String,
    cookie_file: Option<PathBuf>,
}

impl YtDlp {
    pub fn new(program: &str, audio_quality: &str, cookie_file: Option<PathBuf>) -> Self {
        Self {
            program: program.to_string(),
            audio_quality: audio_quality.to_string(),
            cookie_file,
        }
    }

    /// Uses the first cookie file candidate that exists.
    pub fn from_settings(settings: &BulkSettings) -> Self {
        let cookie_file = settings.cookie_files.iter().find(|p| p.is_file()).cloned();
        if let Some(ref path) = cookie_file {
            log::info!("Using cookies from {}", path.display());
        }
        Self::new(&settings.program, &settings.audio_quality, cookie_file)
    }

    pub fn command_args(&self, url: &str, base: &Path, strategy: &str) -> Vec<OsString> {
        let mut template = base.as_os_str().to_os_string();
        template.push(".%(ext)s");

        let mut args: Vec<OsString> = [
            "--format",
            "bestaudio[ext=m4a]/bestaudio/best",
            "--extract-audio",
            "--audio-format",
            "mp3",
            "--audio-quality",
            self.audio_quality.as_str(),
            "--no-playlist",
            "--geo-bypass",
            "--retries",
            "3",
            "--fragment-retries",
            "3",
            "--quiet",
            "--no-warnings",
            "--extractor-args",
        ]
        .into_iter()
        .map(OsString::from)
        .collect();
        args.push(format!("youtube:player_client={}", strategy).into());
        if let Some(ref cookies) = self.cookie_file {
            args.push("--cookies".into());
            args.push(cookies.as_os_str().to_os_string());
        }
        args.push("-o".into());
        args.push(template);
        args.push(url.into());
        args
    }
}

impl BulkBackend for YtDlp {
    fn name(&self) -> &str {
        &self.program
    }

    fn attempt(&self, url: &str, base: &Path, strategy: &str) -> Result<(), FetchError> {
        let output = Command::new(&self.program)
            .args(self.command_args(url, base, strategy))
            .output()
            .map_err(|source| FetchError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let last_line = stderr.lines().rev().find(|l| !l.trim().is_empty());
            return Err(FetchError::ToolFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                stderr: last_line.unwrap_or("").trim().to_string(),
            });
        }
        Ok(())
    }
}

/// Download `url` to `dest` (an `.mp3` path) unless it is already there.
///
/// Strategies are tried in order until one leaves a non-empty file behind.
/// Per-attempt failures are logged; only the final outcome is returned.
pub fn fetch_bulk(backend: &dyn BulkBackend, strategies: &[String], url: &str, dest: &Path) -> bool {
    let mp3_path = dest.with_extension("mp3");
    if exists_nonempty(&mp3_path) {
        log::info!("Already downloaded: {}", mp3_path.display());
        return true;
    }
    if let Some(parent) = mp3_path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("Cannot create {}: {}", parent.display(), e);
            return false;
        }
    }

    let base = mp3_path.with_extension("");
    log::info!("Downloading {} via {}", url, backend.name());
    for strategy in strategies {
        log::debug!("Trying {} strategy '{}'", backend.name(), strategy);
        match backend.attempt(url, &base, strategy) {
            Ok(()) if exists_nonempty(&mp3_path) => {
                log::info!("Saved {} (strategy '{}')", mp3_path.display(), strategy);
                return true;
            }
            Ok(()) => log::warn!(
                "Strategy '{}' failed: {}",
                strategy,
                FetchError::MissingOutput(mp3_path.clone())
            ),
            Err(e) => log::warn!("Strategy '{}' failed: {}", strategy, e),
        }
    }

    log::warn!(
        "Could not download {} after {} strategies; update {}, provide a cookies file, or place the file at {}",
        url,
        strategies.len(),
        backend.name(),
        mp3_path.display()
    );
    false
}

/// True when `program --version` (or ffmpeg-style `-version`) runs successfully.
pub fn tool_available(program: &str) -> bool {
    ["--version", "-version"].iter().any(|flag| {
        Command::new(program)
            .arg(flag)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    })
}
