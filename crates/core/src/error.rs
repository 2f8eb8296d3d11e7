//! Error categories for the pipeline.
//!
//! Each enum covers one operational failure class. Signal and fetch errors are
//! handled close to where they happen and turned into fallbacks or `false`
//! results; config errors abort before any work starts.

use std::path::PathBuf;

use thiserror::Error;

/// A transform could not run on the given buffer(s).
#[derive(Debug, Error)]
pub enum SignalError {
    #[error("buffer contains non-finite samples")]
    NonFinite,
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
    #[error("layout mismatch: {left_channels}ch@{left_rate}Hz vs {right_channels}ch@{right_rate}Hz")]
    LayoutMismatch {
        left_channels: usize,
        left_rate: u32,
        right_channels: usize,
        right_rate: u32,
    },
    #[error("channels have unequal lengths")]
    RaggedChannels,
    #[error("buffer has no channels")]
    NoChannels,
    #[error("sample rate must be non-zero")]
    ZeroSampleRate,
}

impl SignalError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        SignalError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// One fetch attempt failed. Never escapes the fetcher's boolean API.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { status: u16, url: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}: {stderr}")]
    ToolFailed {
        program: String,
        status: String,
        stderr: String,
    },
    #[error("incomplete download: got {got} bytes, expected {expected}")]
    Incomplete { got: u64, expected: u64 },
    #[error("expected output was not created: {}", .0.display())]
    MissingOutput(PathBuf),
}

/// The configuration cannot be used.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("duplicate story `{story}` in chapter `{chapter}`")]
    DuplicateStory { chapter: String, story: String },
    #[error("duplicate chapter `{0}`")]
    DuplicateChapter(String),
    #[error("duplicate source `{source_name}` in story `{story}`")]
    DuplicateSource { story: String, source_name: String },
    #[error("story `{story}` in chapter `{chapter}` has no sources")]
    NoSources { chapter: String, story: String },
    #[error("loudness targets must rise from background to foreground ({lower} {lower_db} dBFS > {upper} {upper_db} dBFS)")]
    LoudnessOrder {
        lower: &'static str,
        lower_db: f64,
        upper: &'static str,
        upper_db: f64,
    },
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
}
