//! Pipeline configuration: processing parameters plus the chapter catalog.
//!
//! Loaded once from JSON and passed by reference everywhere. Every numeric
//! field has a default, so a config file may contain nothing but `chapters`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::condense::CondenseSettings;
use crate::error::ConfigError;
use crate::mix::MixSettings;
use crate::types::{Chapter, Role};

/// Catalog shipped with the crate.
const BUILTIN_CATALOG: &str = include_str!("../config/soundscapes.json");

/// Target RMS level per mix role, in dBFS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoudnessTargets {
    pub background: f64,
    pub texture: f64,
    pub incidental: f64,
    pub supporting: f64,
    pub foreground: f64,
    /// Run the soft-clip compressor after each gain stage.
    pub soft_clip: bool,
}

impl Default for LoudnessTargets {
    fn default() -> Self {
        Self {
            background: -24.0,
            texture: -21.0,
            incidental: -20.0,
            supporting: -19.0,
            foreground: -18.0,
            soft_clip: true,
        }
    }
}

impl LoudnessTargets {
    pub fn target(&self, role: Role) -> f64 {
        match role {
            Role::Background => self.background,
            Role::Texture => self.texture,
            Role::Incidental => self.incidental,
            Role::Supporting => self.supporting,
            Role::Foreground => self.foreground,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for pair in Role::ALL.windows(2) {
            let (lower, upper) = (pair[0], pair[1]);
            let (lower_db, upper_db) = (self.target(lower), self.target(upper));
            if !(lower_db.is_finite() && upper_db.is_finite()) || lower_db > upper_db {
                return Err(ConfigError::LoudnessOrder {
                    lower: lower.as_str(),
                    lower_db,
                    upper: upper.as_str(),
                    upper_db,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Wav,
    Mp3,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Wav => "wav",
            ExportFormat::Mp3 => "mp3",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(ExportFormat::Wav),
            "mp3" => Ok(ExportFormat::Mp3),
            other => Err(format!("unknown export format '{}' (expected wav or mp3)", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub format: ExportFormat,
    pub bitrate_kbps: u32,
    /// Encoder program used for MP3 output.
    pub ffmpeg: String,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            format: ExportFormat::Mp3,
            bitrate_kbps: 192,
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

/// Bulk download tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkSettings {
    pub program: String,
    /// Client identities tried in order until one succeeds.
    pub strategies: Vec<String>,
    /// First existing file is passed as a cookie jar.
    pub cookie_files: Vec<PathBuf>,
    pub audio_quality: String,
}

impl Default for BulkSettings {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            strategies: ["web", "mweb", "android", "ios"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            cookie_files: vec![
                PathBuf::from("cookies.txt"),
                PathBuf::from("assets/cookies.txt"),
            ],
            audio_quality: "192K".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectSettings {
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for DirectSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 120,
            user_agent: concat!("scroll-audio/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

/// Rendering of chant-style stories.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChantSettings {
    pub fade_in_ms: u64,
    pub ambient_cutoff_hz: f64,
    pub ambient_fade_ms: u64,
    /// Level change of the ambient loop after normalization.
    pub ambient_gain_db: f64,
    /// Length of the passage that is repeated to form the ambient loop.
    pub ambient_loop_ms: u64,
    pub ambient_repeats: usize,
}

impl Default for ChantSettings {
    fn default() -> Self {
        Self {
            fade_in_ms: 5000,
            ambient_cutoff_hz: 400.0,
            ambient_fade_ms: 3000,
            ambient_gain_db: -6.0,
            ambient_loop_ms: 60_000,
            ambient_repeats: 2,
        }
    }
}

/// Rendering of composite-style stories.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositeSettings {
    pub bed_ms: u64,
    pub fade_in_ms: u64,
    pub fade_out_ms: u64,
}

impl Default for CompositeSettings {
    fn default() -> Self {
        Self {
            bed_ms: 60_000,
            fade_in_ms: 1500,
            fade_out_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub output_root: PathBuf,
    /// Working layout every source is decoded into.
    pub sample_rate: u32,
    pub channels: usize,
    pub export: ExportSettings,
    pub loudness: LoudnessTargets,
    pub condense: CondenseSettings,
    pub mix: MixSettings,
    pub chant: ChantSettings,
    pub composite: CompositeSettings,
    pub bulk: BulkSettings,
    pub direct: DirectSettings,
    pub chapters: Vec<Chapter>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_root: PathBuf::from("assets/audio"),
            sample_rate: 44100,
            channels: 2,
            export: ExportSettings::default(),
            loudness: LoudnessTargets::default(),
            condense: CondenseSettings::default(),
            mix: MixSettings::default(),
            chant: ChantSettings::default(),
            composite: CompositeSettings::default(),
            bulk: BulkSettings::default(),
            direct: DirectSettings::default(),
            chapters: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Parse and validate a JSON config.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_json(&json)?;
        log::debug!(
            "Loaded {} chapters from {}",
            config.chapters.len(),
            path.display()
        );
        Ok(config)
    }

    /// The catalog of every chapter of the app.
    pub fn builtin() -> Result<Self, ConfigError> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn chapter(&self, key: &str) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.key == key)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Zero("sample_rate"));
        }
        if self.channels == 0 {
            return Err(ConfigError::Zero("channels"));
        }
        let durations = [
            ("condense.target_ms", self.condense.target_ms),
            ("condense.window_ms", self.condense.window_ms),
            ("condense.segment_ms", self.condense.segment_ms),
            ("composite.bed_ms", self.composite.bed_ms),
            ("chant.ambient_loop_ms", self.chant.ambient_loop_ms),
        ];
        for (name, value) in durations {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.export.bitrate_kbps == 0 {
            return Err(ConfigError::Zero("export.bitrate_kbps"));
        }
        if self.bulk.strategies.is_empty() {
            return Err(ConfigError::Zero("bulk.strategies"));
        }
        if self.direct.timeout_secs == 0 {
            return Err(ConfigError::Zero("direct.timeout_secs"));
        }
        self.loudness.validate()?;

        let mut chapter_keys = HashSet::new();
        for chapter in &self.chapters {
            if !chapter_keys.insert(chapter.key.as_str()) {
                return Err(ConfigError::DuplicateChapter(chapter.key.clone()));
            }
            let mut story_keys = HashSet::new();
            for story in &chapter.stories {
                if !story_keys.insert(story.key.as_str()) {
                    return Err(ConfigError::DuplicateStory {
                        chapter: chapter.key.clone(),
                        story: story.key.clone(),
                    });
                }
                if story.sources.is_empty() {
                    return Err(ConfigError::NoSources {
                        chapter: chapter.key.clone(),
                        story: story.key.clone(),
                    });
                }
                let mut names = HashSet::new();
                for source in &story.sources {
                    if !names.insert(source.name.as_str()) {
                        return Err(ConfigError::DuplicateSource {
                            story: story.key.clone(),
                            source_name: source.name.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}
