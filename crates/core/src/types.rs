use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a source's audio comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Media page resolved by the bulk download tool (yt-dlp).
    Bulk,
    /// Plain HTTP(S) URL of an audio file.
    Direct,
}

/// Mix role of a layer, quietest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Ambient beds and drones.
    Background,
    /// Instrument loops and other sustained texture.
    Texture,
    /// Short sound effects and whispers.
    Incidental,
    /// Melodic layers above the bed.
    Supporting,
    /// Chant or voice carrying the piece.
    Foreground,
}

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Background,
        Role::Texture,
        Role::Incidental,
        Role::Supporting,
        Role::Foreground,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Background => "background",
            Role::Texture => "texture",
            Role::Incidental => "incidental",
            Role::Supporting => "supporting",
            Role::Foreground => "foreground",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audio input of a story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Cache file stem, unique within the story's cache directory.
    pub name: String,
    pub kind: SourceKind,
    pub url: String,
    pub role: Role,
    /// A failed required source fails the story; optional ones are dropped.
    #[serde(default = "default_required")]
    pub required: bool,
    /// Trim applied after the role's loudness target.
    #[serde(default)]
    pub gain_db: f64,
}

fn default_required() -> bool {
    true
}

/// How a chapter turns its sources into outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStyle {
    /// One chant per story, rendered as a faded-in version and an ambient loop.
    Chant,
    /// Background bed with one-shot layers staggered over it.
    Composite,
    /// Plain mix of ambient, instrument, chant and optional extras.
    Forest,
    /// Plain mix of a bed and supporting layers, all optional.
    Birth,
}

impl ChapterStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterStyle::Chant => "chant",
            ChapterStyle::Composite => "composite",
            ChapterStyle::Forest => "forest",
            ChapterStyle::Birth => "birth",
        }
    }
}

impl fmt::Display for ChapterStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A story's soundscape: the unit of work of the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorySoundscape {
    pub key: String,
    /// Key used for file paths when it differs from the narrative key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_key: Option<String>,
    pub sources: Vec<SourceSpec>,
}

impl StorySoundscape {
    pub fn audio_key(&self) -> &str {
        self.audio_key.as_deref().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub key: String,
    pub style: ChapterStyle,
    pub stories: Vec<StorySoundscape>,
}

/// Progress of one story through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoryState {
    Pending,
    Fetching,
    Decoding,
    Condensing,
    Mixing,
    Exported,
    /// Outputs already existed.
    Skipped,
    Failed,
}

impl StoryState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StoryState::Exported | StoryState::Skipped | StoryState::Failed
        )
    }
}

impl fmt::Display for StoryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StoryState::Pending => "pending",
            StoryState::Fetching => "fetching",
            StoryState::Decoding => "decoding",
            StoryState::Condensing => "condensing",
            StoryState::Mixing => "mixing",
            StoryState::Exported => "exported",
            StoryState::Skipped => "skipped",
            StoryState::Failed => "failed",
        };
        f.write_str(s)
    }
}
