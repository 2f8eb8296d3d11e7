//! Deterministic output and cache paths.
//!
//! The app finds audio purely by path construction from chapter style and
//! story key, so these functions are the contract between the pipeline and
//! its consumers. All story keys here are audio keys
//! ([`StorySoundscape::audio_key`](crate::types::StorySoundscape::audio_key)).

use std::path::{Path, PathBuf};

use crate::types::ChapterStyle;

/// Source whose cached download doubles as a composite chapter's ambient track.
pub const COMPOSITE_AMBIENT_SOURCE: &str = "ambient_loop";
/// Source whose cached download doubles as a forest story's ambient track.
pub const FOREST_AMBIENT_SOURCE: &str = "ambient";

/// True when `path` is a file with at least one byte.
pub fn exists_nonempty(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

/// Give a staged temp file (created 0600) the mode of an ordinary file, so
/// published audio is readable by whoever serves it.
#[cfg(unix)]
pub fn make_readable(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
pub fn make_readable(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

/// Completion marker: every path exists and is non-empty.
pub fn is_complete(paths: &[PathBuf]) -> bool {
    !paths.is_empty() && paths.iter().all(|p| exists_nonempty(p))
}

/// Every file a story must produce, primary mix first.
pub fn story_outputs(root: &Path, style: ChapterStyle, story: &str, ext: &str) -> Vec<PathBuf> {
    match style {
        ChapterStyle::Chant => vec![
            root.join("fadein").join(format!("{}_fadein.{}", story, ext)),
            root.join("ambient")
                .join(format!("{}_ambient_loop.{}", story, ext)),
        ],
        ChapterStyle::Composite => vec![root
            .join("composite")
            .join(format!("{}_composite.{}", story, ext))],
        ChapterStyle::Forest | ChapterStyle::Birth => vec![story_dir(root, style, story)
            .join(format!("{}_mix.{}", story, ext))],
    }
}

/// Where a downloaded source is cached.
///
/// Chant and composite sources share `raw/`; forest and birth stories keep
/// their sources next to their mix.
pub fn source_cache_path(root: &Path, style: ChapterStyle, story: &str, source: &str) -> PathBuf {
    let file = format!("{}.mp3", source);
    match style {
        ChapterStyle::Chant | ChapterStyle::Composite => root.join("raw").join(file),
        ChapterStyle::Forest | ChapterStyle::Birth => story_dir(root, style, story).join(file),
    }
}

fn story_dir(root: &Path, style: ChapterStyle, story: &str) -> PathBuf {
    root.join(style.as_str()).join(story)
}

/// A file the app may or may not find on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioRef {
    Present(PathBuf),
    Absent,
}

impl AudioRef {
    /// `Present` only for an existing, non-empty file.
    pub fn probe(path: PathBuf) -> Self {
        if exists_nonempty(&path) {
            AudioRef::Present(path)
        } else {
            AudioRef::Absent
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, AudioRef::Present(_))
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            AudioRef::Present(p) => Some(p),
            AudioRef::Absent => None,
        }
    }
}

/// The audio the app plays for a story.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoryAudio {
    pub primary: AudioRef,
    pub ambient: AudioRef,
}

/// Look up a story's playable audio the way the app does.
pub fn story_audio(root: &Path, style: ChapterStyle, story: &str, ext: &str) -> StoryAudio {
    let mut outputs = story_outputs(root, style, story, ext).into_iter();
    let primary = outputs.next().map(AudioRef::probe).unwrap_or(AudioRef::Absent);

    let ambient = match style {
        ChapterStyle::Chant => outputs.next().map(AudioRef::probe).unwrap_or(AudioRef::Absent),
        ChapterStyle::Composite => AudioRef::probe(source_cache_path(
            root,
            style,
            story,
            COMPOSITE_AMBIENT_SOURCE,
        )),
        ChapterStyle::Forest => {
            AudioRef::probe(source_cache_path(root, style, story, FOREST_AMBIENT_SOURCE))
        }
        ChapterStyle::Birth => AudioRef::Absent,
    };

    StoryAudio { primary, ambient }
}
