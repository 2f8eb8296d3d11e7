//! Per-story results of a build, and the on-disk status of every story.

use std::path::PathBuf;

use serde::Serialize;

use crate::config::PipelineConfig;
use crate::layout::{self, StoryAudio};
use crate::types::{ChapterStyle, StoryState};

/// Terminal result of one story.
#[derive(Debug, Clone, Serialize)]
pub struct StoryOutcome {
    pub chapter: String,
    pub story: String,
    pub state: StoryState,
    /// Why a story failed or was skipped; empty when exported.
    pub detail: String,
}

/// Totals for one chapter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChapterSummary {
    pub chapter: String,
    pub exported: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    pub outcomes: Vec<StoryOutcome>,
}

impl BuildReport {
    pub fn count(&self, state: StoryState) -> usize {
        self.outcomes.iter().filter(|o| o.state == state).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &StoryOutcome> {
        self.outcomes.iter().filter(|o| o.state == StoryState::Failed)
    }

    pub fn outcome(&self, chapter: &str, story: &str) -> Option<&StoryOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.chapter == chapter && o.story == story)
    }

    /// Totals per chapter, in build order.
    pub fn chapter_summaries(&self) -> Vec<ChapterSummary> {
        let mut summaries: Vec<ChapterSummary> = Vec::new();
        for outcome in &self.outcomes {
            let idx = match summaries.iter().position(|s| s.chapter == outcome.chapter) {
                Some(i) => i,
                None => {
                    summaries.push(ChapterSummary {
                        chapter: outcome.chapter.clone(),
                        ..ChapterSummary::default()
                    });
                    summaries.len() - 1
                }
            };
            let summary = &mut summaries[idx];
            match outcome.state {
                StoryState::Exported => summary.exported += 1,
                StoryState::Skipped => summary.skipped += 1,
                StoryState::Failed => summary.failed += 1,
                _ => {}
            }
        }
        summaries
    }
}

/// What is on disk for one story.
#[derive(Debug, Clone)]
pub struct StoryStatus {
    pub chapter: String,
    pub style: ChapterStyle,
    pub story: String,
    /// Every declared output with whether it satisfies the completion marker.
    pub outputs: Vec<(PathBuf, bool)>,
    /// What the app would play.
    pub audio: StoryAudio,
}

impl StoryStatus {
    pub fn is_complete(&self) -> bool {
        !self.outputs.is_empty() && self.outputs.iter().all(|(_, ok)| *ok)
    }
}

/// Check the output tree against every story in the config.
pub fn scan_outputs(config: &PipelineConfig) -> Vec<StoryStatus> {
    let root = &config.output_root;
    let ext = config.export.format.extension();
    let mut statuses = Vec::new();
    for chapter in &config.chapters {
        for story in &chapter.stories {
            let key = story.audio_key();
            let outputs = layout::story_outputs(root, chapter.style, key, ext)
                .into_iter()
                .map(|p| {
                    let ok = layout::exists_nonempty(&p);
                    (p, ok)
                })
                .collect();
            statuses.push(StoryStatus {
                chapter: chapter.key.clone(),
                style: chapter.style,
                story: story.key.clone(),
                outputs,
                audio: layout::story_audio(root, chapter.style, key, ext),
            });
        }
    }
    statuses
}
