//! Chapter builders: fetch, decode, condense, level, mix and export every
//! story of every chapter.
//!
//! Stories are independent. A story whose outputs already exist is skipped
//! without touching its sources, and a story that fails never stops its
//! siblings.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::audio::buffer::AudioBuffer;
use crate::audio::dynamics::set_target_loudness;
use crate::audio::effects::{apply_gain, fade_in, fade_out, low_pass, overlay, peak_normalize, repeat};
use crate::audio::io::decode_file;
use crate::condense::condense;
use crate::config::PipelineConfig;
use crate::export::export;
use crate::fetch::SourceFetcher;
use crate::layout::{exists_nonempty, is_complete, source_cache_path, story_outputs};
use crate::mix::{loop_to_duration, mix, staggered_overlay};
use crate::report::{BuildReport, StoryOutcome};
use crate::types::{Chapter, ChapterStyle, Role, SourceSpec, StorySoundscape, StoryState};

/// Tracks one story through its states, logging every transition.
struct StoryRun<'a> {
    chapter: &'a str,
    story: &'a str,
    state: StoryState,
}

impl<'a> StoryRun<'a> {
    fn new(chapter: &'a str, story: &'a str) -> Self {
        Self {
            chapter,
            story,
            state: StoryState::Pending,
        }
    }

    fn advance(&mut self, next: StoryState) {
        log::debug!("{}/{}: {} -> {}", self.chapter, self.story, self.state, next);
        self.state = next;
    }

    fn finish(mut self, state: StoryState, detail: impl Into<String>) -> StoryOutcome {
        self.advance(state);
        StoryOutcome {
            chapter: self.chapter.to_string(),
            story: self.story.to_string(),
            state,
            detail: detail.into(),
        }
    }
}

/// A decoded, condensed and leveled source, ready to mix.
pub struct Layer<'a> {
    pub source: &'a SourceSpec,
    pub audio: AudioBuffer,
}

pub struct Builder<'a> {
    config: &'a PipelineConfig,
    fetcher: &'a dyn SourceFetcher,
}

impl<'a> Builder<'a> {
    pub fn new(config: &'a PipelineConfig, fetcher: &'a dyn SourceFetcher) -> Self {
        Self { config, fetcher }
    }

    /// Build every chapter, or only `only_chapter` when given.
    pub fn run(&self, only_chapter: Option<&str>) -> BuildReport {
        let mut report = BuildReport::default();
        for chapter in &self.config.chapters {
            if only_chapter.is_some_and(|key| key != chapter.key) {
                continue;
            }
            log::info!(
                "Building chapter {} ({} stories, {} style)",
                chapter.key,
                chapter.stories.len(),
                chapter.style
            );
            for story in &chapter.stories {
                report.outcomes.push(self.build_story(chapter, story));
            }
        }
        report
    }

    pub fn build_story(&self, chapter: &Chapter, story: &StorySoundscape) -> StoryOutcome {
        let mut run = StoryRun::new(&chapter.key, &story.key);
        let root = &self.config.output_root;
        let key = story.audio_key();
        let outputs = story_outputs(root, chapter.style, key, self.config.export.format.extension());

        if is_complete(&outputs) {
            log::info!("Skipping {}: outputs already exist", story.key);
            return run.finish(StoryState::Skipped, "outputs already exist");
        }

        run.advance(StoryState::Fetching);
        let mut fetched: Vec<(&SourceSpec, PathBuf)> = Vec::with_capacity(story.sources.len());
        for source in &story.sources {
            let dest = source_cache_path(root, chapter.style, key, &source.name);
            if self.fetcher.fetch(source, &dest) {
                fetched.push((source, dest));
            } else if source.required {
                log::warn!("Skipping {}: required source '{}' unavailable", story.key, source.name);
                return run.finish(
                    StoryState::Failed,
                    format!("required source '{}' unavailable", source.name),
                );
            } else {
                log::warn!("Dropping optional source '{}' of {}", source.name, story.key);
            }
        }

        run.advance(StoryState::Decoding);
        let mut decoded: Vec<(&SourceSpec, AudioBuffer)> = Vec::with_capacity(fetched.len());
        for (source, path) in fetched {
            match decode_file(&path, self.config.sample_rate, self.config.channels) {
                Ok(audio) => decoded.push((source, audio)),
                Err(e) if source.required => {
                    log::warn!("Skipping {}: cannot decode '{}': {:#}", story.key, source.name, e);
                    return run.finish(
                        StoryState::Failed,
                        format!("cannot decode '{}': {:#}", source.name, e),
                    );
                }
                Err(e) => {
                    log::warn!("Dropping optional source '{}': {:#}", source.name, e);
                }
            }
        }
        if decoded.is_empty() {
            log::warn!("Skipping {}: no usable audio layers", story.key);
            return run.finish(StoryState::Failed, "no usable audio layers");
        }

        run.advance(StoryState::Condensing);
        let layers: Vec<Layer> = decoded
            .into_iter()
            .map(|(source, audio)| self.prepare_layer(source, &audio))
            .collect();

        run.advance(StoryState::Mixing);
        match self.render(chapter.style, &layers, &outputs) {
            Ok(()) => run.finish(StoryState::Exported, ""),
            Err(e) => {
                log::error!("Failed to render {}: {:#}", story.key, e);
                run.finish(StoryState::Failed, format!("{:#}", e))
            }
        }
    }

    /// Condense, bring to the role's loudness target, apply the source trim.
    pub fn prepare_layer<'s>(&self, source: &'s SourceSpec, audio: &AudioBuffer) -> Layer<'s> {
        let condensed = condense(audio, &self.config.condense);
        let target = self.config.loudness.target(source.role);
        let leveled = set_target_loudness(&condensed, target, self.config.loudness.soft_clip);
        log::debug!(
            "Layer '{}' ({}): {} ms -> {} ms at {} dBFS",
            source.name,
            source.role,
            audio.len_ms(),
            leveled.len_ms(),
            target + source.gain_db
        );
        Layer {
            source,
            audio: apply_gain(&leveled, source.gain_db),
        }
    }

    fn render(&self, style: ChapterStyle, layers: &[Layer], outputs: &[PathBuf]) -> Result<()> {
        match style {
            ChapterStyle::Chant => self.render_chant(layers, outputs),
            ChapterStyle::Composite => {
                let composite = self.render_composite(layers)?;
                self.write(&composite, &outputs[0])
            }
            ChapterStyle::Forest | ChapterStyle::Birth => {
                let buffers: Vec<AudioBuffer> = layers.iter().map(|l| l.audio.clone()).collect();
                let mixed = mix(&buffers, &self.config.mix);
                self.write(&mixed, &outputs[0])
            }
        }
    }

    /// Faded-in chant plus a filtered, quieter ambient loop. Only missing
    /// outputs are written.
    fn render_chant(&self, layers: &[Layer], outputs: &[PathBuf]) -> Result<()> {
        let settings = &self.config.chant;
        let chant = &layers[0].audio;
        if layers.len() > 1 {
            log::debug!("Chant stories use their first source; {} ignored", layers.len() - 1);
        }

        if !exists_nonempty(&outputs[0]) {
            let faded = fade_in(chant, settings.fade_in_ms);
            let out = peak_normalize(&faded, self.config.mix.normalize_headroom_db);
            self.write(&out, &outputs[0])?;
        }

        if !exists_nonempty(&outputs[1]) {
            let filtered = match low_pass(chant, settings.ambient_cutoff_hz) {
                Ok(f) => f,
                Err(e) => {
                    log::warn!("Ambient low-pass skipped: {}", e);
                    chant.clone()
                }
            };
            let faded = fade_out(
                &fade_in(&filtered, settings.ambient_fade_ms),
                settings.ambient_fade_ms,
            );
            let quiet = apply_gain(
                &peak_normalize(&faded, self.config.mix.normalize_headroom_db),
                settings.ambient_gain_db,
            );
            let ambient = repeat(
                &quiet.truncate_ms(settings.ambient_loop_ms),
                settings.ambient_repeats.max(1),
            );
            self.write(&ambient, &outputs[1])?;
        }
        Ok(())
    }

    /// Background layers looped into a fixed-length bed, everything else
    /// staggered across it.
    pub fn render_composite(&self, layers: &[Layer]) -> Result<AudioBuffer> {
        let settings = &self.config.composite;
        let mut bed = AudioBuffer::silent(settings.bed_ms, self.config.sample_rate, self.config.channels);

        let (beds, one_shots): (Vec<&Layer>, Vec<&Layer>) =
            layers.iter().partition(|l| l.source.role == Role::Background);
        for layer in beds {
            let looped = loop_to_duration(&layer.audio, settings.bed_ms);
            bed = overlay(&bed, &looped, 0)
                .with_context(|| format!("Cannot lay '{}' into the bed", layer.source.name))?;
        }

        let overlays: Vec<AudioBuffer> = one_shots.iter().map(|l| l.audio.clone()).collect();
        let composite = staggered_overlay(&bed, &overlays).context("Cannot stagger overlays")?;

        let normalized = peak_normalize(&composite, self.config.mix.normalize_headroom_db);
        Ok(fade_out(
            &fade_in(&normalized, settings.fade_in_ms),
            settings.fade_out_ms,
        ))
    }

    fn write(&self, buffer: &AudioBuffer, dest: &Path) -> Result<()> {
        export(buffer, dest, &self.config.export)
            .with_context(|| format!("Failed to export {}", dest.display()))
    }
}

/// Build the configured chapters with `fetcher`.
pub fn run_pipeline(
    config: &PipelineConfig,
    fetcher: &dyn SourceFetcher,
    only_chapter: Option<&str>,
) -> BuildReport {
    Builder::new(config, fetcher).run(only_chapter)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::analysis::dbfs;
    use crate::audio::io::write_wav;
    use crate::condense::CondenseSettings;
    use crate::config::{ChantSettings, CompositeSettings, ExportFormat};
    use crate::layout::{story_audio, AudioRef};
    use crate::types::SourceKind;
    use std::cell::RefCell;
    use std::collections::HashMap;

    const SR: u32 = 8000;

    /// Serves WAV fixtures keyed by URL and records every request.
    struct FixtureFetcher {
        fixtures: HashMap<String, AudioBuffer>,
        requests: RefCell<Vec<String>>,
    }

    impl FixtureFetcher {
        fn new() -> Self {
            Self {
                fixtures: HashMap::new(),
                requests: RefCell::new(Vec::new()),
            }
        }

        fn with(mut self, url: &str, audio: AudioBuffer) -> Self {
            self.fixtures.insert(url.to_string(), audio);
            self
        }

        fn request_count(&self) -> usize {
            self.requests.borrow().len()
        }
    }

    impl SourceFetcher for FixtureFetcher {
        fn fetch(&self, source: &SourceSpec, dest: &Path) -> bool {
            if exists_nonempty(dest) {
                return true;
            }
            self.requests.borrow_mut().push(source.url.clone());
            match self.fixtures.get(&source.url) {
                Some(audio) => write_wav(dest, audio).is_ok(),
                None => false,
            }
        }
    }

    /// Sine with a slow swell so condensing has something to choose.
    fn tone(len_ms: u64, freq: f64, amplitude: f32) -> AudioBuffer {
        let n = (len_ms * SR as u64 / 1000) as usize;
        AudioBuffer::mono(
            (0..n)
                .map(|i| {
                    let t = i as f64 / SR as f64;
                    let swell = 0.6 + 0.4 * (t * 0.3).sin();
                    ((t * freq * std::f64::consts::TAU).sin() * swell) as f32 * amplitude
                })
                .collect(),
            SR,
        )
    }

    fn src(name: &str, kind: SourceKind, role: Role, required: bool) -> SourceSpec {
        SourceSpec {
            name: name.into(),
            kind,
            url: format!("https://media.test/{}", name),
            role,
            required,
            gain_db: 0.0,
        }
    }

    fn test_config(root: &Path, chapters: Vec<Chapter>) -> PipelineConfig {
        PipelineConfig {
            output_root: root.to_path_buf(),
            sample_rate: SR,
            channels: 1,
            condense: CondenseSettings {
                target_ms: 20_000,
                window_ms: 1000,
                segment_ms: 5000,
                min_gap_ms: 2000,
                crossfade_ms: 100,
            },
            chant: ChantSettings {
                ambient_loop_ms: 5000,
                ..ChantSettings::default()
            },
            composite: CompositeSettings {
                bed_ms: 10_000,
                ..CompositeSettings::default()
            },
            export: crate::config::ExportSettings {
                format: ExportFormat::Wav,
                ..Default::default()
            },
            chapters,
            ..PipelineConfig::default()
        }
    }

    fn temp_root(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("scroll_audio_builder_{}_{}", name, std::process::id()));
        std::fs::remove_dir_all(&dir).ok();
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn forest_chapter() -> Chapter {
        Chapter {
            key: "weapon_quest".into(),
            style: ChapterStyle::Forest,
            stories: vec![StorySoundscape {
                key: "trial_of_heaven".into(),
                audio_key: None,
                sources: vec![
                    src("ambient", SourceKind::Direct, Role::Background, true),
                    src("instrument", SourceKind::Direct, Role::Texture, true),
                    src("chant", SourceKind::Bulk, Role::Foreground, true),
                ],
            }],
        }
    }

    fn forest_fetcher() -> FixtureFetcher {
        FixtureFetcher::new()
            .with("https://media.test/ambient", tone(40_000, 110.0, 0.3))
            .with("https://media.test/instrument", tone(12_000, 220.0, 0.5))
            .with("https://media.test/chant", tone(30_000, 330.0, 0.4))
    }

    fn output_len_ms(path: &Path) -> u64 {
        decode_file(path, SR, 1).unwrap().len_ms()
    }

    #[test]
    fn test_fresh_forest_build() {
        let root = temp_root("fresh");
        let config = test_config(&root, vec![forest_chapter()]);
        let fetcher = forest_fetcher();

        let report = run_pipeline(&config, &fetcher, None);
        assert_eq!(report.count(StoryState::Exported), 1);
        assert_eq!(fetcher.request_count(), 3);

        let out = root.join("forest/trial_of_heaven/trial_of_heaven_mix.wav");
        // Shortest layer is the 12 s instrument; the others condense to 20 s
        assert_eq!(output_len_ms(&out), 12_000);

        let audio = story_audio(&root, ChapterStyle::Forest, "trial_of_heaven", "wav");
        assert_eq!(audio.primary, AudioRef::Present(out));
        assert!(audio.ambient.is_present());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_second_run_is_idempotent() {
        let root = temp_root("idempotent");
        let config = test_config(&root, vec![forest_chapter()]);
        let out = root.join("forest/trial_of_heaven/trial_of_heaven_mix.wav");

        let first = forest_fetcher();
        run_pipeline(&config, &first, None);
        let bytes = std::fs::read(&out).unwrap();

        let second = forest_fetcher();
        let report = run_pipeline(&config, &second, None);
        assert_eq!(report.count(StoryState::Skipped), 1);
        assert_eq!(second.request_count(), 0);
        assert_eq!(std::fs::read(&out).unwrap(), bytes);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_builds_are_reproducible() {
        let root_a = temp_root("repro_a");
        let root_b = temp_root("repro_b");
        run_pipeline(&test_config(&root_a, vec![forest_chapter()]), &forest_fetcher(), None);
        run_pipeline(&test_config(&root_b, vec![forest_chapter()]), &forest_fetcher(), None);

        let rel = "forest/trial_of_heaven/trial_of_heaven_mix.wav";
        assert_eq!(
            std::fs::read(root_a.join(rel)).unwrap(),
            std::fs::read(root_b.join(rel)).unwrap()
        );

        std::fs::remove_dir_all(&root_a).ok();
        std::fs::remove_dir_all(&root_b).ok();
    }

    #[test]
    fn test_partial_outage() {
        let root = temp_root("outage");
        let mut chapter = forest_chapter();

        // Optional extra that cannot be fetched: story still builds
        chapter.stories[0]
            .sources
            .push(src("harp_yt", SourceKind::Bulk, Role::Supporting, false));

        // Sibling whose required chant is unreachable
        let mut broken = chapter.stories[0].clone();
        broken.key = "celestial_audience".into();
        broken.sources[2].url = "https://media.test/unreachable".into();
        chapter.stories.insert(0, broken);

        let config = test_config(&root, vec![chapter]);
        let report = run_pipeline(&config, &forest_fetcher(), None);

        let failed = report.outcome("weapon_quest", "celestial_audience").unwrap();
        assert_eq!(failed.state, StoryState::Failed);
        assert!(failed.detail.contains("chant"));
        assert!(!root
            .join("forest/celestial_audience/celestial_audience_mix.wav")
            .exists());

        let built = report.outcome("weapon_quest", "trial_of_heaven").unwrap();
        assert_eq!(built.state, StoryState::Exported);
        assert!(exists_nonempty(
            &root.join("forest/trial_of_heaven/trial_of_heaven_mix.wav")
        ));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_undecodable_required_source_fails_story() {
        struct GarbageFetcher;
        impl SourceFetcher for GarbageFetcher {
            fn fetch(&self, _source: &SourceSpec, dest: &Path) -> bool {
                std::fs::create_dir_all(dest.parent().unwrap()).unwrap();
                std::fs::write(dest, b"<html>rate limited</html>").is_ok()
            }
        }

        let root = temp_root("garbage");
        let config = test_config(&root, vec![forest_chapter()]);
        let report = run_pipeline(&config, &GarbageFetcher, None);
        let outcome = report.outcome("weapon_quest", "trial_of_heaven").unwrap();
        assert_eq!(outcome.state, StoryState::Failed);
        assert!(outcome.detail.contains("decode"));

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_birth_story_with_no_layers_fails() {
        let root = temp_root("birth_empty");
        let chapter = Chapter {
            key: "birth_of_dharma".into(),
            style: ChapterStyle::Birth,
            stories: vec![StorySoundscape {
                key: "cosmic_egg".into(),
                audio_key: Some("cosmic_breath".into()),
                sources: vec![
                    src("pixabay_0", SourceKind::Direct, Role::Background, false),
                    src("youtube_1", SourceKind::Bulk, Role::Supporting, false),
                ],
            }],
        };
        let config = test_config(&root, vec![chapter]);
        let report = run_pipeline(&config, &FixtureFetcher::new(), None);
        assert_eq!(report.count(StoryState::Failed), 1);

        // Now with one layer available, built under the audio key
        let fetcher = FixtureFetcher::new().with("https://media.test/youtube_1", tone(8000, 440.0, 0.3));
        let report = run_pipeline(&config, &fetcher, None);
        assert_eq!(report.count(StoryState::Exported), 1);
        assert_eq!(
            output_len_ms(&root.join("birth/cosmic_breath/cosmic_breath_mix.wav")),
            8000
        );

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_chant_outputs() {
        let root = temp_root("chant");
        let chapter = Chapter {
            key: "gita_scroll".into(),
            style: ChapterStyle::Chant,
            stories: vec![StorySoundscape {
                key: "lotus_of_doubt".into(),
                audio_key: None,
                sources: vec![src("lotus_of_doubt", SourceKind::Bulk, Role::Foreground, true)],
            }],
        };
        let config = test_config(&root, vec![chapter]);
        let fetcher = FixtureFetcher::new().with("https://media.test/lotus_of_doubt", tone(45_000, 260.0, 0.4));

        let report = run_pipeline(&config, &fetcher, None);
        assert_eq!(report.count(StoryState::Exported), 1);
        assert!(root.join("raw/lotus_of_doubt.mp3").is_file());

        let fadein = root.join("fadein/lotus_of_doubt_fadein.wav");
        let ambient = root.join("ambient/lotus_of_doubt_ambient_loop.wav");
        assert_eq!(output_len_ms(&fadein), 20_000);
        // First 5 s of the filtered chant, twice
        assert_eq!(output_len_ms(&ambient), 10_000);

        let fadein_level = dbfs(&decode_file(&fadein, SR, 1).unwrap());
        let ambient_level = dbfs(&decode_file(&ambient, SR, 1).unwrap());
        assert!(ambient_level < fadein_level);

        // A lost ambient loop is rebuilt without touching the fade-in
        let fadein_bytes = std::fs::read(&fadein).unwrap();
        std::fs::remove_file(&ambient).unwrap();
        let report = run_pipeline(&config, &fetcher, None);
        assert_eq!(report.count(StoryState::Exported), 1);
        assert!(ambient.is_file());
        assert_eq!(std::fs::read(&fadein).unwrap(), fadein_bytes);

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_composite_bed_and_staggering() {
        let root = temp_root("composite");
        let mut ambient = src("ambient_loop", SourceKind::Bulk, Role::Background, false);
        ambient.gain_db = -1.0;
        let chapter = Chapter {
            key: "fall_of_dharma".into(),
            style: ChapterStyle::Composite,
            stories: vec![StorySoundscape {
                key: "game_of_fate".into(),
                audio_key: None,
                sources: vec![
                    src("base_drone", SourceKind::Bulk, Role::Background, false),
                    src("dice_fx", SourceKind::Bulk, Role::Incidental, false),
                    src("climax_bells", SourceKind::Bulk, Role::Supporting, false),
                    ambient,
                ],
            }],
        };
        let config = test_config(&root, vec![chapter]);
        let fetcher = FixtureFetcher::new()
            .with("https://media.test/base_drone", tone(3000, 55.0, 0.3))
            .with("https://media.test/dice_fx", tone(1500, 900.0, 0.5))
            .with("https://media.test/climax_bells", tone(30_000, 1200.0, 0.5))
            .with("https://media.test/ambient_loop", tone(4000, 80.0, 0.3));

        let report = run_pipeline(&config, &fetcher, None);
        assert_eq!(report.count(StoryState::Exported), 1);

        let out = root.join("composite/game_of_fate_composite.wav");
        assert_eq!(output_len_ms(&out), 10_000);

        // The shared ambient source doubles as the chapter's ambient track
        let audio = story_audio(&root, ChapterStyle::Composite, "game_of_fate", "wav");
        assert!(audio.primary.is_present());
        assert!(audio.ambient.is_present());

        std::fs::remove_dir_all(&root).ok();
    }

    #[test]
    fn test_layer_loudness_follows_roles() {
        let root = temp_root("roles");
        let config = test_config(&root, vec![]);
        let fetcher = FixtureFetcher::new();
        let builder = Builder::new(&config, &fetcher);

        let sources = [
            src("bed", SourceKind::Direct, Role::Background, true),
            src("loop", SourceKind::Direct, Role::Texture, true),
            src("melody", SourceKind::Bulk, Role::Supporting, true),
            src("voice", SourceKind::Bulk, Role::Foreground, true),
        ];
        // Inputs deliberately in the opposite loudness order
        let inputs = [
            tone(30_000, 100.0, 0.8),
            tone(30_000, 200.0, 0.4),
            tone(30_000, 300.0, 0.2),
            tone(30_000, 400.0, 0.05),
        ];
        let levels: Vec<f64> = sources
            .iter()
            .zip(&inputs)
            .map(|(s, a)| dbfs(&builder.prepare_layer(s, a).audio))
            .collect();

        for pair in levels.windows(2) {
            assert!(pair[0] <= pair[1], "levels not ascending: {:?}", levels);
        }
        assert!((levels[0] + 24.0).abs() < 0.5);
        assert!((levels[3] + 18.0).abs() < 0.5);
    }

    #[test]
    fn test_only_chapter_filter() {
        let root = temp_root("filter");
        let mut other = forest_chapter();
        other.key = "other".into();
        let config = test_config(&root, vec![forest_chapter(), other]);
        let report = run_pipeline(&config, &forest_fetcher(), Some("other"));
        assert_eq!(report.outcomes.len(), 1);
        assert_eq!(report.outcomes[0].chapter, "other");
        std::fs::remove_dir_all(&root).ok();
    }
}
