//! The battle orchestrator.
//!
//! One task per run. The pipeline walks the stage machine in order, calls the
//! media service adapters, and publishes a progress snapshot after every
//! meaningful transition. Degradable stages (style transfer, talking heads,
//! lip-sync) log and fall back; fatal stages (voice synthesis, beat
//! generation, mixing, composition) abort the run through the single
//! top-level failure handler.

pub mod registry;
pub mod stage;
pub mod state;

pub use registry::{BattleRegistry, RunHandle};
pub use stage::{BattleStage, ProgressEvent, ProgressSnapshot};
pub use state::{BattleConfig, BattleState, FighterConfig};

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::Stream;
use log::{error, info, warn};
use uuid::Uuid;

use crate::adapters::{join_fallible_pair, AdapterResult, FailureReason, MediaServices};
use crate::audio::{align, beat::BeatSynth, bpm, mixer, AudioClip};
use crate::config::AppConfig;
use crate::error::{BattleError, Result};
use crate::script::{self, shots, BattleSegment, Speaker};
use crate::video::{self, compose};

/// Voice-clone settings passed to the style-transfer service.
const STYLE_STABILITY: f32 = 0.5;
const STYLE_SIMILARITY: f32 = 0.75;

/// Creates battle runs and drives them to completion in the background.
#[derive(Clone)]
pub struct BattleRunner {
    config: Arc<AppConfig>,
    services: MediaServices,
    registry: BattleRegistry,
}

impl BattleRunner {
    pub fn new(config: AppConfig, services: MediaServices, registry: BattleRegistry) -> Self {
        Self {
            config: Arc::new(config),
            services,
            registry,
        }
    }

    /// Start a battle run and return its id immediately. The pipeline runs in
    /// its own task; callers observe it through [`get`](Self::get) and
    /// [`stream`](Self::stream).
    pub fn create(&self, battle: BattleConfig) -> Uuid {
        let handle = self.registry.create(battle);
        let battle_id = handle.battle_id;
        let pipeline = Pipeline {
            config: self.config.clone(),
            services: self.services.clone(),
            handle,
        };
        tokio::spawn(async move {
            let handle = pipeline.handle.clone();
            if let Err(err) = pipeline.run().await {
                error!("Battle {battle_id} failed: {err}");
                // Keep the last good progress value; only the stage and the
                // diagnostic text change.
                handle.update(|state| {
                    if !state.stage.is_terminal() {
                        state.stage = BattleStage::Failed;
                        state.message = err.to_string();
                        state.error = Some(err.to_string());
                    }
                });
            }
        });
        info!("Battle {battle_id} scheduled");
        battle_id
    }

    pub fn get(&self, battle_id: Uuid) -> Option<BattleState> {
        self.registry.get(battle_id)
    }

    pub async fn stream(
        &self,
        battle_id: Uuid,
    ) -> Option<impl Stream<Item = ProgressEvent> + Send> {
        self.registry.stream(battle_id).await
    }

    pub fn registry(&self) -> &BattleRegistry {
        &self.registry
    }
}

struct Pipeline {
    config: Arc<AppConfig>,
    services: MediaServices,
    handle: RunHandle,
}

impl Pipeline {
    async fn run(&self) -> Result<()> {
        let battle = self.handle.read(|state| state.config.clone());
        let short_id = short_id(self.handle.battle_id);
        std::fs::create_dir_all(&self.config.output_dir)?;

        // Parsing. Trivial, but the brief pause paces the client UI.
        self.advance(BattleStage::Parsing, 2.0, "Parsing lyrics...")?;
        tokio::time::sleep(Duration::from_millis(300)).await;
        let segments = self.parse_segments(&battle);

        // Style references, one fighter at a time (provider rate limits).
        self.advance(
            BattleStage::StyleRefA,
            3.0,
            format!("Preparing {}'s voice style...", battle.fighter_a.name),
        )?;
        let style_a = self
            .resolve_style_reference(&battle.fighter_a, battle.celebrity_mode)
            .await;

        self.advance(
            BattleStage::StyleRefB,
            4.0,
            format!("Preparing {}'s voice style...", battle.fighter_b.name),
        )?;
        let style_b = self
            .resolve_style_reference(&battle.fighter_b, battle.celebrity_mode)
            .await;

        // Vocals. Synthesis failures are fatal.
        self.advance(
            BattleStage::VoiceA,
            5.0,
            format!("Synthesizing {}'s verse...", battle.fighter_a.name),
        )?;
        let clip_a = self
            .synthesize_verse(&battle, &battle.fighter_a, style_a.as_deref())
            .await?;
        self.handle.update(|state| {
            state.progress = 15.0;
            state.message = format!("{}'s verse recorded", battle.fighter_a.name);
            state.audio_clips.push(clip_a.clone());
        });

        self.advance(
            BattleStage::VoiceB,
            18.0,
            format!("Synthesizing {}'s verse...", battle.fighter_b.name),
        )?;
        let clip_b = self
            .synthesize_verse(&battle, &battle.fighter_b, style_b.as_deref())
            .await?;
        self.handle.update(|state| {
            state.progress = 28.0;
            state.message = format!("{}'s verse recorded", battle.fighter_b.name);
            state.audio_clips.push(clip_b.clone());
        });

        let clips = vec![clip_a.clone(), clip_b.clone()];

        // Tempo.
        self.advance(BattleStage::BpmDetect, 30.0, "Detecting tempo...")?;
        let snapped = blocking({
            let clips = clips.clone();
            move || Ok(bpm::snap_to_common(bpm::detect_average(&clips)))
        })
        .await?;
        self.handle.update(|state| {
            state.progress = 32.0;
            state.detected_bpm = Some(snapped as f64);
            state.message = format!("Tempo locked at {snapped} BPM");
        });

        // Beat.
        self.advance(
            BattleStage::BeatGen,
            35.0,
            format!("Generating {} beat...", battle.beat_style),
        )?;
        let pattern_json = self
            .services
            .patterns
            .generate_pattern(&battle.beat_style, snapped, self.config.beat_bars)
            .await
            .map_err(|reason| BattleError::BeatGeneration(reason.to_string()))?;
        let (beat_path, pattern) = blocking({
            let sounds_dir = self.config.sounds_dir.clone();
            let loops = self.config.beat_loops;
            let output = self.config.output_dir.join(format!("beat_{short_id}.wav"));
            move || BeatSynth::new(&sounds_dir).render_to_file(&pattern_json, loops, &output)
        })
        .await?;
        self.handle.update(|state| {
            state.progress = 42.0;
            state.beat_path = Some(beat_path.clone());
            state.message = "Beat rendered".to_string();
        });

        // Mix.
        self.advance(BattleStage::Mixing, 45.0, "Mixing the battle track...")?;
        let mixed = blocking({
            let clips = clips.clone();
            let beat_path = beat_path.clone();
            let gain = self.config.beat_gain_db;
            let output = self.config.output_dir.join(format!("battle_{short_id}.wav"));
            move || mixer::mix(&clips, &beat_path, gain, &output)
        })
        .await?;
        let audio_url = self.config.public_url(&mixed);
        self.handle.update(|state| {
            state.progress = 50.0;
            state.mixed_audio_path = Some(mixed.clone());
            state.audio_url = Some(audio_url);
            state.message = "Battle track mixed".to_string();
        });

        if battle.audio_only {
            self.finish_audio_only(&battle, &clips, &mixed).await
        } else {
            self.run_video_branch(
                &battle,
                &segments,
                &clips,
                &beat_path,
                pattern.loop_duration_ms(),
                &mixed,
            )
            .await
        }
    }

    /// Check the transition table, then move the run to `next` and publish.
    fn advance(&self, next: BattleStage, progress: f64, message: impl Into<String>) -> Result<()> {
        self.advance_with(next, progress, message, |_| {})
    }

    fn advance_with<F>(
        &self,
        next: BattleStage,
        progress: f64,
        message: impl Into<String>,
        extra: F,
    ) -> Result<()>
    where
        F: FnOnce(&mut BattleState),
    {
        let current = self.handle.read(|state| state.stage);
        if !current.can_transition_to(next) {
            return Err(BattleError::Other(format!(
                "illegal stage transition {current:?} -> {next:?}"
            )));
        }
        let message = message.into();
        self.handle.update(|state| {
            state.stage = next;
            state.progress = progress;
            state.message = message;
            extra(state);
        });
        Ok(())
    }

    fn parse_segments(&self, battle: &BattleConfig) -> Vec<BattleSegment> {
        let script_text = format!(
            "[Person A]\n{}\n[Person B]\n{}\n",
            battle.fighter_a.lyrics, battle.fighter_b.lyrics
        );
        let segments = script::parse(&script_text, &battle.fighter_a.name, &battle.fighter_b.name);
        let target = if battle.test_mode { 3 } else { 5 };
        script::pad_to_fixed_count(segments, target)
    }

    /// Resolve the voice sample each fighter's synthesis will clone from.
    ///
    /// With both an uploaded identity sample and a preset clip available, the
    /// style-transfer service fuses them. Failures degrade to the identity
    /// sample, never abort the run.
    async fn resolve_style_reference(
        &self,
        fighter: &FighterConfig,
        celebrity_mode: bool,
    ) -> Option<PathBuf> {
        let identity = fighter.voice_path.clone();
        let preset = self.config.preset_path(&fighter.style_tag);
        match (identity, preset) {
            (Some(identity), Some(preset)) => {
                match self
                    .services
                    .style
                    .create_style_reference(
                        &identity,
                        &preset,
                        &fighter.name,
                        celebrity_mode,
                        STYLE_STABILITY,
                        STYLE_SIMILARITY,
                    )
                    .await
                {
                    Ok(reference) => {
                        if let Some(voice_id) = &reference.voice_id {
                            if let Err(reason) = self.services.style.delete_voice(voice_id).await {
                                warn!("Could not delete cloned voice {voice_id}: {reason}");
                            }
                        }
                        Some(reference.audio_path)
                    }
                    Err(reason) => {
                        warn!(
                            "Style transfer failed for {}, using identity sample: {reason}",
                            fighter.name
                        );
                        Some(identity)
                    }
                }
            }
            (Some(identity), None) => Some(identity),
            (None, Some(preset)) => Some(preset),
            (None, None) => None,
        }
    }

    async fn synthesize_verse(
        &self,
        battle: &BattleConfig,
        fighter: &FighterConfig,
        style_reference: Option<&Path>,
    ) -> Result<PathBuf> {
        if fighter.lyrics.trim().is_empty() {
            return Err(BattleError::VoiceSynthesis(format!(
                "no lyrics provided for {}",
                fighter.name
            )));
        }
        let raw = self
            .services
            .voice
            .synthesize(
                &fighter.lyrics,
                &style_instructions(fighter),
                style_reference,
                None,
                Some(&battle.beat_style),
            )
            .await
            .map_err(|reason| BattleError::VoiceSynthesis(reason.to_string()))?;
        // Local processing decodes WAV only.
        blocking(move || video::convert_to_wav(&raw)).await
    }

    /// Arena finish: optional talking heads, waveform, lyric timing.
    async fn finish_audio_only(
        &self,
        battle: &BattleConfig,
        clips: &[PathBuf],
        mixed: &Path,
    ) -> Result<()> {
        let waveform = match blocking({
            let mixed = mixed.to_path_buf();
            let buckets = self.config.waveform_buckets;
            move || mixer::waveform(&mixed, buckets)
        })
        .await
        {
            Ok(buckets) => Some(buckets),
            Err(err) => {
                warn!("Waveform generation failed: {err}");
                None
            }
        };

        let timing = blocking({
            let clips = clips.to_vec();
            let verses = vec![battle.fighter_a.lyrics.clone(), battle.fighter_b.lyrics.clone()];
            let names = (battle.fighter_a.name.clone(), battle.fighter_b.name.clone());
            move || Ok(align::align_verses(&clips, &verses, &[&names.0, &names.1]))
        })
        .await?;

        let mut talkhead_a = None;
        let mut talkhead_b = None;
        let has_photos =
            battle.fighter_a.image_path.is_some() || battle.fighter_b.image_path.is_some();
        if has_photos {
            self.advance(BattleStage::Talkhead, 55.0, "Animating talking heads...")?;
            let (head_a, head_b) = join_fallible_pair(
                self.animate_talkhead(battle, &battle.fighter_a),
                self.animate_talkhead(battle, &battle.fighter_b),
            )
            .await;
            let head_a = degrade("talking head", &battle.fighter_a, head_a);
            let head_b = degrade("talking head", &battle.fighter_b, head_b);
            self.handle.update(|state| {
                state.progress = 70.0;
                state.message = "Talking heads animated".to_string();
            });

            if head_a.is_some() || head_b.is_some() {
                self.advance(
                    BattleStage::LipsyncHeads,
                    75.0,
                    "Lip-syncing talking heads...",
                )?;
                let (synced_a, synced_b) = join_fallible_pair(
                    self.lipsync_clip(head_a.as_deref(), &clips[0]),
                    self.lipsync_clip(head_b.as_deref(), &clips[1]),
                )
                .await;
                // Lip-sync failure keeps the un-synced head.
                talkhead_a = synced_a
                    .map_err(|reason| warn!("Lip-sync failed for {}: {reason}", battle.fighter_a.name))
                    .ok()
                    .or(head_a)
                    .map(|path| self.config.public_url(&path));
                talkhead_b = synced_b
                    .map_err(|reason| warn!("Lip-sync failed for {}: {reason}", battle.fighter_b.name))
                    .ok()
                    .or(head_b)
                    .map(|path| self.config.public_url(&path));
                self.handle.update(|state| {
                    state.progress = 85.0;
                    state.message = "Talking heads synced".to_string();
                });
            }
        }

        self.advance_with(
            BattleStage::Complete,
            100.0,
            "Battle complete! (Audio only)",
            |state| {
                state.waveform = waveform;
                state.timing_data = Some(timing);
                state.talkhead_a_url = talkhead_a;
                state.talkhead_b_url = talkhead_b;
            },
        )
    }

    async fn animate_talkhead(
        &self,
        battle: &BattleConfig,
        fighter: &FighterConfig,
    ) -> AdapterResult<PathBuf> {
        let image = fighter.image_path.as_deref().ok_or_else(|| {
            FailureReason::ConfigMissing(format!("no reference photo for {}", fighter.name))
        })?;
        let prompt = format!(
            "Medium close-up of {}, {}, rapping straight to camera in {}, {} style",
            fighter.name, fighter.description, battle.location, battle.visual_style
        );
        self.services
            .video
            .animate(image, &prompt, self.config.shot_duration_secs, None)
            .await
    }

    /// Upload a video and its audio to the transient host and lip-sync them.
    async fn lipsync_clip(
        &self,
        video: Option<&Path>,
        audio: &Path,
    ) -> AdapterResult<PathBuf> {
        let video = video
            .ok_or_else(|| FailureReason::ConfigMissing("no talking head video".to_string()))?;
        let video_url = self.services.hosting.upload(video).await?;
        let audio_url = self.services.hosting.upload(audio).await?;
        self.services
            .lipsync
            .lipsync(&video_url, &audio_url, "loop")
            .await
    }

    /// Full video mode: storyboard, animation, lip-sync, composition.
    async fn run_video_branch(
        &self,
        battle: &BattleConfig,
        segments: &[BattleSegment],
        clips: &[PathBuf],
        beat_path: &Path,
        beat_loop_ms: u64,
        mixed: &Path,
    ) -> Result<()> {
        let short_id = short_id(self.handle.battle_id);
        self.advance(BattleStage::Storyboard, 52.0, "Creating storyboard...")?;

        // Only verse shots with an actual vocal clip behind them survive;
        // placeholder verses have nothing to cut to.
        let shot_list: Vec<shots::StoryboardShot> = shots::build_shots(segments)
            .into_iter()
            .filter(|shot| match shot.verse_index {
                None => true,
                Some(i) => i < clips.len(),
            })
            .collect();

        let mut images: Vec<PathBuf> = Vec::with_capacity(shot_list.len());
        for (i, shot) in shot_list.iter().enumerate() {
            let prompt = self.image_prompt(battle, shot);
            let source = shot
                .primary_speaker
                .and_then(|speaker| fighter_for(battle, speaker).image_path.as_deref());
            match self.services.images.generate(&prompt, source).await {
                Ok(path) => images.push(path),
                Err(reason) => {
                    warn!("Storyboard image {i} failed: {reason}");
                    images.push(PathBuf::new());
                }
            }
            let progress = (52.0 + 3.0 * (i + 1) as f64).min(64.0);
            self.handle.update(|state| {
                state.progress = progress;
                state.message = format!("Storyboard image {} of {}", i + 1, shot_list.len());
            });
        }
        backfill_missing_images(&mut images)?;
        self.handle.update(|state| {
            state.storyboard_images = images.clone();
        });

        self.advance(BattleStage::Video, 66.0, "Animating shots...")?;
        let mut videos: Vec<PathBuf> = Vec::with_capacity(shot_list.len());
        for (i, (shot, image)) in shot_list.iter().zip(&images).enumerate() {
            let video = match self
                .services
                .video
                .animate(image, shot.camera_direction, self.config.shot_duration_secs, None)
                .await
            {
                Ok(video) => video,
                Err(reason) => {
                    warn!("Shot {i} animation failed, using still image: {reason}");
                    let secs = self.shot_audio_secs(shot, clips, beat_loop_ms);
                    blocking({
                        let image = image.clone();
                        let output = self
                            .config
                            .output_dir
                            .join(format!("still_{short_id}_{i}.mp4"));
                        move || compose::still_video_from_image(&image, secs, &output)
                    })
                    .await?
                }
            };
            videos.push(video);
            let progress = (66.0 + 3.0 * (i + 1) as f64).min(78.0);
            self.handle.update(|state| {
                state.progress = progress;
                state.message = format!("Shot {} of {} animated", i + 1, shot_list.len());
            });
        }
        self.handle.update(|state| {
            state.video_segments = videos.clone();
        });

        self.advance(BattleStage::Lipsync, 80.0, "Lip-syncing verses...")?;
        for (i, shot) in shot_list.iter().enumerate() {
            let Some(verse) = shot.verse_index else {
                continue;
            };
            match self.lipsync_clip(Some(&videos[i]), &clips[verse]).await {
                Ok(synced) => videos[i] = synced,
                Err(reason) => warn!("Lip-sync failed for shot {i}, keeping raw cut: {reason}"),
            }
        }
        self.handle.update(|state| {
            state.progress = 85.0;
            state.message = "Verses synced".to_string();
        });

        self.advance(BattleStage::Compose, 88.0, "Composing final video...")?;
        // The opening shot runs for one beat loop; its clip is a trimmed copy
        // of the beat track.
        let intro = blocking({
            let beat_path = beat_path.to_path_buf();
            let output = self
                .config
                .output_dir
                .join(format!("beat_intro_{short_id}.wav"));
            move || {
                let beat = AudioClip::load(&beat_path)?;
                mixer::loop_to_length(&beat, beat_loop_ms).save(&output)?;
                Ok(output)
            }
        })
        .await?;
        let mut shot_audio = vec![intro];
        for shot in &shot_list {
            if let Some(verse) = shot.verse_index {
                shot_audio.push(clips[verse].clone());
            }
        }
        let final_video = blocking({
            let videos = videos.clone();
            let mixed = mixed.to_path_buf();
            let output = self.config.output_dir.join(format!("battle_{short_id}.mp4"));
            move || compose::compose(&videos, &shot_audio, &mixed, &output)
        })
        .await?;
        let video_url = self.config.public_url(&final_video);

        self.advance_with(BattleStage::Complete, 100.0, "Battle complete!", |state| {
            state.video_url = Some(video_url);
        })
    }

    fn image_prompt(&self, battle: &BattleConfig, shot: &shots::StoryboardShot) -> String {
        let base = format!(
            "{} rap battle in {}",
            battle.visual_style, battle.location
        );
        let subject = match (shot.shot_type, shot.primary_speaker) {
            (shots::ShotType::Opening, _) => format!(
                "{} and {} facing off as the crowd gathers",
                battle.fighter_a.name, battle.fighter_b.name
            ),
            (shots::ShotType::Closing, _) | (_, Some(Speaker::Both)) => format!(
                "{} and {} facing the roaring crowd after the final bar",
                battle.fighter_a.name, battle.fighter_b.name
            ),
            (_, Some(speaker)) => {
                let fighter = fighter_for(battle, speaker);
                let mut line = format!("{}, {}, mid-flow on the mic", fighter.name, fighter.description);
                if shot.show_reaction {
                    let opponent = fighter_for(battle, opposite(speaker));
                    line.push_str(&format!(", {} reacting in the background", opponent.name));
                }
                line
            }
            (_, None) => "the hyped crowd".to_string(),
        };
        let mut prompt = format!("{base}. {subject}. {}", shot.camera_direction);
        let hint = truncate_chars(&shot.verse_text, 100);
        if !hint.is_empty() {
            prompt.push_str(&format!(" Mood of the verse: {hint}"));
        }
        prompt
    }

    fn shot_audio_secs(
        &self,
        shot: &shots::StoryboardShot,
        clips: &[PathBuf],
        beat_loop_ms: u64,
    ) -> f64 {
        match shot.audio_source {
            shots::AudioSource::BeatIntro => beat_loop_ms as f64 / 1000.0,
            shots::AudioSource::Verse(i) => match clips.get(i).map(|c| crate::audio::duration_ms(c))
            {
                Some(Ok(ms)) => ms as f64 / 1000.0,
                _ => self.config.shot_duration_secs as f64,
            },
            shots::AudioSource::BeatOutro => 5.0,
        }
    }
}

fn style_instructions(fighter: &FighterConfig) -> String {
    if fighter.description.trim().is_empty() {
        "Aggressive battle rap delivery, confident and punchy".to_string()
    } else {
        format!(
            "{}. Aggressive battle rap delivery, confident and punchy.",
            fighter.description
        )
    }
}

fn fighter_for(battle: &BattleConfig, speaker: Speaker) -> &FighterConfig {
    match speaker {
        Speaker::FighterB => &battle.fighter_b,
        _ => &battle.fighter_a,
    }
}

fn opposite(speaker: Speaker) -> Speaker {
    match speaker {
        Speaker::FighterA => Speaker::FighterB,
        _ => Speaker::FighterA,
    }
}

fn short_id(battle_id: Uuid) -> String {
    battle_id.simple().to_string()[..8].to_string()
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Replace each failed storyboard slot with the nearest generated image
/// (the earlier shot wins a distance tie). Every slot failing is fatal.
fn backfill_missing_images(images: &mut [PathBuf]) -> Result<()> {
    let generated: Vec<usize> = images
        .iter()
        .enumerate()
        .filter(|(_, path)| !path.as_os_str().is_empty())
        .map(|(i, _)| i)
        .collect();
    if generated.is_empty() {
        return Err(BattleError::VideoProcessing(
            "storyboard generation produced no images".to_string(),
        ));
    }
    for i in 0..images.len() {
        if !images[i].as_os_str().is_empty() {
            continue;
        }
        if let Some(&nearest) = generated.iter().min_by_key(|&&j| i.abs_diff(j)) {
            images[i] = images[nearest].clone();
        }
    }
    Ok(())
}

fn degrade(what: &str, fighter: &FighterConfig, result: AdapterResult<PathBuf>) -> Option<PathBuf> {
    match result {
        Ok(path) => Some(path),
        Err(FailureReason::ConfigMissing(_)) => None,
        Err(reason) => {
            warn!("{what} failed for {}: {reason}", fighter.name);
            None
        }
    }
}

/// Run CPU-bound or process-spawning work off the scheduler.
async fn blocking<T, F>(work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| BattleError::Other(format!("background task failed: {err}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{
        BeatPatternSource, ImageGeneration, LipSync, StyleReference, StyleTransfer, TransientHost,
        VideoAnimation, VoiceSynthesis,
    };
    use crate::audio::test_support::write_tone;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct MockVoice {
        dir: PathBuf,
        fail: bool,
        garbage: bool,
        samples: Mutex<Vec<Option<PathBuf>>>,
    }

    #[async_trait]
    impl VoiceSynthesis for MockVoice {
        async fn synthesize(
            &self,
            _lyrics: &str,
            _style_instructions: &str,
            voice_sample: Option<&Path>,
            _tempo_hint: Option<u32>,
            _beat_style: Option<&str>,
        ) -> AdapterResult<PathBuf> {
            self.samples
                .lock()
                .unwrap()
                .push(voice_sample.map(Path::to_path_buf));
            if self.fail {
                return Err(FailureReason::upstream(Some(500), "voice backend down"));
            }
            let name = format!("voice_{}.wav", Uuid::new_v4());
            if self.garbage {
                let path = self.dir.join(name);
                std::fs::write(&path, b"not a wav").unwrap();
                return Ok(path);
            }
            Ok(write_tone(&self.dir, &name, 1_500, 220.0))
        }
    }

    struct MockStyle {
        fail: bool,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl StyleTransfer for MockStyle {
        async fn create_style_reference(
            &self,
            _identity_sample: &Path,
            _style_sample: &Path,
            reference_name: &str,
            _celebrity_mode: bool,
            _stability: f32,
            _similarity: f32,
        ) -> AdapterResult<StyleReference> {
            if self.fail {
                return Err(FailureReason::upstream(Some(502), "style service down"));
            }
            Ok(StyleReference {
                audio_path: PathBuf::from(format!("/fused/{reference_name}.wav")),
                voice_id: Some("voice-123".to_string()),
            })
        }

        async fn delete_voice(&self, voice_id: &str) -> AdapterResult<()> {
            self.deleted.lock().unwrap().push(voice_id.to_string());
            Ok(())
        }
    }

    struct MockPatterns {
        fail: bool,
    }

    #[async_trait]
    impl BeatPatternSource for MockPatterns {
        async fn generate_pattern(
            &self,
            style: &str,
            bpm: u32,
            _bars: u32,
        ) -> AdapterResult<String> {
            if self.fail {
                return Err(FailureReason::Timeout("pattern model timed out".into()));
            }
            Ok(serde_json::json!({
                "metadata": {
                    "title": "Test Beat",
                    "style": style,
                    "bpm": bpm,
                    "bars": 1,
                },
                "pattern": [
                    {
                        "bar": 1,
                        "beats": [
                            {"beat": 1.0, "events": [{"sound": "K", "duration": "q"}]},
                            {"beat": 3.0, "events": [{"sound": "S", "duration": "q"}]}
                        ]
                    }
                ]
            })
            .to_string())
        }
    }

    struct Unreachable;

    #[async_trait]
    impl ImageGeneration for Unreachable {
        async fn generate(
            &self,
            _prompt: &str,
            _source_image: Option<&Path>,
        ) -> AdapterResult<PathBuf> {
            Err(FailureReason::ConfigMissing("not under test".into()))
        }
    }

    #[async_trait]
    impl VideoAnimation for Unreachable {
        async fn animate(
            &self,
            _image_path: &Path,
            _prompt: &str,
            _duration_secs: u32,
            _audio_path: Option<&Path>,
        ) -> AdapterResult<PathBuf> {
            Err(FailureReason::ConfigMissing("not under test".into()))
        }
    }

    #[async_trait]
    impl LipSync for Unreachable {
        async fn lipsync(
            &self,
            _video_url: &str,
            _audio_url: &str,
            _sync_mode: &str,
        ) -> AdapterResult<PathBuf> {
            Err(FailureReason::ConfigMissing("not under test".into()))
        }
    }

    #[async_trait]
    impl TransientHost for Unreachable {
        async fn upload(&self, _path: &Path) -> AdapterResult<String> {
            Err(FailureReason::ConfigMissing("not under test".into()))
        }
    }

    struct Harness {
        runner: BattleRunner,
        voice: Arc<MockVoice>,
        style: Arc<MockStyle>,
        _dir: tempfile::TempDir,
    }

    fn harness(fail_voice: bool, garbage_voice: bool, fail_style: bool, fail_patterns: bool) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.output_dir = dir.path().join("outputs");
        config.sounds_dir = dir.path().join("sounds");
        config.voices_dir = dir.path().join("voices");

        let voice = Arc::new(MockVoice {
            dir: dir.path().to_path_buf(),
            fail: fail_voice,
            garbage: garbage_voice,
            samples: Mutex::new(Vec::new()),
        });
        let style = Arc::new(MockStyle {
            fail: fail_style,
            deleted: Mutex::new(Vec::new()),
        });
        let services = MediaServices {
            voice: voice.clone(),
            style: style.clone(),
            patterns: Arc::new(MockPatterns { fail: fail_patterns }),
            images: Arc::new(Unreachable),
            video: Arc::new(Unreachable),
            lipsync: Arc::new(Unreachable),
            hosting: Arc::new(Unreachable),
        };
        Harness {
            runner: BattleRunner::new(config, services, BattleRegistry::new()),
            voice,
            style,
            _dir: dir,
        }
    }

    fn fighters() -> (FighterConfig, FighterConfig) {
        let a = FighterConfig {
            name: "MC Alpha".into(),
            description: "grime veteran in a black hoodie".into(),
            lyrics: "I came here first\nmy bars hit hardest\nyou rap in verse\nI rap the smartest\nstep to the stage\nyou know the cost\nturn the page\nanother loss".into(),
            ..Default::default()
        };
        let b = FighterConfig {
            name: "MC Bravo".into(),
            description: "west coast stylist in gold chains".into(),
            lyrics: "second to speak\nbut never second best\nyour flow is weak\nconsider this a test\nI run the block\nI own the crowd\nwatch the clock\nsay my name out loud".into(),
            ..Default::default()
        };
        (a, b)
    }

    async fn wait_terminal(registry: &BattleRegistry, id: Uuid) -> BattleState {
        for _ in 0..400 {
            if let Some(state) = registry.get(id) {
                if state.stage.is_terminal() {
                    return state;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("battle never reached a terminal stage");
    }

    #[tokio::test]
    async fn audio_only_battle_runs_to_completion() {
        let h = harness(false, false, false, false);
        let (a, b) = fighters();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Complete, "error: {:?}", state.error);
        assert_eq!(state.progress, 100.0);
        assert!(state.audio_url.is_some());
        assert!(state.error.is_none());

        let bpm = state.detected_bpm.unwrap() as u32;
        assert!(bpm::snap_to_common(bpm as f64) == bpm);

        let waveform = state.waveform.unwrap();
        assert_eq!(waveform.len(), 100);
        assert!(waveform.iter().all(|v| (0.0..=1.0).contains(v)));

        let timing = state.timing_data.unwrap();
        assert_eq!(timing.verse_breaks.len(), 2);
        assert!(!timing.lines.is_empty());

        // No reference photos, so no talking heads.
        assert!(state.talkhead_a_url.is_none());
        assert!(state.video_url.is_none());
    }

    #[tokio::test]
    async fn voice_failure_fails_run_and_preserves_progress() {
        let h = harness(true, false, false, false);
        let (a, b) = fighters();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Failed);
        assert_eq!(state.progress, 5.0);
        assert!(state.error.as_deref().unwrap().contains("voice backend down"));
        assert_eq!(state.message, state.error.unwrap());
    }

    #[tokio::test]
    async fn empty_lyrics_fail_the_voice_stage() {
        let h = harness(false, false, false, false);
        let (a, mut b) = fighters();
        b.lyrics = "   ".into();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Failed);
        // Fighter A's verse already succeeded.
        assert_eq!(state.progress, 18.0);
        assert!(state.error.unwrap().contains("no lyrics"));
    }

    #[tokio::test]
    async fn beat_generation_failure_is_fatal() {
        let h = harness(false, false, false, true);
        let (a, b) = fighters();
        let id = h.runner.create(BattleConfig::arena("boom bap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Failed);
        assert_eq!(state.progress, 35.0);
        assert!(state.error.unwrap().contains("timed out"));
        // Artifacts from completed stages survive the failure.
        assert_eq!(state.audio_clips.len(), 2);
        assert!(state.detected_bpm.is_some());
    }

    #[tokio::test]
    async fn unreadable_vocals_fail_at_mixing() {
        let h = harness(false, true, false, false);
        let (a, b) = fighters();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Failed);
        assert_eq!(state.progress, 45.0);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn full_video_run_fails_when_no_storyboard_image_generates() {
        let h = harness(false, false, false, false);
        let (a, b) = fighters();
        let mut battle = BattleConfig::arena("trap", a, b);
        battle.audio_only = false;
        let id = h.runner.create(battle);

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Failed);
        assert!(state
            .error
            .as_deref()
            .unwrap()
            .contains("storyboard generation produced no images"));
        // Four shots were attempted, each one bumping progress past the mix.
        assert_eq!(state.progress, 64.0);
        // Artifacts from completed stages survive the failure.
        assert!(state.audio_url.is_some());
        assert_eq!(state.audio_clips.len(), 2);
    }

    #[tokio::test]
    async fn style_transfer_failure_falls_back_to_identity_sample() {
        let h = harness(false, false, true, false);
        let (mut a, b) = fighters();
        let identity = write_tone(h._dir.path(), "identity.wav", 1_000, 300.0);
        a.voice_path = Some(identity.clone());
        a.style_tag = "NY Rap (A$AP Rocky)".into();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Complete, "error: {:?}", state.error);

        // The synthesis call received the identity sample, not the preset.
        let samples = h.voice.samples.lock().unwrap();
        assert_eq!(samples[0].as_deref(), Some(identity.as_path()));
        assert!(samples[1].is_none());
    }

    #[tokio::test]
    async fn style_transfer_success_passes_fused_sample_and_cleans_up() {
        let h = harness(false, false, false, false);
        let (mut a, b) = fighters();
        a.voice_path = Some(write_tone(h._dir.path(), "identity.wav", 1_000, 300.0));
        a.style_tag = "UK Grime 1 (Stormzy)".into();
        let id = h.runner.create(BattleConfig::arena("drill", a, b));

        let state = wait_terminal(h.runner.registry(), id).await;
        assert_eq!(state.stage, BattleStage::Complete, "error: {:?}", state.error);

        let samples = h.voice.samples.lock().unwrap();
        assert_eq!(
            samples[0].as_deref(),
            Some(Path::new("/fused/MC Alpha.wav"))
        );
        // The transient cloned voice was deleted after the fusion.
        assert_eq!(*h.style.deleted.lock().unwrap(), vec!["voice-123".to_string()]);
    }

    #[tokio::test]
    async fn create_returns_before_completion() {
        let h = harness(false, false, false, false);
        let (a, b) = fighters();
        let id = h.runner.create(BattleConfig::arena("trap", a, b));

        // Immediately after create the run is still live.
        let state = h.runner.get(id).unwrap();
        assert!(!state.stage.is_terminal());
        wait_terminal(h.runner.registry(), id).await;
    }

    #[test]
    fn failed_storyboard_slots_borrow_the_nearest_image() {
        let mut images = vec![
            PathBuf::new(),
            PathBuf::from("/img/1.png"),
            PathBuf::new(),
            PathBuf::new(),
            PathBuf::from("/img/4.png"),
            PathBuf::new(),
        ];
        backfill_missing_images(&mut images).unwrap();
        assert_eq!(images[0], PathBuf::from("/img/1.png"));
        assert_eq!(images[2], PathBuf::from("/img/1.png"));
        assert_eq!(images[3], PathBuf::from("/img/4.png"));
        assert_eq!(images[5], PathBuf::from("/img/4.png"));

        // Equidistant neighbors: the earlier shot wins.
        let mut tie = vec![
            PathBuf::from("/img/a.png"),
            PathBuf::new(),
            PathBuf::from("/img/b.png"),
        ];
        backfill_missing_images(&mut tie).unwrap();
        assert_eq!(tie[1], PathBuf::from("/img/a.png"));

        let mut none = vec![PathBuf::new(), PathBuf::new()];
        assert!(backfill_missing_images(&mut none).is_err());
    }

    #[test]
    fn verse_hint_truncation_respects_char_boundaries() {
        let text = "é".repeat(150);
        let hint = truncate_chars(&text, 100);
        assert_eq!(hint.chars().count(), 100);
    }
}
