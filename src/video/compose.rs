//! Final battle video composition.
//!
//! Videos are hard-cut (no crossfade) so the picture stays locked to the
//! beat-synced audio: each segment video is trimmed or looped to its audio
//! clip's exact duration, the segments are concatenated with the concat
//! demuxer, and the mixed battle audio is muxed on last.

use std::io::Write;
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::run_ffmpeg;
use crate::audio;
use crate::error::{BattleError, Result};

/// Seconds the conclusion shot runs when it has no audio clip of its own.
const CONCLUSION_SECS: f64 = 5.0;

/// Render a still image as a short video clip. Fallback for segments whose
/// animation failed.
pub fn still_video_from_image(
    image_path: &Path,
    duration_secs: f64,
    output_path: &Path,
) -> Result<PathBuf> {
    if !image_path.exists() {
        return Err(BattleError::FileNotFound(image_path.display().to_string()));
    }
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    run_ffmpeg(
        &[
            "-y",
            "-loop",
            "1",
            "-i",
            image_path.to_str().unwrap_or_default(),
            "-t",
            &duration_secs.to_string(),
            "-vf",
            "scale=1280:720:force_original_aspect_ratio=decrease,pad=1280:720:(ow-iw)/2:(oh-ih)/2",
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-r",
            "24",
            output_path.to_str().unwrap_or_default(),
        ],
        "still image video",
    )?;
    info!("Still fallback video written to {}", output_path.display());
    Ok(output_path.to_path_buf())
}

/// Trim or loop a segment video to exactly `target_secs`.
fn fit_to_duration(video_path: &Path, target_secs: f64, output_path: &Path) -> Result<PathBuf> {
    run_ffmpeg(
        &[
            "-y",
            "-stream_loop",
            "-1",
            "-i",
            video_path.to_str().unwrap_or_default(),
            "-t",
            &target_secs.to_string(),
            "-c:v",
            "libx264",
            "-pix_fmt",
            "yuv420p",
            "-r",
            "24",
            "-an",
            output_path.to_str().unwrap_or_default(),
        ],
        "segment duration fit",
    )?;
    Ok(output_path.to_path_buf())
}

/// Compose the final battle video.
///
/// `video_paths` holds one video per segment, the last one the conclusion.
/// `audio_clips` holds one audio clip per non-conclusion segment; each video
/// is fitted to its clip's duration so cuts land on verse boundaries.
/// `mixed_audio` is the already-mixed battle track laid over the whole cut.
pub fn compose(
    video_paths: &[PathBuf],
    audio_clips: &[PathBuf],
    mixed_audio: &Path,
    output_path: &Path,
) -> Result<PathBuf> {
    if video_paths.is_empty() {
        return Err(BattleError::VideoProcessing("no segment videos".into()));
    }
    if video_paths.len() != audio_clips.len() + 1 {
        return Err(BattleError::VideoProcessing(format!(
            "expected {} videos for {} audio clips, got {}",
            audio_clips.len() + 1,
            audio_clips.len(),
            video_paths.len()
        )));
    }

    let work_dir = tempfile::tempdir()?;
    let mut fitted = Vec::with_capacity(video_paths.len());
    for (i, video) in video_paths.iter().enumerate() {
        let target_secs = match audio_clips.get(i) {
            Some(clip) => match audio::duration_ms(clip) {
                Ok(ms) => ms as f64 / 1000.0,
                Err(e) => {
                    warn!("Cannot read clip duration, keeping {CONCLUSION_SECS}s: {e}");
                    CONCLUSION_SECS
                }
            },
            None => CONCLUSION_SECS,
        };
        let out = work_dir.path().join(format!("fitted_{i}.mp4"));
        fitted.push(fit_to_duration(video, target_secs, &out)?);
    }

    // Concat demuxer needs a list file.
    let list_path = work_dir.path().join("segments.txt");
    let mut list = std::fs::File::create(&list_path)?;
    for video in &fitted {
        writeln!(list, "file '{}'", video.display())?;
    }
    drop(list);

    let concatenated = work_dir.path().join("concatenated.mp4");
    run_ffmpeg(
        &[
            "-y",
            "-f",
            "concat",
            "-safe",
            "0",
            "-i",
            list_path.to_str().unwrap_or_default(),
            "-c",
            "copy",
            concatenated.to_str().unwrap_or_default(),
        ],
        "segment concatenation",
    )?;

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    run_ffmpeg(
        &[
            "-y",
            "-i",
            concatenated.to_str().unwrap_or_default(),
            "-i",
            mixed_audio.to_str().unwrap_or_default(),
            "-map",
            "0:v",
            "-map",
            "1:a",
            "-c:v",
            "copy",
            "-c:a",
            "aac",
            "-shortest",
            output_path.to_str().unwrap_or_default(),
        ],
        "final mux",
    )?;

    info!("Final battle video written to {}", output_path.display());
    Ok(output_path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compose_validates_counts() {
        let videos = vec![PathBuf::from("a.mp4"), PathBuf::from("b.mp4")];
        let clips = vec![PathBuf::from("a.wav"), PathBuf::from("b.wav")];
        let err = compose(&videos, &clips, Path::new("mix.wav"), Path::new("out.mp4"))
            .unwrap_err();
        assert!(matches!(err, BattleError::VideoProcessing(_)));

        let err = compose(&[], &[], Path::new("mix.wav"), Path::new("out.mp4")).unwrap_err();
        assert!(matches!(err, BattleError::VideoProcessing(_)));
    }

    #[test]
    fn still_video_requires_existing_image() {
        let err = still_video_from_image(Path::new("/no/image.png"), 5.0, Path::new("/tmp/x.mp4"))
            .unwrap_err();
        assert!(matches!(err, BattleError::FileNotFound(_)));
    }
}
