//! ffmpeg-backed video and container operations.
//!
//! Everything here shells out to ffmpeg and blocks; callers run these through
//! `tokio::task::spawn_blocking`.

pub mod compose;

use std::path::{Path, PathBuf};
use std::process::Command;

use log::{debug, info};

use crate::error::{BattleError, Result};

/// Run an ffmpeg invocation, mapping a non-zero exit to a processing error.
fn run_ffmpeg(args: &[&str], context: &str) -> Result<()> {
    debug!("ffmpeg {}", args.join(" "));
    let output = Command::new("ffmpeg").args(args).output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BattleError::VideoProcessing(format!(
            "{context}: {}",
            stderr.lines().last().unwrap_or("ffmpeg failed")
        )));
    }
    Ok(())
}

/// Convert any audio container to 16-bit PCM WAV so the local processing
/// chain can decode it. No-op if the input already is a .wav file.
pub fn convert_to_wav(input: &Path) -> Result<PathBuf> {
    if input.extension().and_then(|e| e.to_str()) == Some("wav") {
        return Ok(input.to_path_buf());
    }
    if !input.exists() {
        return Err(BattleError::FileNotFound(input.display().to_string()));
    }
    let output = input.with_extension("wav");
    run_ffmpeg(
        &[
            "-y",
            "-i",
            input.to_str().unwrap_or_default(),
            "-acodec",
            "pcm_s16le",
            output.to_str().unwrap_or_default(),
        ],
        "audio conversion",
    )?;
    info!("Converted {} -> {}", input.display(), output.display());
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_input_is_passed_through() {
        let path = Path::new("/tmp/already.wav");
        assert_eq!(convert_to_wav(path).unwrap(), path.to_path_buf());
    }

    #[test]
    fn missing_input_is_not_found() {
        let err = convert_to_wav(Path::new("/no/clip.mp3")).unwrap_err();
        assert!(matches!(err, BattleError::FileNotFound(_)));
    }
}
