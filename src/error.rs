//! Error types for the battle pipeline.

use thiserror::Error;

/// Errors that can abort a battle run or a local processing step.
///
/// Adapter-level upstream failures do not use this type; they are reported as
/// [`crate::adapters::FailureReason`] values so the orchestrator can decide
/// per stage whether a failure is fatal or degradable.
#[derive(Debug, Error)]
pub enum BattleError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Script parsing error: {0}")]
    ScriptParsing(String),

    #[error("Voice synthesis failed: {0}")]
    VoiceSynthesis(String),

    #[error("Beat generation failed: {0}")]
    BeatGeneration(String),

    #[error("Invalid beat pattern: {0}")]
    InvalidPattern(String),

    #[error("Audio processing error: {0}")]
    AudioProcessing(String),

    #[error("Video processing error: {0}")]
    VideoProcessing(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Other error: {0}")]
    Other(String),
}

impl From<&str> for BattleError {
    fn from(s: &str) -> Self {
        BattleError::Other(s.to_string())
    }
}

impl From<String> for BattleError {
    fn from(s: String) -> Self {
        BattleError::Other(s)
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BattleError>;
