//! beatclash turns a scripted rap battle into a finished, beat-synced track
//! (and optionally a video) by orchestrating a chain of generative services:
//! voice synthesis, voice style transfer, beat pattern generation,
//! image generation, image-to-video animation and lip-sync.
//!
//! The entry point is [`battle::BattleRunner`]: submit a
//! [`battle::BattleConfig`], get a run id back immediately, then observe the
//! run through [`battle::BattleRunner::get`] or the live progress stream.
//! External providers sit behind the traits in [`adapters`], bundled as
//! [`adapters::MediaServices`]; local audio processing (mixing, tempo
//! detection, beat rendering, lyric timing) lives under [`audio`].

pub mod adapters;
pub mod audio;
pub mod battle;
pub mod config;
pub mod error;
pub mod script;
pub mod video;

pub use battle::{
    BattleConfig, BattleRegistry, BattleRunner, BattleStage, BattleState, FighterConfig,
    ProgressEvent, ProgressSnapshot,
};
pub use config::AppConfig;
pub use error::{BattleError, Result};

pub use adapters::MediaServices;
