//! Battle pipeline stages and progress events.
//!
//! The stage machine is closed: every legal move is listed in
//! [`BattleStage::allowed_next`], and the orchestrator refuses anything else.
//! `Failed` is reachable from every non-terminal stage.

use serde::{Deserialize, Serialize};

/// Pipeline stages, in pipeline order. After `Mixing` the machine branches:
/// arena (audio-only) runs through the talking-head pair, full video mode
/// through the storyboard pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStage {
    Queued,
    Parsing,
    StyleRefA,
    StyleRefB,
    VoiceA,
    VoiceB,
    BpmDetect,
    BeatGen,
    Mixing,
    // Arena branch.
    Talkhead,
    LipsyncHeads,
    // Full video branch.
    Storyboard,
    Video,
    Lipsync,
    Compose,
    Complete,
    Failed,
}

impl BattleStage {
    /// The derived client-facing status string. Never stored, always
    /// recomputed from the stage.
    pub fn status(&self) -> &'static str {
        match self {
            BattleStage::Complete => "complete",
            BattleStage::Failed => "failed",
            _ => "in_progress",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BattleStage::Complete | BattleStage::Failed)
    }

    /// Legal successor stages. `Failed` is implicitly allowed from any
    /// non-terminal stage and not repeated here.
    pub fn allowed_next(&self) -> &'static [BattleStage] {
        use BattleStage::*;
        match self {
            Queued => &[Parsing],
            Parsing => &[StyleRefA],
            StyleRefA => &[StyleRefB],
            StyleRefB => &[VoiceA],
            VoiceA => &[VoiceB],
            VoiceB => &[BpmDetect],
            BpmDetect => &[BeatGen],
            BeatGen => &[Mixing],
            // The arena branch only enters the talking-head fork when
            // reference photos exist; otherwise it completes straight away.
            Mixing => &[Talkhead, Storyboard, Complete],
            Talkhead => &[LipsyncHeads, Complete],
            LipsyncHeads => &[Complete],
            Storyboard => &[Video],
            Video => &[Lipsync],
            Lipsync => &[Compose],
            Compose => &[Complete],
            Complete | Failed => &[],
        }
    }

    /// Whether the machine may move from `self` to `next`.
    pub fn can_transition_to(&self, next: BattleStage) -> bool {
        if next == BattleStage::Failed {
            return !self.is_terminal();
        }
        self.allowed_next().contains(&next)
    }
}

/// The fixed projection of battle state pushed to the progress stream, one
/// JSON object per event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub battle_id: String,
    pub stage: BattleStage,
    pub progress: f64,
    pub message: String,
    pub status: String,
    pub audio_url: Option<String>,
    pub video_url: Option<String>,
    pub detected_bpm: Option<f64>,
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waveform: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timing_data: Option<crate::audio::align::TimingData>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talkhead_a_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub talkhead_b_url: Option<String>,
}

impl ProgressSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }
}

/// One element of the progress stream. Heartbeats keep the transport alive
/// when the pipeline is inside a long stage; consumers must ignore them for
/// state purposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProgressEvent {
    Snapshot(ProgressSnapshot),
    Heartbeat { heartbeat: bool },
}

impl ProgressEvent {
    pub fn heartbeat() -> Self {
        ProgressEvent::Heartbeat { heartbeat: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_derivation() {
        assert_eq!(BattleStage::Queued.status(), "in_progress");
        assert_eq!(BattleStage::Mixing.status(), "in_progress");
        assert_eq!(BattleStage::Complete.status(), "complete");
        assert_eq!(BattleStage::Failed.status(), "failed");
    }

    #[test]
    fn linear_stages_advance_one_step() {
        use BattleStage::*;
        let order = [
            Queued, Parsing, StyleRefA, StyleRefB, VoiceA, VoiceB, BpmDetect, BeatGen, Mixing,
        ];
        for pair in order.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn mixing_branches_three_ways() {
        use BattleStage::*;
        assert!(Mixing.can_transition_to(Talkhead));
        assert!(Mixing.can_transition_to(Storyboard));
        assert!(Mixing.can_transition_to(Complete));
        assert!(!Mixing.can_transition_to(Video));
    }

    #[test]
    fn illegal_transitions_are_rejected() {
        use BattleStage::*;
        assert!(!Queued.can_transition_to(VoiceA));
        assert!(!VoiceB.can_transition_to(VoiceA));
        assert!(!Complete.can_transition_to(Parsing));
        // Terminal states cannot even fail.
        assert!(!Complete.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
    }

    #[test]
    fn any_live_stage_can_fail() {
        use BattleStage::*;
        for stage in [Queued, Parsing, VoiceA, Mixing, Talkhead, Compose] {
            assert!(stage.can_transition_to(Failed), "{stage:?}");
        }
    }

    #[test]
    fn stage_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&BattleStage::BpmDetect).unwrap(),
            "\"bpm_detect\""
        );
        assert_eq!(
            serde_json::to_string(&BattleStage::LipsyncHeads).unwrap(),
            "\"lipsync_heads\""
        );
    }

    #[test]
    fn heartbeat_serializes_flat() {
        let json = serde_json::to_string(&ProgressEvent::heartbeat()).unwrap();
        assert_eq!(json, "{\"heartbeat\":true}");
    }
}
