//! Fixed 6-shot cinematic structure for the full video pipeline.
//!
//! Four verse segments map deterministically onto six shots: an opening
//! establishing shot, one shot per verse, and a closing finale. The mapping is
//! pure planning data; image and video prompts are built from it downstream.

use serde::{Deserialize, Serialize};

use super::{BattleSegment, Speaker};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShotType {
    Opening,
    Verse,
    Reaction,
    Closing,
}

/// Which audio clip plays under a shot in the final composition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    /// First seconds of the beat track.
    BeatIntro,
    /// The n-th verse clip (0-based).
    Verse(usize),
    /// Last seconds of the beat track.
    BeatOutro,
}

/// One planned shot. Derived once from the verse segments, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryboardShot {
    pub index: usize,
    pub shot_type: ShotType,
    /// None for the opening crowd shot.
    pub primary_speaker: Option<Speaker>,
    /// Whether the opponent's reaction is framed into the shot.
    pub show_reaction: bool,
    /// Index of the verse segment this shot covers, if any.
    pub verse_index: Option<usize>,
    pub camera_direction: &'static str,
    pub audio_source: AudioSource,
    /// Verse text carried along for prompt building.
    pub verse_text: String,
}

const CAMERA_DIRECTIONS: [&str; 6] = [
    "slow pan across the hyped crowd, both rappers facing off center stage",
    "medium shot, camera slowly pushing in on the rapper mid-flow",
    "low-angle tracking shot circling the rapper as the crowd reacts",
    "over-the-shoulder shot of the rapper, opponent visible reacting in background",
    "handheld close-up cutting between the rapper and the opponent's reaction",
    "wide crane shot pulling back as both rappers face the roaring crowd",
];

/// Build the fixed 6-shot list from the first four verse segments.
///
/// Shot 0 opens on the crowd, shots 1-4 cover one verse each (3 and 4 frame
/// the opponent's reaction), shot 5 closes on both fighters.
pub fn build_shots(segments: &[BattleSegment]) -> Vec<StoryboardShot> {
    let verses: Vec<&BattleSegment> = segments.iter().take(4).collect();

    let mut shots = Vec::with_capacity(6);
    shots.push(StoryboardShot {
        index: 0,
        shot_type: ShotType::Opening,
        primary_speaker: None,
        show_reaction: false,
        verse_index: None,
        camera_direction: CAMERA_DIRECTIONS[0],
        audio_source: AudioSource::BeatIntro,
        verse_text: String::new(),
    });

    for (i, segment) in verses.iter().enumerate() {
        let index = i + 1;
        let show_reaction = index >= 3;
        shots.push(StoryboardShot {
            index,
            shot_type: if show_reaction {
                ShotType::Reaction
            } else {
                ShotType::Verse
            },
            primary_speaker: Some(segment.speaker),
            show_reaction,
            verse_index: Some(i),
            camera_direction: CAMERA_DIRECTIONS[index],
            audio_source: AudioSource::Verse(i),
            verse_text: segment.verse_summary(),
        });
    }

    shots.push(StoryboardShot {
        index: 5,
        shot_type: ShotType::Closing,
        primary_speaker: Some(Speaker::Both),
        show_reaction: false,
        verse_index: None,
        camera_direction: CAMERA_DIRECTIONS[5],
        audio_source: AudioSource::BeatOutro,
        verse_text: String::new(),
    });

    shots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::{pad_to_fixed_count, parse};

    fn four_segments() -> Vec<BattleSegment> {
        let script = "[Person A]\na1\n[Person B]\nb1\n[Person A]\na2\n[Person B]\nb2";
        parse(script, "", "")
    }

    #[test]
    fn six_shot_structure() {
        let shots = build_shots(&four_segments());
        assert_eq!(shots.len(), 6);

        assert_eq!(shots[0].shot_type, ShotType::Opening);
        assert!(shots[0].primary_speaker.is_none());
        assert_eq!(shots[0].audio_source, AudioSource::BeatIntro);

        for (i, shot) in shots[1..5].iter().enumerate() {
            assert_eq!(shot.verse_index, Some(i));
            assert_eq!(shot.audio_source, AudioSource::Verse(i));
        }
        // Shots 3 and 4 frame the opponent's reaction.
        assert!(!shots[1].show_reaction);
        assert!(!shots[2].show_reaction);
        assert!(shots[3].show_reaction);
        assert!(shots[4].show_reaction);

        assert_eq!(shots[5].shot_type, ShotType::Closing);
        assert_eq!(shots[5].primary_speaker, Some(Speaker::Both));
        assert_eq!(shots[5].audio_source, AudioSource::BeatOutro);
    }

    #[test]
    fn speakers_alternate_across_verse_shots() {
        let shots = build_shots(&four_segments());
        assert_eq!(shots[1].primary_speaker, Some(Speaker::FighterA));
        assert_eq!(shots[2].primary_speaker, Some(Speaker::FighterB));
        assert_eq!(shots[3].primary_speaker, Some(Speaker::FighterA));
        assert_eq!(shots[4].primary_speaker, Some(Speaker::FighterB));
    }

    #[test]
    fn short_scripts_are_padded_before_mapping() {
        let segments = parse("[Person A]\nonly bar", "", "");
        let padded = pad_to_fixed_count(segments, 5);
        let shots = build_shots(&padded[..4]);
        assert_eq!(shots.len(), 6);
        assert_eq!(shots[1].verse_text, "only bar");
        assert_eq!(shots[2].verse_text, "...");
    }

    #[test]
    fn verse_text_carries_segment_summary() {
        let shots = build_shots(&four_segments());
        assert_eq!(shots[1].verse_text, "a1");
        assert_eq!(shots[4].verse_text, "b2");
        assert!(shots[0].verse_text.is_empty());
    }
}
