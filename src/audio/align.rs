//! Line-level lyric timing.
//!
//! Timing is estimated from the clip duration, distributing time across lines
//! proportionally to their word counts. The output drives the client's
//! synchronized lyric display.

use std::path::Path;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use super::duration_ms;

/// One lyric line with its time window, in seconds from battle start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignedLine {
    pub text: String,
    pub start: f64,
    pub end: f64,
    pub fighter: String,
}

/// Timing data for the whole battle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingData {
    pub lines: Vec<AlignedLine>,
    /// Indices into `lines` where each verse starts.
    pub verse_breaks: Vec<usize>,
}

/// Estimate per-line timing within a single verse clip.
///
/// Empty lines are dropped. Each surviving line gets a share of the clip
/// duration proportional to its word count, so long bars display longer.
/// Returns an empty vector when the clip is unreadable or the verse is blank.
pub fn align_lines(audio_path: &Path, lyrics: &str, fighter: &str) -> Vec<AlignedLine> {
    let lines: Vec<&str> = lyrics
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if lines.is_empty() {
        warn!("No lyric lines to align for fighter {fighter}");
        return Vec::new();
    }

    let duration_sec = match duration_ms(audio_path) {
        Ok(ms) => ms as f64 / 1000.0,
        Err(e) => {
            warn!("Cannot read clip for alignment, assuming 2.5s per line: {e}");
            lines.len() as f64 * 2.5
        }
    };

    let total_words: usize = lines
        .iter()
        .map(|l| l.split_whitespace().count().max(1))
        .sum();
    let sec_per_word = duration_sec / total_words as f64;

    let mut aligned = Vec::with_capacity(lines.len());
    let mut cursor = 0.0;
    for line in lines {
        let words = line.split_whitespace().count().max(1);
        let end = cursor + words as f64 * sec_per_word;
        aligned.push(AlignedLine {
            text: line.to_string(),
            start: round2(cursor),
            end: round2(end),
            fighter: fighter.to_string(),
        });
        cursor = end;
    }
    info!("Aligned {} lines for fighter {fighter}", aligned.len());
    aligned
}

/// Align every verse of a battle, offsetting each verse by the cumulative end
/// time of the previous one so all timestamps share one timeline.
pub fn align_verses(
    audio_clips: &[std::path::PathBuf],
    verses: &[String],
    fighter_order: &[&str],
) -> TimingData {
    let mut timing = TimingData::default();
    let mut offset = 0.0;

    for ((path, lyrics), fighter) in audio_clips.iter().zip(verses).zip(fighter_order) {
        if lyrics.trim().is_empty() {
            continue;
        }
        timing.verse_breaks.push(timing.lines.len());

        let mut lines = align_lines(path, lyrics, fighter);
        for line in &mut lines {
            line.start = round2(line.start + offset);
            line.end = round2(line.end + offset);
        }
        if let Some(last) = lines.last() {
            offset = last.end;
        }
        timing.lines.extend(lines);
    }
    timing
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::test_support::write_tone;
    use std::path::PathBuf;

    #[test]
    fn lines_cover_clip_proportionally_to_word_count() {
        let dir = tempfile::tempdir().unwrap();
        let clip = write_tone(dir.path(), "verse.wav", 6_000, 200.0);
        // 2 words vs 4 words: second line gets twice the time.
        let lines = align_lines(&clip, "short line\nthis one is longer\n", "A");
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].start, 0.0);
        assert!((lines[0].end - 2.0).abs() < 0.05);
        assert!((lines[1].end - 6.0).abs() < 0.05);
        assert!(lines.iter().all(|l| l.fighter == "A"));
    }

    #[test]
    fn blank_verse_yields_no_lines() {
        let dir = tempfile::tempdir().unwrap();
        let clip = write_tone(dir.path(), "verse.wav", 1_000, 200.0);
        assert!(align_lines(&clip, "\n   \n", "A").is_empty());
    }

    #[test]
    fn unreadable_clip_falls_back_to_estimate() {
        let lines = align_lines(Path::new("/no/such.wav"), "one\ntwo\n", "B");
        assert_eq!(lines.len(), 2);
        assert!(lines[1].end > lines[0].end);
    }

    #[test]
    fn verses_accumulate_offsets() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 2_000, 200.0);
        let b = write_tone(dir.path(), "b.wav", 3_000, 200.0);
        let verses = vec!["first verse line".to_string(), "second verse line".to_string()];
        let timing = align_verses(&[a, b], &verses, &["A", "B"]);

        assert_eq!(timing.verse_breaks, vec![0, 1]);
        assert_eq!(timing.lines.len(), 2);
        // Second verse starts where the first ended.
        assert!((timing.lines[1].start - timing.lines[0].end).abs() < 0.05);
        assert!((timing.lines[1].end - 5.0).abs() < 0.1);
    }

    #[test]
    fn empty_verses_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_tone(dir.path(), "a.wav", 1_000, 200.0);
        let verses = vec!["  ".to_string(), "real line".to_string()];
        let timing = align_verses(
            &[PathBuf::from("/ignored.wav"), a],
            &verses,
            &["A", "B"],
        );
        assert_eq!(timing.lines.len(), 1);
        assert_eq!(timing.lines[0].fighter, "B");
        assert_eq!(timing.verse_breaks, vec![0]);
    }
}
