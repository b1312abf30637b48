//! Rap battle script segmentation.
//!
//! Scripts arrive as marked-up text with `[Person A]` / `Person B:` style
//! speaker markers. Parsing splits them into ordered [`BattleSegment`]s which
//! the rest of the pipeline consumes.

pub mod shots;

use log::{info, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Who delivers a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    FighterA,
    FighterB,
    /// The shared conclusion / finale.
    Both,
}

impl Speaker {
    pub fn label(&self) -> &'static str {
        match self {
            Speaker::FighterA => "A",
            Speaker::FighterB => "B",
            Speaker::Both => "Both",
        }
    }
}

/// One parsed turn of the script. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BattleSegment {
    pub index: usize,
    pub speaker: Speaker,
    pub verses: Vec<String>,
    pub raw_text: String,
    pub is_conclusion: bool,
}

impl BattleSegment {
    /// Verse text joined for voice synthesis.
    pub fn lyrics(&self) -> String {
        self.verses.join("\n")
    }

    /// Brief verse excerpt for image prompting.
    pub fn verse_summary(&self) -> String {
        let combined = self.verses.join(" ");
        if combined.len() > 200 {
            let mut cut = 200;
            while !combined.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &combined[..cut])
        } else {
            combined
        }
    }
}

static MARKER_A: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\[?\s*Person\s*A\s*\]?:?\s*$|(?i)^Person\s*A\s*[-–—:]").unwrap());
static MARKER_B: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\[?\s*Person\s*B\s*\]?:?\s*$|(?i)^Person\s*B\s*[-–—:]").unwrap());
static MARKER_BOTH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^\[?\s*(Conclusion|Both|Finale)\s*\]?:?\s*$").unwrap());
/// Short bracketed or colon-suffixed line that could name a speaker.
static MARKER_CANDIDATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\[\s*([^\]]{1,40})\s*\]:?\s*$|^([^:\n]{1,40}):\s*$").unwrap());

/// Parse a script into ordered segments.
///
/// Lines matching a speaker marker start a new segment; other non-blank lines
/// become verse lines of the current segment. When fighter names are not
/// supplied they are guessed from the script's own marker lines. A script with
/// no recognizable markers becomes a single FighterA segment.
pub fn parse(script: &str, name_a: &str, name_b: &str) -> Vec<BattleSegment> {
    let (name_a, name_b) = if name_a.trim().is_empty() || name_b.trim().is_empty() {
        guess_fighter_names(script)
    } else {
        (name_a.trim().to_string(), name_b.trim().to_string())
    };

    let mut segments: Vec<BattleSegment> = Vec::new();
    let mut current_speaker: Option<Speaker> = None;
    let mut verses: Vec<String> = Vec::new();
    let mut raw: Vec<String> = Vec::new();

    let mut flush = |speaker: Option<Speaker>,
                     verses: &mut Vec<String>,
                     raw: &mut Vec<String>,
                     segments: &mut Vec<BattleSegment>| {
        if let Some(speaker) = speaker {
            if !verses.is_empty() {
                segments.push(BattleSegment {
                    index: segments.len(),
                    speaker,
                    verses: std::mem::take(verses),
                    raw_text: std::mem::take(raw).join("\n"),
                    is_conclusion: speaker == Speaker::Both,
                });
                return;
            }
        }
        verses.clear();
        raw.clear();
    };

    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(speaker) = match_marker(trimmed, &name_a, &name_b) {
            flush(current_speaker, &mut verses, &mut raw, &mut segments);
            current_speaker = Some(speaker);
        } else if current_speaker.is_some() {
            verses.push(trimmed.to_string());
            raw.push(line.to_string());
        }
    }
    flush(current_speaker, &mut verses, &mut raw, &mut segments);

    // Markerless script: treat the whole thing as one FighterA turn.
    if segments.is_empty() && !script.trim().is_empty() {
        warn!("No speaker markers found, treating script as a single segment");
        segments.push(BattleSegment {
            index: 0,
            speaker: Speaker::FighterA,
            verses: script.trim().lines().map(|l| l.to_string()).collect(),
            raw_text: script.trim().to_string(),
            is_conclusion: false,
        });
    }

    info!("Parsed {} segments from script", segments.len());
    segments
}

fn match_marker(line: &str, name_a: &str, name_b: &str) -> Option<Speaker> {
    if MARKER_BOTH.is_match(line) {
        return Some(Speaker::Both);
    }
    if MARKER_A.is_match(line) {
        return Some(Speaker::FighterA);
    }
    if MARKER_B.is_match(line) {
        return Some(Speaker::FighterB);
    }
    if let Some(name) = candidate_name(line) {
        if !name_a.is_empty() && name.eq_ignore_ascii_case(name_a) {
            return Some(Speaker::FighterA);
        }
        if !name_b.is_empty() && name.eq_ignore_ascii_case(name_b) {
            return Some(Speaker::FighterB);
        }
    }
    None
}

fn candidate_name(line: &str) -> Option<String> {
    MARKER_CANDIDATE.captures(line).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .map(|m| m.as_str().trim().to_string())
    })
}

/// Guess the two fighter names from the script's marker lines: the first two
/// distinct short bracketed/colon-suffixed names that are not the generic
/// markers.
fn guess_fighter_names(script: &str) -> (String, String) {
    let mut names: Vec<String> = Vec::new();
    for line in script.lines() {
        let trimmed = line.trim();
        if MARKER_A.is_match(trimmed) || MARKER_B.is_match(trimmed) || MARKER_BOTH.is_match(trimmed)
        {
            continue;
        }
        if let Some(name) = candidate_name(trimmed) {
            if !names.iter().any(|n| n.eq_ignore_ascii_case(&name)) {
                names.push(name);
            }
            if names.len() == 2 {
                break;
            }
        }
    }
    let mut names = names.into_iter();
    (
        names.next().unwrap_or_default(),
        names.next().unwrap_or_default(),
    )
}

/// The expected speaker at each position of the full 5-segment format.
const EXPECTED_SPEAKERS: [Speaker; 5] = [
    Speaker::FighterA,
    Speaker::FighterB,
    Speaker::FighterA,
    Speaker::FighterB,
    Speaker::Both,
];

/// Normalize a segment list to exactly `n` entries (3 for test mode, 5 for
/// the full format).
///
/// Short lists are padded with `"..."` placeholder segments following the
/// expected A/B alternation, the last one always the conclusion. Long lists
/// keep the first `n - 1` segments and merge the rest into a terminal
/// conclusion segment.
pub fn pad_to_fixed_count(mut segments: Vec<BattleSegment>, n: usize) -> Vec<BattleSegment> {
    use std::cmp::Ordering;

    match segments.len().cmp(&n) {
        Ordering::Equal => segments,
        Ordering::Less => {
            while segments.len() < n {
                let idx = segments.len();
                let speaker = if idx == n - 1 {
                    Speaker::Both
                } else {
                    *EXPECTED_SPEAKERS.get(idx).unwrap_or(&Speaker::FighterA)
                };
                segments.push(BattleSegment {
                    index: idx,
                    speaker,
                    verses: vec!["...".to_string()],
                    raw_text: "...".to_string(),
                    is_conclusion: idx == n - 1,
                });
            }
            segments
        }
        Ordering::Greater => {
            let extras = segments.split_off(n - 1);
            let verses: Vec<String> = extras.iter().flat_map(|s| s.verses.clone()).collect();
            let raw: Vec<String> = extras.iter().map(|s| s.raw_text.clone()).collect();
            segments.push(BattleSegment {
                index: n - 1,
                speaker: Speaker::Both,
                verses,
                raw_text: raw.join("\n"),
                is_conclusion: true,
            });
            segments
        }
    }
}
