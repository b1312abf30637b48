//! Tempo estimation and snapping.
//!
//! The estimator computes an onset-strength envelope (positive spectral-energy
//! flux over short frames) and autocorrelates it across the plausible tempo
//! range. It never raises: any read or analysis failure yields the 120 BPM
//! default.

use std::path::{Path, PathBuf};

use log::{error, info};

use super::AudioClip;

/// Fallback when detection is impossible.
pub const DEFAULT_BPM: f64 = 120.0;

/// Common hip-hop tempos detected values are snapped to.
pub const COMMON_BPMS: &[u32] = &[85, 90, 95, 100, 105, 110, 120, 130, 140, 145, 150];

const FRAME_SIZE: usize = 1024;
const HOP_SIZE: usize = 512;
const MIN_BPM: f64 = 60.0;
const MAX_BPM: f64 = 200.0;

/// Detect the tempo of an audio file. Returns [`DEFAULT_BPM`] on any failure.
pub fn detect(path: &Path) -> f64 {
    info!("Detecting BPM from: {}", path.display());
    match AudioClip::load(path) {
        Ok(clip) => match estimate_tempo(&clip) {
            Some(bpm) => {
                info!("Detected BPM: {bpm:.1}");
                bpm
            }
            None => {
                error!("BPM detection failed: signal too short or flat");
                DEFAULT_BPM
            }
        },
        Err(e) => {
            error!("BPM detection failed: {e}");
            DEFAULT_BPM
        }
    }
}

/// Average tempo over several files, skipping unreadable ones. Returns
/// [`DEFAULT_BPM`] when the list is empty or every file fails.
pub fn detect_average(paths: &[PathBuf]) -> f64 {
    let estimates: Vec<f64> = paths
        .iter()
        .filter(|p| p.exists())
        .map(|p| detect(p))
        .collect();
    if estimates.is_empty() {
        return DEFAULT_BPM;
    }
    let avg = estimates.iter().sum::<f64>() / estimates.len() as f64;
    info!("Average BPM from {} files: {avg:.1}", estimates.len());
    avg
}

/// Snap a detected tempo to the nearest member of [`COMMON_BPMS`].
///
/// On an exact midpoint the first-listed (lower) tempo wins: candidates are
/// replaced only on strictly smaller distance.
pub fn snap_to_common(bpm: f64) -> u32 {
    let mut closest = COMMON_BPMS[0];
    let mut best = (COMMON_BPMS[0] as f64 - bpm).abs();
    for &candidate in &COMMON_BPMS[1..] {
        let distance = (candidate as f64 - bpm).abs();
        if distance < best {
            best = distance;
            closest = candidate;
        }
    }
    info!("Snapped BPM {bpm:.1} to {closest}");
    closest
}

/// Autocorrelation tempo estimate over the onset envelope. `None` when the
/// clip is too short or has no energy variation.
fn estimate_tempo(clip: &AudioClip) -> Option<f64> {
    if clip.duration_ms() < 2_000 {
        return None;
    }

    // Onset envelope: positive frame-energy flux.
    let mut envelope = Vec::new();
    let mut prev_energy = 0.0f32;
    let mut start = 0;
    while start + FRAME_SIZE <= clip.samples.len() {
        let frame = &clip.samples[start..start + FRAME_SIZE];
        let energy = frame.iter().map(|s| s * s).sum::<f32>() / FRAME_SIZE as f32;
        envelope.push((energy - prev_energy).max(0.0));
        prev_energy = energy;
        start += HOP_SIZE;
    }
    if envelope.len() < 8 {
        return None;
    }

    let mean = envelope.iter().sum::<f32>() / envelope.len() as f32;
    if mean <= f32::EPSILON {
        return None;
    }
    for value in &mut envelope {
        *value -= mean;
    }

    // Lag bounds for the tempo range, in envelope hops.
    let hop_rate = clip.sample_rate as f64 / HOP_SIZE as f64;
    let min_lag = ((hop_rate * 60.0) / MAX_BPM).floor().max(1.0) as usize;
    let max_lag = ((hop_rate * 60.0) / MIN_BPM).ceil() as usize;
    if max_lag >= envelope.len() {
        return None;
    }

    let mut best_lag = 0;
    let mut best_score = f32::MIN;
    for lag in min_lag..=max_lag {
        let mut score = 0.0;
        for i in lag..envelope.len() {
            score += envelope[i] * envelope[i - lag];
        }
        if score > best_score {
            best_score = score;
            best_lag = lag;
        }
    }
    if best_lag == 0 || best_score <= 0.0 {
        return None;
    }

    let bpm = hop_rate * 60.0 / best_lag as f64;
    Some(bpm.clamp(MIN_BPM, MAX_BPM))
}
