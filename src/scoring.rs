//! Pairwise track-compatibility scoring.
//!
//! `score_pair` is pure and total: missing metadata degrades the score
//! through an explicit fallback chain (analysis -> tag -> domain default),
//! it never fails. Scores are symmetric in their arguments.

use crate::types::{
    AxisScore, CompatibilityScore, Difficulty, Resolved, ResolvedSource, Track,
};

pub const DEFAULT_BPM: f64 = 120.0;
pub const DEFAULT_ENERGY: f64 = 0.5;
pub const DEFAULT_SPECTRAL: f64 = 0.0;

/// Fraction of the slower track's BPM still mixable by pitch adjustment.
const TEMPO_TOLERANCE_PCT: f64 = 0.06;
/// Allowed deviation from an exact 2.0 half/double-time ratio.
const DOUBLE_TIME_TOLERANCE: f64 = 0.08;
/// |spectral_profile| above this counts as a genuine lean.
const SPECTRAL_NEUTRAL_THRESHOLD: f64 = 0.15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CamelotKey {
    pub number: u8,
    pub letter: char,
}

pub fn format_camelot(key: CamelotKey) -> String {
    format!("{}{}", key.number, key.letter)
}

/// Parse a camelot notation string ("8A", "12b").
pub fn parse_camelot_key(raw_key: &str) -> Option<CamelotKey> {
    let trimmed = raw_key.trim().to_ascii_uppercase();
    if trimmed.len() < 2 {
        return None;
    }
    let (number, letter_str) = trimmed.split_at(trimmed.len() - 1);
    let letter = letter_str.chars().next()?;
    if letter != 'A' && letter != 'B' {
        return None;
    }
    let number: u8 = number.parse().ok()?;
    if !(1..=12).contains(&number) {
        return None;
    }
    Some(CamelotKey { number, letter })
}

/// Parse standard key notation ("Am", "F# minor", "Db") into camelot.
pub fn standard_key_to_camelot(raw_key: &str) -> Option<CamelotKey> {
    let normalized = raw_key.trim().replace('\u{266F}', "#").replace('\u{266D}', "b");
    if normalized.is_empty() {
        return None;
    }
    let lower = normalized.to_ascii_lowercase();

    let (root_raw, is_minor) = if lower.ends_with("minor") && normalized.len() > 5 {
        (&normalized[..normalized.len() - 5], true)
    } else if lower.ends_with("min") && normalized.len() > 3 {
        (&normalized[..normalized.len() - 3], true)
    } else if lower.ends_with('m') && normalized.len() > 1 {
        (&normalized[..normalized.len() - 1], true)
    } else if lower.ends_with("major") && normalized.len() > 5 {
        (&normalized[..normalized.len() - 5], false)
    } else if lower.ends_with("maj") && normalized.len() > 3 {
        (&normalized[..normalized.len() - 3], false)
    } else {
        (normalized.as_str(), false)
    };
    let root = normalize_key_root(root_raw)?;

    let (number, letter) = if is_minor {
        match root.as_str() {
            "G#" | "Ab" => (1, 'A'),
            "D#" | "Eb" => (2, 'A'),
            "A#" | "Bb" => (3, 'A'),
            "F" => (4, 'A'),
            "C" => (5, 'A'),
            "G" => (6, 'A'),
            "D" => (7, 'A'),
            "A" => (8, 'A'),
            "E" => (9, 'A'),
            "B" => (10, 'A'),
            "F#" | "Gb" => (11, 'A'),
            "C#" | "Db" => (12, 'A'),
            _ => return None,
        }
    } else {
        match root.as_str() {
            "B" => (1, 'B'),
            "F#" | "Gb" => (2, 'B'),
            "C#" | "Db" => (3, 'B'),
            "G#" | "Ab" => (4, 'B'),
            "D#" | "Eb" => (5, 'B'),
            "A#" | "Bb" => (6, 'B'),
            "F" => (7, 'B'),
            "C" => (8, 'B'),
            "G" => (9, 'B'),
            "D" => (10, 'B'),
            "A" => (11, 'B'),
            "E" => (12, 'B'),
            _ => return None,
        }
    };
    Some(CamelotKey { number, letter })
}

fn normalize_key_root(root: &str) -> Option<String> {
    let stripped: String = root.chars().filter(|ch| !ch.is_whitespace()).collect();
    if stripped.is_empty() {
        return None;
    }
    let mut chars = stripped.chars();
    let letter = chars.next()?.to_ascii_uppercase();
    if !matches!(letter, 'A' | 'B' | 'C' | 'D' | 'E' | 'F' | 'G') {
        return None;
    }

    let accidental = chars.next();
    if chars.next().is_some() {
        return None;
    }

    let normalized = match accidental {
        Some('#') => format!("{letter}#"),
        Some('b') | Some('B') => format!("{letter}b"),
        Some(_) => return None,
        None => letter.to_string(),
    };
    Some(normalized)
}

/// Resolve a track's BPM: analysis value, then tag value, then the domain
/// default. Non-positive values are treated as absent, never as zero BPM.
pub fn resolve_bpm(track: &Track) -> Resolved {
    if let Some(bpm) = track.analysis_bpm.filter(|b| *b > 0.0) {
        return Resolved { value: bpm, source: ResolvedSource::Analysis };
    }
    if let Some(bpm) = track.tag_bpm.filter(|b| *b > 0.0) {
        return Resolved { value: bpm, source: ResolvedSource::Tag };
    }
    Resolved { value: DEFAULT_BPM, source: ResolvedSource::Default }
}

pub fn resolve_energy(track: &Track) -> Resolved {
    match track.energy.filter(|e| e.is_finite()) {
        Some(energy) => Resolved {
            value: energy.clamp(0.0, 1.0),
            source: ResolvedSource::Analysis,
        },
        None => Resolved { value: DEFAULT_ENERGY, source: ResolvedSource::Default },
    }
}

pub fn resolve_spectral(track: &Track) -> Resolved {
    match track.spectral_profile.filter(|s| s.is_finite()) {
        Some(profile) => Resolved {
            value: profile.clamp(-1.0, 1.0),
            source: ResolvedSource::Analysis,
        },
        None => Resolved { value: DEFAULT_SPECTRAL, source: ResolvedSource::Default },
    }
}

/// Resolve a track's key: analysis camelot string first, then the tag key
/// (camelot or standard notation). No default exists for keys.
pub fn resolve_key(track: &Track) -> Option<CamelotKey> {
    track
        .analysis_key
        .as_deref()
        .and_then(parse_camelot_key)
        .or_else(|| parse_camelot_key(&track.tag_key))
        .or_else(|| standard_key_to_camelot(&track.tag_key))
}

/// Score an ordered pair of tracks. Symmetric: the result does not depend on
/// argument order.
pub fn score_pair(a: &Track, b: &Track) -> CompatibilityScore {
    let mut annotations = Vec::new();

    let key_a = resolve_key(a);
    let key_b = resolve_key(b);
    for (track, key) in [(a, key_a), (b, key_b)] {
        if key.is_none() {
            annotations.push(format!("unknown key ({})", track.id));
        }
    }

    let bpm_a = resolve_bpm(a);
    let bpm_b = resolve_bpm(b);
    let energy_a = resolve_energy(a);
    let energy_b = resolve_energy(b);
    let spectral_a = resolve_spectral(a);
    let spectral_b = resolve_spectral(b);
    for (track, resolved, what) in [
        (a, bpm_a, "BPM"),
        (b, bpm_b, "BPM"),
        (a, energy_a, "energy"),
        (b, energy_b, "energy"),
        (a, spectral_a, "spectral profile"),
        (b, spectral_b, "spectral profile"),
    ] {
        if resolved.source == ResolvedSource::Default {
            annotations.push(format!("default {what} used ({})", track.id));
        }
    }

    let harmonic = score_harmonic_axis(key_a, key_b);
    let tempo = score_tempo_axis(bpm_a.value, bpm_b.value);
    let energy = score_energy_axis(energy_a.value, energy_b.value);
    let spectrum = score_spectrum_axis(spectral_a.value, spectral_b.value);

    let overall = harmonic.value + tempo.value + energy.value + spectrum.value;
    let difficulty = Difficulty::from_overall(overall);

    CompatibilityScore {
        harmonic,
        tempo,
        energy,
        spectrum,
        overall,
        difficulty,
        annotations,
    }
}

/// Harmonic axis, max 40. Relation bonuses are direction-independent so the
/// axis stays symmetric.
fn score_harmonic_axis(from: Option<CamelotKey>, to: Option<CamelotKey>) -> AxisScore {
    let (Some(from), Some(to)) = (from, to) else {
        return AxisScore {
            value: 8.0,
            label: "Unknown key".to_string(),
        };
    };

    if from == to {
        return AxisScore {
            value: 40.0,
            label: "Perfect match".to_string(),
        };
    }

    let clockwise = ((to.number as i16 - from.number as i16 + 12) % 12) as u8;
    let wheel_distance = clockwise.min(12 - clockwise);
    let same_letter = from.letter == to.letter;

    if wheel_distance == 0 && !same_letter {
        // Relative major/minor switch.
        return AxisScore {
            value: 37.0,
            label: "Relative key switch (A\u{2194}B)".to_string(),
        };
    }
    if wheel_distance == 1 && same_letter {
        return AxisScore {
            value: 35.0,
            label: "Adjacent on wheel (\u{b1}1)".to_string(),
        };
    }

    // Smooth falloff with wheel distance; a letter mismatch costs one step.
    let effective = wheel_distance + u8::from(!same_letter);
    let falloff = ((7.0 - effective as f64) / 6.0).max(0.0);
    AxisScore {
        value: 30.0 * falloff * falloff,
        label: format!("Distant keys (wheel distance {wheel_distance})"),
    }
}

/// Tempo axis, max 30.
fn score_tempo_axis(bpm_a: f64, bpm_b: f64) -> AxisScore {
    let delta = (bpm_a - bpm_b).abs();
    if delta < 0.5 {
        return AxisScore {
            value: 30.0,
            label: format!("Locked tempo (delta {delta:.2})"),
        };
    }

    let slower = bpm_a.min(bpm_b);
    let faster = bpm_a.max(bpm_b);
    let pct = delta / slower;
    if pct <= TEMPO_TOLERANCE_PCT {
        // Linear 28 down to 20 across the pitch-adjust window.
        let value = 28.0 - (pct / TEMPO_TOLERANCE_PCT) * 8.0;
        return AxisScore {
            value,
            label: format!("Within pitch range ({:.1}%)", pct * 100.0),
        };
    }

    let ratio = faster / slower;
    if (ratio - 2.0).abs() <= DOUBLE_TIME_TOLERANCE {
        return AxisScore {
            value: 25.0,
            label: format!("Half/double time (ratio {ratio:.2})"),
        };
    }

    AxisScore {
        value: 0.0,
        label: format!("Tempo clash (delta {delta:.1})"),
    }
}

/// Energy axis, max 15.
fn score_energy_axis(energy_a: f64, energy_b: f64) -> AxisScore {
    let delta = (energy_a - energy_b).abs();
    if delta < 0.1 {
        AxisScore {
            value: 15.0,
            label: format!("Matched energy (delta {delta:.2})"),
        }
    } else if delta < 0.2 {
        AxisScore {
            value: 12.0,
            label: format!("Close energy (delta {delta:.2})"),
        }
    } else {
        // Linear from 12 at 0.2 down to 0 at 0.5.
        let value = (12.0 * (1.0 - (delta - 0.2) / 0.3)).max(0.0);
        AxisScore {
            value,
            label: format!("Energy gap (delta {delta:.2})"),
        }
    }
}

/// Spectral-balance axis, max 15. Opposite leanings complement each other in
/// the mix; two busy vocal tracks fight.
fn score_spectrum_axis(spectral_a: f64, spectral_b: f64) -> AxisScore {
    let lean_a = spectral_a.abs() > SPECTRAL_NEUTRAL_THRESHOLD;
    let lean_b = spectral_b.abs() > SPECTRAL_NEUTRAL_THRESHOLD;
    let opposite = spectral_a * spectral_b < 0.0;

    if opposite && lean_a && lean_b {
        return AxisScore {
            value: 15.0,
            label: "Vocal/instrumental complement".to_string(),
        };
    }
    if opposite && (lean_a || lean_b) {
        let magnitude = ((spectral_a.abs() + spectral_b.abs()) / 0.6).min(1.0);
        return AxisScore {
            value: 8.0 + 4.0 * magnitude,
            label: "Partial complement".to_string(),
        };
    }
    if !lean_a && !lean_b {
        return AxisScore {
            value: 5.0,
            label: "Neutral balance".to_string(),
        };
    }
    if lean_a && lean_b {
        // Same-leaning: the stronger the shared lean, the worse.
        let shared = (spectral_a.abs() + spectral_b.abs() - 0.3) / 1.7;
        return AxisScore {
            value: (5.0 - 5.0 * shared.clamp(0.0, 1.0)).max(0.0),
            label: "Same-leaning".to_string(),
        };
    }
    AxisScore {
        value: 5.0,
        label: "One-sided lean".to_string(),
    }
}
