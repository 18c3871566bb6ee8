//! Phrase-boundary model supplied by the beat-analysis collaborator.

/// A track's beat grid: downbeat anchor plus tempo. Phrase boundaries fall
/// every `beats_per_phrase` beats (8 or 16) after the first beat.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeatGrid {
    pub first_beat_sec: f64,
    pub bpm: f64,
    pub beats_per_phrase: u32,
}

impl BeatGrid {
    /// Returns None for grids that cannot produce a usable phrase length.
    pub fn new(first_beat_sec: f64, bpm: f64, beats_per_phrase: u32) -> Option<Self> {
        if !(bpm > 0.0 && bpm.is_finite()) || first_beat_sec < 0.0 {
            return None;
        }
        if beats_per_phrase != 8 && beats_per_phrase != 16 {
            return None;
        }
        Some(Self { first_beat_sec, bpm, beats_per_phrase })
    }

    pub fn phrase_len_sec(&self) -> f64 {
        self.beats_per_phrase as f64 * 60.0 / self.bpm
    }

    /// Snap an offset to the nearest phrase boundary, never before the first
    /// beat. The result differs from the input by at most half a phrase.
    pub fn snap_to_phrase(&self, offset_sec: f64) -> f64 {
        let phrase = self.phrase_len_sec();
        let phrases_in = ((offset_sec - self.first_beat_sec) / phrase).round().max(0.0);
        self.first_beat_sec + phrases_in * phrase
    }
}
