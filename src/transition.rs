//! Transition planning: pick a transition style and phrase-aligned fade
//! points for every adjacent pair of an ordered track sequence.
//!
//! Planning is total: missing beat grids degrade to unsnapped points plus an
//! "unaligned" annotation, they never fail the plan.

use crate::beatgrid::BeatGrid;
use crate::genre;
use crate::scoring::{resolve_bpm, score_pair};
use crate::types::{CompatibilityScore, MixPlan, Track, TransitionKind, TransitionSpec};

const BEATS_PER_BAR: f64 = 4.0;

/// Crossfade needs both a workable key relation and spectral room.
const CROSSFADE_MIN_HARMONIC: f64 = 30.0;
const CROSSFADE_MIN_SPECTRUM: f64 = 8.0;

/// Build a MixPlan for an already-ordered sequence. `beat_lookup` is the
/// beat-analysis collaborator; `None` means no grid exists for that track.
pub fn plan<F>(ordered: &[Track], beat_lookup: F) -> MixPlan
where
    F: Fn(&str) -> Option<BeatGrid>,
{
    let mut transitions = Vec::new();
    let mut annotations: Vec<String> = Vec::new();

    for pair in ordered.windows(2) {
        let (outgoing, incoming) = (&pair[0], &pair[1]);
        let score = score_pair(outgoing, incoming);
        for note in &score.annotations {
            if !annotations.contains(note) {
                annotations.push(note.clone());
            }
        }

        let duration_bars = genre::genre_family(&incoming.genre).transition_bars();
        let kind = pick_kind(&score);

        let fade_out_secs =
            duration_bars as f64 * BEATS_PER_BAR * 60.0 / resolve_bpm(outgoing).value;
        let fade_in_secs =
            duration_bars as f64 * BEATS_PER_BAR * 60.0 / resolve_bpm(incoming).value;
        let raw_out = (outgoing.duration_secs - fade_out_secs).max(0.0);
        let raw_in = fade_in_secs.min(incoming.duration_secs);

        let out_grid = beat_lookup(&outgoing.id);
        let in_grid = beat_lookup(&incoming.id);
        let aligned = out_grid.is_some() && in_grid.is_some();
        if !aligned {
            annotations.push(format!(
                "unaligned transition ({} -> {})",
                outgoing.id, incoming.id
            ));
        }

        let out_point_sec = match out_grid {
            Some(grid) => grid.snap_to_phrase(raw_out).min(outgoing.duration_secs),
            None => raw_out,
        };
        let in_point_sec = match in_grid {
            Some(grid) => grid.snap_to_phrase(raw_in).min(incoming.duration_secs),
            None => raw_in,
        };

        transitions.push(TransitionSpec {
            kind,
            duration_bars,
            out_point_sec,
            in_point_sec,
            aligned,
        });
    }

    MixPlan {
        tracks: ordered.to_vec(),
        transitions,
        annotations,
    }
}

/// Pure crossfade when both key and spectrum leave room; otherwise mask the
/// weaker axis: filter sweep for key clashes, EQ swap for spectral clashes.
fn pick_kind(score: &CompatibilityScore) -> TransitionKind {
    if score.harmonic.value >= CROSSFADE_MIN_HARMONIC
        && score.spectrum.value >= CROSSFADE_MIN_SPECTRUM
    {
        return TransitionKind::Crossfade;
    }
    let harmonic_ratio = score.harmonic.value / 40.0;
    let spectrum_ratio = score.spectrum.value / 15.0;
    if harmonic_ratio <= spectrum_ratio {
        TransitionKind::FilterSweep
    } else {
        TransitionKind::EqSwap
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn track(id: &str, genre: &str, bpm: f64, key: &str, spectral: f64) -> Track {
        Track {
            id: id.to_string(),
            title: format!("Track {id}"),
            artist: "Test Artist".to_string(),
            genre: genre.to_string(),
            duration_secs: 360.0,
            tag_bpm: None,
            analysis_bpm: Some(bpm),
            tag_key: String::new(),
            analysis_key: Some(key.to_string()),
            energy: Some(0.6),
            spectral_profile: Some(spectral),
        }
    }

    fn grid_for(bpm: f64) -> BeatGrid {
        BeatGrid::new(0.1, bpm, 16).expect("test grid should be valid")
    }

    #[test]
    fn one_transition_per_adjacent_pair() {
        let tracks = vec![
            track("a", "Techno", 128.0, "8A", 0.4),
            track("b", "Techno", 128.0, "8A", -0.4),
            track("c", "Techno", 127.0, "9A", 0.3),
        ];
        let plan = plan(&tracks, |_| Some(grid_for(128.0)));
        assert_eq!(plan.transitions.len(), tracks.len() - 1);
        assert_eq!(plan.tracks.len(), tracks.len());
    }

    #[test]
    fn single_track_plan_has_no_transitions() {
        let tracks = vec![track("solo", "House", 124.0, "5A", 0.0)];
        let plan = plan(&tracks, |_| None);
        assert!(plan.transitions.is_empty());
    }

    #[test]
    fn duration_bars_follow_incoming_genre_family() {
        let tracks = vec![
            track("a", "Techno", 128.0, "8A", 0.0),
            track("b", "Techno", 128.0, "8A", 0.0),
            track("c", "Hip Hop", 90.0, "8A", 0.0),
        ];
        let plan = plan(&tracks, |_| None);
        assert_eq!(plan.transitions[0].duration_bars, 16, "into techno: long blend");
        assert_eq!(plan.transitions[1].duration_bars, 4, "into hip hop: short cut");
    }

    #[test]
    fn kind_selection_masks_the_weak_axis() {
        let vocal = track("a", "Techno", 128.0, "8A", 0.6);
        let instrumental = track("b", "Techno", 128.0, "8A", -0.6);
        let clashing_key = track("c", "Techno", 128.0, "2B", 0.0);
        let also_vocal = track("d", "Techno", 128.0, "8A", 0.7);

        let strong = plan(&[vocal.clone(), instrumental.clone()], |_| None);
        assert_eq!(strong.transitions[0].kind, TransitionKind::Crossfade);

        let weak_key = plan(&[vocal.clone(), clashing_key], |_| None);
        assert_eq!(weak_key.transitions[0].kind, TransitionKind::FilterSweep);

        let weak_spectrum = plan(&[vocal, also_vocal], |_| None);
        assert_eq!(weak_spectrum.transitions[0].kind, TransitionKind::EqSwap);
    }

    #[test]
    fn snapped_points_stay_within_half_a_phrase_of_raw() {
        let tracks = vec![
            track("a", "Techno", 128.0, "8A", 0.0),
            track("b", "Techno", 128.0, "8A", 0.0),
        ];
        let grid = grid_for(128.0);
        let half_phrase = grid.phrase_len_sec() / 2.0;

        let snapped = plan(&tracks, |_| Some(grid));
        let unsnapped = plan(&tracks, |_| None);

        let spec = &snapped.transitions[0];
        let raw = &unsnapped.transitions[0];
        assert!(spec.aligned);
        assert!((spec.out_point_sec - raw.out_point_sec).abs() <= half_phrase + 1e-9);
        assert!((spec.in_point_sec - raw.in_point_sec).abs() <= half_phrase + 1e-9);
    }

    #[test]
    fn missing_grid_degrades_to_unaligned_annotation() {
        let tracks = vec![
            track("a", "Techno", 128.0, "8A", 0.0),
            track("b", "Techno", 128.0, "8A", 0.0),
        ];
        let plan = plan(&tracks, |id| if id == "a" { Some(grid_for(128.0)) } else { None });
        assert!(!plan.transitions[0].aligned);
        assert!(plan
            .annotations
            .iter()
            .any(|a| a.contains("unaligned transition")));
    }

    #[test]
    fn fade_points_stay_within_track_bounds() {
        // Short track: the fade would start before 0 without clamping.
        let mut short = track("a", "Techno", 128.0, "8A", 0.0);
        short.duration_secs = 10.0;
        let tracks = vec![short, track("b", "Techno", 128.0, "8A", 0.0)];
        let plan = plan(&tracks, |_| None);
        let spec = &plan.transitions[0];
        assert!(spec.out_point_sec >= 0.0);
        assert!(spec.in_point_sec <= 360.0);
    }
}
