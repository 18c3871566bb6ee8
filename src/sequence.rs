//! Deterministic track ordering.
//!
//! Maximizing total adjacent compatibility is a Hamiltonian-path problem, so
//! the optimizer is a greedy construction (seed with the globally best pair,
//! then extend whichever open end has the better next candidate) followed by
//! a budget-capped 2-opt segment-reversal pass. All ties break by ascending
//! track id so identical inputs always yield identical orderings.

use crate::types::Track;

/// Accepted reversals allowed in the improvement pass, scaled to input size.
fn improvement_budget(track_count: usize) -> usize {
    (track_count * 4).min(256)
}

/// Order `tracks` so that every input track appears exactly once and the
/// summed adjacent pair score is high. Deterministic for a fixed scorer.
pub fn order_tracks<F>(mut tracks: Vec<Track>, score: F) -> Vec<Track>
where
    F: Fn(&Track, &Track) -> f64,
{
    // Canonical base order makes every later tie-break reproducible.
    tracks.sort_by(|a, b| a.id.cmp(&b.id));
    let n = tracks.len();
    if n <= 2 {
        return tracks;
    }

    let matrix = score_matrix(&tracks, &score);

    let (seed_a, seed_b) = best_seed_pair(&matrix);
    let mut path: Vec<usize> = vec![seed_a, seed_b];
    let mut remaining: Vec<usize> = (0..n).filter(|i| *i != seed_a && *i != seed_b).collect();

    while !remaining.is_empty() {
        let front = path[0];
        let back = *path.last().unwrap_or(&front);

        let best_for_front = best_candidate(front, &remaining, &matrix);
        let best_for_back = best_candidate(back, &remaining, &matrix);

        // Extend the end with the stronger option; ties go to the back end.
        let (candidate, extend_front) = if best_for_front.1 > best_for_back.1 {
            (best_for_front.0, true)
        } else {
            (best_for_back.0, false)
        };

        remaining.retain(|i| *i != candidate);
        if extend_front {
            path.insert(0, candidate);
        } else {
            path.push(candidate);
        }
    }

    improve_path(&mut path, &matrix, improvement_budget(n));

    path.into_iter()
        .map(|i| tracks[i].clone())
        .collect()
}

/// Summed score over adjacent pairs of an ordering.
pub fn total_adjacent_score<F>(ordered: &[Track], score: F) -> f64
where
    F: Fn(&Track, &Track) -> f64,
{
    ordered
        .windows(2)
        .map(|pair| score(&pair[0], &pair[1]))
        .sum()
}

fn score_matrix<F>(tracks: &[Track], score: &F) -> Vec<Vec<f64>>
where
    F: Fn(&Track, &Track) -> f64,
{
    let n = tracks.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = score(&tracks[i], &tracks[j]);
            matrix[i][j] = s;
            matrix[j][i] = s;
        }
    }
    matrix
}

/// Highest-scoring pair; indices come from the id-sorted track list, so the
/// first strict maximum is the lexicographically smallest tie.
fn best_seed_pair(matrix: &[Vec<f64>]) -> (usize, usize) {
    let n = matrix.len();
    let mut best = (0, 1);
    let mut best_score = f64::NEG_INFINITY;
    for i in 0..n {
        for j in (i + 1)..n {
            if matrix[i][j] > best_score {
                best_score = matrix[i][j];
                best = (i, j);
            }
        }
    }
    best
}

/// Best unused neighbor for an end of the path; `remaining` is kept in
/// ascending id order, so strict comparison breaks ties by ascending id.
fn best_candidate(end: usize, remaining: &[usize], matrix: &[Vec<f64>]) -> (usize, f64) {
    let mut best = remaining[0];
    let mut best_score = f64::NEG_INFINITY;
    for &candidate in remaining {
        let s = matrix[end][candidate];
        if s > best_score {
            best_score = s;
            best = candidate;
        }
    }
    (best, best_score)
}

/// 2-opt segment reversal: reversing path[i..=j] swaps the two boundary
/// edges; interior edges are unchanged because scoring is symmetric. Accepts
/// only strict improvements, capped by `budget` accepted reversals.
fn improve_path(path: &mut [usize], matrix: &[Vec<f64>], budget: usize) {
    let n = path.len();
    if n < 4 {
        return;
    }

    let mut accepted = 0usize;
    loop {
        let mut improved = false;
        for i in 1..(n - 2) {
            for j in (i + 1)..(n - 1) {
                let before = matrix[path[i - 1]][path[i]] + matrix[path[j]][path[j + 1]];
                let after = matrix[path[i - 1]][path[j]] + matrix[path[i]][path[j + 1]];
                if after > before + f64::EPSILON {
                    path[i..=j].reverse();
                    improved = true;
                    accepted += 1;
                    if accepted >= budget {
                        return;
                    }
                }
            }
        }
        if !improved {
            return;
        }
    }
}
