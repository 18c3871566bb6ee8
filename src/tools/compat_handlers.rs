use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use rmcp::ErrorData as McpError;
use rusqlite::Connection;

use crate::catalog;
use crate::scoring;
use crate::sequence;
use crate::transition;
use crate::types::{CompatibilityScore, MixPlan, Track, round_to_3_decimals};

use super::internal;

pub(super) fn validate_track_ids(ids: &[String]) -> Result<(), McpError> {
    if ids.is_empty() {
        return Err(McpError::invalid_params(
            "track_ids must not be empty",
            None,
        ));
    }
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(id.as_str()) {
            return Err(McpError::invalid_params(
                format!("duplicate track id '{id}'"),
                None,
            ));
        }
    }
    Ok(())
}

/// Load the requested tracks in request order, failing on any unknown ID.
pub(super) fn load_tracks(conn: &Connection, ids: &[String]) -> Result<Vec<Track>, McpError> {
    let found = catalog::get_tracks_by_ids(conn, ids)
        .map_err(|e| internal(format!("Catalog error: {e}")))?;
    if found.len() != ids.len() {
        let known: HashSet<&str> = found.iter().map(|t| t.id.as_str()).collect();
        let missing: Vec<&str> = ids
            .iter()
            .map(String::as_str)
            .filter(|id| !known.contains(id))
            .collect();
        return Err(McpError::invalid_params(
            format!("unknown track ids: {}", missing.join(", ")),
            None,
        ));
    }
    let by_id: HashMap<&str, &Track> = found.iter().map(|t| (t.id.as_str(), t)).collect();
    Ok(ids.iter().map(|id| by_id[id.as_str()].clone()).collect())
}

/// Validate, load, order, and plan a mix for the given track IDs.
pub(super) fn build_plan(
    conn: &Connection,
    ids: &[String],
    optimize_order: bool,
) -> Result<MixPlan, McpError> {
    validate_track_ids(ids)?;
    let tracks = load_tracks(conn, ids)?;
    let ordered = if optimize_order {
        sequence::order_tracks(tracks, |a, b| scoring::score_pair(a, b).overall)
    } else {
        tracks
    };
    Ok(transition::plan(&ordered, |id| {
        catalog::get_beat_grid(conn, id).ok().flatten()
    }))
}

pub(super) fn plan_to_json(plan: &MixPlan) -> serde_json::Value {
    let tracks: Vec<serde_json::Value> = plan
        .tracks
        .iter()
        .map(|t| {
            serde_json::json!({
                "id": t.id,
                "title": t.title,
                "artist": t.artist,
                "genre": t.genre,
            })
        })
        .collect();
    let transitions: Vec<serde_json::Value> = plan
        .tracks
        .windows(2)
        .zip(&plan.transitions)
        .map(|(pair, spec)| {
            serde_json::json!({
                "from": pair[0].id,
                "to": pair[1].id,
                "kind": spec.kind.as_str(),
                "duration_bars": spec.duration_bars,
                "out_point_sec": round_to_3_decimals(spec.out_point_sec),
                "in_point_sec": round_to_3_decimals(spec.in_point_sec),
                "aligned": spec.aligned,
            })
        })
        .collect();

    let mut json = serde_json::json!({
        "track_ids": plan.track_ids(),
        "tracks": tracks,
        "transitions": transitions,
    });
    if !plan.annotations.is_empty() {
        json["annotations"] = serde_json::json!(plan.annotations);
    }
    json
}

/// Score every candidate against the target and rank best-first. Ties break
/// on ascending track ID so results are stable. `min_score` filters out
/// discouraged partners; an empty result means no partner qualifies. Each
/// row carries the full compatibility score plus the partner's identity.
pub(super) fn rank_partners(
    target: &Track,
    candidates: &[Track],
    min_score: Option<f64>,
    limit: usize,
) -> Vec<serde_json::Value> {
    let mut scored: Vec<(&Track, CompatibilityScore)> = candidates
        .iter()
        .filter(|c| c.id != target.id)
        .map(|c| (c, scoring::score_pair(target, c)))
        .filter(|(_, score)| min_score.is_none_or(|min| score.overall >= min))
        .collect();
    scored.sort_by(|a, b| {
        b.1.overall
            .partial_cmp(&a.1.overall)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.id.cmp(&b.0.id))
    });
    scored
        .into_iter()
        .take(limit)
        .map(|(track, score)| {
            let mut row = score.to_json();
            row["track_id"] = serde_json::json!(track.id);
            row["title"] = serde_json::json!(track.title);
            row["artist"] = serde_json::json!(track.artist);
            row
        })
        .collect()
}
