use std::collections::HashSet;

use clap::Parser;

use crate::{catalog, scoring, sequence, transition};

#[derive(Parser)]
#[command(name = "mixforge")]
enum Cli {
    /// Score mix compatibility for a pair of tracks
    Score(ScoreArgs),
    /// Build and print a mix plan without rendering
    Plan(PlanArgs),
}

#[derive(clap::Args)]
struct ScoreArgs {
    /// First track ID
    #[arg(long)]
    track_a: String,
    /// Second track ID
    #[arg(long)]
    track_b: String,
}

#[derive(clap::Args)]
struct PlanArgs {
    /// Track IDs to include (comma-separated or repeated)
    #[arg(long, required = true, num_args = 1.., value_delimiter = ',')]
    tracks: Vec<String>,
    /// Keep the given order instead of optimizing for compatibility
    #[arg(long)]
    keep_order: bool,
}

pub async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    match cli {
        Cli::Score(args) => score(args),
        Cli::Plan(args) => plan(args),
    }
}

fn score(args: ScoreArgs) -> Result<(), Box<dyn std::error::Error>> {
    let conn = catalog::open(&catalog::resolve_db_path())?;
    let track_a = catalog::get_track(&conn, &args.track_a)?
        .ok_or_else(|| format!("Track '{}' not found", args.track_a))?;
    let track_b = catalog::get_track(&conn, &args.track_b)?
        .ok_or_else(|| format!("Track '{}' not found", args.track_b))?;

    let score = scoring::score_pair(&track_a, &track_b);
    println!("{}", serde_json::to_string_pretty(&score.to_json())?);
    Ok(())
}

fn plan(args: PlanArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut seen = HashSet::new();
    for id in &args.tracks {
        if !seen.insert(id.as_str()) {
            return Err(format!("duplicate track id '{id}'").into());
        }
    }

    let conn = catalog::open(&catalog::resolve_db_path())?;
    let tracks = catalog::get_tracks_by_ids(&conn, &args.tracks)?;
    if tracks.len() != args.tracks.len() {
        let known: HashSet<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
        let missing: Vec<&str> = args
            .tracks
            .iter()
            .map(String::as_str)
            .filter(|id| !known.contains(id))
            .collect();
        return Err(format!("unknown track ids: {}", missing.join(", ")).into());
    }

    let ordered = if args.keep_order {
        let by_id: std::collections::HashMap<&str, _> =
            tracks.iter().map(|t| (t.id.as_str(), t.clone())).collect();
        args.tracks.iter().map(|id| by_id[id.as_str()].clone()).collect()
    } else {
        sequence::order_tracks(tracks, |a, b| scoring::score_pair(a, b).overall)
    };

    let plan = transition::plan(&ordered, |id| {
        catalog::get_beat_grid(&conn, id).ok().flatten()
    });
    println!("{}", serde_json::to_string_pretty(&plan)?);
    Ok(())
}
