use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct SearchTracksParams {
    #[schemars(description = "Search query matching title or artist")]
    pub query: Option<String>,
    #[schemars(description = "Filter by genre name (partial match)")]
    pub genre: Option<String>,
    #[schemars(description = "Minimum BPM (analysis value when present, tag otherwise)")]
    pub bpm_min: Option<f64>,
    #[schemars(description = "Maximum BPM (analysis value when present, tag otherwise)")]
    pub bpm_max: Option<f64>,
    #[schemars(description = "Max results (default 50, max 200)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetTrackParams {
    #[schemars(description = "Track ID")]
    pub track_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ScorePairParams {
    #[schemars(description = "First track ID")]
    pub track_a: String,
    #[schemars(description = "Second track ID")]
    pub track_b: String,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct BestPartnerParams {
    #[schemars(description = "Track ID to find partners for")]
    pub track_id: String,
    #[schemars(
        description = "Candidate track IDs to rank. Omit to rank the whole catalog."
    )]
    pub candidate_ids: Option<Vec<String>>,
    #[schemars(
        description = "Drop partners scoring below this overall score. Omit to keep all."
    )]
    pub min_score: Option<f64>,
    #[schemars(description = "Max partners to return (default 10, max 50)")]
    pub limit: Option<u32>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct PreviewMixPlanParams {
    #[schemars(description = "Track IDs to include in the mix (no duplicates)")]
    pub track_ids: Vec<String>,
    #[schemars(
        description = "Reorder tracks for maximum adjacent compatibility (default true). \
                       When false the given order is kept."
    )]
    pub optimize_order: Option<bool>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CreateMixJobParams {
    #[schemars(
        description = "Explicit track IDs to include (no duplicates). Either this or \
                       filter criteria is required."
    )]
    pub track_ids: Option<Vec<String>>,
    #[schemars(description = "Criteria form: search query matching title or artist")]
    pub query: Option<String>,
    #[schemars(description = "Criteria form: filter by genre name (partial match)")]
    pub genre: Option<String>,
    #[schemars(description = "Criteria form: minimum BPM")]
    pub bpm_min: Option<f64>,
    #[schemars(description = "Criteria form: maximum BPM")]
    pub bpm_max: Option<f64>,
    #[schemars(description = "Criteria form: max tracks selected (default 50, max 200)")]
    pub limit: Option<u32>,
    #[schemars(
        description = "Reorder tracks for maximum adjacent compatibility (default true). \
                       When false the given order is kept."
    )]
    pub optimize_order: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetJobParams {
    #[schemars(description = "Render job ID")]
    pub job_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CancelJobParams {
    #[schemars(description = "Render job ID")]
    pub job_id: String,
}
