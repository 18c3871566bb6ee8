use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A track as read from the catalog collaborator. Analysis-grade fields stay
/// optional here; the scorer resolves each through an explicit chain
/// (analysis value -> tag value -> domain default) and records the source.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Track {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub genre: String,
    pub duration_secs: f64,
    /// BPM from file tags (secondary estimate).
    pub tag_bpm: Option<f64>,
    /// BPM from audio analysis (primary).
    pub analysis_bpm: Option<f64>,
    /// Raw key string from file tags ("Am", "8A", ...). Empty when untagged.
    pub tag_key: String,
    /// Camelot key string from audio analysis.
    pub analysis_key: Option<String>,
    /// Perceived energy 0-1 from analysis.
    pub energy: Option<f64>,
    /// Spectral balance -1..1: negative instrumental-leaning, positive
    /// vocal-leaning.
    pub spectral_profile: Option<f64>,
}

/// Where a resolved numeric attribute came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ResolvedSource {
    Analysis,
    Tag,
    Default,
}

impl ResolvedSource {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::Tag => "tag",
            Self::Default => "default",
        }
    }
}

/// A numeric attribute after fallback resolution, with its source retained
/// for debuggability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Resolved {
    pub value: f64,
    pub source: ResolvedSource,
}

/// One scored compatibility axis: bounded value plus a human-readable label.
#[derive(Debug, Clone)]
pub struct AxisScore {
    pub value: f64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Challenging,
    Discouraged,
}

impl Difficulty {
    pub fn from_overall(overall: f64) -> Self {
        if overall >= 85.0 {
            Self::Easy
        } else if overall >= 75.0 {
            Self::Medium
        } else if overall >= 70.0 {
            Self::Challenging
        } else {
            Self::Discouraged
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Easy => "easy",
            Self::Medium => "medium",
            Self::Challenging => "challenging",
            Self::Discouraged => "discouraged",
        }
    }
}

/// Pairwise compatibility across the four axes. Sub-score maxima sum to 100:
/// harmonic 40, tempo 30, energy 15, spectrum 15.
#[derive(Debug, Clone)]
pub struct CompatibilityScore {
    pub harmonic: AxisScore,
    pub tempo: AxisScore,
    pub energy: AxisScore,
    pub spectrum: AxisScore,
    pub overall: f64,
    pub difficulty: Difficulty,
    /// Data-quality notes ("default BPM used", "unknown key"), never errors.
    pub annotations: Vec<String>,
}

impl CompatibilityScore {
    pub fn to_json(&self) -> serde_json::Value {
        let mut json = serde_json::json!({
            "harmonic": { "value": round_to_3_decimals(self.harmonic.value), "label": self.harmonic.label },
            "tempo": { "value": round_to_3_decimals(self.tempo.value), "label": self.tempo.label },
            "energy": { "value": round_to_3_decimals(self.energy.value), "label": self.energy.label },
            "spectrum": { "value": round_to_3_decimals(self.spectrum.value), "label": self.spectrum.label },
            "overall": round_to_3_decimals(self.overall),
            "difficulty": self.difficulty.as_str(),
        });
        if !self.annotations.is_empty() {
            json["annotations"] = serde_json::json!(self.annotations);
        }
        json
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum TransitionKind {
    Crossfade,
    EqSwap,
    FilterSweep,
}

impl TransitionKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Crossfade => "crossfade",
            Self::EqSwap => "eq_swap",
            Self::FilterSweep => "filter_sweep",
        }
    }
}

impl fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned transition between adjacent tracks in a mix.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TransitionSpec {
    pub kind: TransitionKind,
    pub duration_bars: u32,
    /// Fade start offset in the outgoing track.
    pub out_point_sec: f64,
    /// Offset in the incoming track at which it is fully in.
    pub in_point_sec: f64,
    /// False when no beat grid existed and the points are unsnapped.
    pub aligned: bool,
}

/// An ordered, duplicate-free track sequence with one transition per
/// adjacent pair (transitions.len() == tracks.len() - 1).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MixPlan {
    pub tracks: Vec<Track>,
    pub transitions: Vec<TransitionSpec>,
    /// Plan-quality notes: "unaligned transition", "default BPM used", ...
    pub annotations: Vec<String>,
}

impl MixPlan {
    pub fn track_ids(&self) -> Vec<&str> {
        self.tracks.iter().map(|t| t.id.as_str()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Why a render job failed. Timeout is distinct from generic failure so
/// callers can tell "broken input" from "took too long".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    RenderFailure,
    RenderTimeout,
}

impl FailureReason {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RenderFailure => "render_failure",
            Self::RenderTimeout => "render_timeout",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorDetail {
    pub reason: FailureReason,
    /// Toolchain diagnostic, retained verbatim.
    pub message: String,
}

/// One render request's lifecycle. Mutated only through the scheduler's job
/// table; terminal states are final.
#[derive(Debug, Clone)]
pub struct RenderJob {
    pub id: String,
    pub state: JobState,
    /// 0-100, monotone non-decreasing while Running.
    pub progress_percent: u8,
    pub plan: MixPlan,
    pub artifact_ref: Option<String>,
    pub error_detail: Option<ErrorDetail>,
}

impl RenderJob {
    pub fn new(id: String, plan: MixPlan) -> Self {
        Self {
            id,
            state: JobState::Queued,
            progress_percent: 0,
            plan,
            artifact_ref: None,
            error_detail: None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut json = serde_json::json!({
            "job_id": self.id,
            "state": self.state.as_str(),
            "progress_percent": self.progress_percent,
            "track_ids": self.plan.track_ids(),
        });
        if !self.plan.annotations.is_empty() {
            json["plan_annotations"] = serde_json::json!(self.plan.annotations);
        }
        if let Some(ref artifact) = self.artifact_ref {
            json["artifact_ref"] = serde_json::json!(artifact);
        }
        if let Some(ref detail) = self.error_detail {
            json["error_detail"] = serde_json::json!({
                "reason": detail.reason.as_str(),
                "message": detail.message,
            });
        }
        json
    }
}

pub fn round_to_3_decimals(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn difficulty_tier_boundaries() {
        assert_eq!(Difficulty::from_overall(100.0), Difficulty::Easy);
        assert_eq!(Difficulty::from_overall(85.0), Difficulty::Easy);
        assert_eq!(Difficulty::from_overall(84.9), Difficulty::Medium);
        assert_eq!(Difficulty::from_overall(75.0), Difficulty::Medium);
        assert_eq!(Difficulty::from_overall(74.9), Difficulty::Challenging);
        assert_eq!(Difficulty::from_overall(70.0), Difficulty::Challenging);
        assert_eq!(Difficulty::from_overall(69.9), Difficulty::Discouraged);
        assert_eq!(Difficulty::from_overall(0.0), Difficulty::Discouraged);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobState::Queued.is_terminal());
        assert!(!JobState::Running.is_terminal());
        assert!(JobState::Completed.is_terminal());
        assert!(JobState::Failed.is_terminal());
        assert!(JobState::Cancelled.is_terminal());
    }

    #[test]
    fn transition_kind_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(TransitionKind::EqSwap).unwrap(),
            serde_json::Value::String("eq_swap".to_string())
        );
        assert_eq!(
            serde_json::to_value(TransitionKind::FilterSweep).unwrap(),
            serde_json::Value::String("filter_sweep".to_string())
        );
    }

    #[test]
    fn job_json_omits_unset_terminal_fields() {
        let plan = MixPlan {
            tracks: vec![],
            transitions: vec![],
            annotations: vec![],
        };
        let job = RenderJob::new("j1".into(), plan);
        let json = job.to_json();
        assert_eq!(json["state"], "queued");
        assert!(json.get("artifact_ref").is_none());
        assert!(json.get("error_detail").is_none());
    }
}
