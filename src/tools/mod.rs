use std::sync::{Arc, Mutex, OnceLock};

use rmcp::handler::server::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content, ServerCapabilities, ServerInfo};
use rmcp::{ErrorData as McpError, ServerHandler, tool, tool_handler, tool_router};
use rusqlite::Connection;

mod compat_handlers;
mod job_handlers;
mod params;

use compat_handlers::*;
use job_handlers::*;
use params::*;

use crate::catalog;
use crate::config::RenderSettings;
use crate::jobs::JobScheduler;

fn internal(msg: String) -> McpError {
    McpError::internal_error(msg, None)
}

/// Inner shared state (not Clone).
struct ServerState {
    catalog: OnceLock<Result<Mutex<Connection>, String>>,
    catalog_path: Option<String>,
    scheduler: JobScheduler,
}

#[derive(Clone)]
pub struct MixforgeServer {
    state: Arc<ServerState>,
    tool_router: ToolRouter<Self>,
}

impl MixforgeServer {
    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>, McpError> {
        let result = self.state.catalog.get_or_init(|| {
            let path = self
                .state
                .catalog_path
                .clone()
                .unwrap_or_else(catalog::resolve_db_path);
            match catalog::open(&path) {
                Ok(conn) => Ok(Mutex::new(conn)),
                Err(e) => Err(format!("Failed to open track catalog: {e}")),
            }
        });
        match result {
            Ok(mutex) => mutex
                .lock()
                .map_err(|_| McpError::internal_error("Catalog lock poisoned", None)),
            Err(msg) => Err(McpError::internal_error(msg.clone(), None)),
        }
    }
}

#[tool_router]
impl MixforgeServer {
    pub fn new(catalog_path: Option<String>, settings: RenderSettings) -> Self {
        Self {
            state: Arc::new(ServerState {
                catalog: OnceLock::new(),
                catalog_path,
                scheduler: JobScheduler::new(settings),
            }),
            tool_router: Self::tool_router(),
        }
    }

    #[tool(description = "Search and filter tracks in the catalog")]
    async fn search_tracks(
        &self,
        params: Parameters<SearchTracksParams>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.conn()?;
        let criteria = catalog::SearchCriteria {
            query: params.0.query,
            genre: params.0.genre,
            bpm_min: params.0.bpm_min,
            bpm_max: params.0.bpm_max,
            limit: params.0.limit,
        };
        let tracks = catalog::search_tracks(&conn, &criteria)
            .map_err(|e| internal(format!("Catalog error: {e}")))?;
        let json = serde_json::to_string_pretty(&tracks).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Get full details for a specific track by ID")]
    async fn get_track(
        &self,
        params: Parameters<GetTrackParams>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.conn()?;
        let track = catalog::get_track(&conn, &params.0.track_id)
            .map_err(|e| internal(format!("Catalog error: {e}")))?;
        match track {
            Some(t) => {
                let json =
                    serde_json::to_string_pretty(&t).map_err(|e| internal(format!("{e}")))?;
                Ok(CallToolResult::success(vec![Content::text(json)]))
            }
            None => Ok(CallToolResult::success(vec![Content::text(format!(
                "Track '{}' not found",
                params.0.track_id
            ))])),
        }
    }

    #[tool(
        description = "Score mix compatibility for a pair of tracks. Returns harmonic (max 40), \
                       tempo (max 30), energy (max 15), and spectrum (max 15) sub-scores, the \
                       overall score, and a difficulty tier."
    )]
    async fn score_pair(
        &self,
        params: Parameters<ScorePairParams>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.conn()?;
        let track_a = catalog::get_track(&conn, &params.0.track_a)
            .map_err(|e| internal(format!("Catalog error: {e}")))?
            .ok_or_else(|| {
                McpError::invalid_params(format!("Track '{}' not found", params.0.track_a), None)
            })?;
        let track_b = catalog::get_track(&conn, &params.0.track_b)
            .map_err(|e| internal(format!("Catalog error: {e}")))?
            .ok_or_else(|| {
                McpError::invalid_params(format!("Track '{}' not found", params.0.track_b), None)
            })?;

        let score = crate::scoring::score_pair(&track_a, &track_b);
        let mut result = score.to_json();
        result["track_a"] = serde_json::json!(track_a.id);
        result["track_b"] = serde_json::json!(track_b.id);
        let json = serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Rank the best mix partners for a track, best-first. Candidates default \
                       to the whole catalog."
    )]
    async fn best_partner(
        &self,
        params: Parameters<BestPartnerParams>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.conn()?;
        let target = catalog::get_track(&conn, &params.0.track_id)
            .map_err(|e| internal(format!("Catalog error: {e}")))?
            .ok_or_else(|| {
                McpError::invalid_params(format!("Track '{}' not found", params.0.track_id), None)
            })?;

        let candidates = match params.0.candidate_ids {
            Some(ids) => {
                validate_track_ids(&ids)?;
                load_tracks(&conn, &ids)?
            }
            None => {
                let ids = catalog::all_track_ids(&conn)
                    .map_err(|e| internal(format!("Catalog error: {e}")))?;
                catalog::get_tracks_by_ids(&conn, &ids)
                    .map_err(|e| internal(format!("Catalog error: {e}")))?
            }
        };

        let limit = params.0.limit.unwrap_or(10).min(50) as usize;
        let partners = rank_partners(&target, &candidates, params.0.min_score, limit);

        // An empty list is a real answer: nothing qualifies.
        let result = serde_json::json!({
            "track_id": target.id,
            "partners": partners,
        });
        let json = serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Build a mix plan (track order plus transitions) without rendering it. \
                       Same planning as create_mix_job."
    )]
    async fn preview_mix_plan(
        &self,
        params: Parameters<PreviewMixPlanParams>,
    ) -> Result<CallToolResult, McpError> {
        let conn = self.conn()?;
        let plan = build_plan(
            &conn,
            &params.0.track_ids,
            params.0.optimize_order.unwrap_or(true),
        )?;
        let json = serde_json::to_string_pretty(&plan_to_json(&plan))
            .map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Plan a mix and queue it for rendering. Tracks come from an explicit \
                       ID list or from filter criteria. Returns the job immediately; poll \
                       get_job for progress and the final artifact."
    )]
    async fn create_mix_job(
        &self,
        params: Parameters<CreateMixJobParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let plan = {
            let conn = self.conn()?;
            let track_ids = match p.track_ids {
                Some(ids) => ids,
                None => {
                    let criteria = catalog::SearchCriteria {
                        query: p.query,
                        genre: p.genre,
                        bpm_min: p.bpm_min,
                        bpm_max: p.bpm_max,
                        limit: p.limit,
                    };
                    if criteria.query.is_none()
                        && criteria.genre.is_none()
                        && criteria.bpm_min.is_none()
                        && criteria.bpm_max.is_none()
                    {
                        return Err(McpError::invalid_params(
                            "either track_ids or filter criteria is required",
                            None,
                        ));
                    }
                    let tracks = catalog::search_tracks(&conn, &criteria)
                        .map_err(|e| internal(format!("Catalog error: {e}")))?;
                    if tracks.is_empty() {
                        return Err(McpError::invalid_params(
                            "no tracks match the given criteria",
                            None,
                        ));
                    }
                    tracks.into_iter().map(|t| t.id).collect()
                }
            };
            build_plan(&conn, &track_ids, p.optimize_order.unwrap_or(true))?
        };
        let job = self
            .state
            .scheduler
            .submit(plan)
            .map_err(map_submit_error)?;
        let json =
            serde_json::to_string_pretty(&job.to_json()).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "Get the current state, progress, and result of a render job")]
    async fn get_job(
        &self,
        params: Parameters<GetJobParams>,
    ) -> Result<CallToolResult, McpError> {
        let job = self.state.scheduler.get(&params.0.job_id).ok_or_else(|| {
            McpError::invalid_params(format!("Job '{}' not found", params.0.job_id), None)
        })?;
        let json =
            serde_json::to_string_pretty(&job.to_json()).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(description = "List all render jobs in submission order")]
    async fn list_jobs(&self) -> Result<CallToolResult, McpError> {
        let jobs: Vec<serde_json::Value> = self
            .state
            .scheduler
            .list()
            .iter()
            .map(|job| job.to_json())
            .collect();
        let json = serde_json::to_string_pretty(&jobs).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }

    #[tool(
        description = "Cancel a render job. Returns after the job is in a terminal state with \
                       its render process stopped. Cancelling a finished job is a no-op, \
                       flagged already_terminal in the response."
    )]
    async fn cancel_job(
        &self,
        params: Parameters<CancelJobParams>,
    ) -> Result<CallToolResult, McpError> {
        let outcome = self
            .state
            .scheduler
            .cancel(&params.0.job_id)
            .await
            .ok_or_else(|| {
                McpError::invalid_params(format!("Job '{}' not found", params.0.job_id), None)
            })?;
        let already_terminal = outcome.already_terminal();
        let mut result = outcome.into_job().to_json();
        result["already_terminal"] = serde_json::json!(already_terminal);
        let json = serde_json::to_string_pretty(&result).map_err(|e| internal(format!("{e}")))?;
        Ok(CallToolResult::success(vec![Content::text(json)]))
    }
}

#[tool_handler]
impl ServerHandler for MixforgeServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "DJ mix construction server. Score pairwise track compatibility, order \
                 sequences, plan phrase-aligned transitions, and render mixes as \
                 background jobs."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
