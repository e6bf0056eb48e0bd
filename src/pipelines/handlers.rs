use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use log::{error, info};
use serde::Serialize;
use std::sync::Arc;

use super::board::{summarize, DashboardSummary, PipelineBoard, StageColumn};
use super::types::{MoveOpportunityRequest, Opportunity, PipelineList};
use crate::core::auth::AuthContext;
use crate::core::error::{ApiError, ApiResponse, ApiResult};
use crate::core::state::AppState;

const DEFAULT_ACTION_TYPE: &str = "stage_change";

#[derive(Debug, Serialize)]
pub struct BoardBody {
    pub opportunities: Vec<Opportunity>,
    pub stages: Vec<StageColumn>,
    pub unassigned: Vec<Opportunity>,
}

#[derive(Debug, Serialize)]
pub struct OpportunityBody {
    pub opportunity: Opportunity,
}

pub async fn list_pipelines(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> ApiResult<PipelineList> {
    let pipelines = state.crm.list_pipelines(auth.business_id()).await?;
    Ok(ApiResponse::ok(PipelineList { pipelines }))
}

async fn load_board(
    state: &AppState,
    business_id: &str,
    pipeline_id: &str,
) -> Result<PipelineBoard, ApiError> {
    let pipeline = state
        .crm
        .list_pipelines(business_id)
        .await?
        .into_iter()
        .find(|p| p.id == pipeline_id)
        .ok_or_else(|| ApiError::NotFound(format!("pipeline {pipeline_id}")))?;
    let opportunities = state
        .crm
        .list_opportunities(business_id, pipeline_id)
        .await?;
    Ok(PipelineBoard::build(pipeline, opportunities))
}

pub async fn pipeline_opportunities(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(pipeline_id): Path<String>,
) -> ApiResult<BoardBody> {
    let board = load_board(&state, auth.business_id(), &pipeline_id).await?;
    Ok(ApiResponse::ok(BoardBody {
        stages: board.columns(),
        opportunities: board.opportunities().to_vec(),
        unassigned: board.unassigned().to_vec(),
    }))
}

/// Validates the target stage against the opportunity's own pipeline
/// before the CRM sees the change.
pub async fn move_opportunity(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
    Path(opportunity_id): Path<String>,
    Json(req): Json<MoveOpportunityRequest>,
) -> ApiResult<OpportunityBody> {
    let stage_id = req
        .stage_id
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing("stageId"))?;
    let action_type = req
        .action_type
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| DEFAULT_ACTION_TYPE.to_string());
    let business_id = auth.business_id();

    let mut board = None;
    for pipeline in state.crm.list_pipelines(business_id).await? {
        let opportunities = state
            .crm
            .list_opportunities(business_id, &pipeline.id)
            .await?;
        let candidate = PipelineBoard::build(pipeline, opportunities);
        if candidate.contains(&opportunity_id) {
            board = Some(candidate);
            break;
        }
    }
    let mut board =
        board.ok_or_else(|| ApiError::NotFound(format!("opportunity {opportunity_id}")))?;
    board.move_opportunity(&opportunity_id, &stage_id)?;

    let opportunity = state
        .crm
        .move_opportunity(business_id, &opportunity_id, &stage_id, &action_type)
        .await
        .map_err(|e| {
            error!("Failed to move opportunity {opportunity_id} to {stage_id}: {e}");
            ApiError::from(e)
        })?;

    info!(
        "Moved opportunity {} to stage {} in pipeline {}",
        opportunity_id,
        stage_id,
        board.pipeline().id
    );
    Ok(ApiResponse::ok(OpportunityBody { opportunity }))
}

pub async fn dashboard(
    State(state): State<Arc<AppState>>,
    auth: AuthContext,
) -> ApiResult<DashboardSummary> {
    let business_id = auth.business_id();
    let mut boards = Vec::new();
    for pipeline in state.crm.list_pipelines(business_id).await? {
        let opportunities = state
            .crm
            .list_opportunities(business_id, &pipeline.id)
            .await?;
        boards.push(PipelineBoard::build(pipeline, opportunities));
    }
    Ok(ApiResponse::ok(summarize(&boards)))
}

pub fn configure_pipelines_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/pipelines", get(list_pipelines))
        .route(
            "/api/pipelines/:id/opportunities",
            get(pipeline_opportunities),
        )
        .route("/api/opportunities/:id/move", post(move_opportunity))
        .route("/api/dashboard", get(dashboard))
}
