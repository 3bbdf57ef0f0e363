use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::{get, patch, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{self, Db};
use crate::error::ApiError;
use crate::models::{
    ActivityEventReq, ActivityResponse, Alert, DeepAnalysisReq, InterveneReq, InterventionFlag,
    SessionStats,
};
use crate::patterns::DetectedPattern;
use crate::{alerts, analysis, hints, monitor, patterns};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cfg: EngineConfig,
    pub http: reqwest::Client,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/activity", post(ingest_activity))
        .route("/activity/:assignment_id/summary", get(activity_summary))
        .route("/activity/:assignment_id/deep-analysis", post(deep_analysis))
        // One param name for this position: matchit rejects {student_id}
        // and {alert_id} side by side.
        .route("/activity/alerts/:id", get(student_alerts))
        .route("/activity/alerts/:id/intervene", patch(intervene_alert))
        .route("/activity/alerts/:id/dismiss", patch(dismiss_alert))
        .with_state(state)
}

/// Ingest one behavioral event. The pipeline is explicit and sequential:
/// record → evaluate alert → maybe generate hint. The record is the durable
/// fact; alert or hint failures degrade to null and never undo it.
async fn ingest_activity(
    State(state): State<AppState>,
    Json(body): Json<serde_json::Value>,
) -> Result<(StatusCode, Json<ActivityResponse>), ApiError> {
    let req = parse_activity_event(body)?;
    let record = monitor::record(&state.db, &state.cfg, &req).await?;

    let alert = match alerts::evaluate(&state.db, &state.cfg, &record, &req).await {
        Ok(alert) => alert,
        Err(e) => {
            tracing::warn!(error = %e, record_id = %record.id, "alert evaluation failed, record kept");
            None
        }
    };

    let hint = if record.intervention_flag == InterventionFlag::Pista {
        let errors = req.errors.clone().unwrap_or_default();
        let difficulty = monitor::difficulty_for_score(record.risk_score, &state.cfg);
        match hints::generate_socratic(
            &state.db,
            &state.cfg,
            &state.http,
            req.assignment_id,
            &req.student_id,
            topic_of(&req),
            req.completed_answers.as_ref(),
            &errors,
            difficulty,
        )
        .await
        {
            Ok(hint) => hint,
            Err(e) => {
                tracing::warn!(error = %e, record_id = %record.id, "hint generation failed, record kept");
                None
            }
        }
    } else {
        None
    };

    let stats = db::session_stats(&state.db, req.assignment_id, &req.student_id).await?;
    Ok((
        StatusCode::CREATED,
        Json(ActivityResponse {
            record,
            alert,
            hint,
            stats,
        }),
    ))
}

/// Validate the ingest body ourselves so a malformed event (unknown kind,
/// wrong field shape) comes back as the taxonomy's InvalidEvent with the same
/// error body as every other failure, not as a bare extractor rejection.
fn parse_activity_event(body: serde_json::Value) -> Result<ActivityEventReq, ApiError> {
    serde_json::from_value(body).map_err(|e| ApiError::InvalidEvent(e.to_string()))
}

/// The topic for a hint: an explicit "tema" in the context map wins, then the
/// event description.
fn topic_of(req: &ActivityEventReq) -> Option<&str> {
    req.context
        .as_ref()
        .and_then(|c| c.get("tema"))
        .and_then(|v| v.as_str())
        .or(req.description.as_deref())
}

#[derive(Deserialize)]
struct SummaryParams {
    student_id: String,
}

#[derive(Serialize)]
struct SummaryResponse {
    stats: SessionStats,
    patterns: Vec<DetectedPattern>,
}

async fn activity_summary(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    Query(params): Query<SummaryParams>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let stats = db::session_stats(&state.db, assignment_id, &params.student_id).await?;
    let history = db::fetch_history(&state.db, assignment_id, &params.student_id).await?;
    let patterns = patterns::detect(&history, &state.cfg);
    Ok(Json(SummaryResponse { stats, patterns }))
}

async fn student_alerts(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Result<Json<Vec<Alert>>, ApiError> {
    let alerts = db::active_alerts_for_student(&state.db, &student_id).await?;
    Ok(Json(alerts))
}

async fn intervene_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
    headers: HeaderMap,
    Json(req): Json<InterveneReq>,
) -> Result<Json<Alert>, ApiError> {
    // Who may intervene is the auth layer's decision; here we only need an
    // identity to record.
    let actor = headers
        .get("x-actor-id")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Validation("X-Actor-Id header required".to_string()))?;
    let alert = alerts::mark_intervened(&state.db, alert_id, actor, req.action.as_deref()).await?;
    Ok(Json(alert))
}

async fn dismiss_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<Uuid>,
) -> Result<Json<Alert>, ApiError> {
    let alert = alerts::dismiss(&state.db, alert_id).await?;
    Ok(Json(alert))
}

#[derive(Serialize)]
struct DeepAnalysisAck {
    dispatched: bool,
}

/// Called by the grading pipeline after it scores a long free-text answer.
/// Always replies 202; the dispatch itself is fire-and-forget.
async fn deep_analysis(
    State(state): State<AppState>,
    Path(assignment_id): Path<Uuid>,
    Json(req): Json<DeepAnalysisReq>,
) -> (StatusCode, Json<DeepAnalysisAck>) {
    let dispatched = analysis::dispatch(
        &state.cfg,
        &state.http,
        assignment_id,
        &req.student_id,
        &req.answer_text,
    );
    (StatusCode::ACCEPTED, Json(DeepAnalysisAck { dispatched }))
}
