use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{self, Db};
use crate::error::ApiError;
use crate::models::{
    ActivityEventReq, Alert, AlertKind, AlertState, EventKind, MonitoringRecord, RiskLevel,
    Severity,
};

/// An alert the rule table decided to raise, before the dedup-guarded insert.
#[derive(Debug, Clone)]
pub struct AlertDraft {
    pub assignment_id: Uuid,
    pub student_id: String,
    pub alert_kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    pub confidence: f64,
}

/// Evaluate the trigger rules for a freshly appended record. Returns the
/// created alert, or None when no rule fired or the winning rule was already
/// covered by an active alert (a defined no-op, not an error).
pub async fn evaluate(
    db: &Db,
    cfg: &EngineConfig,
    record: &MonitoringRecord,
    req: &ActivityEventReq,
) -> Result<Option<Alert>, ApiError> {
    let active = db::active_alert_kinds(db, record.assignment_id, &record.student_id).await?;
    let prev_progress =
        db::previous_progress(db, record.assignment_id, &record.student_id).await?;

    let Some(draft) = select_rule(record, req, prev_progress, &active, cfg) else {
        return Ok(None);
    };

    // The partial unique index on active alerts is the authority here; the
    // active-kinds read above only steers rule ordering. Two concurrent
    // evaluations can both reach the insert and exactly one wins.
    match db::insert_alert(db, &draft).await? {
        Some(alert) => {
            tracing::info!(
                alert_id = %alert.id,
                kind = alert.alert_kind.as_str(),
                severity = alert.severity.as_str(),
                student_id = %alert.student_id,
                "alert created"
            );
            Ok(Some(alert))
        }
        None => {
            tracing::info!(
                kind = draft.alert_kind.as_str(),
                assignment_id = %draft.assignment_id,
                student_id = %draft.student_id,
                "duplicate alert suppressed"
            );
            Ok(None)
        }
    }
}

/// Ordered rule table. The first rule that matches the record and has no
/// active alert of its kind wins; a matched-but-covered rule yields to the
/// next one. Confidence is a fixed per-rule constant.
pub fn select_rule(
    record: &MonitoringRecord,
    req: &ActivityEventReq,
    prev_progress: Option<i32>,
    active: &[AlertKind],
    cfg: &EngineConfig,
) -> Option<AlertDraft> {
    let draft = |kind: AlertKind,
                 severity: Severity,
                 confidence: f64,
                 message: String,
                 recommendation: &str| AlertDraft {
        assignment_id: record.assignment_id,
        student_id: record.student_id.clone(),
        alert_kind: kind,
        severity,
        message,
        recommendation: recommendation.to_string(),
        confidence,
    };

    if record.event_kind == EventKind::Abandon && !active.contains(&AlertKind::RiesgoAbandono) {
        return Some(draft(
            AlertKind::RiesgoAbandono,
            Severity::Critica,
            1.0,
            format!(
                "El estudiante {} abandonó la actividad tras {} segundos de sesión.",
                record.student_id, record.total_duration_secs
            ),
            "Contactar al estudiante de inmediato y revisar el estado del trabajo.",
        ));
    }

    if matches!(record.risk_level, RiskLevel::Alto | RiskLevel::Critico)
        && record.total_duration_secs >= cfg.stuck_duration_secs
        && record.progress_pct < cfg.low_progress_pct
        && !active.contains(&AlertKind::BajoProgreso)
    {
        return Some(draft(
            AlertKind::BajoProgreso,
            Severity::Alta,
            0.85,
            format!(
                "Progreso de {}% tras {} segundos de trabajo; riesgo {}.",
                record.progress_pct,
                record.total_duration_secs,
                record.risk_level.as_str()
            ),
            "Revisar si el estudiante entendió la consigna y ofrecer acompañamiento.",
        ));
    }

    let corrections = req.correction_count.unwrap_or(0);
    if record.event_kind == EventKind::WrittenAnswer
        && corrections > cfg.correction_count_threshold
        && !active.contains(&AlertKind::MultiplesCambios)
    {
        return Some(draft(
            AlertKind::MultiplesCambios,
            Severity::Media,
            0.7,
            format!(
                "{corrections} correcciones sobre la misma respuesta en esta sesión."
            ),
            "Sugerir al estudiante repasar el concepto antes de seguir corrigiendo.",
        ));
    }

    let lookups = req.lookup_count.unwrap_or(0);
    if lookups > cfg.lookup_count_threshold
        && record.progress_pct <= prev_progress.unwrap_or(0)
        && !active.contains(&AlertKind::ConsultaFrecuenteMaterial)
    {
        return Some(draft(
            AlertKind::ConsultaFrecuenteMaterial,
            Severity::Baja,
            0.6,
            format!(
                "{lookups} consultas al material sin avance de progreso ({}%).",
                record.progress_pct
            ),
            "Verificar que el material de apoyo corresponde al tema de la actividad.",
        ));
    }

    None
}

/// generada → atendida. Records who intervened, when, and what they did.
pub async fn mark_intervened(
    db: &Db,
    alert_id: Uuid,
    actor: &str,
    action: Option<&str>,
) -> Result<Alert, ApiError> {
    match db::transition_alert(db, alert_id, AlertState::Atendida, Some(actor), action).await? {
        Some(alert) => {
            tracing::info!(alert_id = %alert.id, actor, "alert marked intervened");
            Ok(alert)
        }
        None => not_transitionable(db, alert_id).await,
    }
}

/// generada → descartada.
pub async fn dismiss(db: &Db, alert_id: Uuid) -> Result<Alert, ApiError> {
    match db::transition_alert(db, alert_id, AlertState::Descartada, None, None).await? {
        Some(alert) => {
            tracing::info!(alert_id = %alert.id, "alert dismissed");
            Ok(alert)
        }
        None => not_transitionable(db, alert_id).await,
    }
}

async fn not_transitionable(db: &Db, alert_id: Uuid) -> Result<Alert, ApiError> {
    match db::get_alert(db, alert_id).await? {
        Some(alert) => Err(ApiError::InvalidTransition(format!(
            "alert {alert_id} is {}, only generada can transition",
            alert.state.as_str()
        ))),
        None => Err(ApiError::NotFound(format!("alert {alert_id}"))),
    }
}
