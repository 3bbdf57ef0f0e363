use anyhow::{Context, Result};
use sqlx::postgres::PgRow;
use sqlx::{Pool, Postgres, Row};
use std::env;
use uuid::Uuid;

use crate::alerts::AlertDraft;
use crate::hints::HintDraft;
use crate::models::{
    Alert, AlertKind, AlertState, EventKind, Hint, HintState, InterventionFlag, MonitoringRecord,
    RiskLevel, SessionStats,
};
use crate::monitor::Assessment;

pub type Db = Pool<Postgres>;

pub async fn connect() -> Result<Db> {
    let url = env::var("DATABASE_URL").context("DATABASE_URL not set")?;
    Ok(Pool::<Postgres>::connect(&url).await?)
}

/// Identity check against the assignment store tables. The CRUD layer owns
/// these; this engine only reads them.
pub async fn identity_known(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
    content_id: Uuid,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM assignment_contents c
            JOIN assignment_students s ON s.assignment_id = c.assignment_id
            WHERE c.assignment_id = $1 AND c.id = $2 AND s.student_id = $3
        ) AS known
        "#,
    )
    .bind(assignment_id)
    .bind(content_id)
    .bind(student_id)
    .fetch_one(db)
    .await?;
    Ok(row.get("known"))
}

/// Expected answer count from the content row, used when the event payload
/// does not carry one.
pub async fn expected_answers(db: &Db, content_id: Uuid) -> Result<Option<i64>> {
    let row = sqlx::query("SELECT total_expected_answers FROM assignment_contents WHERE id = $1")
        .bind(content_id)
        .fetch_optional(db)
        .await?;
    Ok(row.and_then(|r| r.get::<Option<i64>, _>("total_expected_answers")))
}

const RECORD_COLUMNS: &str = "id, assignment_id, student_id, content_id, event_kind, description, \
     context, duration_secs, total_duration_secs, progress_pct, response_velocity_wpm, \
     risk_score, risk_level, intervention_flag, created_at";

fn record_from_row(row: &PgRow) -> Result<MonitoringRecord> {
    let kind: String = row.get("event_kind");
    let level: String = row.get("risk_level");
    let flag: String = row.get("intervention_flag");
    Ok(MonitoringRecord {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        student_id: row.get("student_id"),
        content_id: row.get("content_id"),
        event_kind: EventKind::parse(&kind)
            .with_context(|| format!("unrecognized event_kind in row: {kind}"))?,
        description: row.get("description"),
        context: row.get("context"),
        duration_secs: row.get("duration_secs"),
        total_duration_secs: row.get("total_duration_secs"),
        progress_pct: row.get("progress_pct"),
        response_velocity_wpm: row.get("response_velocity_wpm"),
        risk_score: row.get("risk_score"),
        risk_level: RiskLevel::parse(&level)
            .with_context(|| format!("unrecognized risk_level in row: {level}"))?,
        intervention_flag: InterventionFlag::parse(&flag)
            .with_context(|| format!("unrecognized intervention_flag in row: {flag}"))?,
        created_at: row.get("created_at"),
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    let kind: String = row.get("alert_kind");
    let severity: String = row.get("severity");
    let state: String = row.get("state");
    Ok(Alert {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        student_id: row.get("student_id"),
        alert_kind: AlertKind::parse(&kind)
            .with_context(|| format!("unrecognized alert_kind in row: {kind}"))?,
        severity: crate::models::Severity::parse(&severity)
            .with_context(|| format!("unrecognized severity in row: {severity}"))?,
        message: row.get("message"),
        recommendation: row.get("recommendation"),
        confidence: row.get("confidence"),
        state: AlertState::parse(&state)
            .with_context(|| format!("unrecognized alert state in row: {state}"))?,
        intervened_at: row.get("intervened_at"),
        intervened_by: row.get("intervened_by"),
        action_taken: row.get("action_taken"),
        created_at: row.get("created_at"),
    })
}

fn hint_from_row(row: &PgRow) -> Result<Hint> {
    let state: String = row.get("state");
    Ok(Hint {
        id: row.get("id"),
        assignment_id: row.get("assignment_id"),
        student_id: row.get("student_id"),
        topic: row.get("topic"),
        content: row.get("content"),
        relevance: row.get("relevance"),
        difficulty_level: row.get("difficulty_level"),
        state: HintState::parse(&state)
            .with_context(|| format!("unrecognized hint state in row: {state}"))?,
        created_at: row.get("created_at"),
    })
}

/// Latest record for the pair, the only prior state the scoring rules need.
pub async fn last_record(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
) -> Result<Option<MonitoringRecord>> {
    let row = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM monitoring_records \
         WHERE assignment_id = $1 AND student_id = $2 \
         ORDER BY created_at DESC, id DESC LIMIT 1"
    ))
    .bind(assignment_id)
    .bind(student_id)
    .fetch_optional(db)
    .await?;
    row.as_ref().map(record_from_row).transpose()
}

/// Progress of the next-to-last record for the pair, i.e. the state before
/// the record currently being evaluated was appended.
pub async fn previous_progress(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
) -> Result<Option<i32>> {
    let row = sqlx::query(
        "SELECT progress_pct FROM monitoring_records \
         WHERE assignment_id = $1 AND student_id = $2 \
         ORDER BY created_at DESC, id DESC OFFSET 1 LIMIT 1",
    )
    .bind(assignment_id)
    .bind(student_id)
    .fetch_optional(db)
    .await?;
    Ok(row.map(|r| r.get("progress_pct")))
}

/// Full ordered history for the pair; the pattern detector scans this.
pub async fn fetch_history(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
) -> Result<Vec<MonitoringRecord>> {
    let rows = sqlx::query(&format!(
        "SELECT {RECORD_COLUMNS} FROM monitoring_records \
         WHERE assignment_id = $1 AND student_id = $2 \
         ORDER BY created_at ASC, id ASC"
    ))
    .bind(assignment_id)
    .bind(student_id)
    .fetch_all(db)
    .await?;
    rows.iter().map(record_from_row).collect()
}

/// Append one immutable record. Single statement, all-or-nothing.
pub async fn insert_record(
    db: &Db,
    req: &crate::models::ActivityEventReq,
    a: &Assessment,
) -> Result<MonitoringRecord> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO monitoring_records
        (id, assignment_id, student_id, content_id, event_kind, description, context,
         duration_secs, total_duration_secs, progress_pct, response_velocity_wpm,
         risk_score, risk_level, intervention_flag)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14)
        RETURNING {RECORD_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(req.assignment_id)
    .bind(&req.student_id)
    .bind(req.content_id)
    .bind(req.event_kind.as_str())
    .bind(&req.description)
    .bind(&req.context)
    .bind(a.duration_secs)
    .bind(a.total_duration_secs)
    .bind(a.progress_pct)
    .bind(a.response_velocity_wpm)
    .bind(a.risk_score)
    .bind(a.risk_level.as_str())
    .bind(a.intervention_flag.as_str())
    .fetch_one(db)
    .await?;
    record_from_row(&row)
}

/// Counts and the latest snapshot, derived fresh from the history rather than
/// kept in any mutable counter.
pub async fn session_stats(db: &Db, assignment_id: Uuid, student_id: &str) -> Result<SessionStats> {
    let count_row = sqlx::query(
        "SELECT count(*) AS eventos FROM monitoring_records \
         WHERE assignment_id = $1 AND student_id = $2",
    )
    .bind(assignment_id)
    .bind(student_id)
    .fetch_one(db)
    .await?;
    let eventos: i64 = count_row.get("eventos");

    let last = last_record(db, assignment_id, student_id).await?;
    Ok(match last {
        Some(rec) => SessionStats {
            tiempo_total: rec.total_duration_secs,
            eventos,
            progreso: rec.progress_pct,
            nivel_riesgo: rec.risk_level,
            puntaje_riesgo: rec.risk_score,
        },
        None => SessionStats {
            tiempo_total: 0,
            eventos,
            progreso: 0,
            nivel_riesgo: RiskLevel::Ninguno,
            puntaje_riesgo: 0.0,
        },
    })
}

const ALERT_COLUMNS: &str = "id, assignment_id, student_id, alert_kind, severity, message, \
     recommendation, confidence, state, intervened_at, intervened_by, action_taken, created_at";

/// Kinds with an active (generada) alert for the pair; rule selection skips
/// these so a later rule can still fire.
pub async fn active_alert_kinds(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
) -> Result<Vec<AlertKind>> {
    let rows = sqlx::query(
        "SELECT alert_kind FROM alerts \
         WHERE assignment_id = $1 AND student_id = $2 AND state = 'generada'",
    )
    .bind(assignment_id)
    .bind(student_id)
    .fetch_all(db)
    .await?;
    rows.iter()
        .map(|r| {
            let kind: String = r.get("alert_kind");
            AlertKind::parse(&kind)
                .with_context(|| format!("unrecognized alert_kind in row: {kind}"))
        })
        .collect()
}

/// Atomic check-then-insert: the partial unique index on active alerts makes
/// the dedup race-safe; a suppressed duplicate comes back as None.
pub async fn insert_alert(db: &Db, draft: &AlertDraft) -> Result<Option<Alert>> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO alerts
        (id, assignment_id, student_id, alert_kind, severity, message, recommendation, confidence)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8)
        ON CONFLICT (assignment_id, student_id, alert_kind) WHERE state = 'generada'
        DO NOTHING
        RETURNING {ALERT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(draft.assignment_id)
    .bind(&draft.student_id)
    .bind(draft.alert_kind.as_str())
    .bind(draft.severity.as_str())
    .bind(&draft.message)
    .bind(&draft.recommendation)
    .bind(draft.confidence)
    .fetch_optional(db)
    .await?;
    row.as_ref().map(alert_from_row).transpose()
}

pub async fn get_alert(db: &Db, alert_id: Uuid) -> Result<Option<Alert>> {
    let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = $1"))
        .bind(alert_id)
        .fetch_optional(db)
        .await?;
    row.as_ref().map(alert_from_row).transpose()
}

pub async fn active_alerts_for_student(db: &Db, student_id: &str) -> Result<Vec<Alert>> {
    let rows = sqlx::query(&format!(
        "SELECT {ALERT_COLUMNS} FROM alerts \
         WHERE student_id = $1 AND state = 'generada' \
         ORDER BY created_at DESC"
    ))
    .bind(student_id)
    .fetch_all(db)
    .await?;
    rows.iter().map(alert_from_row).collect()
}

/// Conditional transition out of generada. Returns None when no active row
/// matched; the caller decides between NotFound and InvalidTransition.
pub async fn transition_alert(
    db: &Db,
    alert_id: Uuid,
    to: AlertState,
    actor: Option<&str>,
    action: Option<&str>,
) -> Result<Option<Alert>> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE alerts
        SET state = $2,
            intervened_at = CASE WHEN $2 = 'atendida' THEN now() ELSE intervened_at END,
            intervened_by = COALESCE($3, intervened_by),
            action_taken = COALESCE($4, action_taken)
        WHERE id = $1 AND state = 'generada'
        RETURNING {ALERT_COLUMNS}
        "#
    ))
    .bind(alert_id)
    .bind(to.as_str())
    .bind(actor)
    .bind(action)
    .fetch_optional(db)
    .await?;
    row.as_ref().map(alert_from_row).transpose()
}

const HINT_COLUMNS: &str = "id, assignment_id, student_id, topic, content, relevance, \
     difficulty_level, state, created_at";

pub async fn insert_hint(
    db: &Db,
    assignment_id: Uuid,
    student_id: &str,
    draft: &HintDraft,
) -> Result<Hint> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO hints
        (id, assignment_id, student_id, topic, content, relevance, difficulty_level)
        VALUES ($1,$2,$3,$4,$5,$6,$7)
        RETURNING {HINT_COLUMNS}
        "#
    ))
    .bind(Uuid::new_v4())
    .bind(assignment_id)
    .bind(student_id)
    .bind(&draft.topic)
    .bind(&draft.content)
    .bind(draft.relevance)
    .bind(draft.difficulty_level)
    .fetch_one(db)
    .await?;
    hint_from_row(&row)
}
