use crate::config::EngineConfig;
use crate::db::{self, Db};
use crate::error::ApiError;
use crate::models::{ActivityEventReq, EventKind, InterventionFlag, MonitoringRecord, RiskLevel};

/// Derived metrics for one event, computed before the insert. Everything here
/// is a pure function of (previous record, incoming event, config).
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub duration_secs: i64,
    pub total_duration_secs: i64,
    pub progress_pct: i32,
    pub response_velocity_wpm: i32,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub intervention_flag: InterventionFlag,
}

/// The slice of the previous record the scoring rules look at. The previous
/// record's running total already folds in every earlier duration, so the
/// monitor never re-reads the whole history on ingest.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorState {
    pub total_duration_secs: i64,
    pub progress_pct: i32,
}

impl From<&MonitoringRecord> for PriorState {
    fn from(rec: &MonitoringRecord) -> Self {
        PriorState {
            total_duration_secs: rec.total_duration_secs,
            progress_pct: rec.progress_pct,
        }
    }
}

/// Ingest one event: validate identity, assess against the previous record,
/// append the immutable record. Callers chain alert evaluation and hint
/// generation explicitly; nothing is triggered from here.
pub async fn record(
    db: &Db,
    cfg: &EngineConfig,
    req: &ActivityEventReq,
) -> Result<MonitoringRecord, ApiError> {
    if !db::identity_known(db, req.assignment_id, &req.student_id, req.content_id).await? {
        return Err(ApiError::UnknownReference(format!(
            "assignment {} / student {} / content {} not known to the assignment store",
            req.assignment_id, req.student_id, req.content_id
        )));
    }

    let prior = db::last_record(db, req.assignment_id, &req.student_id).await?;
    // The content row supplies the expected-answer count when the client
    // did not send one, but only for events that report answer state at all.
    // Anything else must carry the previous progress forward untouched.
    let expected_fallback = match (&req.total_expected_answers, &req.completed_answers) {
        (None, Some(_)) => db::expected_answers(db, req.content_id).await?,
        _ => None,
    };

    let assessment = assess(
        prior.as_ref().map(PriorState::from).as_ref(),
        req,
        expected_fallback,
        cfg,
    );
    let record = db::insert_record(db, req, &assessment).await?;

    tracing::info!(
        record_id = %record.id,
        assignment_id = %record.assignment_id,
        student_id = %record.student_id,
        event = record.event_kind.as_str(),
        risk = record.risk_score,
        level = record.risk_level.as_str(),
        "monitoring record appended"
    );
    Ok(record)
}

/// Pure assessment core. Duration totals are monotone by construction: the
/// new total is the previous total plus a non-negative event duration.
pub fn assess(
    prior: Option<&PriorState>,
    req: &ActivityEventReq,
    expected_fallback: Option<i64>,
    cfg: &EngineConfig,
) -> Assessment {
    let duration = req.duration_secs.unwrap_or(0).max(0);
    let prev_total = prior.map(|p| p.total_duration_secs).unwrap_or(0);
    let prev_progress = prior.map(|p| p.progress_pct).unwrap_or(0);
    let total_duration = prev_total + duration;

    let progress = estimate_progress(req, expected_fallback, prev_progress);
    let velocity = response_velocity(req.characters_written, duration);
    let risk_score = risk_score(req, total_duration, progress, prev_progress, cfg);
    let risk_level = bucket(risk_score, cfg);
    let flag = intervention_flag(req, risk_level);

    Assessment {
        duration_secs: duration,
        total_duration_secs: total_duration,
        progress_pct: progress,
        response_velocity_wpm: velocity,
        risk_score,
        risk_level,
        intervention_flag: flag,
    }
}

/// Ratio of answered keys to expected answers; carries the previous value
/// forward when no expected count is available. Clamped to [0,100].
fn estimate_progress(
    req: &ActivityEventReq,
    expected_fallback: Option<i64>,
    prev_progress: i32,
) -> i32 {
    // The store fallback only counts when the event reports answer state;
    // otherwise an answer-less event (lookup, pause, submit) would recompute
    // progress as 0/total instead of carrying the previous value forward.
    let fallback = match req.completed_answers {
        Some(_) => expected_fallback.filter(|t| *t > 0),
        None => None,
    };
    let expected = req.total_expected_answers.filter(|t| *t > 0).or(fallback);
    match expected {
        Some(total) => {
            let done = req.completed_answers.as_ref().map(|m| m.len()).unwrap_or(0);
            let pct = (100.0 * done as f64 / total as f64).round() as i32;
            pct.clamp(0, 100)
        }
        None => prev_progress,
    }
}

/// Words per minute at 5 chars per word. Zero unless both inputs are present.
fn response_velocity(characters_written: Option<i64>, duration_secs: i64) -> i32 {
    match characters_written {
        Some(chars) if chars > 0 && duration_secs > 0 => {
            let words = chars as f64 / 5.0;
            let minutes = duration_secs as f64 / 60.0;
            (words / minutes).round() as i32
        }
        _ => 0,
    }
}

/// Weighted-signal policy. Abandonment short-circuits to the maximum; every
/// other signal contributes its configured weight and the sum is clamped.
fn risk_score(
    req: &ActivityEventReq,
    total_duration: i64,
    progress: i32,
    prev_progress: i32,
    cfg: &EngineConfig,
) -> f64 {
    if req.event_kind == EventKind::Abandon {
        return 1.0;
    }

    let mut score = 0.0;

    // Stalled: a lot of elapsed time with progress still under the floor.
    // Scales up to the full weight as progress approaches zero.
    if total_duration >= cfg.stuck_duration_secs && progress < cfg.low_progress_pct {
        let shortfall = 1.0 - progress as f64 / cfg.low_progress_pct as f64;
        score += cfg.weight_stalled * shortfall;
    }

    // Correction churn past the threshold, stepped and capped.
    if let Some(corrections) = req.correction_count {
        if corrections > cfg.correction_count_threshold {
            let excess = (corrections - cfg.correction_count_threshold) as f64;
            score += (excess * cfg.correction_step).min(cfg.weight_corrections);
        }
    }

    // Repeated material lookups that moved nothing forward.
    if let Some(lookups) = req.lookup_count {
        if lookups > cfg.lookup_count_threshold && progress <= prev_progress {
            score += cfg.weight_lookups;
        }
    }

    if req.event_kind == EventKind::Pause {
        let pause = req.duration_secs.unwrap_or(0);
        if pause >= cfg.long_pause_secs {
            score += cfg.weight_pause;
        }
    }

    score.clamp(0.0, 1.0)
}

fn bucket(score: f64, cfg: &EngineConfig) -> RiskLevel {
    if score >= cfg.risk_bucket_critico {
        RiskLevel::Critico
    } else if score >= cfg.risk_bucket_alto {
        RiskLevel::Alto
    } else if score >= cfg.risk_bucket_medio {
        RiskLevel::Medio
    } else if score >= cfg.risk_bucket_bajo {
        RiskLevel::Bajo
    } else {
        RiskLevel::Ninguno
    }
}

/// Abandonment is always alert-worthy, never hint-worthy. A hint is only
/// asked for on a written answer that carried at least one reported error,
/// at medio or alto risk.
fn intervention_flag(req: &ActivityEventReq, level: RiskLevel) -> InterventionFlag {
    if req.event_kind == EventKind::Abandon {
        return InterventionFlag::Alerta;
    }
    let has_errors = req.errors.as_ref().map(|e| !e.is_empty()).unwrap_or(false);
    if matches!(level, RiskLevel::Medio | RiskLevel::Alto)
        && req.event_kind == EventKind::WrittenAnswer
        && has_errors
    {
        InterventionFlag::Pista
    } else {
        InterventionFlag::Ninguna
    }
}

/// Difficulty level the hint generator should use for a given risk score:
/// higher risk means lower level, i.e. more guided.
pub fn difficulty_for_score(score: f64, cfg: &EngineConfig) -> i16 {
    if score >= cfg.risk_bucket_critico {
        1
    } else if score >= cfg.risk_bucket_alto {
        2
    } else if score >= cfg.risk_bucket_medio {
        3
    } else if score >= cfg.risk_bucket_bajo {
        4
    } else {
        5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn event(kind: EventKind) -> ActivityEventReq {
        ActivityEventReq {
            assignment_id: Uuid::new_v4(),
            student_id: "est-001".to_string(),
            content_id: Uuid::new_v4(),
            event_kind: kind,
            duration_secs: None,
            description: None,
            context: None,
            completed_answers: None,
            total_expected_answers: None,
            characters_written: None,
            correction_count: None,
            lookup_count: None,
            errors: None,
        }
    }

    fn answers(keys: &[&str]) -> BTreeMap<String, String> {
        keys.iter()
            .map(|k| (k.to_string(), format!("respuesta {k}")))
            .collect()
    }

    fn fold(events: &[ActivityEventReq], cfg: &EngineConfig) -> Vec<Assessment> {
        let mut prior: Option<PriorState> = None;
        let mut out = Vec::new();
        for ev in events {
            let a = assess(prior.as_ref(), ev, None, cfg);
            prior = Some(PriorState {
                total_duration_secs: a.total_duration_secs,
                progress_pct: a.progress_pct,
            });
            out.push(a);
        }
        out
    }

    #[test]
    fn cumulative_duration_is_monotone() {
        let cfg = EngineConfig::default();
        let mut events = Vec::new();
        for (kind, dur) in [
            (EventKind::Start, Some(120)),
            (EventKind::WrittenAnswer, Some(300)),
            (EventKind::MaterialLookup, None),
            (EventKind::Pause, Some(60)),
            (EventKind::Resume, Some(0)),
            (EventKind::Submit, Some(45)),
        ] {
            let mut ev = event(kind);
            ev.duration_secs = dur;
            events.push(ev);
        }
        let assessed = fold(&events, &cfg);
        for pair in assessed.windows(2) {
            assert!(pair[1].total_duration_secs >= pair[0].total_duration_secs);
        }
        assert_eq!(assessed.last().unwrap().total_duration_secs, 525);
    }

    #[test]
    fn progress_is_answered_over_expected() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.completed_answers = Some(answers(&["r1", "r2"]));
        ev.total_expected_answers = Some(4);
        let a = assess(None, &ev, None, &cfg);
        assert_eq!(a.progress_pct, 50);
    }

    #[test]
    fn progress_carries_forward_without_expected_count() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 100,
            progress_pct: 37,
        };
        let ev = event(EventKind::MaterialLookup);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert_eq!(a.progress_pct, 37);
    }

    #[test]
    fn store_expected_count_does_not_reset_progress_on_answerless_events() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 900,
            progress_pct: 50,
        };
        // A lookup mid-session carries no answer state; the content row's
        // expected count must not turn 50% into 0/4.
        let ev = event(EventKind::MaterialLookup);
        let a = assess(Some(&prior), &ev, Some(4), &cfg);
        assert_eq!(a.progress_pct, 50);
        assert_eq!(a.risk_score, 0.0);

        // Same for the other answer-less kinds.
        for kind in [EventKind::Pause, EventKind::Resume, EventKind::Submit] {
            let a = assess(Some(&prior), &event(kind), Some(4), &cfg);
            assert_eq!(a.progress_pct, 50);
        }
    }

    #[test]
    fn store_expected_count_applies_when_answers_are_reported() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.completed_answers = Some(answers(&["r1", "r2"]));
        let a = assess(None, &ev, Some(4), &cfg);
        assert_eq!(a.progress_pct, 50);
    }

    #[test]
    fn progress_is_clamped_to_100() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.completed_answers = Some(answers(&["r1", "r2", "r3", "r4", "r5"]));
        ev.total_expected_answers = Some(3);
        let a = assess(None, &ev, None, &cfg);
        assert_eq!(a.progress_pct, 100);
    }

    #[test]
    fn velocity_uses_five_chars_per_word() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.duration_secs = Some(600);
        ev.characters_written = Some(5000);
        let a = assess(None, &ev, None, &cfg);
        assert_eq!(a.response_velocity_wpm, 100);
    }

    #[test]
    fn velocity_is_zero_without_both_inputs() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.characters_written = Some(5000);
        assert_eq!(assess(None, &ev, None, &cfg).response_velocity_wpm, 0);

        let mut ev = event(EventKind::WrittenAnswer);
        ev.duration_secs = Some(600);
        assert_eq!(assess(None, &ev, None, &cfg).response_velocity_wpm, 0);
    }

    #[test]
    fn abandon_is_always_maximal_risk() {
        let cfg = EngineConfig::default();
        // Fresh session.
        let a = assess(None, &event(EventKind::Abandon), None, &cfg);
        assert_eq!(a.risk_score, 1.0);
        assert_eq!(a.risk_level, RiskLevel::Critico);
        assert_eq!(a.intervention_flag, InterventionFlag::Alerta);

        // And with a healthy prior history.
        let prior = PriorState {
            total_duration_secs: 5000,
            progress_pct: 95,
        };
        let a = assess(Some(&prior), &event(EventKind::Abandon), None, &cfg);
        assert_eq!(a.risk_score, 1.0);
        assert_eq!(a.risk_level, RiskLevel::Critico);
    }

    #[test]
    fn stalled_session_contributes_up_to_full_weight() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 890,
            progress_pct: 0,
        };
        let mut ev = event(EventKind::WrittenAnswer);
        ev.duration_secs = Some(10);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert!((a.risk_score - cfg.weight_stalled).abs() < 1e-9);
        assert_eq!(a.risk_level, RiskLevel::Medio);
    }

    #[test]
    fn short_sessions_are_not_stalled() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::WrittenAnswer);
        ev.duration_secs = Some(100);
        let a = assess(None, &ev, None, &cfg);
        assert_eq!(a.risk_score, 0.0);
        assert_eq!(a.risk_level, RiskLevel::Ninguno);
    }

    #[test]
    fn corrections_step_and_cap() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::AnswerChange);
        ev.correction_count = Some(7);
        let a = assess(None, &ev, None, &cfg);
        assert!((a.risk_score - 0.10).abs() < 1e-9);

        ev.correction_count = Some(50);
        let a = assess(None, &ev, None, &cfg);
        assert!((a.risk_score - cfg.weight_corrections).abs() < 1e-9);
    }

    #[test]
    fn lookups_without_progress_contribute() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 200,
            progress_pct: 25,
        };
        let mut ev = event(EventKind::MaterialLookup);
        ev.lookup_count = Some(4);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert!((a.risk_score - cfg.weight_lookups).abs() < 1e-9);

        // Same lookups but progress moved: no contribution.
        ev.completed_answers = Some(answers(&["r1", "r2"]));
        ev.total_expected_answers = Some(4);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert_eq!(a.risk_score, 0.0);
    }

    #[test]
    fn long_pause_contributes() {
        let cfg = EngineConfig::default();
        let mut ev = event(EventKind::Pause);
        ev.duration_secs = Some(300);
        let a = assess(None, &ev, None, &cfg);
        assert!((a.risk_score - cfg.weight_pause).abs() < 1e-9);

        ev.duration_secs = Some(299);
        let a = assess(None, &ev, None, &cfg);
        assert_eq!(a.risk_score, 0.0);
    }

    #[test]
    fn accumulated_signals_clamp_to_one() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 3600,
            progress_pct: 0,
        };
        let mut ev = event(EventKind::Pause);
        ev.duration_secs = Some(600);
        ev.correction_count = Some(100);
        ev.lookup_count = Some(20);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert!(a.risk_score <= 1.0);
        // 0.4 + 0.3 + 0.2 + 0.2 clamped.
        assert_eq!(a.risk_score, 1.0);
        assert_eq!(a.risk_level, RiskLevel::Critico);
    }

    #[test]
    fn bucket_boundaries() {
        let cfg = EngineConfig::default();
        assert_eq!(bucket(0.0, &cfg), RiskLevel::Ninguno);
        assert_eq!(bucket(0.19, &cfg), RiskLevel::Ninguno);
        assert_eq!(bucket(0.2, &cfg), RiskLevel::Bajo);
        assert_eq!(bucket(0.4, &cfg), RiskLevel::Medio);
        assert_eq!(bucket(0.6, &cfg), RiskLevel::Alto);
        assert_eq!(bucket(0.8, &cfg), RiskLevel::Critico);
        assert_eq!(bucket(1.0, &cfg), RiskLevel::Critico);
    }

    #[test]
    fn hint_flag_requires_written_answer_with_errors_at_medio_or_alto() {
        let cfg = EngineConfig::default();
        let prior = PriorState {
            total_duration_secs: 900,
            progress_pct: 0,
        };

        let mut ev = event(EventKind::WrittenAnswer);
        ev.errors = Some(vec!["confunde fracciones equivalentes".to_string()]);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert_eq!(a.risk_level, RiskLevel::Medio);
        assert_eq!(a.intervention_flag, InterventionFlag::Pista);

        // No errors: no hint.
        ev.errors = Some(vec![]);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert_eq!(a.intervention_flag, InterventionFlag::Ninguna);

        // Same risk but not a written answer: no hint.
        let mut ev = event(EventKind::AnswerChange);
        ev.errors = Some(vec!["error".to_string()]);
        let a = assess(Some(&prior), &ev, None, &cfg);
        assert_eq!(a.intervention_flag, InterventionFlag::Ninguna);
    }

    #[test]
    fn start_then_written_answer_matches_expected_session() {
        let cfg = EngineConfig::default();
        let mut start = event(EventKind::Start);
        start.duration_secs = Some(300);
        let mut written = event(EventKind::WrittenAnswer);
        written.duration_secs = Some(600);
        written.completed_answers = Some(answers(&["r1", "r2"]));
        written.total_expected_answers = Some(4);

        let assessed = fold(&[start, written], &cfg);
        assert_eq!(assessed.len(), 2);
        let last = &assessed[1];
        assert_eq!(last.total_duration_secs, 900);
        assert_eq!(last.progress_pct, 50);
    }

    #[test]
    fn difficulty_mapping_is_inverse_to_risk() {
        let cfg = EngineConfig::default();
        assert_eq!(difficulty_for_score(0.85, &cfg), 1);
        assert_eq!(difficulty_for_score(0.8, &cfg), 1);
        assert_eq!(difficulty_for_score(0.65, &cfg), 2);
        assert_eq!(difficulty_for_score(0.45, &cfg), 3);
        assert_eq!(difficulty_for_score(0.25, &cfg), 4);
        assert_eq!(difficulty_for_score(0.05, &cfg), 5);
    }
}
