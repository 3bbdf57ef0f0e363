use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::models::{EventKind, MonitoringRecord};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    CicloCorrecciones,
    BajoProgresoTiempoAlto,
}

/// A recurring behavioral signature found in the history, with the counts
/// that back it up.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DetectedPattern {
    pub pattern: PatternKind,
    pub evidence: String,
    pub occurrences: usize,
}

/// Scan the full ordered history of one (assignment, student) pair. Runs on
/// demand for dashboards, recomputed fresh each call; nothing here touches
/// the ingest path.
pub fn detect(history: &[MonitoringRecord], cfg: &EngineConfig) -> Vec<DetectedPattern> {
    let mut findings = Vec::new();

    let corrections = history
        .iter()
        .filter(|r| r.event_kind == EventKind::AnswerChange)
        .count();
    if corrections >= cfg.correction_cycle_pattern_min {
        findings.push(DetectedPattern {
            pattern: PatternKind::CicloCorrecciones,
            evidence: format!(
                "{corrections} eventos de cambio de respuesta en la sesión (mínimo {})",
                cfg.correction_cycle_pattern_min
            ),
            occurrences: corrections,
        });
    }

    let stalled = history
        .iter()
        .filter(|r| {
            r.event_kind == EventKind::WrittenAnswer
                && r.progress_pct < cfg.low_progress_pct
                && r.duration_secs >= cfg.stalled_pattern_event_secs
        })
        .count();
    if stalled >= cfg.stalled_pattern_min {
        findings.push(DetectedPattern {
            pattern: PatternKind::BajoProgresoTiempoAlto,
            evidence: format!(
                "{stalled} respuestas largas (≥{}s) con progreso bajo {}%",
                cfg.stalled_pattern_event_secs, cfg.low_progress_pct
            ),
            occurrences: stalled,
        });
    }

    findings
}
