use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;

#[derive(Serialize)]
struct DeepAnalysisJob<'a> {
    assignment_id: Uuid,
    student_id: &'a str,
    answer_text: &'a str,
    word_count: usize,
}

/// Dispatch a long free-text answer for background deep analysis. Best
/// effort: the spawned task logs failures and never reports back to the
/// grading flow that triggered it. Returns whether a dispatch happened.
pub fn dispatch(
    cfg: &EngineConfig,
    http: &reqwest::Client,
    assignment_id: Uuid,
    student_id: &str,
    answer_text: &str,
) -> bool {
    let words = answer_text.split_whitespace().count();
    if words <= cfg.deep_analysis_min_words {
        return false;
    }
    let Some(url) = cfg.deep_analysis_url.clone() else {
        tracing::info!(
            %assignment_id,
            student_id,
            words,
            "deep analysis skipped, no collaborator configured"
        );
        return false;
    };

    let body = serde_json::to_value(DeepAnalysisJob {
        assignment_id,
        student_id,
        answer_text,
        word_count: words,
    })
    .unwrap_or_default();
    let http = http.clone();
    let student = student_id.to_string();

    tokio::spawn(async move {
        match http.post(&url).json(&body).send().await {
            Ok(resp) if resp.status().is_success() => {
                tracing::info!(%assignment_id, student_id = %student, "deep analysis dispatched");
            }
            Ok(resp) => {
                tracing::warn!(
                    %assignment_id,
                    student_id = %student,
                    status = %resp.status(),
                    "deep analysis collaborator rejected the job"
                );
            }
            Err(e) => {
                tracing::warn!(
                    %assignment_id,
                    student_id = %student,
                    error = %e,
                    "deep analysis dispatch failed"
                );
            }
        }
    });
    true
}
