use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::db::{self, Db};
use crate::error::ApiError;
use crate::models::Hint;

/// A hint before persistence: topic, guiding questions, and how guided it is.
#[derive(Debug, Clone, PartialEq)]
pub struct HintDraft {
    pub topic: String,
    pub content: String,
    pub relevance: f64,
    pub difficulty_level: i16,
}

#[derive(Serialize)]
struct PhraserRequest<'a> {
    topic: &'a str,
    errors: &'a [String],
    difficulty_level: i16,
    draft_questions: &'a str,
}

#[derive(Deserialize)]
struct PhraserResponse {
    content: String,
}

/// Generate and persist a Socratic hint. Callers only invoke this when the
/// monitor flagged the record hint-worthy; an empty error list still returns
/// None as a guard. Phrasing may be delegated to the external text-generation
/// collaborator; its failure degrades to the local template and is logged.
#[allow(clippy::too_many_arguments)]
pub async fn generate_socratic(
    db: &Db,
    cfg: &EngineConfig,
    http: &reqwest::Client,
    assignment_id: Uuid,
    student_id: &str,
    topic: Option<&str>,
    completed_answers: Option<&BTreeMap<String, String>>,
    errors: &[String],
    difficulty_level: i16,
) -> Result<Option<Hint>, ApiError> {
    let Some(mut draft) = build_hint(topic, completed_answers, errors, difficulty_level) else {
        return Ok(None);
    };

    if let Some(url) = &cfg.hint_phraser_url {
        match phrase_remote(http, url, &draft, errors).await {
            Ok(content) => draft.content = content,
            Err(e) => {
                tracing::warn!(error = %e, "hint phraser unavailable, using local template");
            }
        }
    }

    let hint = db::insert_hint(db, assignment_id, student_id, &draft).await?;
    tracing::info!(
        hint_id = %hint.id,
        difficulty = hint.difficulty_level,
        topic = %hint.topic,
        "hint suggested"
    );
    Ok(Some(hint))
}

/// Deterministic hint core: topic extraction, question scaffolding, and
/// relevance. Returns None on an empty error list.
pub fn build_hint(
    topic: Option<&str>,
    completed_answers: Option<&BTreeMap<String, String>>,
    errors: &[String],
    difficulty_level: i16,
) -> Option<HintDraft> {
    if errors.is_empty() {
        return None;
    }
    let level = difficulty_level.clamp(1, 5);
    let topic = extract_topic(topic, errors);
    let answered = completed_answers.map(|m| m.len()).unwrap_or(0);

    let questions = guiding_questions(&topic, &errors[0], answered, level);
    let content = questions.join("\n");
    // More guided hints address the reported error more directly.
    let relevance = 1.0 - 0.1 * (level - 1) as f64;

    Some(HintDraft {
        topic,
        content,
        relevance,
        difficulty_level: level,
    })
}

/// Explicit topic when the caller supplied one, otherwise a short summary of
/// the first reported error.
fn extract_topic(topic: Option<&str>, errors: &[String]) -> String {
    match topic {
        Some(t) if !t.trim().is_empty() => t.trim().to_string(),
        _ => {
            let words: Vec<&str> = errors[0].split_whitespace().take(6).collect();
            words.join(" ")
        }
    }
}

/// Guiding questions, never answers. Count and directness scale inversely
/// with the level: level 1 walks the student through the error step by step,
/// level 5 is a single nudge.
fn guiding_questions(topic: &str, first_error: &str, answered: usize, level: i16) -> Vec<String> {
    let pool = [
        format!("¿Qué te pide exactamente la consigna sobre {topic}?"),
        format!("Mirá de nuevo donde apareció \"{first_error}\": ¿qué paso diste justo antes?"),
        format!("¿Qué sabés ya sobre {topic} que todavía no usaste acá?"),
        format!(
            "Ya resolviste {answered} respuestas: ¿qué hiciste distinto en las que salieron bien?"
        ),
        format!("Si explicaras {topic} a un compañero, ¿por dónde empezarías?"),
    ];
    let count = (6 - level).clamp(1, 5) as usize;
    pool.into_iter().take(count).collect()
}

async fn phrase_remote(
    http: &reqwest::Client,
    url: &str,
    draft: &HintDraft,
    errors: &[String],
) -> anyhow::Result<String> {
    let resp = http
        .post(url)
        .json(&PhraserRequest {
            topic: &draft.topic,
            errors,
            difficulty_level: draft.difficulty_level,
            draft_questions: &draft.content,
        })
        .send()
        .await?
        .error_for_status()?
        .json::<PhraserResponse>()
        .await?;
    Ok(resp.content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::monitor::difficulty_for_score;
    use pretty_assertions::assert_eq;

    fn errs(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_errors_yield_no_hint() {
        assert_eq!(build_hint(Some("fracciones"), None, &[], 1), None);
    }

    #[test]
    fn difficulty_from_risk_score_drives_the_hint_level() {
        let cfg = EngineConfig::default();
        let errors = errs(&["confunde numerador y denominador"]);

        let guided = build_hint(None, None, &errors, difficulty_for_score(0.85, &cfg)).unwrap();
        assert_eq!(guided.difficulty_level, 1);

        let light = build_hint(None, None, &errors, difficulty_for_score(0.05, &cfg)).unwrap();
        assert_eq!(light.difficulty_level, 5);
    }

    #[test]
    fn question_count_scales_inversely_with_level() {
        let errors = errs(&["confunde numerador y denominador"]);
        let guided = build_hint(Some("fracciones"), None, &errors, 1).unwrap();
        let light = build_hint(Some("fracciones"), None, &errors, 5).unwrap();
        assert_eq!(guided.content.lines().count(), 5);
        assert_eq!(light.content.lines().count(), 1);
        assert!(guided.relevance > light.relevance);
    }

    #[test]
    fn topic_falls_back_to_first_error_summary() {
        let errors = errs(&["no aplica la propiedad distributiva al expandir el binomio dado"]);
        let hint = build_hint(None, None, &errors, 3).unwrap();
        assert_eq!(hint.topic, "no aplica la propiedad distributiva al");

        let hint = build_hint(Some("álgebra"), None, &errors, 3).unwrap();
        assert_eq!(hint.topic, "álgebra");
    }

    #[test]
    fn questions_never_contain_answers() {
        let errors = errs(&["resultado incorrecto"]);
        let hint = build_hint(Some("ecuaciones"), None, &errors, 1).unwrap();
        for line in hint.content.lines() {
            assert!(line.ends_with('?'), "guiding line should ask, got: {line}");
        }
    }

    #[test]
    fn out_of_range_levels_are_clamped() {
        let errors = errs(&["error"]);
        assert_eq!(build_hint(None, None, &errors, 0).unwrap().difficulty_level, 1);
        assert_eq!(build_hint(None, None, &errors, 9).unwrap().difficulty_level, 5);
    }
}
