use std::env;
use std::str::FromStr;

/// Scoring and alerting policy, loaded once at startup. Every threshold the
/// risk rules use lives here so operators can retune without a deploy.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Cumulative session seconds after which low progress counts as stalled.
    pub stuck_duration_secs: i64,
    /// Progress percentage below which a session counts as low-progress.
    pub low_progress_pct: i32,
    /// Corrections above this count start contributing to the risk score.
    pub correction_count_threshold: i64,
    /// Material lookups above this count (without progress) contribute.
    pub lookup_count_threshold: i64,
    /// A pause at least this long counts as a long pause.
    pub long_pause_secs: i64,

    // Weighted contributions of each non-abandon signal.
    pub weight_stalled: f64,
    pub weight_corrections: f64,
    pub weight_lookups: f64,
    pub weight_pause: f64,
    /// Per-correction increment above the threshold, capped at weight_corrections.
    pub correction_step: f64,

    // Risk level bucket lower bounds, score in [0,1].
    pub risk_bucket_bajo: f64,
    pub risk_bucket_medio: f64,
    pub risk_bucket_alto: f64,
    pub risk_bucket_critico: f64,

    // Pattern detector minimums.
    pub correction_cycle_pattern_min: usize,
    pub stalled_pattern_min: usize,
    /// Per-event seconds a written answer must last to count toward the
    /// stalled pattern.
    pub stalled_pattern_event_secs: i64,

    /// Word count above which a graded free-text answer is dispatched for
    /// background deep analysis.
    pub deep_analysis_min_words: usize,
    pub deep_analysis_url: Option<String>,
    /// Opaque text-generation collaborator for hint phrasing.
    pub hint_phraser_url: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stuck_duration_secs: 900,
            low_progress_pct: 10,
            correction_count_threshold: 5,
            lookup_count_threshold: 3,
            long_pause_secs: 300,
            weight_stalled: 0.4,
            weight_corrections: 0.3,
            weight_lookups: 0.2,
            weight_pause: 0.2,
            correction_step: 0.05,
            risk_bucket_bajo: 0.2,
            risk_bucket_medio: 0.4,
            risk_bucket_alto: 0.6,
            risk_bucket_critico: 0.8,
            correction_cycle_pattern_min: 10,
            stalled_pattern_min: 5,
            stalled_pattern_event_secs: 300,
            deep_analysis_min_words: 150,
            deep_analysis_url: None,
            hint_phraser_url: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            stuck_duration_secs: env_or("STUCK_DURATION_SECS", d.stuck_duration_secs),
            low_progress_pct: env_or("LOW_PROGRESS_PCT", d.low_progress_pct),
            correction_count_threshold: env_or(
                "CORRECTION_COUNT_THRESHOLD",
                d.correction_count_threshold,
            ),
            lookup_count_threshold: env_or("LOOKUP_COUNT_THRESHOLD", d.lookup_count_threshold),
            long_pause_secs: env_or("LONG_PAUSE_SECS", d.long_pause_secs),
            weight_stalled: env_or("WEIGHT_STALLED", d.weight_stalled),
            weight_corrections: env_or("WEIGHT_CORRECTIONS", d.weight_corrections),
            weight_lookups: env_or("WEIGHT_LOOKUPS", d.weight_lookups),
            weight_pause: env_or("WEIGHT_PAUSE", d.weight_pause),
            correction_step: env_or("CORRECTION_STEP", d.correction_step),
            risk_bucket_bajo: env_or("RISK_BUCKET_BAJO", d.risk_bucket_bajo),
            risk_bucket_medio: env_or("RISK_BUCKET_MEDIO", d.risk_bucket_medio),
            risk_bucket_alto: env_or("RISK_BUCKET_ALTO", d.risk_bucket_alto),
            risk_bucket_critico: env_or("RISK_BUCKET_CRITICO", d.risk_bucket_critico),
            correction_cycle_pattern_min: env_or(
                "CORRECTION_CYCLE_PATTERN_MIN",
                d.correction_cycle_pattern_min,
            ),
            stalled_pattern_min: env_or("STALLED_PATTERN_MIN", d.stalled_pattern_min),
            stalled_pattern_event_secs: env_or(
                "STALLED_PATTERN_EVENT_SECS",
                d.stalled_pattern_event_secs,
            ),
            deep_analysis_min_words: env_or("DEEP_ANALYSIS_MIN_WORDS", d.deep_analysis_min_words),
            deep_analysis_url: env::var("DEEP_ANALYSIS_URL").ok(),
            hint_phraser_url: env::var("HINT_PHRASER_URL").ok(),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_thresholds() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.stuck_duration_secs, 900);
        assert_eq!(cfg.correction_count_threshold, 5);
        assert_eq!(cfg.lookup_count_threshold, 3);
        assert_eq!(cfg.risk_bucket_critico, 0.8);
        assert_eq!(cfg.correction_cycle_pattern_min, 10);
    }
}
