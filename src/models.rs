use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Behavioral event kinds accepted on the ingest endpoint. Closed set: an
/// unrecognized wire value is rejected at deserialization, nothing persisted.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Start,
    WrittenAnswer,
    MaterialLookup,
    AnswerChange,
    Pause,
    Resume,
    Submit,
    Abandon,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Start => "start",
            EventKind::WrittenAnswer => "written_answer",
            EventKind::MaterialLookup => "material_lookup",
            EventKind::AnswerChange => "answer_change",
            EventKind::Pause => "pause",
            EventKind::Resume => "resume",
            EventKind::Submit => "submit",
            EventKind::Abandon => "abandon",
        }
    }

    pub fn parse(s: &str) -> Option<EventKind> {
        match s {
            "start" => Some(EventKind::Start),
            "written_answer" => Some(EventKind::WrittenAnswer),
            "material_lookup" => Some(EventKind::MaterialLookup),
            "answer_change" => Some(EventKind::AnswerChange),
            "pause" => Some(EventKind::Pause),
            "resume" => Some(EventKind::Resume),
            "submit" => Some(EventKind::Submit),
            "abandon" => Some(EventKind::Abandon),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Ninguno,
    Bajo,
    Medio,
    Alto,
    Critico,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Ninguno => "ninguno",
            RiskLevel::Bajo => "bajo",
            RiskLevel::Medio => "medio",
            RiskLevel::Alto => "alto",
            RiskLevel::Critico => "critico",
        }
    }

    pub fn parse(s: &str) -> Option<RiskLevel> {
        match s {
            "ninguno" => Some(RiskLevel::Ninguno),
            "bajo" => Some(RiskLevel::Bajo),
            "medio" => Some(RiskLevel::Medio),
            "alto" => Some(RiskLevel::Alto),
            "critico" => Some(RiskLevel::Critico),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Baja,
    Media,
    Alta,
    Critica,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Baja => "baja",
            Severity::Media => "media",
            Severity::Alta => "alta",
            Severity::Critica => "critica",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "baja" => Some(Severity::Baja),
            "media" => Some(Severity::Media),
            "alta" => Some(Severity::Alta),
            "critica" => Some(Severity::Critica),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    RiesgoAbandono,
    BajoProgreso,
    MultiplesCambios,
    ConsultaFrecuenteMaterial,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::RiesgoAbandono => "riesgo_abandono",
            AlertKind::BajoProgreso => "bajo_progreso",
            AlertKind::MultiplesCambios => "multiples_cambios",
            AlertKind::ConsultaFrecuenteMaterial => "consulta_frecuente_material",
        }
    }

    pub fn parse(s: &str) -> Option<AlertKind> {
        match s {
            "riesgo_abandono" => Some(AlertKind::RiesgoAbandono),
            "bajo_progreso" => Some(AlertKind::BajoProgreso),
            "multiples_cambios" => Some(AlertKind::MultiplesCambios),
            "consulta_frecuente_material" => Some(AlertKind::ConsultaFrecuenteMaterial),
            _ => None,
        }
    }
}

/// Alert lifecycle: generada is the only active state; the other two are
/// terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Generada,
    Atendida,
    Descartada,
}

impl AlertState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Generada => "generada",
            AlertState::Atendida => "atendida",
            AlertState::Descartada => "descartada",
        }
    }

    pub fn parse(s: &str) -> Option<AlertState> {
        match s {
            "generada" => Some(AlertState::Generada),
            "atendida" => Some(AlertState::Atendida),
            "descartada" => Some(AlertState::Descartada),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HintState {
    Sugerida,
    Vista,
    Descartada,
}

impl HintState {
    pub fn parse(s: &str) -> Option<HintState> {
        match s {
            "sugerida" => Some(HintState::Sugerida),
            "vista" => Some(HintState::Vista),
            "descartada" => Some(HintState::Descartada),
            _ => None,
        }
    }
}

/// What the monitor asks the orchestrating handler to do next with a record.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InterventionFlag {
    Ninguna,
    Pista,
    Alerta,
}

impl InterventionFlag {
    pub fn as_str(&self) -> &'static str {
        match self {
            InterventionFlag::Ninguna => "ninguna",
            InterventionFlag::Pista => "pista",
            InterventionFlag::Alerta => "alerta",
        }
    }

    pub fn parse(s: &str) -> Option<InterventionFlag> {
        match s {
            "ninguna" => Some(InterventionFlag::Ninguna),
            "pista" => Some(InterventionFlag::Pista),
            "alerta" => Some(InterventionFlag::Alerta),
            _ => None,
        }
    }
}

/// One immutable snapshot per ingested event. Appended by the monitor, never
/// updated or deleted afterwards.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MonitoringRecord {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: String,
    pub content_id: Uuid,
    pub event_kind: EventKind,
    pub description: Option<String>,
    pub context: Option<Value>,
    pub duration_secs: i64,
    pub total_duration_secs: i64,
    pub progress_pct: i32,
    pub response_velocity_wpm: i32,
    pub risk_score: f64,
    pub risk_level: RiskLevel,
    pub intervention_flag: InterventionFlag,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Alert {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: String,
    pub alert_kind: AlertKind,
    pub severity: Severity,
    pub message: String,
    pub recommendation: String,
    pub confidence: f64,
    pub state: AlertState,
    pub intervened_at: Option<DateTime<Utc>>,
    pub intervened_by: Option<String>,
    pub action_taken: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Hint {
    pub id: Uuid,
    pub assignment_id: Uuid,
    pub student_id: String,
    pub topic: String,
    pub content: String,
    pub relevance: f64,
    pub difficulty_level: i16,
    pub state: HintState,
    pub created_at: DateTime<Utc>,
}

/// Ingest request body. Everything past the identity triple and the event
/// kind is optional; the scoring rules only look at what the client sent.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ActivityEventReq {
    pub assignment_id: Uuid,
    pub student_id: String,
    pub content_id: Uuid,
    pub event_kind: EventKind,
    #[serde(default)]
    pub duration_secs: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default)]
    pub completed_answers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    pub total_expected_answers: Option<i64>,
    #[serde(default)]
    pub characters_written: Option<i64>,
    #[serde(default)]
    pub correction_count: Option<i64>,
    #[serde(default)]
    pub lookup_count: Option<i64>,
    #[serde(default)]
    pub errors: Option<Vec<String>>,
}

/// Running per-pair statistics, derived on demand from the record history.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SessionStats {
    pub tiempo_total: i64,
    pub eventos: i64,
    pub progreso: i32,
    pub nivel_riesgo: RiskLevel,
    pub puntaje_riesgo: f64,
}

#[derive(Serialize, Debug, Clone)]
pub struct ActivityResponse {
    pub record: MonitoringRecord,
    pub alert: Option<Alert>,
    pub hint: Option<Hint>,
    pub stats: SessionStats,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct InterveneReq {
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct DeepAnalysisReq {
    pub student_id: String,
    pub answer_text: String,
}
