//! Case file data model.
//!
//! Field names on the wire follow the staging table (`Ref`, `Cuantia`,
//! `Estado`, `ingestion_timestamp`); Rust-side names are English.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while building model values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    /// Procedure label outside the closed enumeration
    #[error("Unknown procedure type: {0}")]
    UnknownProcedure(String),

    /// A case reference must not be empty
    #[error("Case reference is empty")]
    EmptyRef,
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Globally unique, immutable case identity (`Ref`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CaseRef(String);

impl CaseRef {
    /// Creates a case reference, rejecting empty strings.
    pub fn new(value: impl Into<String>) -> Result<Self, ModelError> {
        let value = value.into();
        if value.is_empty() {
            return Err(ModelError::EmptyRef);
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CaseRef {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CaseRef> for String {
    fn from(value: CaseRef) -> Self {
        value.0
    }
}

impl fmt::Display for CaseRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// PROCEDURE TYPE
// =============================================================================

/// Category of proceedings; selects which stage graph governs a case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcedureType {
    Verbal,
    Ordinario,
}

impl ProcedureType {
    pub fn all() -> [ProcedureType; 2] {
        [ProcedureType::Verbal, ProcedureType::Ordinario]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProcedureType::Verbal => "Verbal",
            ProcedureType::Ordinario => "Ordinario",
        }
    }
}

impl fmt::Display for ProcedureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ProcedureType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "verbal" => Ok(ProcedureType::Verbal),
            "ordinario" => Ok(ProcedureType::Ordinario),
            _ => Err(ModelError::UnknownProcedure(s.to_string())),
        }
    }
}

// =============================================================================
// STAGES
// =============================================================================

/// A named point in a case's procedural lifecycle (`estado`).
///
/// Labels that the procedure graph does not know (e.g. legacy values in the
/// history table) are kept verbatim in `Unrecognized` and have no successors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Stage {
    Demanda,
    Contestacion,
    Vista,
    AudienciaPrevia,
    Juicio,
    Sentencia,
    Recurso,
    OposicionRecurso,
    SentenciaDefinitiva,
    Unrecognized(String),
}

impl Stage {
    /// Every stage the procedure graph knows about.
    pub const KNOWN: [Stage; 9] = [
        Stage::Demanda,
        Stage::Contestacion,
        Stage::Vista,
        Stage::AudienciaPrevia,
        Stage::Juicio,
        Stage::Sentencia,
        Stage::Recurso,
        Stage::OposicionRecurso,
        Stage::SentenciaDefinitiva,
    ];

    /// Returns the label as stored in the `estado` column.
    pub fn label(&self) -> &str {
        match self {
            Stage::Demanda => "Demanda",
            Stage::Contestacion => "Contestación",
            Stage::Vista => "Vista",
            Stage::AudienciaPrevia => "Audiencia Previa",
            Stage::Juicio => "Juicio",
            Stage::Sentencia => "Sentencia",
            Stage::Recurso => "Recurso",
            Stage::OposicionRecurso => "Oposición a recurso",
            Stage::SentenciaDefinitiva => "Sentencia definitiva",
            Stage::Unrecognized(label) => label,
        }
    }

    /// Parses a stored label. Matching is exact so the raw text round-trips.
    pub fn from_label(label: &str) -> Stage {
        Stage::KNOWN
            .iter()
            .find(|stage| stage.label() == label)
            .cloned()
            .unwrap_or_else(|| Stage::Unrecognized(label.to_string()))
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Stage::Unrecognized(_))
    }
}

impl From<String> for Stage {
    fn from(value: String) -> Self {
        match Stage::from_label(&value) {
            Stage::Unrecognized(_) => Stage::Unrecognized(value),
            known => known,
        }
    }
}

impl From<&str> for Stage {
    fn from(value: &str) -> Self {
        Stage::from_label(value)
    }
}

impl From<Stage> for String {
    fn from(value: Stage) -> Self {
        match value {
            Stage::Unrecognized(label) => label,
            known => known.label().to_string(),
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// NESTED ENTRIES
// =============================================================================

/// One amount observation (`Cuantia` element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmountEntry {
    pub importe: f64,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// One stage observation (`Estado` element).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageEntry {
    pub estado: Stage,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub timestamp: DateTime<Utc>,
}

/// Entry timestamps are RFC 3339 or offset-less (read as UTC), as the
/// master table loader writes them.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    crate::normalizer::parse_timestamp(&raw, true)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {}", raw)))
}

// =============================================================================
// EVENTS AND RECORDS
// =============================================================================

/// Publish unit produced by the event generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    #[serde(rename = "Ref")]
    pub case_ref: CaseRef,

    /// Zero or one amount entries
    #[serde(rename = "Cuantia", default)]
    pub amounts: Vec<AmountEntry>,

    /// Zero or one stage entries
    #[serde(rename = "Estado", default)]
    pub stages: Vec<StageEntry>,
}

impl LifecycleEvent {
    /// Serializes the event as the JSON payload published on the bus.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// The stage this event moves the case to, if any.
    pub fn stage(&self) -> Option<&Stage> {
        self.stages.first().map(|entry| &entry.estado)
    }

    /// The new amount carried by this event, if any.
    pub fn amount(&self) -> Option<f64> {
        self.amounts.first().map(|entry| entry.importe)
    }
}

/// Storage append unit produced by the ingestion normalizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    #[serde(rename = "Ref")]
    pub case_ref: CaseRef,

    #[serde(rename = "Cuantia")]
    pub amounts: Vec<AmountEntry>,

    #[serde(rename = "Estado")]
    pub stages: Vec<StageEntry>,

    /// Processing time at normalization, never taken from the payload
    pub ingestion_timestamp: DateTime<Utc>,
}

impl NormalizedRecord {
    /// True when filtering left no nested entries at all.
    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty() && self.stages.is_empty()
    }
}

/// One row of the master case table: identity plus full nested history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseHistory {
    #[serde(rename = "Ref")]
    pub case_ref: CaseRef,

    #[serde(rename = "Procedimiento")]
    pub procedure: ProcedureType,

    #[serde(rename = "Juzgado", default, skip_serializing_if = "Option::is_none")]
    pub court: Option<String>,

    #[serde(rename = "Cuantia", default)]
    pub amounts: Vec<AmountEntry>,

    #[serde(rename = "Estado", default)]
    pub stages: Vec<StageEntry>,
}

impl CaseHistory {
    /// Creates a case with no history yet.
    pub fn new(case_ref: CaseRef, procedure: ProcedureType) -> Self {
        Self {
            case_ref,
            procedure,
            court: None,
            amounts: Vec::new(),
            stages: Vec::new(),
        }
    }

    pub fn with_court(mut self, court: impl Into<String>) -> Self {
        self.court = Some(court.into());
        self
    }

    pub fn with_amount(mut self, importe: f64, timestamp: DateTime<Utc>) -> Self {
        self.amounts.push(AmountEntry { importe, timestamp });
        self
    }

    pub fn with_stage(mut self, estado: Stage, timestamp: DateTime<Utc>) -> Self {
        self.stages.push(StageEntry { estado, timestamp });
        self
    }
}

/// Derived, in-memory summary used to drive generation for one case.
#[derive(Debug, Clone, PartialEq)]
pub struct CaseRuntimeState {
    pub procedure: ProcedureType,
    pub last_stage: Option<Stage>,
    pub last_amount: Option<f64>,
}

impl CaseRuntimeState {
    /// A case that has not started yet and has no known amount.
    pub fn new(procedure: ProcedureType) -> Self {
        Self {
            procedure,
            last_stage: None,
            last_amount: None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.last_stage = Some(stage);
        self
    }

    pub fn with_amount(mut self, amount: f64) -> Self {
        self.last_amount = Some(amount);
        self
    }
}
