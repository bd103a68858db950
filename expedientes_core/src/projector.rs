//! Latest-Value Projector
//!
//! Reduces a case's append-only history to the most recent stage and amount.
//! The two sequences are projected independently: the latest amount and the
//! latest stage need not come from the same event. Timestamp ties go to the
//! entry seen last in input order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AmountEntry, CaseHistory, CaseRef, CaseRuntimeState, ProcedureType, StageEntry};

/// Per-case answer of the bootstrap query: identity plus latest entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapRow {
    #[serde(rename = "Ref")]
    pub case_ref: CaseRef,

    #[serde(rename = "Procedimiento")]
    pub procedure: ProcedureType,

    #[serde(rename = "last_estado", default)]
    pub last_stage: Option<StageEntry>,

    #[serde(rename = "last_cuantia", default)]
    pub last_amount: Option<AmountEntry>,
}

impl BootstrapRow {
    /// Projects a full history row.
    pub fn from_history(history: &CaseHistory) -> Self {
        Self {
            case_ref: history.case_ref.clone(),
            procedure: history.procedure,
            last_stage: latest_stage(&history.stages).cloned(),
            last_amount: latest_amount(&history.amounts).cloned(),
        }
    }

    pub fn runtime_state(&self) -> CaseRuntimeState {
        CaseRuntimeState {
            procedure: self.procedure,
            last_stage: self.last_stage.as_ref().map(|entry| entry.estado.clone()),
            last_amount: self.last_amount.as_ref().map(|entry| entry.importe),
        }
    }
}

/// Projects a case history into its runtime state.
pub fn project(history: &CaseHistory) -> CaseRuntimeState {
    CaseRuntimeState {
        procedure: history.procedure,
        last_stage: latest_stage(&history.stages).map(|entry| entry.estado.clone()),
        last_amount: latest_amount(&history.amounts).map(|entry| entry.importe),
    }
}

pub fn latest_amount(entries: &[AmountEntry]) -> Option<&AmountEntry> {
    latest_by(entries, |entry| entry.timestamp)
}

pub fn latest_stage(entries: &[StageEntry]) -> Option<&StageEntry> {
    latest_by(entries, |entry| entry.timestamp)
}

fn latest_by<T>(entries: &[T], timestamp: impl Fn(&T) -> DateTime<Utc>) -> Option<&T> {
    entries.iter().fold(None, |best, entry| match best {
        Some(current) if timestamp(current) > timestamp(entry) => Some(current),
        _ => Some(entry),
    })
}
