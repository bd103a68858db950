//! Ingestion Normalizer
//! ====================
//!
//! Turns a raw bus payload into a [`NormalizedRecord`] for the append-only
//! staging table.
//!
//! ```text
//! bytes -> UTF-8 -> JSON object -> Ref? -> filter Cuantia -> filter Estado
//!                                                   -> stamp ingestion time
//! ```
//!
//! Whole-message problems (undecodable payload, missing `Ref`) drop the
//! message. Problems inside a single nested entry drop only that entry.
//! Nothing here returns an error: callers get a [`NormalizeOutcome`] and
//! report it to an [`IngestObserver`](crate::metrics::IngestObserver).

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::model::{AmountEntry, CaseRef, NormalizedRecord, Stage, StageEntry};

/// Why a whole message was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DropReason {
    /// Payload bytes are not UTF-8
    InvalidUtf8,
    /// Payload is not valid JSON
    MalformedJson,
    /// Payload is JSON but not an object
    NotAnObject,
    /// `Ref` absent, null or empty
    MissingRef,
    /// `Ref` present but not a string
    InvalidRef,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::InvalidUtf8 => "invalid_utf8",
            DropReason::MalformedJson => "malformed_json",
            DropReason::NotAnObject => "not_an_object",
            DropReason::MissingRef => "missing_ref",
            DropReason::InvalidRef => "invalid_ref",
        }
    }
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Nested entries removed from an otherwise valid message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiscardedEntries {
    pub amounts: usize,
    pub stages: usize,
}

impl DiscardedEntries {
    pub fn total(&self) -> usize {
        self.amounts + self.stages
    }
}

/// Result of normalizing one message.
#[derive(Debug, Clone, PartialEq)]
pub enum NormalizeOutcome {
    Normalized {
        record: NormalizedRecord,
        discarded: DiscardedEntries,
    },
    Dropped(DropReason),
}

impl NormalizeOutcome {
    pub fn record(self) -> Option<NormalizedRecord> {
        match self {
            NormalizeOutcome::Normalized { record, .. } => Some(record),
            NormalizeOutcome::Dropped(_) => None,
        }
    }

    pub fn drop_reason(&self) -> Option<DropReason> {
        match self {
            NormalizeOutcome::Dropped(reason) => Some(*reason),
            NormalizeOutcome::Normalized { .. } => None,
        }
    }

    pub fn is_dropped(&self) -> bool {
        matches!(self, NormalizeOutcome::Dropped(_))
    }
}

/// Entry acceptance rules.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Accept `2024-01-05T10:00:00` (no offset) as UTC
    pub accept_naive_timestamps: bool,

    /// Discard amount entries with a negative `importe`
    pub reject_negative_amounts: bool,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            accept_naive_timestamps: true,
            reject_negative_amounts: true,
        }
    }
}

impl NormalizerConfig {
    pub fn with_naive_timestamps(mut self, accept: bool) -> Self {
        self.accept_naive_timestamps = accept;
        self
    }

    pub fn with_negative_amounts_rejected(mut self, reject: bool) -> Self {
        self.reject_negative_amounts = reject;
        self
    }
}

/// Stateless per-message transform. Safe to share across threads.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizes one payload, stamping `ingestion_timestamp = now`.
    pub fn normalize(&self, raw: &[u8], now: DateTime<Utc>) -> NormalizeOutcome {
        let text = match std::str::from_utf8(raw) {
            Ok(text) => text,
            Err(_) => return NormalizeOutcome::Dropped(DropReason::InvalidUtf8),
        };

        let object = match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(object)) => object,
            Ok(_) => return NormalizeOutcome::Dropped(DropReason::NotAnObject),
            Err(_) => return NormalizeOutcome::Dropped(DropReason::MalformedJson),
        };

        let case_ref = match object.get("Ref") {
            None | Some(Value::Null) => return NormalizeOutcome::Dropped(DropReason::MissingRef),
            Some(Value::String(value)) => match CaseRef::new(value.as_str()) {
                Ok(case_ref) => case_ref,
                Err(_) => return NormalizeOutcome::Dropped(DropReason::MissingRef),
            },
            Some(_) => return NormalizeOutcome::Dropped(DropReason::InvalidRef),
        };

        let mut discarded = DiscardedEntries::default();

        let candidates = entries(&object, "Cuantia");
        let amounts: Vec<AmountEntry> = candidates
            .iter()
            .filter_map(|entry| self.amount_entry(entry))
            .collect();
        discarded.amounts = candidates.len() - amounts.len();

        let candidates = entries(&object, "Estado");
        let stages: Vec<StageEntry> = candidates
            .iter()
            .filter_map(|entry| self.stage_entry(entry))
            .collect();
        discarded.stages = candidates.len() - stages.len();

        NormalizeOutcome::Normalized {
            record: NormalizedRecord {
                case_ref,
                amounts,
                stages,
                ingestion_timestamp: now,
            },
            discarded,
        }
    }

    fn amount_entry(&self, entry: &Value) -> Option<AmountEntry> {
        let fields = entry.as_object()?;
        let importe = match fields.get("importe")? {
            Value::Number(number) => number.as_f64()?,
            _ => return None,
        };
        if !importe.is_finite() || (self.config.reject_negative_amounts && importe < 0.0) {
            return None;
        }
        let timestamp = self.timestamp(fields)?;
        Some(AmountEntry { importe, timestamp })
    }

    fn stage_entry(&self, entry: &Value) -> Option<StageEntry> {
        let fields = entry.as_object()?;
        let estado = fields.get("estado")?.as_str()?;
        let timestamp = self.timestamp(fields)?;
        Some(StageEntry {
            estado: Stage::from(estado.to_string()),
            timestamp,
        })
    }

    fn timestamp(&self, fields: &Map<String, Value>) -> Option<DateTime<Utc>> {
        let raw = fields.get("timestamp")?.as_str()?;
        parse_timestamp(raw, self.config.accept_naive_timestamps)
    }
}

/// Normalizes with default rules; `None` means the message was dropped.
pub fn normalize(raw: &[u8], now: DateTime<Utc>) -> Option<NormalizedRecord> {
    Normalizer::default().normalize(raw, now).record()
}

/// A missing or non-array section counts as empty.
fn entries<'a>(object: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    match object.get(key) {
        Some(Value::Array(items)) => items.as_slice(),
        _ => &[],
    }
}

/// RFC 3339, or (optionally) an offset-less ISO 8601 date-time read as UTC.
pub fn parse_timestamp(raw: &str, accept_naive: bool) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    if !accept_naive {
        return None;
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| Utc.from_utc_datetime(&naive))
}
