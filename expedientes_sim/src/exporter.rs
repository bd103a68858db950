//! Batch exporter.
//!
//! Writes a generated batch either as one pretty JSON document with run
//! metadata, or as JSON lines holding exactly the payloads that would have
//! been published.

use chrono::{DateTime, Utc};
use expedientes_core::LifecycleEvent;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::driver::BatchOutcome;
use crate::error::SimError;

/// Complete batch export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchExport {
    /// Seed used for case and branch selection
    pub seed: u64,

    pub requested: usize,

    pub generated: usize,

    pub attempts: usize,

    /// Clock reading when the export was built
    pub exported_at: DateTime<Utc>,

    pub events: Vec<LifecycleEvent>,
}

impl BatchExport {
    pub fn new(seed: u64, outcome: &BatchOutcome, exported_at: DateTime<Utc>) -> Self {
        Self {
            seed,
            requested: outcome.requested,
            generated: outcome.events.len(),
            attempts: outcome.attempts,
            exported_at,
            events: outcome.events.clone(),
        }
    }

    /// Writes the export as pretty JSON.
    pub fn write_to_file(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }

    /// Writes only the events, one publishable payload per line.
    pub fn write_jsonl(&self, path: impl AsRef<Path>) -> Result<(), SimError> {
        let mut writer = BufWriter::new(File::create(path)?);
        for event in &self.events {
            writer.write_all(&event.to_payload()?)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use expedientes_core::{AmountEntry, CaseRef, Stage, StageEntry};

    fn outcome() -> BatchOutcome {
        let t = Utc.with_ymd_and_hms(2024, 5, 2, 9, 0, 0).unwrap();
        BatchOutcome {
            requested: 3,
            attempts: 7,
            events: vec![
                LifecycleEvent {
                    case_ref: CaseRef::new("EXP-1").unwrap(),
                    amounts: vec![AmountEntry { importe: 480.0, timestamp: t }],
                    stages: vec![StageEntry { estado: Stage::OposicionRecurso, timestamp: t }],
                },
                LifecycleEvent {
                    case_ref: CaseRef::new("EXP-2").unwrap(),
                    amounts: vec![],
                    stages: vec![StageEntry { estado: Stage::AudienciaPrevia, timestamp: t }],
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_export_metadata() {
        let now = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap();
        let export = BatchExport::new(42, &outcome(), now);
        assert_eq!(export.generated, 2);
        assert_eq!(export.requested, 3);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("batch.json");
        export.write_to_file(&path).unwrap();

        let back: BatchExport = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back.seed, 42);
        assert_eq!(back.attempts, 7);
        assert_eq!(back.events, export.events);
    }

    #[test]
    fn test_jsonl_lines_are_payloads() {
        let export = BatchExport::new(1, &outcome(), Utc::now());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.jsonl");
        export.write_jsonl(&path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["Estado"][0]["estado"], "Oposición a recurso");
        assert_eq!(first["Cuantia"][0]["importe"], 480.0);
        assert!(lines[1].contains("Audiencia Previa"));
    }
}
