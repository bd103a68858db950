//! Case Runtime State Store.
//!
//! Holds the projected state of every loaded case, in load order, and picks
//! cases uniformly for the driver. Owned by a single driver; mutation goes
//! through `&mut self`, so two workers can never advance the same case.

use expedientes_core::graph;
use expedientes_core::projector::{project, BootstrapRow};
use expedientes_core::{CaseHistory, CaseRef, CaseRuntimeState, RandomSource};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub struct CaseRegistry {
    entries: Vec<(CaseRef, CaseRuntimeState)>,
    index: HashMap<CaseRef, usize>,
}

impl CaseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Projects each history row. A repeated `Ref` keeps the last row.
    pub fn from_histories<I>(histories: I) -> Self
    where
        I: IntoIterator<Item = CaseHistory>,
    {
        let mut registry = Self::new();
        for history in histories {
            let state = project(&history);
            registry.insert(history.case_ref, state);
        }
        debug!(cases = registry.len(), "registry loaded from histories");
        registry
    }

    /// Loads pre-projected bootstrap rows. A repeated `Ref` keeps the last row.
    pub fn from_bootstrap<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = BootstrapRow>,
    {
        let mut registry = Self::new();
        for row in rows {
            let state = row.runtime_state();
            registry.insert(row.case_ref, state);
        }
        debug!(cases = registry.len(), "registry loaded from bootstrap rows");
        registry
    }

    /// Inserts or replaces a case. Replacing keeps the original position.
    pub fn insert(&mut self, case_ref: CaseRef, state: CaseRuntimeState) {
        match self.index.get(&case_ref) {
            Some(&position) => self.entries[position].1 = state,
            None => {
                self.index.insert(case_ref.clone(), self.entries.len());
                self.entries.push((case_ref, state));
            }
        }
    }

    /// Picks a case uniformly at random.
    pub fn pick<R: RandomSource + ?Sized>(&self, draw: &mut R) -> Option<&CaseRef> {
        if self.entries.is_empty() {
            return None;
        }
        let position = draw.index(self.entries.len());
        self.entries.get(position).map(|(case_ref, _)| case_ref)
    }

    /// Picks a case uniformly at random, handing out its mutable state.
    pub fn pick_mut<R: RandomSource + ?Sized>(&mut self, draw: &mut R) -> Option<(&CaseRef, &mut CaseRuntimeState)> {
        if self.entries.is_empty() {
            return None;
        }
        let position = draw.index(self.entries.len());
        self.entries
            .get_mut(position)
            .map(|(case_ref, state)| (&*case_ref, state))
    }

    pub fn get(&self, case_ref: &CaseRef) -> Option<&CaseRuntimeState> {
        self.index.get(case_ref).map(|&position| &self.entries[position].1)
    }

    pub fn state_mut(&mut self, case_ref: &CaseRef) -> Option<&mut CaseRuntimeState> {
        let position = *self.index.get(case_ref)?;
        Some(&mut self.entries[position].1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaseRef, &CaseRuntimeState)> {
        self.entries.iter().map(|(case_ref, state)| (case_ref, state))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cases for which the graph offers no further stage.
    pub fn terminal_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, state)| graph::is_terminal(state.procedure, state.last_stage.as_ref()))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use expedientes_core::{FixedDraws, ProcedureType, Stage};

    fn case(id: &str) -> CaseRef {
        CaseRef::new(id).unwrap()
    }

    fn registry() -> CaseRegistry {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        CaseRegistry::from_histories(vec![
            CaseHistory::new(case("A"), ProcedureType::Verbal).with_stage(Stage::Demanda, t),
            CaseHistory::new(case("B"), ProcedureType::Ordinario),
            CaseHistory::new(case("C"), ProcedureType::Verbal)
                .with_stage(Stage::SentenciaDefinitiva, t)
                .with_amount(10.0, t),
        ])
    }

    #[test]
    fn test_from_histories_projects_state() {
        let registry = registry();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.get(&case("A")).unwrap().last_stage, Some(Stage::Demanda));
        assert_eq!(registry.get(&case("B")).unwrap().last_stage, None);
        assert_eq!(registry.get(&case("C")).unwrap().last_amount, Some(10.0));
        assert_eq!(registry.terminal_count(), 1);
    }

    #[test]
    fn test_duplicate_ref_keeps_last_row() {
        let registry = CaseRegistry::from_histories(vec![
            CaseHistory::new(case("A"), ProcedureType::Verbal),
            CaseHistory::new(case("B"), ProcedureType::Verbal),
            CaseHistory::new(case("A"), ProcedureType::Ordinario),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(&case("A")).unwrap().procedure, ProcedureType::Ordinario);

        let order: Vec<_> = registry.iter().map(|(r, _)| r.as_str().to_string()).collect();
        assert_eq!(order, vec!["A", "B"]);
    }

    #[test]
    fn test_pick_is_positional() {
        let mut registry = registry();
        let mut draws = FixedDraws::new([0.0, 0.5, 0.99]);

        assert_eq!(registry.pick(&mut draws), Some(&case("A")));
        assert_eq!(registry.pick(&mut draws), Some(&case("B")));

        let (picked, state) = registry.pick_mut(&mut draws).unwrap();
        assert_eq!(picked, &case("C"));
        state.last_amount = Some(0.0);
        assert_eq!(registry.get(&case("C")).unwrap().last_amount, Some(0.0));
    }

    #[test]
    fn test_empty_registry_picks_nothing() {
        let mut registry = CaseRegistry::new();
        let mut draws = FixedDraws::new([0.3]);
        assert!(registry.is_empty());
        assert!(registry.pick(&mut draws).is_none());
        assert!(registry.pick_mut(&mut draws).is_none());
        assert_eq!(draws.consumed(), 0);
    }

    #[test]
    fn test_from_bootstrap_rows() {
        let t = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();
        let history = CaseHistory::new(case("X"), ProcedureType::Ordinario)
            .with_stage(Stage::AudienciaPrevia, t)
            .with_amount(2500.0, t);
        let row = BootstrapRow::from_history(&history);

        let mut registry = CaseRegistry::from_bootstrap(vec![row]);
        let state = registry.state_mut(&case("X")).unwrap();
        assert_eq!(state.last_stage, Some(Stage::AudienciaPrevia));
        assert_eq!(state.last_amount, Some(2500.0));
    }
}
