//! Event Generator
//!
//! Produces the next coherent lifecycle event for one case and folds it back
//! into the case's runtime state.
//!
//! # Guarantees
//!
//! - The stage entry is always an edge of the procedure graph.
//! - Amounts never increase across successive events of the same case.
//! - No event (and no state change) once the graph yields no next stage.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::draw::RandomSource;
use crate::graph;
use crate::model::{AmountEntry, CaseRef, CaseRuntimeState, LifecycleEvent, StageEntry};

/// Tuning knobs for amount changes.
#[derive(Debug, Clone)]
pub struct GeneratorConfig {
    /// Probability that an event also lowers the amount (only when it is known)
    pub amount_change_probability: f64,

    /// Upper bound on a single decrease
    pub max_decrease: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            amount_change_probability: 0.4,
            max_decrease: 500,
        }
    }
}

impl GeneratorConfig {
    pub fn with_amount_change_probability(mut self, probability: f64) -> Self {
        self.amount_change_probability = probability.clamp(0.0, 1.0);
        self
    }

    pub fn with_max_decrease(mut self, max_decrease: u64) -> Self {
        self.max_decrease = max_decrease;
        self
    }
}

/// Stateless generator; all per-case state lives in [`CaseRuntimeState`].
#[derive(Debug, Clone, Default)]
pub struct EventGenerator {
    config: GeneratorConfig,
}

impl EventGenerator {
    pub fn new(config: GeneratorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Generates the next event for `case_ref`, mutating `state` in place.
    ///
    /// Returns `None` when the case is terminal; `state` is then untouched.
    /// Must not run concurrently for the same case.
    pub fn generate<R: RandomSource + ?Sized>(
        &self,
        case_ref: &CaseRef,
        state: &mut CaseRuntimeState,
        draw: &mut R,
        now: DateTime<Utc>,
    ) -> Option<LifecycleEvent> {
        let next = graph::next_stage(state.procedure, state.last_stage.as_ref(), draw)?;

        let mut amounts = Vec::with_capacity(1);
        if let Some(last) = state.last_amount {
            if draw.unit() < self.config.amount_change_probability {
                let importe = self.decreased_amount(last, draw);
                amounts.push(AmountEntry { importe, timestamp: now });
                state.last_amount = Some(importe);
            }
        }

        trace!(
            case = %case_ref,
            from = ?state.last_stage,
            to = %next,
            amount = ?state.last_amount,
            "case advanced"
        );
        state.last_stage = Some(next.clone());

        Some(LifecycleEvent {
            case_ref: case_ref.clone(),
            amounts,
            stages: vec![StageEntry { estado: next, timestamp: now }],
        })
    }

    /// Draws a decrease in `[1, min(max_decrease, floor(last))]`, floored at 0.
    fn decreased_amount<R: RandomSource + ?Sized>(&self, last: f64, draw: &mut R) -> f64 {
        if last <= 0.0 {
            return 0.0;
        }
        let bound = self.config.max_decrease.min(last.floor() as u64);
        if bound == 0 {
            // 0 < last < 1: the smallest whole decrease already reaches zero
            return 0.0;
        }
        let decrease = draw.range_inclusive(1, bound);
        (last - decrease as f64).max(0.0)
    }
}
