//! Procedure State Graph
//! =====================
//!
//! Static transition table per procedure type. Each row maps
//! `(procedure, current stage)` to a set of weighted branches; a branch with
//! `next: None` means "no further stage" and closes the case.
//!
//! ```text
//! Verbal:    Demanda -> Contestación -> [Vista 40%] -> Sentencia
//!            -> [Recurso 20%] -> Oposición a recurso -> Sentencia definitiva
//!
//! Ordinario: Demanda -> Contestación -> Audiencia Previa -> [Juicio 20%]
//!            -> Sentencia -> [Recurso 20%] -> Oposición a recurso
//!            -> Sentencia definitiva
//! ```
//!
//! The graph holds no state and no RNG: forks consume exactly one unit draw
//! from the caller's [`RandomSource`]; deterministic rows consume none.

use crate::draw::RandomSource;
use crate::model::{ProcedureType, Stage};

/// Chance of a hearing (`Vista`) after `Contestación` in verbal proceedings.
pub const PROB_VISTA_VERBAL: f64 = 0.40;

/// Chance of a trial (`Juicio`) after `Audiencia Previa` in ordinary proceedings.
pub const PROB_JUICIO_ORDINARIO: f64 = 0.20;

/// Chance of an appeal (`Recurso`) after the first-instance `Sentencia`.
pub const PROB_RECURSO: f64 = 0.20;

/// One weighted outcome of a transition row.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub probability: f64,
    pub next: Option<Stage>,
}

const START: &[Branch] = &[Branch { probability: 1.0, next: Some(Stage::Demanda) }];
const TO_CONTESTACION: &[Branch] = &[Branch { probability: 1.0, next: Some(Stage::Contestacion) }];
const TO_AUDIENCIA_PREVIA: &[Branch] = &[Branch { probability: 1.0, next: Some(Stage::AudienciaPrevia) }];
const TO_SENTENCIA: &[Branch] = &[Branch { probability: 1.0, next: Some(Stage::Sentencia) }];
const TO_OPOSICION: &[Branch] = &[Branch { probability: 1.0, next: Some(Stage::OposicionRecurso) }];
const TO_SENTENCIA_DEFINITIVA: &[Branch] =
    &[Branch { probability: 1.0, next: Some(Stage::SentenciaDefinitiva) }];
const CLOSED: &[Branch] = &[];

const VERBAL_AFTER_CONTESTACION: &[Branch] = &[
    Branch { probability: PROB_VISTA_VERBAL, next: Some(Stage::Vista) },
    Branch { probability: 1.0 - PROB_VISTA_VERBAL, next: Some(Stage::Sentencia) },
];

const ORDINARIO_AFTER_AUDIENCIA: &[Branch] = &[
    Branch { probability: PROB_JUICIO_ORDINARIO, next: Some(Stage::Juicio) },
    Branch { probability: 1.0 - PROB_JUICIO_ORDINARIO, next: Some(Stage::Sentencia) },
];

const AFTER_SENTENCIA: &[Branch] = &[
    Branch { probability: PROB_RECURSO, next: Some(Stage::Recurso) },
    Branch { probability: 1.0 - PROB_RECURSO, next: None },
];

/// Returns the transition row for a case. `current = None` is "not started".
pub fn branches(procedure: ProcedureType, current: Option<&Stage>) -> &'static [Branch] {
    use ProcedureType::{Ordinario, Verbal};

    let Some(stage) = current else {
        return START;
    };

    match (procedure, stage) {
        (_, Stage::Demanda) => TO_CONTESTACION,
        (Verbal, Stage::Contestacion) => VERBAL_AFTER_CONTESTACION,
        (Verbal, Stage::Vista) => TO_SENTENCIA,
        (Ordinario, Stage::Contestacion) => TO_AUDIENCIA_PREVIA,
        (Ordinario, Stage::AudienciaPrevia) => ORDINARIO_AFTER_AUDIENCIA,
        (Ordinario, Stage::Juicio) => TO_SENTENCIA,
        (_, Stage::Sentencia) => AFTER_SENTENCIA,
        (_, Stage::Recurso) => TO_OPOSICION,
        (_, Stage::OposicionRecurso) => TO_SENTENCIA_DEFINITIVA,
        // Sentencia definitiva, stages foreign to this procedure, unknown labels
        _ => CLOSED,
    }
}

/// Resolves the next stage, or `None` when the case is closed.
pub fn next_stage<R: RandomSource + ?Sized>(
    procedure: ProcedureType,
    current: Option<&Stage>,
    draw: &mut R,
) -> Option<Stage> {
    match branches(procedure, current) {
        [] => None,
        [only] => only.next.clone(),
        forks => {
            let roll = draw.unit();
            let mut cumulative = 0.0;
            for branch in forks {
                cumulative += branch.probability;
                if roll < cumulative {
                    return branch.next.clone();
                }
            }
            // Rounding slack in the cumulative sum
            forks.last().and_then(|branch| branch.next.clone())
        }
    }
}

/// Stages reachable in one step from `current`.
pub fn successors(procedure: ProcedureType, current: Option<&Stage>) -> Vec<Stage> {
    branches(procedure, current)
        .iter()
        .filter_map(|branch| branch.next.clone())
        .collect()
}

/// True if `from -> to` is an edge of the procedure's graph.
pub fn is_valid_edge(procedure: ProcedureType, from: Option<&Stage>, to: &Stage) -> bool {
    branches(procedure, from)
        .iter()
        .any(|branch| branch.next.as_ref() == Some(to))
}

/// True if no draw can produce a further stage.
pub fn is_terminal(procedure: ProcedureType, current: Option<&Stage>) -> bool {
    branches(procedure, current)
        .iter()
        .all(|branch| branch.next.is_none())
}

/// True if the stages, in order, form a walk from the entry stage.
pub fn is_valid_walk<'a>(procedure: ProcedureType, walk: impl IntoIterator<Item = &'a Stage>) -> bool {
    let mut previous: Option<&Stage> = None;
    for stage in walk {
        if !is_valid_edge(procedure, previous, stage) {
            return false;
        }
        previous = Some(stage);
    }
    true
}
