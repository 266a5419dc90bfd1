//! Concrete replay of abstract counterexample chains.
//!
//! The abstracting IC3 strategies over-approximate predecessor cubes, so a
//! proof-goal chain reaching frame 0 is only a counterexample candidate.
//! Replaying the chain as a bounded-model-checking query settles it: every
//! conjunct (init, each transition step, each chain cube, bad) is guarded
//! by an assumption label, so an unsatisfiable replay yields a core whose
//! formulas — untimed — are the raw material for strengthening the
//! abstraction.

use tracing::debug;
use vigil_ts::{term, TransitionSystem, Unroller};
use z3::ast::{Bool, Dynamic};
use z3::{SatResult, Solver};

use crate::witness::{extract_trace, TraceStep};
use crate::{apply_solver_timeout, EngineError, EngineResult};

pub(crate) enum Replay {
    /// The chain is realisable; the trace is a concrete witness.
    Real(Vec<TraceStep>),
    /// Unrealisable. Carries the untimed formulas of the unsat core.
    Spurious(Vec<Dynamic>),
}

/// Replay `chain` (cube at position `t` constrains step `t`) against the
/// concrete system.
pub(crate) fn replay_chain(
    ts: &TransitionSystem,
    bad: &Bool,
    chain: &[Bool],
    timeout_ms: Option<u64>,
) -> EngineResult<Replay> {
    let solver = Solver::new();
    apply_solver_timeout(&solver, timeout_ms);
    let mut un = Unroller::new(ts);
    let len = chain.len().saturating_sub(1);

    let mut labelled: Vec<(Bool, Bool)> = Vec::new();
    let guard = |solver: &Solver, labelled: &mut Vec<(Bool, Bool)>, name: String, f: Bool| {
        let label = Bool::new_const(name);
        solver.assert(&label.implies(&f));
        labelled.push((label, f));
    };

    guard(
        &solver,
        &mut labelled,
        "__replay@init".to_string(),
        un.at_time_bool(ts.init(), 0)?,
    );
    for i in 0..len {
        guard(
            &solver,
            &mut labelled,
            format!("__replay@trans{i}"),
            un.at_time_bool(ts.trans(), i)?,
        );
    }
    for (t, cube) in chain.iter().enumerate() {
        guard(
            &solver,
            &mut labelled,
            format!("__replay@cube{t}"),
            un.at_time_bool(cube, t)?,
        );
    }
    guard(
        &solver,
        &mut labelled,
        "__replay@bad".to_string(),
        un.at_time_bool(bad, len)?,
    );

    let assumptions: Vec<Bool> = labelled.iter().map(|(l, _)| l.clone()).collect();
    match solver.check_assumptions(&assumptions) {
        SatResult::Sat => {
            let model = solver.get_model().unwrap();
            Ok(Replay::Real(extract_trace(&model, &mut un, ts, len)))
        }
        SatResult::Unsat => {
            let core: std::collections::HashSet<String> = solver
                .get_unsat_core()
                .iter()
                .map(|b| b.to_string())
                .collect();
            let mut formulas = Vec::new();
            for (label, f) in &labelled {
                if core.contains(&label.to_string()) {
                    formulas.push(un.untime(&Dynamic::from_ast(f)));
                }
            }
            debug!(core = formulas.len(), "counterexample chain is spurious");
            Ok(Replay::Spurious(formulas))
        }
        SatResult::Unknown => Err(EngineError::Solver(
            "solver returned unknown while replaying a counterexample".to_string(),
        )),
    }
}

/// Non-boolean subterms of the core formulas, for term abstractions.
pub(crate) fn mine_terms(ts: &TransitionSystem, formulas: &[Dynamic]) -> Vec<Dynamic> {
    let mut groups = std::collections::BTreeMap::new();
    for f in formulas {
        term::subterms_by_sort(f, &mut groups);
    }
    groups
        .into_values()
        .flatten()
        .filter(|t| ts.only_curr(t))
        .collect()
}
