//! Counterexample trace extraction from solver models.

use std::fmt;

use vigil_ts::{term, TransitionSystem, Unroller};
use z3::ast::Dynamic;
use z3::Model;

/// Total assignment to the state and input variables at one step of a
/// counterexample trace.
#[derive(Debug, Clone)]
pub struct TraceStep {
    /// (variable, value) pairs; values are solver constants.
    pub assignments: Vec<(Dynamic, Dynamic)>,
}

impl TraceStep {
    /// Value assigned to the named variable, if present.
    pub fn value_of(&self, name: &str) -> Option<&Dynamic> {
        self.assignments
            .iter()
            .find(|(var, _)| term::symbol_name(var).as_deref() == Some(name))
            .map(|(_, val)| val)
    }
}

impl fmt::Display for TraceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (var, val) in &self.assignments {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            let name = term::symbol_name(var).unwrap_or_else(|| var.to_string());
            write!(f, "{name} = {val}")?;
        }
        Ok(())
    }
}

/// Extract a trace of `len + 1` steps from a model of an unrolled query,
/// evaluating the step-indexed copy of every state and input variable.
pub fn extract_trace(
    model: &Model,
    un: &mut Unroller,
    ts: &TransitionSystem,
    len: usize,
) -> Vec<TraceStep> {
    let mut trace = Vec::with_capacity(len + 1);
    for step in 0..=len {
        let mut assignments = Vec::new();
        for var in ts.state_vars().iter().chain(ts.input_vars()) {
            let timed = un.timed_var(var, step);
            if let Some(val) = model.eval(&timed, true) {
                assignments.push((var.clone(), val));
            }
        }
        trace.push(TraceStep { assignments });
    }
    trace
}

/// Extract a single-step trace over the (non-unrolled) current-state
/// variables, for violations found in the initial state.
pub fn state_from_model(model: &Model, ts: &TransitionSystem) -> Vec<TraceStep> {
    let mut assignments = Vec::new();
    for var in ts.state_vars().iter().chain(ts.input_vars()) {
        if let Some(val) = model.eval(var, true) {
            assignments.push((var.clone(), val));
        }
    }
    vec![TraceStep { assignments }]
}
