//! Structural cone-of-influence analysis.
//!
//! Given seed terms, compute the set of state variables that can affect
//! them: the variables of the seeds, closed transitively under the
//! defining expressions of a functional system. Relational systems have no
//! per-variable defining expressions, so the closure degrades to every
//! state variable mentioned by the transition relation — conservative, and
//! only used to restrict generalisation.

use std::collections::HashSet;

use z3::ast::Dynamic;

use crate::term;
use crate::TransitionSystem;

/// Names of the state variables in the structural cone of influence of
/// `seeds`.
pub fn statevars_in_coi(ts: &TransitionSystem, seeds: &[Dynamic]) -> HashSet<String> {
    let state_names: HashSet<String> = ts
        .state_vars()
        .iter()
        .filter_map(term::symbol_name)
        .collect();

    let mut coi: HashSet<String> = HashSet::new();
    let mut worklist: Vec<String> = Vec::new();
    for seed in seeds {
        for name in term::free_symbol_names(seed) {
            if state_names.contains(&name) && coi.insert(name.clone()) {
                worklist.push(name);
            }
        }
    }

    if !ts.is_functional() {
        let trans = Dynamic::from_ast(ts.trans());
        for name in term::free_symbol_names(&trans) {
            let base = name.strip_suffix(".next").unwrap_or(&name).to_string();
            if state_names.contains(&base) {
                coi.insert(base);
            }
        }
        return coi;
    }

    while let Some(name) = worklist.pop() {
        let Some(update) = ts.update_of(&name) else { continue };
        for dep in term::free_symbol_names(update) {
            if state_names.contains(&dep) && coi.insert(dep.clone()) {
                worklist.push(dep);
            }
        }
    }
    coi
}

/// True iff every free symbol of `t` is inside `keep`.
pub fn in_projection(t: &Dynamic, keep: &HashSet<String>) -> bool {
    term::free_symbol_names(t).is_subset(keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::Bool;
    use z3::Sort;

    #[test]
    fn functional_coi_follows_update_chain() {
        let mut ts = TransitionSystem::new_functional();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let y = ts.make_state_var("y", &Sort::bool()).unwrap();
        let z = ts.make_state_var("z", &Sort::bool()).unwrap();
        let w = ts.make_state_var("w", &Sort::bool()).unwrap();

        // x' = y, y' = z, z' = z, w' = w
        ts.assign_next(&x, &y).unwrap();
        ts.assign_next(&y, &z).unwrap();
        ts.assign_next(&z, &z).unwrap();
        ts.assign_next(&w, &w).unwrap();

        let coi = statevars_in_coi(&ts, &[x.clone()]);
        assert!(coi.contains("x"));
        assert!(coi.contains("y"));
        assert!(coi.contains("z"));
        assert!(!coi.contains("w"));
    }

    #[test]
    fn projection_membership() {
        let mut ts = TransitionSystem::new_functional();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let keep: HashSet<String> = HashSet::from(["x".to_string()]);
        assert!(in_projection(&x, &keep));
        let y = Bool::new_const("y");
        assert!(!in_projection(&Dynamic::from_ast(&y), &keep));
    }
}
