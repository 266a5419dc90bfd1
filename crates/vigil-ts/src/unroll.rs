//! The unroller: time-indexed copies of transition-system formulas.
//!
//! `at_time(t, i)` replaces every state variable `s` by a fresh symbol
//! `s@i`, every primed variable `next(s)` by `s@(i+1)`, and every input `v`
//! by `v@i`. Timed copies are cached, so equal symbols at equal steps are
//! the identical term.

use std::collections::HashMap;

use thiserror::Error;
use z3::ast::{Ast, Bool, Dynamic};
use z3::FuncDecl;

use crate::term;
use crate::TransitionSystem;

/// The term mentions a symbol that is not a state, input, or primed-state
/// variable of the associated transition system.
#[derive(Debug, Error)]
#[error("cannot unroll term over unknown symbol '{0}'")]
pub struct UnrollError(pub String);

enum VarRole {
    /// state or input variable, indexed at the requested step
    Current(Dynamic),
    /// primed state variable, indexed at step + 1
    Next(Dynamic),
}

pub struct Unroller {
    /// variable name -> (base variable, role)
    vars: HashMap<String, VarRole>,
    /// (base variable name, step) -> timed copy
    cache: HashMap<(String, usize), Dynamic>,
}

impl Unroller {
    pub fn new(ts: &TransitionSystem) -> Self {
        let mut vars = HashMap::new();
        for v in ts.state_vars().iter().chain(ts.input_vars()) {
            if let Some(name) = term::symbol_name(v) {
                vars.insert(name, VarRole::Current(v.clone()));
            }
        }
        for (s, n) in ts.state_vars().iter().zip(ts.next_vars()) {
            if let Some(name) = term::symbol_name(n) {
                vars.insert(name, VarRole::Next(s.clone()));
            }
        }
        Unroller { vars, cache: HashMap::new() }
    }

    /// The step-`k` copy of a current-state or input variable.
    pub fn timed_var(&mut self, var: &Dynamic, k: usize) -> Dynamic {
        let name = term::symbol_name(var).unwrap_or_else(|| var.to_string());
        self.cache
            .entry((name.clone(), k))
            .or_insert_with(|| {
                FuncDecl::new(format!("{name}@{k}"), &[], &var.get_sort()).apply(&[])
            })
            .clone()
    }

    /// Rewrite `t` over step-`k` (and step-`k+1` for primed) copies.
    pub fn at_time<A: Ast>(&mut self, t: &A, k: usize) -> Result<A, UnrollError> {
        let free = term::free_symbols(&Dynamic::from_ast(t));
        let mut pairs: Vec<(Dynamic, Dynamic)> = Vec::new();
        for sym in free {
            let name = term::symbol_name(&sym).unwrap_or_default();
            match self.vars.get(&name) {
                Some(VarRole::Current(base)) => {
                    let base = base.clone();
                    let timed = self.timed_var(&base, k);
                    pairs.push((sym, timed));
                }
                Some(VarRole::Next(base)) => {
                    let base = base.clone();
                    let timed = self.timed_var(&base, k + 1);
                    pairs.push((sym, timed));
                }
                None => return Err(UnrollError(name)),
            }
        }
        let refs: Vec<(&Dynamic, &Dynamic)> = pairs.iter().map(|(a, b)| (a, b)).collect();
        Ok(t.substitute(&refs))
    }

    /// Convenience: unroll a boolean formula.
    pub fn at_time_bool(&mut self, t: &Bool, k: usize) -> Result<Bool, UnrollError> {
        self.at_time(t, k)
    }

    /// Rewrite every timed variable in `t` back to its base (current-state
    /// or input) variable, discarding the step index.
    pub fn untime<A: Ast>(&self, t: &A) -> A {
        let mut pairs: Vec<(Dynamic, Dynamic)> = Vec::new();
        for ((name, _), timed) in &self.cache {
            if let Some(VarRole::Current(base)) = self.vars.get(name) {
                pairs.push((timed.clone(), base.clone()));
            }
        }
        let refs: Vec<(&Dynamic, &Dynamic)> = pairs.iter().map(|(a, b)| (a, b)).collect();
        t.substitute(&refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TransitionSystem;
    use z3::ast::BV;
    use z3::Sort;

    fn latch() -> TransitionSystem {
        let mut ts = TransitionSystem::new_relational();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let i = ts.make_input_var("i", &Sort::bool()).unwrap();
        let xn = ts.next(&x);
        ts.set_trans(xn.as_bool().unwrap().eq(&i.as_bool().unwrap()))
            .unwrap();
        ts
    }

    #[test]
    fn repeated_calls_return_identical_terms() {
        let ts = latch();
        let mut un = Unroller::new(&ts);
        let x = ts.state_vars()[0].clone();
        let a = un.timed_var(&x, 2);
        let b = un.timed_var(&x, 2);
        assert_eq!(a.to_string(), b.to_string());
        assert_eq!(un.cache.len(), 1);
    }

    #[test]
    fn trans_references_adjacent_steps() {
        let ts = latch();
        let mut un = Unroller::new(&ts);
        let unrolled = un.at_time_bool(ts.trans(), 3).unwrap();
        let printed = unrolled.to_string();
        assert!(printed.contains("x@4"));
        assert!(printed.contains("i@3"));
        assert!(!printed.contains("x.next"));
    }

    #[test]
    fn foreign_symbol_is_an_error() {
        let ts = latch();
        let mut un = Unroller::new(&ts);
        let foreign = BV::new_const("w", 4);
        let t = foreign.eq(&BV::from_u64(0, 4));
        assert!(un.at_time_bool(&t, 0).is_err());
    }

    #[test]
    fn untime_inverts_current_state_indexing() {
        let ts = latch();
        let mut un = Unroller::new(&ts);
        let x = ts.state_vars()[0].clone();
        let timed = un.timed_var(&x, 5);
        let back = un.untime(&timed);
        assert_eq!(back.to_string(), x.to_string());
    }
}
