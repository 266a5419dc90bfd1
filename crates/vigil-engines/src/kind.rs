//! k-induction with simple-path constraints.
//!
//! At each depth `i` the prover runs a base step and an inductive step.
//! The base step checks `init@0 ∧ trans@0..i-1 ∧ ¬prop@i`; SAT is a real
//! counterexample. After the check, `trans@i` and `prop@i` are asserted at
//! the outer context level and persist across depths. The inductive step
//! checks the accumulated simple-path constraint together with
//! `¬prop@(i+1)`; UNSAT proves the property. `init@0` is confined to the
//! base step's temporary push — with it in the persistent context the
//! inductive UNSAT would not generalise to suffixes of longer paths.
//!
//! The simple-path constraint requires the state at step `i` to differ
//! from the state at every earlier step, which restores completeness on
//! lasso-shaped systems.

use tracing::info;
use vigil_ts::{term, Property, Unroller};
use z3::ast::Bool;
use z3::{SatResult, Solver};

use crate::witness::{extract_trace, TraceStep};
use crate::{apply_solver_timeout, CheckOptions, EngineResult, Prover, ProverResult};

pub struct KInduction {
    solver: Solver,
    property: Property,
    bad: Bool,
    un: Unroller,
    simple_path: Bool,
    reached_k: isize,
    trace: Option<Vec<TraceStep>>,
    initialized: bool,
}

enum StepVerdict {
    Continue,
    Done(ProverResult),
}

impl KInduction {
    pub fn new(property: Property, opts: &CheckOptions) -> Self {
        let solver = Solver::new();
        apply_solver_timeout(&solver, opts.timeout_ms);
        let bad = property.bad();
        let un = Unroller::new(property.ts());
        KInduction {
            solver,
            property,
            bad,
            un,
            simple_path: Bool::from_bool(true),
            reached_k: -1,
            trace: None,
            initialized: false,
        }
    }

    fn base_step(&mut self, i: usize) -> EngineResult<StepVerdict> {
        if (i as isize) <= self.reached_k {
            return Ok(StepVerdict::Continue);
        }

        let init0 = self.un.at_time_bool(self.property.ts().init(), 0)?;
        let bad_i = self.un.at_time_bool(&self.bad, i)?;

        self.solver.push();
        self.solver.assert(&init0);
        self.solver.assert(&bad_i);
        let verdict = match self.solver.check() {
            SatResult::Sat => {
                info!(depth = i, "base case violation found");
                let model = self.solver.get_model().unwrap();
                self.trace = Some(extract_trace(&model, &mut self.un, self.property.ts(), i));
                Some(ProverResult::Unsafe)
            }
            SatResult::Unsat => None,
            SatResult::Unknown => {
                info!(depth = i, "solver returned unknown in base step");
                Some(ProverResult::Unknown)
            }
        };
        self.solver.pop(1);

        if let Some(v) = verdict {
            return Ok(StepVerdict::Done(v));
        }

        // These persist across depths: the next base step only needs to add
        // one more unrolling on top of them.
        let trans_i = self.un.at_time_bool(self.property.ts().trans(), i)?;
        let prop_i = self.un.at_time_bool(self.property.prop(), i)?;
        self.solver.assert(&trans_i);
        self.solver.assert(&prop_i);
        Ok(StepVerdict::Continue)
    }

    fn inductive_step(&mut self, i: usize) -> EngineResult<StepVerdict> {
        if (i as isize) <= self.reached_k {
            return Ok(StepVerdict::Continue);
        }

        for j in 0..i {
            let disj = self.simple_path_disjunct(i, j)?;
            self.simple_path = Bool::and(&[self.simple_path.clone(), disj]);
        }

        let bad_next = self.un.at_time_bool(&self.bad, i + 1)?;

        self.solver.push();
        self.solver.assert(&self.simple_path.clone());
        self.solver.assert(&bad_next);
        let verdict = match self.solver.check() {
            SatResult::Unsat => {
                info!(k = i, "property is k-inductive");
                Some(ProverResult::Safe)
            }
            SatResult::Sat => None,
            SatResult::Unknown => {
                info!(k = i, "solver returned unknown in inductive step");
                Some(ProverResult::Unknown)
            }
        };
        self.solver.pop(1);

        if let Some(v) = verdict {
            return Ok(StepVerdict::Done(v));
        }
        self.reached_k += 1;
        Ok(StepVerdict::Continue)
    }

    /// `⋁_{s ∈ S} s@i ≠ s@j`: the states at steps `i` and `j` differ.
    fn simple_path_disjunct(&mut self, i: usize, j: usize) -> EngineResult<Bool> {
        let mut disjuncts = Vec::new();
        let state_vars: Vec<_> = self.property.ts().state_vars().to_vec();
        for s in &state_vars {
            let si = self.un.timed_var(s, i);
            let sj = self.un.timed_var(s, j);
            if let Some(eq) = term::mk_eq(&si, &sj) {
                disjuncts.push(eq.not());
            }
        }
        Ok(term::disjoin(&disjuncts))
    }
}

impl Prover for KInduction {
    fn initialize(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        self.reached_k = -1;
        self.simple_path = Bool::from_bool(true);
        self.initialized = true;
        Ok(())
    }

    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult> {
        self.initialize()?;
        info!(bound = k, "starting k-induction");

        for i in 0..=k {
            if let StepVerdict::Done(v) = self.base_step(i)? {
                return Ok(v);
            }
            if let StepVerdict::Done(v) = self.inductive_step(i)? {
                return Ok(v);
            }
        }
        info!(bound = k, "no verdict within bound");
        Ok(ProverResult::Unknown)
    }

    fn witness(&self) -> Option<Vec<TraceStep>> {
        self.trace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_ts::TransitionSystem;
    use z3::ast::{Dynamic, BV};
    use z3::Sort;

    /// Flip-flopping pair of latches, never equal.
    fn mutex_latches() -> Property {
        let mut ts = TransitionSystem::new_relational();
        let a = ts.make_state_var("a", &Sort::bool()).unwrap();
        let b = ts.make_state_var("b", &Sort::bool()).unwrap();
        let (ab, bb) = (a.as_bool().unwrap(), b.as_bool().unwrap());
        ts.set_init(Bool::and(&[ab.clone(), bb.not()])).unwrap();
        ts.assign_next(&a, &Dynamic::from_ast(&ab.not())).unwrap();
        ts.assign_next(&b, &Dynamic::from_ast(&bb.not())).unwrap();
        let prop = ab.eq(&bb).not();
        Property::new(ts, prop).unwrap()
    }

    #[test]
    fn proves_mutex_latches() {
        let mut kind = KInduction::new(mutex_latches(), &CheckOptions::default());
        assert_eq!(kind.check_until(2).unwrap(), ProverResult::Safe);
    }

    #[test]
    fn simple_path_constraint_discriminates_states() {
        let p = mutex_latches();
        let mut kind = KInduction::new(p, &CheckOptions::default());
        let disj = kind.simple_path_disjunct(1, 0).unwrap();

        // A run where both steps carry the same state falsifies the
        // disjunct; differing states satisfy it.
        let solver = Solver::new();
        solver.push();
        let a0 = Bool::new_const("a@0");
        let a1 = Bool::new_const("a@1");
        let b0 = Bool::new_const("b@0");
        let b1 = Bool::new_const("b@1");
        solver.assert(&a0.eq(&a1));
        solver.assert(&b0.eq(&b1));
        solver.assert(&disj);
        assert_eq!(solver.check(), SatResult::Unsat);
        solver.pop(1);

        solver.push();
        solver.assert(&a0.eq(&a1).not());
        solver.assert(&disj);
        assert_eq!(solver.check(), SatResult::Sat);
        solver.pop(1);
    }

    /// Wrap-around counter: UNSAFE, and the base step needs the simple-path
    /// constraint to keep the inductive step from concluding early.
    #[test]
    fn wraparound_counter_found_at_depth_four() {
        let mut ts = TransitionSystem::new_functional();
        let x = ts.make_state_var("x", &Sort::bitvector(3)).unwrap();
        let xb = x.as_bv().unwrap();
        ts.set_init(xb.eq(&BV::from_u64(0, 3))).unwrap();
        let wrapped = xb
            .eq(&BV::from_u64(7, 3))
            .ite(&BV::from_u64(0, 3), &xb.bvadd(&BV::from_u64(1, 3)));
        ts.assign_next(&x, &Dynamic::from_ast(&wrapped)).unwrap();
        let prop = xb.eq(&BV::from_u64(4, 3)).not();
        let property = Property::new(ts, prop).unwrap();

        let mut kind = KInduction::new(property, &CheckOptions::default());
        assert_eq!(kind.check_until(6).unwrap(), ProverResult::Unsafe);
        let trace = kind.witness().unwrap();
        assert_eq!(trace.len(), 5);
    }
}
