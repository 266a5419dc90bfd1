//! Bounded model checking: unroll the transition relation step by step and
//! look for a property violation at each depth.
//!
//! The solver context is persistent: step `i` adds `trans@(i-1)` on top of
//! what previous calls asserted, so `check_until` can be called repeatedly
//! with increasing bounds.

use tracing::info;
use vigil_ts::{Property, Unroller};
use z3::ast::Bool;
use z3::{SatResult, Solver};

use crate::witness::{extract_trace, TraceStep};
use crate::{apply_solver_timeout, CheckOptions, EngineResult, Prover, ProverResult};

pub struct Bmc {
    solver: Solver,
    property: Property,
    bad: Bool,
    un: Unroller,
    reached_k: isize,
    trace: Option<Vec<TraceStep>>,
    initialized: bool,
}

impl Bmc {
    pub fn new(property: Property, opts: &CheckOptions) -> Self {
        let solver = Solver::new();
        apply_solver_timeout(&solver, opts.timeout_ms);
        let bad = property.bad();
        let un = Unroller::new(property.ts());
        Bmc {
            solver,
            property,
            bad,
            un,
            reached_k: -1,
            trace: None,
            initialized: false,
        }
    }
}

impl Prover for Bmc {
    fn initialize(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        let init0 = self.un.at_time_bool(self.property.ts().init(), 0)?;
        self.solver.assert(&init0);
        self.initialized = true;
        Ok(())
    }

    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult> {
        self.initialize()?;
        info!(bound = k, "starting BMC");

        for i in 0..=k {
            if (i as isize) <= self.reached_k {
                continue;
            }
            if i > 0 {
                let trans = self.un.at_time_bool(self.property.ts().trans(), i - 1)?;
                self.solver.assert(&trans);
            }

            self.solver.push();
            let bad_i = self.un.at_time_bool(&self.bad, i)?;
            self.solver.assert(&bad_i);

            match self.solver.check() {
                SatResult::Sat => {
                    info!(depth = i, "violation found");
                    let model = self.solver.get_model().unwrap();
                    self.trace =
                        Some(extract_trace(&model, &mut self.un, self.property.ts(), i));
                    self.solver.pop(1);
                    return Ok(ProverResult::Unsafe);
                }
                SatResult::Unsat => {
                    self.solver.pop(1);
                }
                SatResult::Unknown => {
                    self.solver.pop(1);
                    info!(depth = i, "solver returned unknown");
                    return Ok(ProverResult::Unknown);
                }
            }
            self.reached_k = i as isize;
        }

        info!(bound = k, "no violation within bound");
        Ok(ProverResult::Safe)
    }

    fn witness(&self) -> Option<Vec<TraceStep>> {
        self.trace.clone()
    }
}
