//! CEGAR with value abstraction: replace constant values by frozen
//! symbolic variables, verify with an inner engine, and refine spurious
//! counterexamples by pinning values back with unsat-core-selected lemmas.
//!
//! Abstraction walks init, trans and the property in post-order. Every
//! non-array value literal becomes a fresh frozen state variable
//! (`next(v) = v`), and operator applications are rebuilt with the
//! abstracted children — except under non-linearising operators
//! (multiplication, division, remainder, power), where substituting a
//! variable for a constant would take the formula outside the linear
//! fragment, so the original subterm is kept.
//!
//! Refinement builds a bounded replay of the abstract counterexample in a
//! second solver, with one assumption label per `variable = value`
//! equality (frozen variables only need step 0). An unsatisfiable replay
//! means the trace is spurious; the labels in the unsat core identify the
//! value equalities to re-impose, which are added as constraints on the
//! abstract system. A satisfiable replay is a concrete counterexample.

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};
use vigil_ts::{term, Property, TransitionSystem, Unroller};
use z3::ast::{Ast, Bool, Dynamic};
use z3::{AstKind, DeclKind, SatResult, Solver, SortKind};

use crate::witness::{extract_trace, TraceStep};
use crate::{
    apply_solver_timeout, CheckOptions, EngineError, EngineResult, Prover, ProverResult,
};

/// Operators under which a constant must not be replaced by a variable.
fn is_nonlinearising(kind: DeclKind) -> bool {
    matches!(
        kind,
        DeclKind::MUL
            | DeclKind::DIV
            | DeclKind::MOD
            | DeclKind::POWER
            | DeclKind::IDIV
            | DeclKind::BMUL
            | DeclKind::BUDIV
            | DeclKind::BSDIV
            | DeclKind::BUREM
            | DeclKind::BSREM
            | DeclKind::BSMOD
    )
}

/// Post-order walker replacing value literals with frozen variables.
struct ValueAbstractor {
    cache: HashMap<String, Dynamic>,
    by_value: HashMap<String, Dynamic>,
    /// (frozen variable, original value)
    to_vals: Vec<(Dynamic, Dynamic)>,
}

impl ValueAbstractor {
    fn new() -> Self {
        ValueAbstractor {
            cache: HashMap::new(),
            by_value: HashMap::new(),
            to_vals: Vec::new(),
        }
    }

    fn visit(&mut self, ts: &mut TransitionSystem, t: &Dynamic) -> EngineResult<Dynamic> {
        let key = t.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.clone());
        }

        let result = if term::is_value(t) && t.get_sort().kind() != SortKind::Array {
            match self.by_value.get(&key) {
                Some(var) => var.clone(),
                None => {
                    let var = ts.make_state_var(&format!("__abs_{key}"), &t.get_sort())?;
                    self.by_value.insert(key.clone(), var.clone());
                    self.to_vals.push((var.clone(), t.clone()));
                    var
                }
            }
        } else if t.kind() == AstKind::App && !t.children().is_empty() {
            let children = t.children();
            let mut rebuilt = Vec::with_capacity(children.len());
            for c in &children {
                rebuilt.push(self.visit(ts, c)?);
            }
            if is_nonlinearising(t.decl().kind()) {
                t.clone()
            } else {
                let args: Vec<&dyn Ast> = rebuilt.iter().map(|c| c as &dyn Ast).collect();
                t.decl().apply(&args)
            }
        } else {
            t.clone()
        };

        self.cache.insert(key, result.clone());
        Ok(result)
    }
}

/// Caching bottom-up term rebuilder; the transfer point between the
/// prover's solver and the refinement solver.
struct TermTranslator {
    cache: HashMap<String, Dynamic>,
}

impl TermTranslator {
    fn new() -> Self {
        TermTranslator { cache: HashMap::new() }
    }

    fn transfer(&mut self, t: &Dynamic) -> Dynamic {
        let key = t.to_string();
        if let Some(cached) = self.cache.get(&key) {
            return cached.clone();
        }
        let result = if t.kind() == AstKind::App && !t.children().is_empty() {
            let children: Vec<Dynamic> =
                t.children().iter().map(|c| self.transfer(c)).collect();
            let args: Vec<&dyn Ast> = children.iter().map(|c| c as &dyn Ast).collect();
            t.decl().apply(&args)
        } else {
            t.clone()
        };
        self.cache.insert(key, result.clone());
        result
    }
}

/// Builds the inner prover for the (abstracted) property.
pub type InnerFactory = Box<dyn Fn(Property, &CheckOptions) -> Box<dyn Prover>>;

enum Refinement {
    Real(Vec<TraceStep>),
    /// Core-selected value equalities, not yet applied to the system.
    Pending(Vec<Bool>),
    Lemmas(usize),
    Stuck,
}

pub struct CegarValues {
    property: Property,
    opts: CheckOptions,
    inner: InnerFactory,
    abs_ts: Option<TransitionSystem>,
    abs_prop: Option<Bool>,
    /// (assumption label, frozen variable, original value)
    labels: Vec<(Bool, Dynamic, Dynamic)>,
    lemmas: HashSet<String>,
    refine_solver: Solver,
    translator: TermTranslator,
    trace: Option<Vec<TraceStep>>,
    initialized: bool,
}

impl CegarValues {
    pub fn new(property: Property, opts: &CheckOptions, inner: InnerFactory) -> Self {
        let refine_solver = Solver::new();
        apply_solver_timeout(&refine_solver, opts.timeout_ms);
        CegarValues {
            property,
            opts: opts.clone(),
            inner,
            abs_ts: None,
            abs_prop: None,
            labels: Vec::new(),
            lemmas: HashSet::new(),
            refine_solver,
            translator: TermTranslator::new(),
            trace: None,
            initialized: false,
        }
    }

    /// The standard instantiation: predicate IC3 as the inner engine.
    pub fn with_predicate_ic3(property: Property, opts: &CheckOptions) -> Self {
        Self::new(
            property,
            opts,
            Box::new(|p, o| Box::new(crate::ic3::Ic3::predicate(p, o))),
        )
    }

    fn cegar_abstract(&mut self) -> EngineResult<()> {
        let mut abs_ts = self.property.ts().clone();
        let mut va = ValueAbstractor::new();

        let init = Dynamic::from_ast(self.property.ts().init());
        let trans = Dynamic::from_ast(self.property.ts().trans());
        let prop = Dynamic::from_ast(self.property.prop());

        let init_a = va.visit(&mut abs_ts, &init)?;
        let trans_a = va.visit(&mut abs_ts, &trans)?;
        let prop_a = va.visit(&mut abs_ts, &prop)?;

        let as_bool = |t: &Dynamic| {
            t.as_bool().ok_or_else(|| {
                EngineError::Internal("abstraction changed the sort of a formula".to_string())
            })
        };
        abs_ts.set_init(as_bool(&init_a)?)?;
        abs_ts.set_trans(as_bool(&trans_a)?)?;
        for (var, _) in &va.to_vals {
            abs_ts.assign_next(var, var)?;
        }

        debug!(values = va.to_vals.len(), "abstracted value literals");
        for (var, val) in &va.to_vals {
            let name = term::symbol_name(var).unwrap_or_default();
            let label = Bool::new_const(format!("__assump_{name}"));
            self.labels.push((label, var.clone(), val.clone()));
        }

        self.abs_ts = Some(abs_ts);
        self.abs_prop = Some(as_bool(&prop_a)?);
        Ok(())
    }

    fn abs_property(&self) -> EngineResult<Property> {
        let (Some(ts), Some(prop)) = (&self.abs_ts, &self.abs_prop) else {
            return Err(EngineError::Internal(
                "abstraction queried before initialization".to_string(),
            ));
        };
        Ok(Property::new(ts.clone(), prop.clone())?)
    }

    /// Replay an abstract counterexample of the given length with every
    /// value equality assumed, and decide real vs. spurious.
    fn refine(&mut self, len: usize) -> EngineResult<Refinement> {
        let abs_property = self.abs_property()?;
        let ts = abs_property.ts();
        let bad = abs_property.bad();
        let mut un = Unroller::new(ts);

        let mut form = un.at_time_bool(ts.init(), 0)?;
        for i in 0..len {
            form = Bool::and(&[form, un.at_time_bool(ts.trans(), i)?]);
        }
        form = Bool::and(&[form, un.at_time_bool(&bad, len)?]);

        self.refine_solver.push();
        let transferred = self.translator.transfer(&Dynamic::from_ast(&form));
        let Some(transferred) = transferred.as_bool() else {
            self.refine_solver.pop(1);
            return Err(EngineError::Internal(
                "translated replay formula is not boolean".to_string(),
            ));
        };
        self.refine_solver.assert(&transferred);

        let mut assumptions = Vec::new();
        let mut curr_eqs = Vec::new();
        for (label, var, val) in &self.labels {
            let Some(eq) = term::mk_eq(var, val) else {
                self.refine_solver.pop(1);
                return Err(EngineError::Internal(
                    "abstracted value and its variable have different sorts".to_string(),
                ));
            };
            // frozen variables: constraining step 0 constrains every step
            let eq0 = un.at_time_bool(&eq, 0)?;
            let eq0 = self.translator.transfer(&Dynamic::from_ast(&eq0));
            if let Some(eq0) = eq0.as_bool() {
                self.refine_solver.assert(&label.implies(&eq0));
            }
            assumptions.push(label.clone());
            curr_eqs.push(eq);
        }

        let outcome = match self.refine_solver.check_assumptions(&assumptions) {
            SatResult::Sat => {
                let model = self.refine_solver.get_model().unwrap();
                let trace = extract_trace(&model, &mut un, self.property.ts(), len);
                Refinement::Real(trace)
            }
            SatResult::Unsat => {
                let core: HashSet<String> = self
                    .refine_solver
                    .get_unsat_core()
                    .iter()
                    .map(|b| b.to_string())
                    .collect();
                let mut new_lemmas = Vec::new();
                for ((label, var, val), eq) in self.labels.iter().zip(&curr_eqs) {
                    if !core.contains(&label.to_string()) {
                        continue;
                    }
                    if self.lemmas.insert(format!("{var} = {val}")) {
                        new_lemmas.push(eq.clone());
                    }
                }
                Refinement::Pending(new_lemmas)
            }
            SatResult::Unknown => {
                self.refine_solver.pop(1);
                return Err(EngineError::Solver(
                    "solver returned unknown during CEGAR refinement".to_string(),
                ));
            }
        };
        self.refine_solver.pop(1);

        if let Refinement::Pending(new_lemmas) = outcome {
            if new_lemmas.is_empty() {
                return Ok(Refinement::Stuck);
            }
            let count = new_lemmas.len();
            if let Some(ts) = self.abs_ts.as_mut() {
                for eq in &new_lemmas {
                    ts.add_constraint(eq)?;
                }
            }
            return Ok(Refinement::Lemmas(count));
        }
        Ok(outcome)
    }

    fn run(&mut self, k: usize) -> EngineResult<ProverResult> {
        self.initialize()?;
        loop {
            let mut inner = (self.inner)(self.abs_property()?, &self.opts);
            inner.initialize()?;
            match inner.check_until(k)? {
                ProverResult::Safe => return Ok(ProverResult::Safe),
                ProverResult::Unknown => return Ok(ProverResult::Unknown),
                ProverResult::Unsafe => {
                    let abs_trace = inner.witness().ok_or_else(|| {
                        EngineError::Internal(
                            "inner prover reported unsafe without a witness".to_string(),
                        )
                    })?;
                    let len = abs_trace.len().saturating_sub(1);
                    match self.refine(len)? {
                        Refinement::Real(trace) => {
                            info!(length = len, "counterexample is concrete");
                            self.trace = Some(trace);
                            return Ok(ProverResult::Unsafe);
                        }
                        Refinement::Lemmas(added) => {
                            info!(added, length = len, "spurious trace, lemmas added");
                        }
                        Refinement::Pending(_) => {
                            return Err(EngineError::Internal(
                                "unapplied refinement lemmas escaped".to_string(),
                            ));
                        }
                        Refinement::Stuck => {
                            info!("refinement made no progress, reporting unknown");
                            return Ok(ProverResult::Unknown);
                        }
                    }
                }
            }
        }
    }
}

impl Prover for CegarValues {
    fn initialize(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        if self.property.ts().is_functional() {
            return Err(EngineError::NotImplemented(
                "value abstraction for functional transition systems".to_string(),
            ));
        }
        self.cegar_abstract()?;
        self.initialized = true;
        Ok(())
    }

    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult> {
        info!(bound = k, "starting value-abstraction CEGAR");
        match self.run(k) {
            Ok(v) => Ok(v),
            Err(EngineError::Solver(reason)) => {
                info!(reason = %reason, "solver failure, reporting unknown");
                Ok(ProverResult::Unknown)
            }
            Err(e) => Err(e),
        }
    }

    fn witness(&self) -> Option<Vec<TraceStep>> {
        self.trace.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use z3::ast::BV;
    use z3::Sort;

    /// x' = x + 1, y' = y + 2, invariant y = 2x.
    fn lockstep() -> Property {
        let mut ts = TransitionSystem::new_relational();
        let x = ts.make_state_var("x", &Sort::bitvector(8)).unwrap();
        let y = ts.make_state_var("y", &Sort::bitvector(8)).unwrap();
        let (xb, yb) = (x.as_bv().unwrap(), y.as_bv().unwrap());
        ts.set_init(Bool::and(&[
            xb.eq(&BV::from_u64(0, 8)),
            yb.eq(&BV::from_u64(0, 8)),
        ]))
        .unwrap();
        ts.assign_next(&x, &Dynamic::from_ast(&xb.bvadd(&BV::from_u64(1, 8))))
            .unwrap();
        ts.assign_next(&y, &Dynamic::from_ast(&yb.bvadd(&BV::from_u64(2, 8))))
            .unwrap();
        let prop = yb.eq(&BV::from_u64(2, 8).bvmul(&xb));
        Property::new(ts, prop).unwrap()
    }

    #[test]
    fn abstraction_freezes_values_and_skips_multiplication() {
        let mut cegar =
            CegarValues::with_predicate_ic3(lockstep(), &CheckOptions::default());
        cegar.initialize().unwrap();

        // three distinct values (0, 1, 2) were frozen
        assert_eq!(cegar.labels.len(), 3);

        let abs_ts = cegar.abs_ts.as_ref().unwrap();
        assert!(abs_ts.trans().to_string().contains("__abs_"));
        // every frozen variable keeps its value across steps
        for (_, var, _) in &cegar.labels {
            let name = term::symbol_name(var).unwrap();
            assert!(abs_ts.trans().to_string().contains(&format!("{name}.next")));
        }

        // the multiplication kept its literal operand: the property is
        // structurally unchanged
        let abs_prop = cegar.abs_prop.as_ref().unwrap();
        assert!(abs_prop.to_string().contains("bvmul"));
        assert!(!abs_prop.to_string().contains("__abs_"));
    }

    #[test]
    fn translator_rebuilds_and_caches() {
        let mut tr = TermTranslator::new();
        let x = BV::new_const("x", 8);
        let t = Dynamic::from_ast(&x.bvadd(&BV::from_u64(1, 8)).eq(&x));
        let a = tr.transfer(&t);
        let b = tr.transfer(&t);
        assert_eq!(a.to_string(), t.to_string());
        assert_eq!(a.to_string(), b.to_string());
    }

    #[test]
    fn functional_systems_are_not_implemented() {
        let mut ts = TransitionSystem::new_functional();
        let x = ts.make_state_var("x", &Sort::bool()).unwrap();
        let xb = x.as_bool().unwrap();
        ts.set_init(xb.clone()).unwrap();
        ts.assign_next(&x, &x).unwrap();
        let property = Property::new(ts, xb).unwrap();

        let mut cegar =
            CegarValues::with_predicate_ic3(property, &CheckOptions::default());
        assert!(matches!(
            cegar.initialize(),
            Err(EngineError::NotImplemented(_))
        ));
    }
}
