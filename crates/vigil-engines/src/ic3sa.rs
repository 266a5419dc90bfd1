//! IC3 with syntax-guided abstraction: frame units are cubes of equality
//! literals over a term abstraction harvested from the system's own
//! subterms.
//!
//! The term abstraction groups the non-boolean subterms of init, trans and
//! the bad predicate by sort; satisfying models induce equivalence classes
//! over those terms (equal value, same sort), and predecessor cubes are
//! synthesised as pairwise equalities within a class plus disequalities
//! between class representatives. Generalisation literals are restricted
//! to the structural cone of influence of the target cube.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info};
use vigil_ts::coi::{in_projection, statevars_in_coi};
use vigil_ts::{term, Property, TransitionSystem};
use z3::ast::{Ast, Bool, Dynamic};
use z3::{AstKind, DeclKind, Model, SortKind};

use crate::ic3::{Ic3, Ic3Strategy, Ic3Unit, RefineOutcome, UnitHandler};
use crate::refine::{mine_terms, replay_chain, Replay};
use crate::{CheckOptions, EngineError, EngineResult};

/// Build the syntax-guided IC3 engine.
pub fn syntax_guided(property: Property, opts: &CheckOptions) -> Ic3 {
    Ic3::with_parts(
        property,
        opts,
        Box::new(EqCubeHandler),
        Box::new(SaStrategy::default()),
    )
}

/// True iff `t` is an equality/disequality literal or a boolean symbol,
/// possibly negated.
fn is_eq_lit(t: &Bool) -> bool {
    let stripped = term::smart_not(t);
    let d = Dynamic::from_ast(&stripped);
    if term::is_symbol(&d) {
        return true;
    }
    if d.kind() != AstKind::App {
        return false;
    }
    matches!(d.decl().kind(), DeclKind::EQ | DeclKind::DISTINCT)
}

/// Units whose literals are `t = u`, `t ≠ u`, or boolean symbols.
pub struct EqCubeHandler;

impl UnitHandler for EqCubeHandler {
    fn create(&self, children: Vec<Bool>) -> Ic3Unit {
        Ic3Unit {
            term: term::disjoin(&children),
            children,
            negated: false,
        }
    }

    fn create_negated(&self, children: Vec<Bool>) -> Ic3Unit {
        Ic3Unit {
            term: term::conjoin(&children),
            children,
            negated: true,
        }
    }

    fn negate(&self, u: &Ic3Unit) -> Ic3Unit {
        let children: Vec<Bool> = u.children.iter().map(term::smart_not).collect();
        if u.negated {
            self.create(children)
        } else {
            self.create_negated(children)
        }
    }

    fn check_valid(&self, u: &Ic3Unit) -> bool {
        u.children.iter().all(is_eq_lit)
    }
}

/// Equivalence classes of one sort: model value (printed) -> (value term,
/// members with that value).
type SortClasses = BTreeMap<String, (Dynamic, Vec<Dynamic>)>;

#[derive(Default)]
pub(crate) struct SaStrategy {
    /// sort (printed) -> terms of the abstraction with that sort
    term_abs: BTreeMap<String, Vec<Dynamic>>,
    known_terms: HashSet<String>,
    predset: Vec<Bool>,
    known_preds: HashSet<String>,
}

impl SaStrategy {
    fn add_term(&mut self, t: Dynamic) -> bool {
        if !self.known_terms.insert(t.to_string()) {
            return false;
        }
        self.term_abs
            .entry(t.get_sort().to_string())
            .or_default()
            .push(t);
        true
    }

    fn add_predicate(&mut self, p: Bool) -> bool {
        if !is_eq_lit(&p) {
            return false;
        }
        if self.known_preds.insert(p.to_string()) {
            self.predset.push(p);
            true
        } else {
            false
        }
    }

    fn harvest(&mut self, ts: &TransitionSystem, t: &Dynamic) -> usize {
        let mut added = 0;
        let mut groups = BTreeMap::new();
        term::subterms_by_sort(t, &mut groups);
        for (_, terms) in groups {
            for sub in terms {
                if ts.only_curr(&sub) && self.add_term(sub) {
                    added += 1;
                }
            }
        }
        let mut atoms = Vec::new();
        term::boolean_atoms(t, &mut atoms);
        for atom in atoms {
            if ts.only_curr(&Dynamic::from_ast(&atom)) && self.add_predicate(atom) {
                added += 1;
            }
        }
        added
    }

    /// Partition the term abstraction by model value, keeping only terms
    /// whose symbols lie in `keep`.
    fn equivalence_classes(
        &self,
        model: &Model,
        keep: &HashSet<String>,
    ) -> BTreeMap<String, SortClasses> {
        let mut classes: BTreeMap<String, SortClasses> = BTreeMap::new();
        for (sort, terms) in &self.term_abs {
            let by_value = classes.entry(sort.clone()).or_default();
            for t in terms {
                if !in_projection(t, keep) {
                    continue;
                }
                let Some(val) = model.eval(t, true) else { continue };
                by_value
                    .entry(val.to_string())
                    .or_insert_with(|| (val, Vec::new()))
                    .1
                    .push(t.clone());
            }
        }
        classes
    }

    /// Cube literals expressing the partition: chained equalities inside
    /// each class, disequalities between class representatives. The
    /// representative preference is symbol > non-value compound > value.
    fn construct_partition(
        &self,
        classes: &BTreeMap<String, SortClasses>,
        out: &mut Vec<Bool>,
    ) {
        for by_value in classes.values() {
            let mut representatives: Vec<Dynamic> = Vec::new();
            for (value, members) in by_value.values() {
                for pair in members.windows(2) {
                    if let Some(eq) = term::mk_eq(&pair[0], &pair[1]) {
                        out.push(eq);
                    }
                }

                let mut repr = value.clone();
                let mut repr_is_value = true;
                for t in members {
                    if term::is_symbol(t) {
                        repr = t.clone();
                        repr_is_value = false;
                        break;
                    }
                    if !term::is_value(t) && repr_is_value {
                        repr = t.clone();
                        repr_is_value = false;
                    }
                }
                representatives.push(repr);
            }

            for i in 0..representatives.len() {
                for j in i + 1..representatives.len() {
                    if let Some(eq) = term::mk_eq(&representatives[i], &representatives[j]) {
                        out.push(eq.not());
                    }
                }
            }
        }
    }

    fn model_cube(
        &self,
        model: &Model,
        handler: &dyn UnitHandler,
        keep: &HashSet<String>,
    ) -> Ic3Unit {
        let mut lits = Vec::new();
        for p in &self.predset {
            match model.eval(p, true).and_then(|v| v.as_bool()) {
                Some(true) => lits.push(p.clone()),
                _ => lits.push(term::smart_not(p)),
            }
        }
        let classes = self.equivalence_classes(model, keep);
        self.construct_partition(&classes, &mut lits);
        handler.create_negated(lits)
    }
}

impl Ic3Strategy for SaStrategy {
    fn check_ts(&self, ts: &TransitionSystem) -> EngineResult<()> {
        for v in ts.state_vars().iter().chain(ts.input_vars()) {
            let kind = v.get_sort().kind();
            if kind != SortKind::Bool && kind != SortKind::BV {
                return Err(EngineError::Unsupported(
                    "syntax-guided IC3 only supports bit-vector and boolean variables"
                        .to_string(),
                ));
            }
        }
        Ok(())
    }

    fn setup(&mut self, ts: &TransitionSystem, bad: &Bool) -> EngineResult<()> {
        for v in ts.state_vars() {
            if v.get_sort().kind() == SortKind::Bool {
                if let Some(b) = v.as_bool() {
                    self.add_predicate(b);
                }
            } else {
                self.add_term(v.clone());
            }
        }
        self.harvest(ts, &Dynamic::from_ast(ts.init()));
        self.harvest(ts, &Dynamic::from_ast(ts.trans()));
        self.harvest(ts, &Dynamic::from_ast(bad));
        debug!(
            terms = self.known_terms.len(),
            predicates = self.predset.len(),
            "term abstraction seeded"
        );
        Ok(())
    }

    fn unit_from_model(
        &self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
    ) -> Ic3Unit {
        let keep: HashSet<String> = ts
            .state_vars()
            .iter()
            .filter_map(term::symbol_name)
            .collect();
        self.model_cube(model, handler, &keep)
    }

    fn generalize_predecessor(
        &mut self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
        target: &Ic3Unit,
    ) -> Ic3Unit {
        let keep = statevars_in_coi(ts, &[Dynamic::from_ast(&target.term)]);
        self.model_cube(model, handler, &keep)
    }

    fn refine(
        &mut self,
        ts: &TransitionSystem,
        bad: &Bool,
        chain: &[Bool],
        timeout_ms: Option<u64>,
    ) -> EngineResult<RefineOutcome> {
        match replay_chain(ts, bad, chain, timeout_ms)? {
            Replay::Real(trace) => Ok(RefineOutcome::Concrete(trace)),
            Replay::Spurious(formulas) => {
                let mut added = 0;
                for t in mine_terms(ts, &formulas) {
                    if self.add_term(t) {
                        added += 1;
                    }
                }
                for f in &formulas {
                    let mut atoms = Vec::new();
                    term::boolean_atoms(f, &mut atoms);
                    for atom in atoms {
                        if ts.only_curr(&Dynamic::from_ast(&atom)) && self.add_predicate(atom) {
                            added += 1;
                        }
                    }
                }
                if added > 0 {
                    info!(added, "term abstraction refined from unsat core");
                    Ok(RefineOutcome::Refined)
                } else {
                    Ok(RefineOutcome::Stuck(
                        "unsat core yielded no new terms or predicates".to_string(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Prover, ProverResult};
    use z3::ast::BV;
    use z3::{SatResult, Solver, Sort};

    #[test]
    fn eq_literals_recognised() {
        let x = BV::new_const("x", 4);
        let y = BV::new_const("y", 4);
        let p = Bool::new_const("p");

        assert!(is_eq_lit(&x.eq(&y)));
        assert!(is_eq_lit(&x.eq(&y).not()));
        assert!(is_eq_lit(&p));
        assert!(is_eq_lit(&p.not()));
        assert!(!is_eq_lit(&Bool::and(&[p.clone(), p.clone()])));
    }

    #[test]
    fn eq_cube_negation_swaps_polarity() {
        let h = EqCubeHandler;
        let x = BV::new_const("x", 4);
        let lit = x.eq(&BV::from_u64(2, 4));
        let cube = h.create_negated(vec![lit.clone(), lit.not()]);
        assert!(h.check_valid(&cube));

        let clause = h.negate(&cube);
        assert!(!clause.negated);
        assert_eq!(clause.children[0].to_string(), lit.not().to_string());
        let back = h.negate(&clause);
        assert_eq!(back.term.to_string(), cube.term.to_string());
    }

    #[test]
    fn partition_equates_terms_with_equal_values() {
        let mut ts = TransitionSystem::new_relational();
        let x = ts.make_state_var("x", &Sort::bitvector(4)).unwrap();
        let y = ts.make_state_var("y", &Sort::bitvector(4)).unwrap();
        let z = ts.make_state_var("z", &Sort::bitvector(4)).unwrap();

        let mut sa = SaStrategy::default();
        sa.add_term(x.clone());
        sa.add_term(y.clone());
        sa.add_term(z.clone());

        let solver = Solver::new();
        solver.assert(&x.as_bv().unwrap().eq(&BV::from_u64(1, 4)));
        solver.assert(&y.as_bv().unwrap().eq(&BV::from_u64(1, 4)));
        solver.assert(&z.as_bv().unwrap().eq(&BV::from_u64(0, 4)));
        assert_eq!(solver.check(), SatResult::Sat);
        let model = solver.get_model().unwrap();

        let keep: HashSet<String> =
            ["x", "y", "z"].iter().map(|s| s.to_string()).collect();
        let classes = sa.equivalence_classes(&model, &keep);
        let mut lits = Vec::new();
        sa.construct_partition(&classes, &mut lits);

        let printed: Vec<String> = lits.iter().map(|l| l.to_string()).collect();
        // x and y fall into one class, z into another; the partition
        // carries one equality and one representative disequality.
        assert!(printed.iter().any(|s| s.contains('x') && s.contains('y')));
        assert_eq!(lits.len(), 2);
    }

    #[test]
    fn finds_counter_overflow_with_refinement() {
        let mut ts = TransitionSystem::new_functional();
        let c = ts.make_state_var("c", &Sort::bitvector(2)).unwrap();
        let cb = c.as_bv().unwrap();
        ts.set_init(cb.eq(&BV::from_u64(0, 2))).unwrap();
        ts.assign_next(&c, &Dynamic::from_ast(&cb.bvadd(&BV::from_u64(1, 2))))
            .unwrap();
        let prop = cb.eq(&BV::from_u64(3, 2)).not();
        let property = Property::new(ts, prop).unwrap();

        let mut ic3 = syntax_guided(property, &CheckOptions::default());
        assert_eq!(ic3.check_until(8).unwrap(), ProverResult::Unsafe);
        let trace = ic3.witness().unwrap();
        assert_eq!(trace.len(), 4);
    }

    #[test]
    fn rejects_integer_state() {
        let mut ts = TransitionSystem::new_relational();
        let n = ts.make_state_var("n", &Sort::int()).unwrap();
        let prop = term::mk_eq(&n, &n).unwrap();
        let property = Property::new(ts, prop).unwrap();
        let mut ic3 = syntax_guided(property, &CheckOptions::default());
        assert!(matches!(
            ic3.initialize(),
            Err(EngineError::Unsupported(_))
        ));
    }
}
