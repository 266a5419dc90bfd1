//! Property-directed reachability (IC3), parameterised by the shape of the
//! logical units kept in frames.
//!
//! Frames over-approximate the states reachable in at most `i` steps. The
//! solver context is populated once with `label → unit` implications, so a
//! frame is activated by assuming the labels of every frame at or above its
//! index; `init` and `trans` have their own labels. Unsatisfied proof goals
//! are processed smallest-frame-first; blocked cubes are generalised by
//! greedy literal dropping and pushed to the highest frame where they are
//! still relatively inductive. Propagation runs once per step and declares
//! the property safe when some frame difference becomes empty.
//!
//! The unit shape and the model-projection strategy are injected: boolean
//! clauses for bit-level systems, predicate clauses for word-level systems,
//! and equality cubes for the syntax-guided variant in [`crate::ic3sa`].

use std::collections::HashSet;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info};
use vigil_ts::{term, Property, TransitionSystem};
use z3::ast::{Bool, Dynamic};
use z3::{Model, SatResult, Solver};

use crate::refine::{replay_chain, Replay};
use crate::witness::TraceStep;
use crate::{apply_solver_timeout, CheckOptions, EngineError, EngineResult, Prover, ProverResult};

/// A structured logical cell kept in frames and proof goals: a clause
/// (disjunction of literals, `negated = false`) or a cube (conjunction,
/// `negated = true`). `term` is always the single-formula form of the
/// children under that polarity.
#[derive(Debug, Clone)]
pub struct Ic3Unit {
    pub term: Bool,
    pub children: Vec<Bool>,
    pub negated: bool,
}

/// Capability object for building and inverting units. Injected at engine
/// construction; each IC3 flavor pairs one of these with a
/// model-projection strategy.
pub trait UnitHandler {
    /// Disjunction of `children`.
    fn create(&self, children: Vec<Bool>) -> Ic3Unit;

    /// Conjunction of `children` (the children are not negated).
    fn create_negated(&self, children: Vec<Bool>) -> Ic3Unit;

    /// The dual unit: clause ↔ cube, with every literal negated.
    fn negate(&self, u: &Ic3Unit) -> Ic3Unit;

    /// Structural well-formedness check (debugging).
    fn check_valid(&self, u: &Ic3Unit) -> bool;
}

fn build(children: Vec<Bool>, negated: bool) -> Ic3Unit {
    let term = if negated {
        term::conjoin(&children)
    } else {
        term::disjoin(&children)
    };
    Ic3Unit { term, children, negated }
}

fn negate_unit(u: &Ic3Unit) -> Ic3Unit {
    let children: Vec<Bool> = u.children.iter().map(term::smart_not).collect();
    build(children, !u.negated)
}

/// True iff `b` is a boolean variable or its negation.
fn is_bool_literal(b: &Bool) -> bool {
    let d = Dynamic::from_ast(b);
    if term::is_symbol(&d) {
        return true;
    }
    let stripped = Dynamic::from_ast(&term::smart_not(b));
    term::is_symbol(&stripped)
}

/// Units over boolean literals: plain clauses and cubes.
pub struct ClauseHandler;

impl UnitHandler for ClauseHandler {
    fn create(&self, children: Vec<Bool>) -> Ic3Unit {
        build(children, false)
    }

    fn create_negated(&self, children: Vec<Bool>) -> Ic3Unit {
        build(children, true)
    }

    fn negate(&self, u: &Ic3Unit) -> Ic3Unit {
        negate_unit(u)
    }

    fn check_valid(&self, u: &Ic3Unit) -> bool {
        u.children.iter().all(is_bool_literal)
    }
}

/// Units whose literals are theory atoms drawn from a predicate set.
pub struct PredicateClauseHandler;

impl UnitHandler for PredicateClauseHandler {
    fn create(&self, children: Vec<Bool>) -> Ic3Unit {
        build(children, false)
    }

    fn create_negated(&self, children: Vec<Bool>) -> Ic3Unit {
        build(children, true)
    }

    fn negate(&self, u: &Ic3Unit) -> Ic3Unit {
        negate_unit(u)
    }

    fn check_valid(&self, u: &Ic3Unit) -> bool {
        u.children.iter().all(|c| {
            let mut atoms = Vec::new();
            term::boolean_atoms(&Dynamic::from_ast(c), &mut atoms);
            !atoms.is_empty() || is_bool_literal(c)
        })
    }
}

/// Outcome of replaying an abstract counterexample chain.
pub(crate) enum RefineOutcome {
    /// The chain is concretely realisable; the trace is the witness.
    Concrete(Vec<TraceStep>),
    /// The chain was spurious and the abstraction was strengthened.
    Refined,
    /// Spurious, but nothing new was learned. The engine reports Unknown.
    Stuck(String),
}

/// Model projection and abstraction hooks of one IC3 flavor.
pub(crate) trait Ic3Strategy {
    /// Reject systems outside the flavor's supported fragment.
    fn check_ts(&self, ts: &TransitionSystem) -> EngineResult<()>;

    /// One-time setup (predicate harvesting, term abstraction).
    fn setup(&mut self, _ts: &TransitionSystem, _bad: &Bool) -> EngineResult<()> {
        Ok(())
    }

    /// Project the current model onto a cube over current state variables.
    fn unit_from_model(
        &self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
    ) -> Ic3Unit;

    /// Generalise the predecessor state found in `model` for `target`.
    fn generalize_predecessor(
        &mut self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
        target: &Ic3Unit,
    ) -> Ic3Unit;

    /// Decide whether a frame-0 proof-goal chain is a real counterexample,
    /// refining the abstraction when it is spurious.
    fn refine(
        &mut self,
        ts: &TransitionSystem,
        bad: &Bool,
        chain: &[Bool],
        timeout_ms: Option<u64>,
    ) -> EngineResult<RefineOutcome>;
}

/// Exact cubes over boolean state variables.
struct BitStrategy;

impl Ic3Strategy for BitStrategy {
    fn check_ts(&self, ts: &TransitionSystem) -> EngineResult<()> {
        for v in ts.state_vars().iter().chain(ts.input_vars()) {
            if v.as_bool().is_none() {
                return Err(EngineError::Unsupported(
                    "bit-level IC3 requires boolean state and input variables".to_string(),
                ));
            }
        }
        Ok(())
    }

    fn unit_from_model(
        &self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
    ) -> Ic3Unit {
        let mut lits = Vec::new();
        for v in ts.state_vars() {
            let Some(b) = v.as_bool() else { continue };
            match model.eval(&b, true).and_then(|val| val.as_bool()) {
                Some(true) => lits.push(b),
                _ => lits.push(b.not()),
            }
        }
        handler.create_negated(lits)
    }

    fn generalize_predecessor(
        &mut self,
        model: &Model,
        handler: &dyn UnitHandler,
        ts: &TransitionSystem,
        _target: &Ic3Unit,
    ) -> Ic3Unit {
        // the model-derived cube, unchanged
        self.unit_from_model(model, handler, ts)
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
            Replay::Spurious(_) => Err(EngineError::Internal(
                "exact counterexample chain failed concrete replay".to_string(),
            )),
        }
    }
}

/// Cubes over a finite set of theory atoms harvested from the system.
#[derive(Default)]
struct PredicateStrategy {
    predset: Vec<Bool>,
    known: HashSet<String>,
}

impl PredicateStrategy {
    fn add_predicate(&mut self, p: Bool) -> bool {
        if self.known.insert(p.to_string()) {
            self.predset.push(p);
            true
        } else {
            false
        }
    }

    fn model_cube(&self, model: &Model, handler: &dyn UnitHandler) -> Ic3Unit {
        let mut lits = Vec::new();
        for p in &self.predset {
            match model.eval(p, true).and_then(|val| val.as_bool()) {
                Some(true) => lits.push(p.clone()),
                _ => lits.push(term::smart_not(p)),
            }
        }
        handler.create_negated(lits)
    }
}

impl Ic3Strategy for PredicateStrategy {
    fn check_ts(&self, _ts: &TransitionSystem) -> EngineResult<()> {
        Ok(())
    }

    fn setup(&mut self, ts: &TransitionSystem, bad: &Bool) -> EngineResult<()> {
        let mut atoms = Vec::new();
        term::boolean_atoms(&Dynamic::from_ast(ts.init()), &mut atoms);
        term::boolean_atoms(&Dynamic::from_ast(ts.trans()), &mut atoms);
        term::boolean_atoms(&Dynamic::from_ast(bad), &mut atoms);
        for v in ts.state_vars() {
            if let Some(b) = v.as_bool() {
                atoms.push(b);
            }
        }
        for atom in atoms {
            let d = Dynamic::from_ast(&atom);
            if ts.only_curr(&d) {
                self.add_predicate(atom);
            }
        }
        if self.predset.is_empty() {
            return Err(EngineError::Unsupported(
                "no current-state predicates found in init, trans or the property".to_string(),
            ));
        }
        debug!(predicates = self.predset.len(), "predicate abstraction seeded");
        Ok(())
    }

    fn unit_from_model(
        &self,
        model: &Model,
        handler: &dyn UnitHandler,
        _ts: &TransitionSystem,
    ) -> Ic3Unit {
        self.model_cube(model, handler)
    }

    fn generalize_predecessor(
        &mut self,
        model: &Model,
        handler: &dyn UnitHandler,
        _ts: &TransitionSystem,
        _target: &Ic3Unit,
    ) -> Ic3Unit {
        self.model_cube(model, handler)
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
            Replay::Spurious(core_formulas) => {
                let mut added = 0usize;
                for f in &core_formulas {
                    let mut atoms = Vec::new();
                    term::boolean_atoms(f, &mut atoms);
                    for atom in atoms {
                        if ts.only_curr(&Dynamic::from_ast(&atom)) && self.add_predicate(atom) {
                            added += 1;
                        }
                    }
                }
                if added > 0 {
                    info!(added, "refined predicate abstraction from unsat core");
                    Ok(RefineOutcome::Refined)
                } else {
                    Ok(RefineOutcome::Stuck(
                        "unsat core yielded no new predicates".to_string(),
                    ))
                }
            }
        }
    }
}

/// Obligation to block a cube at a frame; `next` links to the goal whose
/// failure produced this one, forming the counterexample chain.
struct ProofGoal {
    target: Ic3Unit,
    idx: usize,
    next: Option<Rc<ProofGoal>>,
}

enum Predecessor {
    /// SAT: a generalised predecessor cube.
    Found(Ic3Unit),
    /// UNSAT: the unsat-core-reduced version of the input cube.
    Blocked(Ic3Unit),
}

pub struct Ic3 {
    solver: Solver,
    property: Property,
    bad: Bool,
    handler: Box<dyn UnitHandler>,
    strategy: Box<dyn Ic3Strategy>,
    frames: Vec<Vec<Ic3Unit>>,
    goals: Vec<Rc<ProofGoal>>,
    init_label: Bool,
    trans_label: Bool,
    frame_labels: Vec<Bool>,
    solver_context: usize,
    label_seq: usize,
    reached_k: isize,
    rng: StdRng,
    timeout_ms: Option<u64>,
    cex: Option<Rc<ProofGoal>>,
    trace: Option<Vec<TraceStep>>,
    initialized: bool,
}

impl Ic3 {
    /// Bit-level IC3: clauses over boolean literals.
    pub fn bit(property: Property, opts: &CheckOptions) -> Self {
        Self::with_parts(property, opts, Box::new(ClauseHandler), Box::new(BitStrategy))
    }

    /// IC3 over predicate clauses, for word-level systems.
    pub fn predicate(property: Property, opts: &CheckOptions) -> Self {
        Self::with_parts(
            property,
            opts,
            Box::new(PredicateClauseHandler),
            Box::new(PredicateStrategy::default()),
        )
    }

    pub(crate) fn with_parts(
        property: Property,
        opts: &CheckOptions,
        handler: Box<dyn UnitHandler>,
        strategy: Box<dyn Ic3Strategy>,
    ) -> Self {
        let solver = Solver::new();
        apply_solver_timeout(&solver, opts.timeout_ms);
        let bad = property.bad();
        Ic3 {
            solver,
            property,
            bad,
            handler,
            strategy,
            frames: Vec::new(),
            goals: Vec::new(),
            init_label: Bool::new_const("__label@init"),
            trans_label: Bool::new_const("__label@trans"),
            frame_labels: Vec::new(),
            solver_context: 0,
            label_seq: 0,
            reached_k: -1,
            rng: StdRng::seed_from_u64(opts.random_seed),
            timeout_ms: opts.timeout_ms,
            cex: None,
            trace: None,
            initialized: false,
        }
    }

    // ---- solver context bookkeeping -----------------------------------

    fn push_ctx(&mut self) {
        self.solver.push();
        self.solver_context += 1;
    }

    fn pop_ctx(&mut self) {
        debug_assert!(self.solver_context > 0);
        self.solver.pop(1);
        self.solver_context -= 1;
    }

    fn pop_to_base(&mut self) {
        while self.solver_context > 0 {
            self.pop_ctx();
        }
    }

    /// Check under assumptions; solver Unknown unwinds the context stack
    /// and surfaces as a solver failure, mapped to Unknown by `check_until`.
    fn check_assuming(&mut self, assumptions: &[Bool]) -> EngineResult<bool> {
        match self.solver.check_assumptions(assumptions) {
            SatResult::Sat => Ok(true),
            SatResult::Unsat => Ok(false),
            SatResult::Unknown => {
                self.pop_to_base();
                Err(EngineError::Solver(
                    "solver returned unknown during an IC3 query".to_string(),
                ))
            }
        }
    }

    fn fresh_label(&mut self) -> Bool {
        self.label_seq += 1;
        Bool::new_const(format!("__assump@{}", self.label_seq))
    }

    // ---- frames -------------------------------------------------------

    fn push_frame(&mut self) {
        let idx = self.frames.len();
        let label = Bool::new_const(format!("__frame@{idx}"));
        if idx == 0 {
            self.solver
                .assert(&label.implies(self.property.ts().init()));
        }
        self.frame_labels.push(label);
        self.frames.push(Vec::new());
    }

    /// Labels activating the semantic content of frame `i`: frames keep a
    /// unit only at the highest index where it holds, so F_i is the
    /// conjunction of every frame at or above `i`.
    fn frame_assumptions(&self, i: usize) -> Vec<Bool> {
        self.frame_labels[i..].to_vec()
    }

    fn constrain_frame(&mut self, i: usize, u: Ic3Unit) {
        debug_assert!(self.handler.check_valid(&u));
        debug_assert_eq!(self.solver_context, 0);
        self.solver.assert(&self.frame_labels[i].implies(&u.term));
        self.frames[i].push(u);
    }

    // ---- proof goals --------------------------------------------------

    fn add_proof_goal(&mut self, target: Ic3Unit, idx: usize, next: Option<Rc<ProofGoal>>) {
        self.goals.push(Rc::new(ProofGoal { target, idx, next }));
    }

    /// Remove and return a goal with the smallest frame index.
    fn next_goal(&mut self) -> Option<Rc<ProofGoal>> {
        let pos = self
            .goals
            .iter()
            .enumerate()
            .min_by_key(|(_, g)| g.idx)
            .map(|(pos, _)| pos)?;
        Some(self.goals.swap_remove(pos))
    }

    fn cex_chain(&self) -> Vec<Bool> {
        let mut cubes = Vec::new();
        let mut cur = self.cex.clone();
        while let Some(goal) = cur {
            cubes.push(goal.target.term.clone());
            cur = goal.next.clone();
        }
        cubes
    }

    // ---- main queries -------------------------------------------------

    /// Does the last frame intersect the bad states? If so, the projected
    /// model cube becomes a proof goal at that frame.
    fn intersects_bad(&mut self) -> EngineResult<bool> {
        let last = self.frames.len() - 1;
        self.push_ctx();
        self.solver.assert(&self.bad);
        let assumptions = self.frame_assumptions(last);
        let sat = self.check_assuming(&assumptions)?;
        if sat {
            let model = self.solver.get_model().unwrap();
            let unit = self
                .strategy
                .unit_from_model(&model, self.handler.as_ref(), self.property.ts());
            debug_assert!(self.handler.check_valid(&unit));
            self.pop_ctx();
            debug!(frame = last, "bad cube extracted");
            self.add_proof_goal(unit, last, None);
        } else {
            self.pop_ctx();
        }
        Ok(sat)
    }

    /// Is `goal.target` reachable from frame `goal.idx - 1`? SAT yields a
    /// generalised predecessor; UNSAT yields the unsat-core-reduced cube.
    fn get_predecessor(&mut self, goal: &ProofGoal) -> EngineResult<Predecessor> {
        let ts = self.property.ts().clone();
        let c = &goal.target;

        self.push_ctx();
        // block trivial self-loop predecessors
        self.solver.assert(&c.term.not());

        let mut assumptions = vec![self.trans_label.clone()];
        assumptions.extend(self.frame_assumptions(goal.idx - 1));

        let mut lit_labels: Vec<(Bool, usize)> = Vec::new();
        for (m, lit) in c.children.iter().enumerate() {
            let label = self.fresh_label();
            let lit_next = ts.next(lit);
            self.solver.assert(&label.implies(&lit_next));
            assumptions.push(label.clone());
            lit_labels.push((label, m));
        }

        if self.check_assuming(&assumptions)? {
            let model = self.solver.get_model().unwrap();
            let pred =
                self.strategy
                    .generalize_predecessor(&model, self.handler.as_ref(), &ts, c);
            debug_assert!(self.handler.check_valid(&pred));
            self.pop_ctx();
            Ok(Predecessor::Found(pred))
        } else {
            let core: HashSet<String> = self
                .solver
                .get_unsat_core()
                .iter()
                .map(|b| b.to_string())
                .collect();
            self.pop_ctx();

            let mut keep = Vec::new();
            let mut removed = Vec::new();
            for (label, m) in &lit_labels {
                if core.contains(&label.to_string()) {
                    keep.push(c.children[*m].clone());
                } else {
                    removed.push(c.children[*m].clone());
                }
            }
            if keep.is_empty() {
                keep = c.children.clone();
                removed.clear();
            }
            self.fix_if_intersects_initial(&mut keep, &removed)?;
            Ok(Predecessor::Blocked(self.handler.create_negated(keep)))
        }
    }

    fn intersects_initial(&mut self, t: &Bool) -> EngineResult<bool> {
        self.push_ctx();
        self.solver.assert(t);
        let sat = self.check_assuming(&[self.init_label.clone()])?;
        self.pop_ctx();
        Ok(sat)
    }

    /// Re-add removed literals until the cube excludes the initial states.
    fn fix_if_intersects_initial(
        &mut self,
        keep: &mut Vec<Bool>,
        removed: &[Bool],
    ) -> EngineResult<()> {
        let mut spare = removed.to_vec();
        while self.intersects_initial(&term::conjoin(keep))? {
            let Some(lit) = spare.pop() else {
                return Err(EngineError::Internal(
                    "cube intersects the initial states with no literals left to restore"
                        .to_string(),
                ));
            };
            keep.push(lit);
        }
        Ok(())
    }

    /// Drop literals of `cube` while it stays relatively inductive to
    /// frame `i - 1` and disjoint from init; return the blocking clause.
    fn inductive_generalization(
        &mut self,
        i: usize,
        cube: &Ic3Unit,
    ) -> EngineResult<Vec<Ic3Unit>> {
        let ts = self.property.ts().clone();
        let mut keep: Vec<Bool> = cube.children.clone();

        let mut order: Vec<usize> = (0..cube.children.len()).collect();
        order.shuffle(&mut self.rng);

        for idx in order {
            if keep.len() <= 1 {
                break;
            }
            let lit = &cube.children[idx];
            let Some(pos) = keep.iter().position(|l| l.to_string() == lit.to_string()) else {
                continue;
            };
            let mut trial = keep.clone();
            trial.remove(pos);
            let trial_cube = term::conjoin(&trial);

            if self.intersects_initial(&trial_cube)? {
                continue;
            }

            // F_{i-1} ∧ ¬cand ∧ T ∧ cand'
            self.push_ctx();
            self.solver.assert(&trial_cube.not());
            self.solver.assert(&ts.next(&trial_cube));
            let mut assumptions = vec![self.trans_label.clone()];
            assumptions.extend(self.frame_assumptions(i - 1));
            let sat = self.check_assuming(&assumptions)?;
            self.pop_ctx();

            if !sat {
                keep = trial;
            }
        }

        let reduced = self.handler.create_negated(keep);
        Ok(vec![self.handler.negate(&reduced)])
    }

    /// Highest frame at which `u` can be added: walk upward while
    /// `F_h ∧ T ∧ ¬u'` stays unsatisfiable.
    fn find_highest_frame(&mut self, i: usize, u: &Ic3Unit) -> EngineResult<usize> {
        let ts = self.property.ts().clone();
        let neg = self.handler.negate(u);
        let mut h = i;
        while h + 1 < self.frames.len() {
            self.push_ctx();
            self.solver.assert(&ts.next(&neg.term));
            let mut assumptions = vec![self.trans_label.clone()];
            assumptions.extend(self.frame_assumptions(h));
            let sat = self.check_assuming(&assumptions)?;
            self.pop_ctx();
            if sat {
                break;
            }
            h += 1;
        }
        Ok(h)
    }

    /// Drain the proof-goal queue smallest-frame-first. Returns false when
    /// a goal reaches frame 0 (counterexample chain complete).
    fn block_all(&mut self) -> EngineResult<bool> {
        while let Some(goal) = self.next_goal() {
            if goal.idx == 0 {
                self.cex = Some(goal);
                return Ok(false);
            }
            match self.get_predecessor(&goal)? {
                Predecessor::Found(pred) => {
                    let idx = goal.idx - 1;
                    let parent = Rc::clone(&goal);
                    self.goals.push(goal);
                    self.add_proof_goal(pred, idx, Some(parent));
                }
                Predecessor::Blocked(reduced) => {
                    let units = self.inductive_generalization(goal.idx, &reduced)?;
                    for u in units {
                        let h = self.find_highest_frame(goal.idx, &u)?;
                        debug!(frame = h, clause = %u.term, "learned clause");
                        self.constrain_frame(h, u);
                    }
                }
            }
        }
        Ok(true)
    }

    /// Push units to higher frames; an emptied intermediate frame is a
    /// fixpoint and proves the property.
    fn propagate(&mut self) -> EngineResult<bool> {
        let ts = self.property.ts().clone();
        for i in 1..self.frames.len() - 1 {
            let units = std::mem::take(&mut self.frames[i]);
            let mut kept = Vec::new();
            let mut pushed = Vec::new();
            for u in units {
                let neg = self.handler.negate(&u);
                self.push_ctx();
                self.solver.assert(&ts.next(&neg.term));
                let mut assumptions = vec![self.trans_label.clone()];
                assumptions.extend(self.frame_assumptions(i));
                let sat = self.check_assuming(&assumptions)?;
                self.pop_ctx();
                if sat {
                    kept.push(u);
                } else {
                    pushed.push(u);
                }
            }
            let emptied = kept.is_empty();
            self.frames[i] = kept;
            for u in pushed {
                self.constrain_frame(i + 1, u);
            }
            if emptied {
                info!(frame = i, "frame difference empty, property proved");
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ---- top-level state machine --------------------------------------

    fn step_0(&mut self) -> EngineResult<Option<ProverResult>> {
        self.push_ctx();
        self.solver.assert(&self.bad);
        let sat = self.check_assuming(&[self.init_label.clone()])?;
        if sat {
            let model = self.solver.get_model().unwrap();
            self.trace = Some(crate::witness::state_from_model(&model, self.property.ts()));
            self.pop_ctx();
            info!("property violated in an initial state");
            return Ok(Some(ProverResult::Unsafe));
        }
        self.pop_ctx();
        self.push_frame();
        self.reached_k = 0;
        Ok(None)
    }

    fn step(&mut self, i: usize) -> EngineResult<Option<ProverResult>> {
        debug!(step = i, frames = self.frames.len(), "IC3 step");
        while self.intersects_bad()? {
            if self.block_all()? {
                continue;
            }
            // a proof-goal chain reached frame 0
            let chain = self.cex_chain();
            let ts = self.property.ts().clone();
            match self
                .strategy
                .refine(&ts, &self.bad, &chain, self.timeout_ms)?
            {
                RefineOutcome::Concrete(trace) => {
                    info!(length = chain.len() - 1, "counterexample found");
                    self.trace = Some(trace);
                    return Ok(Some(ProverResult::Unsafe));
                }
                RefineOutcome::Refined => {
                    self.goals.clear();
                    self.cex = None;
                }
                RefineOutcome::Stuck(reason) => {
                    info!(reason = %reason, "abstraction refinement made no progress");
                    return Ok(Some(ProverResult::Unknown));
                }
            }
        }
        self.push_frame();
        if self.propagate()? {
            return Ok(Some(ProverResult::Safe));
        }
        self.reached_k = i as isize;
        Ok(None)
    }

    fn run(&mut self, k: usize) -> EngineResult<ProverResult> {
        self.initialize()?;
        if self.reached_k < 0 {
            if let Some(v) = self.step_0()? {
                return Ok(v);
            }
        }
        let start = (self.reached_k.max(0) as usize) + 1;
        for i in start..=k {
            if let Some(v) = self.step(i)? {
                return Ok(v);
            }
        }
        Ok(ProverResult::Unknown)
    }
}

impl Prover for Ic3 {
    fn initialize(&mut self) -> EngineResult<()> {
        if self.initialized {
            return Ok(());
        }
        let ts = self.property.ts().clone();
        let bad = self.bad.clone();
        self.strategy.check_ts(&ts)?;
        self.strategy.setup(&ts, &bad)?;

        self.solver.assert(&self.init_label.implies(ts.init()));
        self.solver.assert(&self.trans_label.implies(ts.trans()));
        self.push_frame(); // frame 0 carries init

        self.initialized = true;
        Ok(())
    }

    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult> {
        info!(bound = k, "starting IC3");
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
