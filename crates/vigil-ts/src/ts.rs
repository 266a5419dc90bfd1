//! Transition systems: typed state/input variables, an initial-state
//! predicate, and a transition relation in relational or functional form.
//!
//! Every state variable `s` has a primed counterpart `s.next`; the
//! transition relation is a predicate over current variables, primed
//! variables and inputs. In functional form the relation is induced by
//! per-variable update functions, added with [`TransitionSystem::assign_next`].

use std::collections::{HashMap, HashSet};

use z3::ast::{Ast, Bool, Dynamic};
use z3::{FuncDecl, Sort};

use crate::term;
use crate::{TsError, TsResult};

/// Suffix distinguishing the primed copy of a state variable.
const NEXT_SUFFIX: &str = ".next";

#[derive(Debug, Clone)]
pub struct TransitionSystem {
    state_vars: Vec<Dynamic>,
    next_vars: Vec<Dynamic>,
    input_vars: Vec<Dynamic>,
    /// Functional form: state-variable name -> update expression.
    updates: HashMap<String, Dynamic>,
    init: Bool,
    trans: Bool,
    functional: bool,
}

fn mk_const(name: &str, sort: &Sort) -> Dynamic {
    FuncDecl::new(name, &[], sort).apply(&[])
}

/// Conjoin without accumulating literal `true` leaves.
fn and_onto(base: &Bool, more: &[Bool]) -> Bool {
    let mut parts: Vec<Bool> = Vec::new();
    if !term::is_true(base) {
        parts.push(base.clone());
    }
    parts.extend(more.iter().cloned());
    term::conjoin(&parts)
}

impl TransitionSystem {
    /// A system whose transition relation is an arbitrary predicate over
    /// current, primed and input variables.
    pub fn new_relational() -> Self {
        Self::new(false)
    }

    /// A system whose transition relation is induced by per-variable update
    /// functions (`next(s) = f_s(S, I)` for every assigned variable).
    pub fn new_functional() -> Self {
        Self::new(true)
    }

    fn new(functional: bool) -> Self {
        TransitionSystem {
            state_vars: Vec::new(),
            next_vars: Vec::new(),
            input_vars: Vec::new(),
            updates: HashMap::new(),
            init: Bool::from_bool(true),
            trans: Bool::from_bool(true),
            functional,
        }
    }

    pub fn is_functional(&self) -> bool {
        self.functional
    }

    /// Create a state variable and its primed counterpart.
    pub fn make_state_var(&mut self, name: &str, sort: &Sort) -> TsResult<Dynamic> {
        self.check_fresh(name)?;
        let var = mk_const(name, sort);
        let next = mk_const(&format!("{name}{NEXT_SUFFIX}"), sort);
        self.state_vars.push(var.clone());
        self.next_vars.push(next);
        Ok(var)
    }

    /// Create an input variable (no primed counterpart).
    pub fn make_input_var(&mut self, name: &str, sort: &Sort) -> TsResult<Dynamic> {
        self.check_fresh(name)?;
        let var = mk_const(name, sort);
        self.input_vars.push(var.clone());
        Ok(var)
    }

    fn check_fresh(&self, name: &str) -> TsResult<()> {
        if self.var_names().contains(name) {
            return Err(TsError::DuplicateVariable { name: name.to_string() });
        }
        Ok(())
    }

    pub fn state_vars(&self) -> &[Dynamic] {
        &self.state_vars
    }

    pub fn next_vars(&self) -> &[Dynamic] {
        &self.next_vars
    }

    pub fn input_vars(&self) -> &[Dynamic] {
        &self.input_vars
    }

    pub fn init(&self) -> &Bool {
        &self.init
    }

    pub fn trans(&self) -> &Bool {
        &self.trans
    }

    /// Update expression for a state variable, if the system is functional
    /// and one was assigned.
    pub fn update_of(&self, name: &str) -> Option<&Dynamic> {
        self.updates.get(name)
    }

    fn names_of(vars: &[Dynamic]) -> impl Iterator<Item = String> + '_ {
        vars.iter().filter_map(term::symbol_name)
    }

    fn var_names(&self) -> HashSet<String> {
        Self::names_of(&self.state_vars)
            .chain(Self::names_of(&self.next_vars))
            .chain(Self::names_of(&self.input_vars))
            .collect()
    }

    fn state_names(&self) -> HashSet<String> {
        Self::names_of(&self.state_vars).collect()
    }

    /// True iff every free symbol of `t` is a current-state variable.
    pub fn only_curr(&self, t: &Dynamic) -> bool {
        let allowed = self.state_names();
        term::free_symbol_names(t).is_subset(&allowed)
    }

    /// True iff every free symbol of `t` is a current-state or input variable.
    pub fn only_curr_or_input(&self, t: &Dynamic) -> bool {
        let allowed: HashSet<String> = Self::names_of(&self.state_vars)
            .chain(Self::names_of(&self.input_vars))
            .collect();
        term::free_symbol_names(t).is_subset(&allowed)
    }

    fn check_symbols(&self, t: &Dynamic, allowed: &HashSet<String>, context: &str) -> TsResult<()> {
        for name in term::free_symbol_names(t) {
            if !allowed.contains(&name) {
                return Err(TsError::UnknownSymbol {
                    symbol: name,
                    context: context.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Set the initial-state predicate. Every symbol must be a state variable.
    pub fn set_init(&mut self, init: Bool) -> TsResult<()> {
        self.check_symbols(&Dynamic::from_ast(&init), &self.state_names(), "init")?;
        self.init = init;
        Ok(())
    }

    /// Set the transition relation of a relational system. Symbols must be
    /// state, primed-state or input variables.
    pub fn set_trans(&mut self, trans: Bool) -> TsResult<()> {
        if self.functional {
            return Err(TsError::WrongForm { op: "set_trans", expected: "relational" });
        }
        self.check_symbols(&Dynamic::from_ast(&trans), &self.var_names(), "trans")?;
        self.trans = trans;
        Ok(())
    }

    /// Define `next(var) = expr`. The update is conjoined onto the
    /// transition relation; in functional systems it is also recorded as the
    /// defining expression of `var`. A frozen variable is
    /// `assign_next(v, v)`.
    pub fn assign_next(&mut self, var: &Dynamic, expr: &Dynamic) -> TsResult<()> {
        let name = term::symbol_name(var).ok_or_else(|| TsError::NotAStateVar {
            name: var.to_string(),
        })?;
        let idx = self
            .state_vars
            .iter()
            .position(|s| term::symbol_name(s).as_deref() == Some(name.as_str()))
            .ok_or_else(|| TsError::NotAStateVar { name: name.clone() })?;

        let allowed: HashSet<String> = Self::names_of(&self.state_vars)
            .chain(Self::names_of(&self.input_vars))
            .collect();
        self.check_symbols(expr, &allowed, "next-state assignment")?;

        let next_var = self.next_vars[idx].clone();
        let eq = term::mk_eq(&next_var, expr)
            .ok_or_else(|| TsError::SortMismatch { name: name.clone() })?;
        self.trans = and_onto(&self.trans, &[eq]);
        if self.functional {
            self.updates.insert(name, expr.clone());
        }
        Ok(())
    }

    /// Conjoin an invariant constraint over current-state variables (and
    /// inputs) onto the system: added to `init`, to `trans`, and — for
    /// current-state-only constraints — to `trans` over the primed copy.
    pub fn add_constraint(&mut self, c: &Bool) -> TsResult<()> {
        let d = Dynamic::from_ast(c);
        let allowed: HashSet<String> = Self::names_of(&self.state_vars)
            .chain(Self::names_of(&self.input_vars))
            .collect();
        self.check_symbols(&d, &allowed, "constraint")?;

        if self.only_curr(&d) {
            self.init = and_onto(&self.init, &[c.clone()]);
            let primed = self.next(c);
            self.trans = and_onto(&self.trans, &[c.clone(), primed]);
        } else {
            self.trans = and_onto(&self.trans, &[c.clone()]);
        }
        Ok(())
    }

    /// Rewrite a current-state term into its primed copy.
    pub fn next<A: Ast>(&self, t: &A) -> A {
        let pairs: Vec<(&Dynamic, &Dynamic)> = self
            .state_vars
            .iter()
            .zip(self.next_vars.iter())
            .collect();
        t.substitute(&pairs)
    }

    /// Rewrite a primed term back into its current-state copy.
    pub fn curr<A: Ast>(&self, t: &A) -> A {
        let pairs: Vec<(&Dynamic, &Dynamic)> = self
            .next_vars
            .iter()
            .zip(self.state_vars.iter())
            .collect();
        t.substitute(&pairs)
    }
}
