//! Term inspection and construction helpers over the z3 AST.

use std::collections::{BTreeMap, HashSet};

use z3::ast::{Ast, Bool, Dynamic};
use z3::{AstKind, DeclKind, SortKind};

/// Visit every distinct subterm of `t` (DAG nodes visited once).
pub fn for_each_subterm(t: &Dynamic, f: &mut impl FnMut(&Dynamic)) {
    let mut seen: HashSet<String> = HashSet::new();
    let mut stack = vec![t.clone()];
    while let Some(cur) = stack.pop() {
        if !seen.insert(cur.to_string()) {
            continue;
        }
        if cur.kind() == AstKind::App {
            stack.extend(cur.children());
        }
        f(&cur);
    }
}

/// True iff `t` is an uninterpreted constant (a named variable).
pub fn is_symbol(t: &Dynamic) -> bool {
    t.kind() == AstKind::App
        && t.children().is_empty()
        && t.decl().kind() == DeclKind::UNINTERPRETED
}

/// Name of an uninterpreted constant, if `t` is one.
pub fn symbol_name(t: &Dynamic) -> Option<String> {
    if is_symbol(t) {
        Some(t.decl().name())
    } else {
        None
    }
}

/// True iff `t` is a value literal (numeral or boolean constant).
pub fn is_value(t: &Dynamic) -> bool {
    match t.kind() {
        AstKind::Numeral => true,
        AstKind::App => matches!(t.decl().kind(), DeclKind::TRUE | DeclKind::FALSE),
        _ => false,
    }
}

/// All free symbols of `t`, deduplicated, in a deterministic order.
pub fn free_symbols(t: &Dynamic) -> Vec<Dynamic> {
    let mut by_name: BTreeMap<String, Dynamic> = BTreeMap::new();
    for_each_subterm(t, &mut |sub| {
        if let Some(name) = symbol_name(sub) {
            by_name.entry(name).or_insert_with(|| sub.clone());
        }
    });
    by_name.into_values().collect()
}

/// Names of all free symbols of `t`.
pub fn free_symbol_names(t: &Dynamic) -> HashSet<String> {
    let mut names = HashSet::new();
    for_each_subterm(t, &mut |sub| {
        if let Some(name) = symbol_name(sub) {
            names.insert(name);
        }
    });
    names
}

/// True iff `t` is the literal `true`.
pub fn is_true(t: &Bool) -> bool {
    let d = Dynamic::from_ast(t);
    d.kind() == AstKind::App && d.decl().kind() == DeclKind::TRUE
}

/// Negate a boolean term, stripping a leading Not instead of stacking one.
pub fn smart_not(t: &Bool) -> Bool {
    let d = Dynamic::from_ast(t);
    if d.kind() == AstKind::App && d.decl().kind() == DeclKind::NOT {
        let inner = d.children();
        if let Some(b) = inner[0].as_bool() {
            return b;
        }
    }
    t.not()
}

/// Conjunction of a slice of booleans; `true` for the empty slice.
pub fn conjoin(terms: &[Bool]) -> Bool {
    match terms.len() {
        0 => Bool::from_bool(true),
        1 => terms[0].clone(),
        _ => Bool::and(terms),
    }
}

/// Disjunction of a slice of booleans; `false` for the empty slice.
pub fn disjoin(terms: &[Bool]) -> Bool {
    match terms.len() {
        0 => Bool::from_bool(false),
        1 => terms[0].clone(),
        _ => Bool::or(terms),
    }
}

/// Build `a = b` for same-sorted terms, dispatching on the sort.
///
/// Returns `None` when the sorts disagree or the sort is not one the
/// checker handles (bool, int, bit-vector, array).
pub fn mk_eq(a: &Dynamic, b: &Dynamic) -> Option<Bool> {
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return Some(x.eq(&y));
    }
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        return Some(x.eq(&y));
    }
    if let (Some(x), Some(y)) = (a.as_bv(), b.as_bv()) {
        if x.get_size() == y.get_size() {
            return Some(x.eq(&y));
        }
        return None;
    }
    if let (Some(x), Some(y)) = (a.as_array(), b.as_array()) {
        return Some(x.eq(&y));
    }
    None
}

/// Logical connectives that do not count as atoms.
fn is_connective(kind: DeclKind) -> bool {
    matches!(
        kind,
        DeclKind::AND
            | DeclKind::OR
            | DeclKind::NOT
            | DeclKind::IMPLIES
            | DeclKind::IFF
            | DeclKind::XOR
            | DeclKind::ITE
            | DeclKind::TRUE
            | DeclKind::FALSE
    )
}

/// Collect the boolean atoms of `t`: maximal bool-sorted subterms whose
/// head is not a logical connective (equalities, comparisons, boolean
/// symbols). Atoms are returned positively (negations stripped).
pub fn boolean_atoms(t: &Dynamic, out: &mut Vec<Bool>) {
    let mut seen: HashSet<String> = HashSet::new();
    for_each_subterm(t, &mut |sub| {
        if sub.get_sort().kind() != SortKind::Bool {
            return;
        }
        let Some(b) = sub.as_bool() else { return };
        if sub.kind() != AstKind::App {
            return;
        }
        let kind = sub.decl().kind();
        if is_connective(kind) {
            return;
        }
        if seen.insert(b.to_string()) {
            out.push(b);
        }
    });
}

/// Collect every subterm of `t` that is not bool-sorted, grouped by the
/// printed form of its sort. Used to seed term abstractions.
pub fn subterms_by_sort(t: &Dynamic, out: &mut BTreeMap<String, Vec<Dynamic>>) {
    let mut seen: HashSet<String> = HashSet::new();
    for_each_subterm(t, &mut |sub| {
        let sort = sub.get_sort();
        if sort.kind() == SortKind::Bool {
            return;
        }
        if seen.insert(sub.to_string()) {
            out.entry(sort.to_string()).or_default().push(sub.clone());
        }
    });
}
