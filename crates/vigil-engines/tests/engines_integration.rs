//! End-to-end scenarios across the verification engines.
//!
//! Each test builds a small transition system, runs one or more engines,
//! and asserts the expected verdict; unsafe verdicts also get their
//! witness traces replayed against the system.

use vigil_engines::{check, CheckOptions, Engine, ProverResult, TraceStep};
use vigil_ts::{term, Property, TransitionSystem, Unroller};
use z3::ast::{Bool, Dynamic, BV};
use z3::{SatResult, Solver, Sort};

fn opts(engine: Engine, bound: usize) -> CheckOptions {
    CheckOptions {
        engine,
        bound,
        ..CheckOptions::default()
    }
}

/// Replay a witness against the system: step 0 must satisfy init,
/// consecutive steps must be related by trans, and the final step must
/// violate the property.
fn assert_valid_witness(property: &Property, trace: &[TraceStep]) {
    assert!(!trace.is_empty(), "empty witness");
    let ts = property.ts();
    let len = trace.len() - 1;
    let solver = Solver::new();
    let mut un = Unroller::new(ts);

    solver.assert(&un.at_time_bool(ts.init(), 0).unwrap());
    for i in 0..len {
        solver.assert(&un.at_time_bool(ts.trans(), i).unwrap());
    }
    solver.assert(&un.at_time_bool(&property.bad(), len).unwrap());
    for (step, trace_step) in trace.iter().enumerate() {
        for (var, val) in &trace_step.assignments {
            let timed = un.timed_var(var, step);
            solver.assert(&term::mk_eq(&timed, val).unwrap());
        }
    }
    assert_eq!(
        solver.check(),
        SatResult::Sat,
        "witness is not a run of the system ending in a violation"
    );
}

/// Two-bit counter: c starts at 0 and increments each step.
fn two_bit_counter(prop: impl Fn(&BV) -> Bool) -> Property {
    let mut ts = TransitionSystem::new_relational();
    let c = ts.make_state_var("c", &Sort::bitvector(2)).unwrap();
    let cb = c.as_bv().unwrap();
    ts.set_init(cb.eq(&BV::from_u64(0, 2))).unwrap();
    ts.assign_next(&c, &Dynamic::from_ast(&cb.bvadd(&BV::from_u64(1, 2))))
        .unwrap();
    Property::new(ts, prop(&cb)).unwrap()
}

/// Latch driven by a free input.
fn free_latch() -> Property {
    let mut ts = TransitionSystem::new_relational();
    let x = ts.make_state_var("x", &Sort::bool()).unwrap();
    let i = ts.make_input_var("i", &Sort::bool()).unwrap();
    let xb = x.as_bool().unwrap();
    ts.set_init(xb.not()).unwrap();
    let xn = ts.next(&x);
    ts.set_trans(xn.as_bool().unwrap().eq(&i.as_bool().unwrap()))
        .unwrap();
    Property::new(ts, xb.not()).unwrap()
}

/// Two latches flipping each step, never equal.
fn mutex_latches() -> Property {
    let mut ts = TransitionSystem::new_relational();
    let a = ts.make_state_var("a", &Sort::bool()).unwrap();
    let b = ts.make_state_var("b", &Sort::bool()).unwrap();
    let (ab, bb) = (a.as_bool().unwrap(), b.as_bool().unwrap());
    ts.set_init(Bool::and(&[ab.clone(), bb.not()])).unwrap();
    ts.assign_next(&a, &Dynamic::from_ast(&ab.not())).unwrap();
    ts.assign_next(&b, &Dynamic::from_ast(&bb.not())).unwrap();
    Property::new(ts, ab.eq(&bb).not()).unwrap()
}

/// x counts by one, y by two; y stays twice x (the multiplication keeps
/// the abstracting engines honest).
fn lockstep_counters() -> Property {
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

/// Wrap-around counter over BV(3): reaches 4 after four steps.
fn wraparound_counter() -> Property {
    let mut ts = TransitionSystem::new_relational();
    let x = ts.make_state_var("x", &Sort::bitvector(3)).unwrap();
    let xb = x.as_bv().unwrap();
    ts.set_init(xb.eq(&BV::from_u64(0, 3))).unwrap();
    let wrapped = xb
        .eq(&BV::from_u64(7, 3))
        .ite(&BV::from_u64(0, 3), &xb.bvadd(&BV::from_u64(1, 3)));
    ts.assign_next(&x, &Dynamic::from_ast(&wrapped)).unwrap();
    Property::new(ts, xb.eq(&BV::from_u64(4, 3)).not()).unwrap()
}

// ============================================================================
// Safe counter (trivially-true property)
// ============================================================================

#[test]
fn kind_safe_counter() {
    let p = two_bit_counter(|c| {
        Bool::or(&[
            c.eq(&BV::from_u64(3, 2)).not(),
            Bool::from_bool(true).eq(&Bool::from_bool(true)),
        ])
    });
    let outcome = check(p, &opts(Engine::KInduction, 3)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Safe);
}

#[test]
fn ic3_safe_counter() {
    let p = two_bit_counter(|c| {
        Bool::or(&[
            c.eq(&BV::from_u64(3, 2)).not(),
            Bool::from_bool(true).eq(&Bool::from_bool(true)),
        ])
    });
    let outcome = check(p, &opts(Engine::Ic3Predicate, 8)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Safe);
}

// ============================================================================
// Unsafe counter (c reaches 0b11 after three steps)
// ============================================================================

fn unsafe_counter() -> Property {
    two_bit_counter(|c| c.eq(&BV::from_u64(3, 2)).not())
}

#[test]
fn bmc_unsafe_counter() {
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::Bmc, 5)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);

    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 4);
    for (step, expected) in [0u64, 1, 2, 3].iter().enumerate() {
        let val = trace[step].value_of("c").unwrap();
        assert_eq!(val.to_string(), BV::from_u64(*expected, 2).to_string());
    }
    assert_valid_witness(&p, &trace);
}

#[test]
fn kind_unsafe_counter() {
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::KInduction, 5)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 4);
    assert_valid_witness(&p, &trace);
}

#[test]
fn ic3_predicate_unsafe_counter() {
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::Ic3Predicate, 8)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 4);
    assert_valid_witness(&p, &trace);
}

#[test]
fn ic3_sa_unsafe_counter() {
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::Ic3Sa, 8)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    assert_valid_witness(&p, &outcome.trace.unwrap());
}

#[test]
fn cegar_unsafe_counter() {
    // refinement has to pin both abstracted constants before the inner
    // engine can reproduce the concrete trace
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::CegarValues, 8)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 4);
    assert_valid_witness(&p, &trace);
}

#[test]
fn auto_unsafe_counter() {
    let p = unsafe_counter();
    let outcome = check(p.clone(), &opts(Engine::Auto, 5)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    assert_valid_witness(&p, &outcome.trace.unwrap());
}

// ============================================================================
// Free latch (input-driven violation at depth 1)
// ============================================================================

#[test]
fn kind_free_latch() {
    let p = free_latch();
    let outcome = check(p.clone(), &opts(Engine::KInduction, 1)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);

    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 2);
    assert_eq!(
        trace[1].value_of("x").unwrap().to_string(),
        Bool::from_bool(true).to_string()
    );
    assert_eq!(
        trace[0].value_of("i").unwrap().to_string(),
        Bool::from_bool(true).to_string()
    );
    assert_valid_witness(&p, &trace);
}

#[test]
fn ic3_bit_free_latch() {
    let p = free_latch();
    let outcome = check(p.clone(), &opts(Engine::Ic3Bit, 4)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    assert_valid_witness(&p, &outcome.trace.unwrap());
}

// ============================================================================
// Mutually exclusive latches (inductive invariant, all engines agree)
// ============================================================================

#[test]
fn all_engines_prove_mutex_latches() {
    for engine in [
        Engine::KInduction,
        Engine::Ic3Bit,
        Engine::Ic3Predicate,
        Engine::Ic3Sa,
        Engine::Auto,
    ] {
        let outcome = check(mutex_latches(), &opts(engine, 10)).unwrap();
        assert_eq!(
            outcome.verdict,
            ProverResult::Safe,
            "engine {engine:?} failed to prove the mutex latches"
        );
    }
}

// ============================================================================
// Lockstep counters (value abstraction pays off)
// ============================================================================

#[test]
fn kind_lockstep_counters() {
    let outcome = check(lockstep_counters(), &opts(Engine::KInduction, 2)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Safe);
}

#[test]
fn cegar_lockstep_counters() {
    let outcome = check(lockstep_counters(), &opts(Engine::CegarValues, 10)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Safe);
}

// ============================================================================
// Wrap-around counter (simple path keeps k-induction honest)
// ============================================================================

#[test]
fn bmc_wraparound_counter() {
    let p = wraparound_counter();
    let outcome = check(p.clone(), &opts(Engine::Bmc, 6)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    let trace = outcome.trace.unwrap();
    assert_eq!(trace.len(), 5);
    assert_valid_witness(&p, &trace);
}

#[test]
fn kind_wraparound_counter() {
    let p = wraparound_counter();
    let outcome = check(p.clone(), &opts(Engine::KInduction, 6)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unsafe);
    assert_eq!(outcome.trace.as_ref().unwrap().len(), 5);
    assert_valid_witness(&p, &outcome.trace.unwrap());
}

// ============================================================================
// Bounds and unknowns
// ============================================================================

#[test]
fn kind_returns_unknown_below_the_counterexample_depth() {
    let outcome = check(unsafe_counter(), &opts(Engine::KInduction, 1)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Unknown);
}

#[test]
fn bmc_reports_bounded_safety() {
    let outcome = check(unsafe_counter(), &opts(Engine::Bmc, 2)).unwrap();
    assert_eq!(outcome.verdict, ProverResult::Safe);
    assert!(outcome.trace.is_none());
}

#[test]
fn bit_level_rejects_word_level_state() {
    let err = check(unsafe_counter(), &opts(Engine::Ic3Bit, 3));
    assert!(err.is_err());
}
