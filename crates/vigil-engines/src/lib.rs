//! Verification engines for vigil.
//!
//! Every engine decides a safety [`Property`] over a symbolic transition
//! system and answers one of Safe / Unsafe / Unknown, producing a witness
//! trace when Unsafe:
//!
//! - [`bmc`]: incremental bounded model checking.
//! - [`kind`]: k-induction with simple-path constraints.
//! - [`ic3`]: property-directed reachability, parameterised by the frame
//!   unit shape (boolean clauses or predicate clauses).
//! - [`ic3sa`]: IC3 with syntax-guided abstraction (equality cubes over a
//!   term abstraction).
//! - [`cegar_values`]: a CEGAR loop that abstracts constant values with
//!   frozen variables and refines from unsat cores.
//! - [`smart`]: a strategy cascade over the engines above.

pub mod bmc;
pub mod cegar_values;
pub mod ic3;
pub mod ic3sa;
pub mod kind;
mod refine;
pub mod smart;
pub mod witness;

use thiserror::Error;
use tracing::{debug, info};
use vigil_ts::Property;
use z3::{Params, Solver};

pub use witness::TraceStep;

/// Verification error.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The system or property uses theories or sorts the active engine does
    /// not support.
    #[error("unsupported construct: {0}")]
    Unsupported(String),

    /// The solver returned unknown on a query whose outcome is required for
    /// soundness. The engine unwinds its context stack and reports Unknown.
    #[error("solver failure: {0}")]
    Solver(String),

    /// Engine invariant violation. Not recoverable.
    #[error("internal error: {0}")]
    Internal(String),

    /// Recognised but unimplemented feature.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error(transparent)]
    Ts(#[from] vigil_ts::TsError),

    #[error(transparent)]
    Unroll(#[from] vigil_ts::UnrollError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Verdict of a prover run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProverResult {
    /// The property holds on all reachable states.
    Safe,
    /// A reachable state violates the property; a witness is available.
    Unsafe,
    /// No verdict within the bound, or the solver gave up.
    Unknown,
}

/// Engine selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Bounded model checking.
    Bmc,
    /// k-induction with simple-path constraints.
    KInduction,
    /// Bit-level IC3 (boolean state variables only).
    Ic3Bit,
    /// IC3 over predicate clauses.
    Ic3Predicate,
    /// IC3 with syntax-guided abstraction.
    Ic3Sa,
    /// Value-abstraction CEGAR wrapping predicate IC3.
    CegarValues,
    /// Strategy cascade: k-induction, then IC3, then BMC.
    Auto,
}

/// Options recognised by the engines.
#[derive(Debug, Clone)]
pub struct CheckOptions {
    pub engine: Engine,
    /// Depth bound passed to `check_until`.
    pub bound: usize,
    /// Seed for tie-breaking in generalisation.
    pub random_seed: u64,
    /// 0..3; diagnostics only.
    pub verbosity: u8,
    /// Declares that the transition system is presented in functional form.
    pub functional_ts: bool,
    /// Per-query solver timeout.
    pub timeout_ms: Option<u64>,
}

impl Default for CheckOptions {
    fn default() -> Self {
        CheckOptions {
            engine: Engine::Bmc,
            bound: 0,
            random_seed: 0,
            verbosity: 0,
            functional_ts: false,
            timeout_ms: None,
        }
    }
}

/// The uniform prover interface.
///
/// `initialize` is idempotent and called automatically by `check_until`;
/// `check_until` may be called repeatedly with increasing bounds; `witness`
/// is available after an Unsafe verdict and yields per-step total
/// assignments to state and input variables.
pub trait Prover {
    fn initialize(&mut self) -> EngineResult<()>;
    fn check_until(&mut self, k: usize) -> EngineResult<ProverResult>;
    fn witness(&self) -> Option<Vec<TraceStep>>;
}

pub(crate) fn apply_solver_timeout(solver: &Solver, timeout_ms: Option<u64>) {
    if let Some(ms) = timeout_ms {
        let mut params = Params::new();
        params.set_u32("timeout", ms.min(u32::MAX as u64) as u32);
        solver.set_params(&params);
    }
}

/// Outcome of a top-level check: the verdict, plus the witness trace when
/// the verdict is Unsafe.
#[derive(Debug)]
pub struct Outcome {
    pub verdict: ProverResult,
    pub trace: Option<Vec<TraceStep>>,
}

/// Build the prover selected by `opts` for `property`.
pub fn prover_for(property: Property, opts: &CheckOptions) -> EngineResult<Box<dyn Prover>> {
    if opts.functional_ts && !property.ts().is_functional() {
        return Err(EngineError::Unsupported(
            "functional_ts is set but the transition system is relational".to_string(),
        ));
    }
    Ok(match opts.engine {
        Engine::Bmc => Box::new(bmc::Bmc::new(property, opts)),
        Engine::KInduction => Box::new(kind::KInduction::new(property, opts)),
        Engine::Ic3Bit => Box::new(ic3::Ic3::bit(property, opts)),
        Engine::Ic3Predicate => Box::new(ic3::Ic3::predicate(property, opts)),
        Engine::Ic3Sa => Box::new(ic3sa::syntax_guided(property, opts)),
        Engine::CegarValues => Box::new(cegar_values::CegarValues::with_predicate_ic3(
            property, opts,
        )),
        Engine::Auto => Box::new(smart::Smart::new(property, opts)),
    })
}

/// Run the engine selected by `opts` on `property` up to `opts.bound`.
pub fn check(property: Property, opts: &CheckOptions) -> EngineResult<Outcome> {
    info!(engine = ?opts.engine, bound = opts.bound, "checking property");
    if opts.verbosity >= 2 {
        debug!(
            seed = opts.random_seed,
            timeout_ms = ?opts.timeout_ms,
            state_vars = property.ts().state_vars().len(),
            input_vars = property.ts().input_vars().len(),
            "engine configuration"
        );
    }
    let mut prover = prover_for(property, opts)?;
    prover.initialize()?;
    let verdict = prover.check_until(opts.bound)?;
    let trace = if verdict == ProverResult::Unsafe {
        prover.witness()
    } else {
        None
    };
    info!(?verdict, "check finished");
    Ok(Outcome { verdict, trace })
}
