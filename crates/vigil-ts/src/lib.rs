//! Transition-system data model for the vigil model checker.
//!
//! A [`TransitionSystem`] is a set of typed state and input variables
//! together with an initial-state predicate and a transition relation
//! (relational form) or per-variable update functions (functional form).
//! A [`Property`] pairs a system with a boolean safety predicate over its
//! state variables. The [`Unroller`] rewrites formulas over current/next
//! variables into formulas over time-indexed copies, which is what the
//! engines in `vigil-engines` feed to the solver.
//!
//! Terms and sorts are z3 AST handles; identity equality of terms follows
//! from Z3's hash-consing.

pub mod coi;
pub mod property;
pub mod term;
pub mod ts;
pub mod unroll;

pub use property::Property;
pub use ts::TransitionSystem;
pub use unroll::{UnrollError, Unroller};

use thiserror::Error;

/// Error building or mutating a transition system.
#[derive(Debug, Error)]
pub enum TsError {
    #[error("symbol '{symbol}' is not allowed in {context}")]
    UnknownSymbol { symbol: String, context: String },

    #[error("'{name}' is already a variable of this transition system")]
    DuplicateVariable { name: String },

    #[error("{op} requires a {expected} transition system")]
    WrongForm { op: &'static str, expected: &'static str },

    #[error("sort mismatch assigning next-state of '{name}'")]
    SortMismatch { name: String },

    #[error("'{name}' is not a state variable")]
    NotAStateVar { name: String },
}

pub type TsResult<T> = Result<T, TsError>;
