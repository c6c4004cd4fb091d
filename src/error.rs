//! Error type shared by the model, the oracles and the decomposition loops.
//!
//! Solve outcomes such as infeasibility or unboundedness are *not* errors; they are
//! reported through [`SolveStatus`](crate::math::integer_linear::SolveStatus). The
//! variants below cover malformed input, missing certificates and the fatal internal
//! conditions of the decomposition algorithms.

use thiserror::Error;

use crate::math::integer_linear::{CutKind, SolveStatus};

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A variable id that is not owned by the model.
    #[error("variable {0} does not belong to this model")]
    UnknownVariable(usize),

    /// A constraint id that is not owned by the model (or was removed).
    #[error("constraint {0} does not belong to this model")]
    UnknownConstraint(usize),

    /// NaN or infinite coefficient / right-hand side.
    #[error("non-finite value {value} in {context}")]
    NonFinite { context: String, value: f64 },

    /// Lower bound above upper bound, or a NaN bound.
    #[error("inconsistent bounds [{lower}, {upper}] for variable `{name}`")]
    InconsistentBounds { name: String, lower: f64, upper: f64 },

    /// The model is structurally unusable for the requested algorithm.
    #[error("invalid model: {0}")]
    InvalidModel(String),

    /// Cutting-stock data that cannot produce any pattern.
    #[error("invalid instance: {0}")]
    InvalidInstance(String),

    /// A dual value or ray was requested but the solve did not produce one.
    #[error("{what} not available: {reason}")]
    MissingCertificate {
        what: &'static str,
        reason: &'static str,
    },

    /// No Benders cut can be derived from the subproblem outcome.
    #[error("cannot derive a Benders cut from subproblem status {0:?}")]
    CutDerivation(SolveStatus),

    /// A node or master relaxation stopped without an optimal, infeasible or unbounded verdict.
    #[error("relaxation ended with status {0:?}")]
    RelaxationFailed(SolveStatus),

    /// A part of the decomposition is unbounded, so no finite optimum exists.
    #[error("{0} is unbounded")]
    Unbounded(&'static str),

    /// The same violated cut was generated twice; the loop is not converging.
    #[error("{kind:?} cut regenerated at iteration {iteration}: the decomposition is not converging")]
    CutStagnation { kind: CutKind, iteration: usize },

    /// The diving heuristic could not make progress.
    #[error("diving heuristic stalled: {0}")]
    HeuristicStall(String),

    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
}

impl Error {
    pub(crate) fn non_finite(context: impl Into<String>, value: f64) -> Self {
        Error::NonFinite {
            context: context.into(),
            value,
        }
    }
}
