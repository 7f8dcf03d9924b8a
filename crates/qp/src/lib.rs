//! Dense convex quadratic programming with a primal active-set method.
//!
//! Problems have the form
//!
//! ```text
//! minimize    ½ xᵀ H x + gᵀ x
//! subject to  A x ≤ b
//! ```
//!
//! with `N` variables and at most `M` inequality rows. All storage is fixed size so a solve does
//! not allocate.

mod problem;
mod solver;

use thiserror::Error;

pub use problem::QuadraticProgram;
pub use solver::{ActiveSetSolver, Solution, Status};

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("Hessian is not positive definite")]
    NotPositiveDefinite,
    #[error("Initial guess violates constraint {row} by {violation}")]
    InfeasibleStart { row: usize, violation: f64 },
    #[error("Cannot add more than {capacity} constraints")]
    TooManyConstraints { capacity: usize },
    #[error("Constraint row contains non-finite values")]
    NonFiniteConstraint,
    #[error("Working set became linearly dependent")]
    DegenerateWorkingSet,
}

pub type Result<T> = std::result::Result<T, Error>;
