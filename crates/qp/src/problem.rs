use nalgebra::{SMatrix, SVector};

use crate::{Error, Result};

/// A convex quadratic program with `N` variables and room for `M` inequality constraints.
#[derive(Clone, Debug)]
pub struct QuadraticProgram<const N: usize, const M: usize> {
    /// Symmetric positive definite cost matrix `H`.
    pub hessian: SMatrix<f64, N, N>,
    /// Linear cost term `g`.
    pub gradient: SVector<f64, N>,
    constraints: SMatrix<f64, M, N>,
    bounds: SVector<f64, M>,
    count: usize,
}

impl<const N: usize, const M: usize> Default for QuadraticProgram<N, M> {
    fn default() -> Self {
        Self::new(SMatrix::identity(), SVector::zeros())
    }
}

impl<const N: usize, const M: usize> QuadraticProgram<N, M> {
    #[must_use]
    pub fn new(hessian: SMatrix<f64, N, N>, gradient: SVector<f64, N>) -> Self {
        Self {
            hessian,
            gradient,
            constraints: SMatrix::zeros(),
            bounds: SVector::zeros(),
            count: 0,
        }
    }

    /// Adds the constraint `row · x ≤ bound`.
    pub fn add_inequality(&mut self, row: SVector<f64, N>, bound: f64) -> Result<()> {
        if self.count == M {
            return Err(Error::TooManyConstraints { capacity: M });
        }
        if !bound.is_finite() || row.iter().any(|value| !value.is_finite()) {
            return Err(Error::NonFiniteConstraint);
        }

        self.constraints.set_row(self.count, &row.transpose());
        self.bounds[self.count] = bound;
        self.count += 1;

        Ok(())
    }

    /// Adds `lower ≤ x[index] ≤ upper`.
    pub fn add_bounds(&mut self, index: usize, lower: f64, upper: f64) -> Result<()> {
        let mut row = SVector::zeros();
        row[index] = 1.0;
        self.add_inequality(row, upper)?;
        self.add_inequality(-row, -lower)
    }

    pub fn clear_constraints(&mut self) {
        self.constraints.fill(0.0);
        self.bounds.fill(0.0);
        self.count = 0;
    }

    #[must_use]
    pub fn constraint_count(&self) -> usize {
        self.count
    }

    #[must_use]
    pub fn row(&self, index: usize) -> SVector<f64, N> {
        self.constraints.row(index).transpose()
    }

    #[must_use]
    pub fn bound(&self, index: usize) -> f64 {
        self.bounds[index]
    }

    /// Signed violation of constraint `index`, positive when violated.
    #[must_use]
    pub fn violation(&self, index: usize, x: &SVector<f64, N>) -> f64 {
        self.row(index).dot(x) - self.bounds[index]
    }

    /// Largest violation over all constraints, zero for an unconstrained problem.
    #[must_use]
    pub fn max_violation(&self, x: &SVector<f64, N>) -> f64 {
        (0..self.count)
            .map(|index| self.violation(index, x))
            .fold(0.0, f64::max)
    }

    #[must_use]
    pub fn is_feasible(&self, x: &SVector<f64, N>, tolerance: f64) -> bool {
        self.max_violation(x) <= tolerance
    }

    #[must_use]
    pub fn objective(&self, x: &SVector<f64, N>) -> f64 {
        0.5 * (x.transpose() * self.hessian * x)[0] + self.gradient.dot(x)
    }
}
