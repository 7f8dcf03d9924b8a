use nalgebra::{Cholesky, Const, SMatrix, SVector};

use crate::{Error, QuadraticProgram, Result};

/// How a solve terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The KKT conditions hold within tolerance.
    Optimal,
    /// The iteration cap was hit. The iterate is still feasible, but not optimal.
    IterationLimit,
}

#[derive(Debug, Clone, Copy)]
pub struct Solution<const N: usize> {
    pub x: SVector<f64, N>,
    pub iterations: usize,
    pub status: Status,
    /// Number of constraints in the final working set.
    pub active_constraints: usize,
}

/// Primal active-set solver.
///
/// Starting from a feasible point, every iteration solves the equality constrained problem on the
/// current working set through the Schur complement `A_W H⁻¹ A_Wᵀ`. Steps are shortened at the
/// first blocking constraint, which then joins the working set, and constraints with a negative
/// multiplier leave it again. Since every iterate stays feasible, a solve that runs out of
/// iterations still returns a usable point.
#[derive(Debug, Clone, Copy)]
pub struct ActiveSetSolver<const N: usize> {
    pub max_iterations: usize,
    pub tolerance: f64,
}

impl<const N: usize> Default for ActiveSetSolver<N> {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
        }
    }
}

/// Indices of the constraints in the working set. Independent rows never exceed `N`.
struct WorkingSet<const N: usize> {
    rows: [usize; N],
    len: usize,
}

impl<const N: usize> WorkingSet<N> {
    fn new() -> Self {
        Self {
            rows: [0; N],
            len: 0,
        }
    }

    fn contains(&self, row: usize) -> bool {
        self.rows[..self.len].contains(&row)
    }

    fn is_full(&self) -> bool {
        self.len == N
    }

    fn push(&mut self, row: usize) {
        self.rows[self.len] = row;
        self.len += 1;
    }

    fn swap_remove(&mut self, slot: usize) {
        self.rows[slot] = self.rows[self.len - 1];
        self.len -= 1;
    }
}

impl<const N: usize> ActiveSetSolver<N> {
    #[must_use]
    pub fn new(max_iterations: usize, tolerance: f64) -> Self {
        Self {
            max_iterations,
            tolerance,
        }
    }

    /// Solves `qp` starting from the feasible point `initial`.
    pub fn solve<const M: usize>(
        &self,
        qp: &QuadraticProgram<N, M>,
        initial: SVector<f64, N>,
    ) -> Result<Solution<N>> {
        let cholesky = Cholesky::new(qp.hessian).ok_or(Error::NotPositiveDefinite)?;

        for row in 0..qp.constraint_count() {
            let violation = qp.violation(row, &initial);
            if violation > self.tolerance.sqrt() {
                return Err(Error::InfeasibleStart { row, violation });
            }
        }

        let mut x = initial;
        let mut working_set = WorkingSet::<N>::new();

        for iteration in 0..self.max_iterations {
            let (step, multipliers) = self.equality_step(qp, &cholesky, &x, &working_set)?;

            if step.norm() <= self.tolerance {
                let most_negative = (0..working_set.len)
                    .filter(|&slot| multipliers[slot] < -self.tolerance)
                    .min_by(|&a, &b| multipliers[a].total_cmp(&multipliers[b]));

                match most_negative {
                    Some(slot) => working_set.swap_remove(slot),
                    None => {
                        return Ok(Solution {
                            x,
                            iterations: iteration + 1,
                            status: Status::Optimal,
                            active_constraints: working_set.len,
                        });
                    }
                }
                continue;
            }

            let mut step_length = 1.0;
            let mut blocking = None;
            for row in 0..qp.constraint_count() {
                if working_set.contains(row) {
                    continue;
                }

                let a = qp.row(row);
                let rate = a.dot(&step);
                if rate <= self.tolerance {
                    continue;
                }

                let length = ((qp.bound(row) - a.dot(&x)) / rate).max(0.0);
                if length < step_length {
                    step_length = length;
                    blocking = Some(row);
                }
            }

            x += step_length * step;

            if let Some(row) = blocking {
                if working_set.is_full() {
                    return Err(Error::DegenerateWorkingSet);
                }
                working_set.push(row);
            }
        }

        Ok(Solution {
            x,
            iterations: self.max_iterations,
            status: Status::IterationLimit,
            active_constraints: working_set.len,
        })
    }

    /// Computes the step `p` and the multipliers `λ` of
    /// `H p + A_Wᵀ λ = -(H x + g)`, `A_W p = 0`.
    ///
    /// Unused slots of the working set are padded with identity rows in the Schur complement, so
    /// their multipliers are zero.
    fn equality_step<const M: usize>(
        &self,
        qp: &QuadraticProgram<N, M>,
        cholesky: &Cholesky<f64, Const<N>>,
        x: &SVector<f64, N>,
        working_set: &WorkingSet<N>,
    ) -> Result<(SVector<f64, N>, SVector<f64, N>)> {
        let gradient = qp.hessian * x + qp.gradient;
        let unconstrained: SVector<f64, N> = cholesky.solve(&gradient);

        if working_set.len == 0 {
            return Ok((-unconstrained, SVector::zeros()));
        }

        let mut active = SMatrix::<f64, N, N>::zeros();
        for (slot, &row) in working_set.rows[..working_set.len].iter().enumerate() {
            active.set_row(slot, &qp.row(row).transpose());
        }

        let h_inv_at: SMatrix<f64, N, N> = cholesky.solve(&active.transpose());
        let mut schur: SMatrix<f64, N, N> = active * h_inv_at;
        for slot in working_set.len..N {
            schur[(slot, slot)] = 1.0;
        }

        // positive definite as long as the active rows are independent
        let rhs: SVector<f64, N> = -(active * unconstrained);
        let multipliers: SVector<f64, N> = Cholesky::new(schur)
            .map(|schur| schur.solve(&rhs))
            .filter(|multipliers| multipliers.iter().all(|value| value.is_finite()))
            .ok_or(Error::DegenerateWorkingSet)?;

        let step: SVector<f64, N> = -(unconstrained + h_inv_at * multipliers);
        if !step.iter().all(|value| value.is_finite()) || step.norm() > self.tolerance.recip() {
            return Err(Error::DegenerateWorkingSet);
        }

        Ok((step, multipliers))
    }
}
