//! Splits ICP feedback between CMP feedback and footstep adjustment.
//!
//! Every tick a small quadratic program trades off moving the upcoming footsteps against moving
//! the CMP, subject to the linearized ICP dynamics
//!
//! ```text
//! e = G⁻¹ (δcop + δam) + Σ e^{-ω τ} βᵢ δfᵢ + s
//! ```
//!
//! where `e` is the ICP error, `G` the feedback gain matrix, `τ` the time remaining in the
//! current step, `βᵢ` the recursion multiplier of footstep `i` and `s` a penalized slack.
//!
//! The support polygon constrains both the CoP and the CMP, which is the CoP shifted by the
//! angular momentum term.

mod config;

use nalgebra::{Isometry2, Matrix2, SMatrix, SVector};
use qp::{ActiveSetSolver, QuadraticProgram, Status};
use serde::Serialize;

pub use config::{OptimizationConfig, ReachabilityConfig};

use crate::{
    Result,
    config::ensure_positive,
    geometry::{ConvexPolygon, EPSILON, Point, Vector},
    planner::ReferenceState,
    types::{Footstep, rotate},
};

/// Largest number of footsteps the controller can adjust.
pub const MAX_FOOTSTEPS: usize = 3;
/// Support polygons with more vertices do not constrain the CoP and CMP.
pub const MAX_SUPPORT_VERTICES: usize = 16;

const VARIABLES: usize = 2 * MAX_FOOTSTEPS + 4;
const CONSTRAINTS: usize = 4 * MAX_FOOTSTEPS + 2 * MAX_SUPPORT_VERTICES;
const COP: usize = 2 * MAX_FOOTSTEPS;
const ANGULAR_MOMENTUM: usize = COP + 2;
const SOLVER_TOLERANCE: f64 = 1e-9;

type Variables = SVector<f64, VARIABLES>;
type Dynamics = SMatrix<f64, 2, VARIABLES>;

/// How the last solution was obtained.
#[derive(Serialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SolutionStatus {
    #[default]
    Optimal,
    /// The solver ran out of iterations, the solution is feasible but not optimal.
    IterationLimit,
    /// The solver failed, the solution is the feasible starting point.
    Fallback,
}

/// Everything the controller needs for one tick, in the world frame.
#[derive(Debug, Clone, Copy)]
pub struct OptimizationInput<'a> {
    pub measured_icp: Point,
    pub reference: &'a ReferenceState,
    /// Time in seconds until the current step touches down.
    pub time_remaining: f64,
    /// Sensitivity of the end of step ICP to each footstep, see
    /// [`IcpPlanner::footstep_recursion_multiplier`](crate::planner::IcpPlanner::footstep_recursion_multiplier).
    pub recursion_multipliers: &'a [f64],
    /// Horizontal pose of the stance foot.
    pub stance_pose: Isometry2<f64>,
    /// The nominal upcoming footsteps.
    pub footsteps: &'a [Footstep],
    pub support_polygon: Option<&'a ConvexPolygon>,
    pub double_support: bool,
}

/// Telemetry of the optimization controller.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct OptimizationDiagnostics {
    pub status: SolutionStatus,
    pub iterations: usize,
    pub warm_started: bool,
    pub adjusted_footsteps: usize,
    /// Whether the CoP and CMP were constrained to the support polygon.
    pub cop_constrained: bool,
    /// Constraints left out of the last program because they could not be represented.
    pub dropped_constraints: usize,
    /// Norm of the ICP error.
    pub residual_before: f64,
    /// Norm of the dynamics slack of the applied solution.
    pub residual_after: f64,
    /// Weights of the first footstep in its own frame, as (forward, lateral).
    pub footstep_weights: Vector,
    /// Feedback weights in the stance frame, as (forward, lateral).
    pub feedback_weights: Vector,
    pub dynamic_relaxation_weight: f64,
}

/// Computes the desired CMP and footstep adjustments that bring the ICP back to its reference.
#[derive(Debug, Clone)]
pub struct OptimizationController {
    config: OptimizationConfig,
    omega: f64,
    dt: f64,
    solver: ActiveSetSolver<VARIABLES>,
    program: QuadraticProgram<VARIABLES, CONSTRAINTS>,
    /// Raw solution of the previous tick.
    previous: Option<Variables>,
    nominal: [Point; MAX_FOOTSTEPS],
    adjustments: [Vector; MAX_FOOTSTEPS],
    footstep_count: usize,
    desired_cmp: Point,
    desired_cop: Point,
    diagnostics: OptimizationDiagnostics,
}

impl OptimizationController {
    /// Creates a controller for a pendulum with natural frequency `omega`, ticking every `dt`
    /// seconds.
    pub fn new(config: &OptimizationConfig, omega: f64, dt: f64) -> Result<Self> {
        config.validate()?;
        ensure_positive("omega", omega)?;
        ensure_positive("control_period", dt)?;

        Ok(Self {
            config: config.clone(),
            omega,
            dt,
            solver: ActiveSetSolver::new(config.max_iterations, SOLVER_TOLERANCE),
            program: QuadraticProgram::default(),
            previous: None,
            nominal: [Point::origin(); MAX_FOOTSTEPS],
            adjustments: [Vector::zeros(); MAX_FOOTSTEPS],
            footstep_count: 0,
            desired_cmp: Point::origin(),
            desired_cop: Point::origin(),
            diagnostics: OptimizationDiagnostics::default(),
        })
    }

    /// Solves one tick.
    pub fn compute(&mut self, input: &OptimizationInput) -> SolutionStatus {
        let error = input.measured_icp - input.reference.icp;
        let adjust_steps = self.config.use_step_adjustment
            && !input.double_support
            && input.time_remaining > self.config.minimum_time_remaining;
        let count = if adjust_steps {
            self.config
                .number_of_footsteps_to_consider
                .min(input.footsteps.len())
                .min(MAX_FOOTSTEPS)
        } else {
            0
        };
        self.footstep_count = count;
        for (nominal, footstep) in self.nominal.iter_mut().zip(input.footsteps) {
            *nominal = footstep.position_2d();
        }

        let dynamics = self.dynamics_matrix(input, count);
        self.build_cost(input, count, &dynamics, error);
        let support = self.build_constraints(input, count);

        let start = self.feasible_start(input, count, support.as_ref());
        let warm_start = self
            .previous
            .filter(|previous| self.config.use_warm_start && self.program.is_feasible(previous, SOLVER_TOLERANCE));
        self.diagnostics.warm_started = warm_start.is_some();

        let (solution, status, iterations) = match self.solver.solve(&self.program, warm_start.unwrap_or(start)) {
            Ok(solution) => {
                let status = match solution.status {
                    Status::Optimal => SolutionStatus::Optimal,
                    Status::IterationLimit => SolutionStatus::IterationLimit,
                };
                (solution.x, status, solution.iterations)
            }
            Err(error) => {
                tracing::warn!(%error, "ICP optimization failed, using the feasible start");
                (start, SolutionStatus::Fallback, 0)
            }
        };
        self.previous = Some(solution);

        let mut applied = solution;
        for index in 0..MAX_FOOTSTEPS {
            let adjustment = if index < count {
                self.post_process(input, index, solution.fixed_rows::<2>(2 * index).into_owned())
            } else {
                Vector::zeros()
            };
            self.adjustments[index] = adjustment;
            applied.fixed_rows_mut::<2>(2 * index).copy_from(&adjustment);
        }

        let cop_feedback: Vector = solution.fixed_rows::<2>(COP).into_owned();
        let angular_momentum: Vector = solution.fixed_rows::<2>(ANGULAR_MOMENTUM).into_owned();
        self.desired_cop = input.reference.cop + cop_feedback;
        self.desired_cmp = input.reference.cmp + cop_feedback + angular_momentum;

        self.diagnostics.status = status;
        self.diagnostics.iterations = iterations;
        self.diagnostics.adjusted_footsteps = count;
        self.diagnostics.cop_constrained = support.is_some();
        self.diagnostics.residual_before = error.norm();
        self.diagnostics.residual_after = (dynamics * applied - error).norm();

        status
    }

    /// The linearized dynamics `J x = e`.
    fn dynamics_matrix(&self, input: &OptimizationInput, count: usize) -> Dynamics {
        let mut dynamics = Dynamics::zeros();
        let decay = (-self.omega * input.time_remaining.max(0.0)).exp();
        for index in 0..count {
            let multiplier = input.recursion_multipliers.get(index).copied().unwrap_or(0.0);
            dynamics
                .fixed_view_mut::<2, 2>(0, 2 * index)
                .copy_from(&(decay * multiplier * Matrix2::identity()));
        }

        let inverse_gain = self.gain_matrix(input.reference.icp_velocity, true);
        dynamics.fixed_view_mut::<2, 2>(0, COP).copy_from(&inverse_gain);
        if self.config.use_angular_momentum {
            dynamics.fixed_view_mut::<2, 2>(0, ANGULAR_MOMENTUM).copy_from(&inverse_gain);
        }

        dynamics
    }

    /// The feedback gain matrix, or its inverse.
    ///
    /// Along the desired ICP velocity the parallel gain applies, across it the orthogonal gain.
    fn gain_matrix(&self, icp_velocity: Vector, inverse: bool) -> Matrix2<f64> {
        let invert = |gain: f64| if inverse { 1.0 / gain } else { gain };
        let parallel = invert(self.config.feedback_parallel_gain);
        let orthogonal = invert(self.config.feedback_orthogonal_gain);

        match icp_velocity.try_normalize(EPSILON) {
            Some(direction) => {
                let projection = direction * direction.transpose();
                parallel * projection + orthogonal * (Matrix2::identity() - projection)
            }
            None => orthogonal * Matrix2::identity(),
        }
    }

    fn build_cost(&mut self, input: &OptimizationInput, count: usize, dynamics: &Dynamics, error: Vector) {
        let config = &self.config;
        let previous = self.previous.unwrap_or_else(Variables::zeros);
        let mut hessian = SMatrix::<f64, VARIABLES, VARIABLES>::zeros();
        let mut gradient = Variables::zeros();

        // adds `(x - target)ᵀ W (x - target)` for the pair of variables at `index`
        let mut add_quadratic = |index: usize, weight: Matrix2<f64>, target: Vector| {
            let mut block = hessian.fixed_view_mut::<2, 2>(index, index);
            block += 2.0 * weight;
            let mut rows = gradient.fixed_rows_mut::<2>(index);
            rows -= 2.0 * weight * target;
        };

        let time_scale = if config.scale_step_regularization_weight_with_time {
            input.time_remaining.max(config.minimum_time_remaining)
        } else {
            1.0
        };
        for index in 0..MAX_FOOTSTEPS {
            if index >= count {
                // decoupled from everything else, so the optimum stays at zero
                add_quadratic(2 * index, Matrix2::identity(), Vector::zeros());
                continue;
            }

            let scale = if config.scale_upcoming_step_weights {
                (index + 1) as f64
            } else {
                1.0
            };
            let local = Vector::new(
                (config.forward_footstep_weight / scale).max(config.minimum_footstep_weight),
                (config.lateral_footstep_weight / scale).max(config.minimum_footstep_weight),
            );
            if index == 0 {
                self.diagnostics.footstep_weights = local;
            }
            add_quadratic(2 * index, frame_weight(local, input.footsteps[index].yaw()), Vector::zeros());

            if config.use_footstep_regularization {
                let weight = config.footstep_regularization_weight / self.dt / time_scale;
                let target = previous.fixed_rows::<2>(2 * index).into_owned();
                add_quadratic(2 * index, weight * Matrix2::identity(), target);
            }
        }

        let gain_scale = if config.scale_feedback_weight_with_gain {
            (config.feedback_parallel_gain + config.feedback_orthogonal_gain) / 2.0
        } else {
            1.0
        };
        let feedback = Vector::new(
            (config.feedback_forward_weight / gain_scale).max(config.minimum_feedback_weight),
            (config.feedback_lateral_weight / gain_scale).max(config.minimum_feedback_weight),
        );
        self.diagnostics.feedback_weights = feedback;
        add_quadratic(COP, frame_weight(feedback, input.stance_pose.rotation.angle()), Vector::zeros());
        if config.use_feedback_regularization {
            let weight = config.feedback_regularization_weight / self.dt;
            let target = previous.fixed_rows::<2>(COP).into_owned();
            add_quadratic(COP, weight * Matrix2::identity(), target);
        }

        let angular_momentum_weight = if config.use_angular_momentum {
            config.angular_momentum_minimization_weight.max(config.minimum_feedback_weight)
        } else {
            1.0
        };
        add_quadratic(ANGULAR_MOMENTUM, angular_momentum_weight * Matrix2::identity(), Vector::zeros());

        let mut relaxation = config.dynamic_relaxation_weight;
        if input.double_support {
            relaxation /= config.dynamic_relaxation_double_support_weight_modifier;
        }
        self.diagnostics.dynamic_relaxation_weight = relaxation;
        hessian += 2.0 * relaxation * dynamics.transpose() * dynamics;
        gradient -= 2.0 * relaxation * dynamics.transpose() * error;

        self.program.hessian = hessian;
        self.program.gradient = gradient;
    }

    /// Adds the reachability and support constraints, returns the polygon the CoP and CMP are
    /// constrained to.
    fn build_constraints(&mut self, input: &OptimizationInput, count: usize) -> Option<ConvexPolygon> {
        self.program.clear_constraints();
        self.diagnostics.dropped_constraints = 0;

        for index in 0..count {
            let frame = reachability_frame(input, index);
            let side = input.footsteps[index].side.sign();
            let forward = rotate(Vector::x(), frame.rotation.angle());
            let lateral = side * rotate(Vector::y(), frame.rotation.angle());
            let nominal = self.nominal[index] - Point::from(frame.translation.vector);
            let limits = self.config.reachability;

            for (direction, upper, lower) in [
                (forward, limits.forward, limits.backward),
                (lateral, limits.outer, limits.inner),
            ] {
                let offset = direction.dot(&nominal);
                self.add_row(&[2 * index], direction, upper - offset);
                self.add_row(&[2 * index], -direction, offset - lower);
            }
        }

        if !self.config.constrain_cmp_to_support_polygon {
            return None;
        }
        let polygon = input.support_polygon?;
        let support = polygon
            .shrunk(self.config.safe_cop_distance_to_edge)
            .unwrap_or_else(|| polygon.clone());
        if support.len() > MAX_SUPPORT_VERTICES {
            tracing::warn!(vertices = support.len(), "support polygon is too large to constrain the CMP");
            return None;
        }

        let cop = input.reference.cop.coords;
        let cmp = input.reference.cmp.coords;
        for halfplane in support.halfplanes() {
            let normal = halfplane.normal;
            self.add_row(&[COP], normal, halfplane.offset - normal.dot(&cop));
            self.add_row(&[COP, ANGULAR_MOMENTUM], normal, halfplane.offset - normal.dot(&cmp));
        }

        Some(support)
    }

    /// Adds `Σ direction · x[index..index + 2] ≤ bound` over all `indices`.
    fn add_row(&mut self, indices: &[usize], direction: Vector, bound: f64) {
        let mut row = Variables::zeros();
        for &index in indices {
            row.fixed_rows_mut::<2>(index).copy_from(&direction);
        }
        if let Err(error) = self.program.add_inequality(row, bound) {
            self.diagnostics.dropped_constraints += 1;
            tracing::warn!(%error, "dropped ICP optimization constraint");
        }
    }

    /// A point satisfying all constraints: clamped footsteps, the CoP moved into the support
    /// polygon and the angular momentum term moving the CMP into it as well.
    fn feasible_start(&self, input: &OptimizationInput, count: usize, support: Option<&ConvexPolygon>) -> Variables {
        let mut start = Variables::zeros();
        for index in 0..count {
            let adjustment = self.clamp_to_reachability(input, index, Vector::zeros());
            start.fixed_rows_mut::<2>(2 * index).copy_from(&adjustment);
        }

        if let Some(support) = support {
            let cop = input.reference.cop;
            let cop_feedback = support.closest_point(cop) - cop;
            start.fixed_rows_mut::<2>(COP).copy_from(&cop_feedback);

            let cmp = input.reference.cmp + cop_feedback;
            start
                .fixed_rows_mut::<2>(ANGULAR_MOMENTUM)
                .copy_from(&(support.closest_point(cmp) - cmp));
        }

        start
    }

    /// Moves `adjustment` of footstep `index` the least amount needed to reach the box.
    fn clamp_to_reachability(&self, input: &OptimizationInput, index: usize, adjustment: Vector) -> Vector {
        let frame = reachability_frame(input, index);
        let side = input.footsteps[index].side.sign();
        let limits = &self.config.reachability;

        let local = frame.inverse_transform_point(&(self.nominal[index] + adjustment));
        let clamped = Point::new(
            local.x.clamp(limits.backward, limits.forward),
            side * (side * local.y).clamp(limits.inner, limits.outer),
        );

        frame * clamped - self.nominal[index]
    }

    /// Deadband, resolution hysteresis and a final clamp.
    fn post_process(&self, input: &OptimizationInput, index: usize, adjustment: Vector) -> Vector {
        let mut adjustment = adjustment;
        if adjustment.norm() < self.config.adjustment_deadband {
            adjustment = Vector::zeros();
        }

        let previous = self.adjustments[index];
        if (adjustment - previous).norm() < self.config.footstep_solution_resolution {
            adjustment = previous;
        }

        self.clamp_to_reachability(input, index, adjustment)
    }

    /// Moves `footstep` to the first adjusted position.
    ///
    /// Returns whether the footstep moved.
    pub fn apply_footstep_adjustment(&self, footstep: &mut Footstep) -> bool {
        let Some(position) = self.adjusted_footstep_position(0) else {
            return false;
        };
        if (footstep.position_2d() - position).norm() < EPSILON {
            return false;
        }

        footstep.set_position_2d(position);
        true
    }

    /// The adjusted position of footstep `index`, `None` if it is not adjusted.
    #[must_use]
    pub fn adjusted_footstep_position(&self, index: usize) -> Option<Point> {
        (index < self.footstep_count).then(|| self.nominal[index] + self.adjustments[index])
    }

    #[must_use]
    pub fn footstep_adjustment(&self, index: usize) -> Vector {
        self.adjustments.get(index).copied().unwrap_or_else(Vector::zeros)
    }

    #[must_use]
    pub fn desired_cmp(&self) -> Point {
        self.desired_cmp
    }

    #[must_use]
    pub fn desired_cop(&self) -> Point {
        self.desired_cop
    }

    /// The feedback gain matrix for the given desired ICP velocity.
    #[must_use]
    pub fn feedback_gain(&self, icp_velocity: Vector) -> Matrix2<f64> {
        self.gain_matrix(icp_velocity, false)
    }

    /// Forgets the previous solution, for instance at the start of a new step.
    pub fn reset(&mut self) {
        self.previous = None;
        self.adjustments = [Vector::zeros(); MAX_FOOTSTEPS];
        self.footstep_count = 0;
    }

    #[must_use]
    pub fn diagnostics(&self) -> &OptimizationDiagnostics {
        &self.diagnostics
    }
}

/// The frame the reachability of footstep `index` is measured in.
fn reachability_frame(input: &OptimizationInput, index: usize) -> Isometry2<f64> {
    match index.checked_sub(1) {
        Some(preceding) => input.footsteps[preceding].pose_2d(),
        None => input.stance_pose,
    }
}

/// A weight given along the axes of a frame with `yaw`, in the world frame.
fn frame_weight(local: Vector, yaw: f64) -> Matrix2<f64> {
    let forward = rotate(Vector::x(), yaw);
    let lateral = rotate(Vector::y(), yaw);

    local.x * forward * forward.transpose() + local.y * lateral * lateral.transpose()
}
