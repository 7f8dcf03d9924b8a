use serde::{Deserialize, Serialize};

use super::MAX_FOOTSTEPS;
use crate::{
    Error, Result,
    config::{ensure_positive, ensure_range},
};

/// Where an adjusted footstep may land, relative to the preceding foothold.
///
/// The lateral limits are mirrored for right footsteps, so `inner` and `outer` are always
/// distances away from the preceding foot.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ReachabilityConfig {
    /// Furthest forward placement in meters.
    pub forward: f64,
    /// Furthest backward placement in meters, usually negative.
    pub backward: f64,
    /// Furthest sideways placement in meters.
    pub outer: f64,
    /// Closest sideways placement in meters.
    pub inner: f64,
}

impl Default for ReachabilityConfig {
    fn default() -> Self {
        Self {
            forward: 0.5,
            backward: -0.3,
            outer: 0.5,
            inner: 0.1,
        }
    }
}

impl ReachabilityConfig {
    pub fn validate(&self) -> Result<()> {
        if self.forward.is_nan() || self.backward.is_nan() || self.forward <= self.backward {
            return Err(Error::EmptyReachability { name: "forward/backward" });
        }
        if self.outer.is_nan() || self.inner.is_nan() || self.outer <= self.inner {
            return Err(Error::EmptyReachability { name: "outer/inner" });
        }

        Ok(())
    }
}

/// Configuration for the ICP optimization controller.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OptimizationConfig {
    /// Number of upcoming footsteps that may be adjusted, at most three.
    pub number_of_footsteps_to_consider: usize,
    /// Cost of adjusting a footstep along its own forward axis.
    pub forward_footstep_weight: f64,
    /// Cost of adjusting a footstep along its own lateral axis.
    pub lateral_footstep_weight: f64,
    /// Cost of changing a footstep adjustment between ticks, divided by the control period.
    pub footstep_regularization_weight: f64,
    /// Cost of CoP feedback along the stance foot's forward axis.
    pub feedback_forward_weight: f64,
    /// Cost of CoP feedback along the stance foot's lateral axis.
    pub feedback_lateral_weight: f64,
    /// Cost of changing the CoP feedback between ticks, divided by the control period.
    pub feedback_regularization_weight: f64,
    /// Feedback gain along the desired ICP velocity.
    pub feedback_parallel_gain: f64,
    /// Feedback gain across the desired ICP velocity.
    pub feedback_orthogonal_gain: f64,
    /// Cost of violating the ICP dynamics.
    pub dynamic_relaxation_weight: f64,
    /// Divides the dynamics cost while both feet are on the ground.
    pub dynamic_relaxation_double_support_weight_modifier: f64,
    /// Cost of using angular momentum to move the CMP away from the CoP.
    pub angular_momentum_minimization_weight: f64,
    /// Whether the footstep regularization is divided by the time remaining, so it grows as the
    /// end of the step approaches.
    pub scale_step_regularization_weight_with_time: bool,
    /// Whether the feedback weights are divided by the mean feedback gain.
    pub scale_feedback_weight_with_gain: bool,
    /// Whether the weight of upcoming footstep `i` is divided by `i + 1`.
    pub scale_upcoming_step_weights: bool,
    pub use_feedback_regularization: bool,
    pub use_step_adjustment: bool,
    pub use_angular_momentum: bool,
    pub use_footstep_regularization: bool,
    pub minimum_footstep_weight: f64,
    pub minimum_feedback_weight: f64,
    /// Below this time remaining in seconds the footsteps are no longer adjusted.
    pub minimum_time_remaining: f64,
    /// Footstep adjustments shorter than this are dropped.
    pub adjustment_deadband: f64,
    /// Footstep adjustments are only updated when they change by more than this.
    pub footstep_solution_resolution: f64,
    /// Distance the CoP keeps from the edge of the support polygon.
    pub safe_cop_distance_to_edge: f64,
    /// Whether the CoP and CMP are kept inside the support polygon.
    pub constrain_cmp_to_support_polygon: bool,
    /// Whether the solver starts from the previous solution when it is still feasible.
    pub use_warm_start: bool,
    pub max_iterations: usize,
    pub reachability: ReachabilityConfig,
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            number_of_footsteps_to_consider: 1,
            forward_footstep_weight: 20.0,
            lateral_footstep_weight: 20.0,
            footstep_regularization_weight: 0.001,
            feedback_forward_weight: 0.5,
            feedback_lateral_weight: 0.5,
            feedback_regularization_weight: 0.0001,
            feedback_parallel_gain: 2.5,
            feedback_orthogonal_gain: 1.5,
            dynamic_relaxation_weight: 1000.0,
            dynamic_relaxation_double_support_weight_modifier: 4.0,
            angular_momentum_minimization_weight: 50.0,
            scale_step_regularization_weight_with_time: false,
            scale_feedback_weight_with_gain: false,
            scale_upcoming_step_weights: true,
            use_feedback_regularization: true,
            use_step_adjustment: true,
            use_angular_momentum: true,
            use_footstep_regularization: true,
            minimum_footstep_weight: 0.0001,
            minimum_feedback_weight: 0.0001,
            minimum_time_remaining: 0.001,
            adjustment_deadband: 0.02,
            footstep_solution_resolution: 0.015,
            safe_cop_distance_to_edge: 0.002,
            constrain_cmp_to_support_polygon: true,
            use_warm_start: true,
            max_iterations: 100,
            reachability: ReachabilityConfig::default(),
        }
    }
}

impl OptimizationConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_range(
            "number_of_footsteps_to_consider",
            self.number_of_footsteps_to_consider as f64,
            0.0,
            MAX_FOOTSTEPS as f64,
        )?;
        for (name, weight) in [
            ("forward_footstep_weight", self.forward_footstep_weight),
            ("lateral_footstep_weight", self.lateral_footstep_weight),
            ("footstep_regularization_weight", self.footstep_regularization_weight),
            ("feedback_forward_weight", self.feedback_forward_weight),
            ("feedback_lateral_weight", self.feedback_lateral_weight),
            ("feedback_regularization_weight", self.feedback_regularization_weight),
            ("angular_momentum_minimization_weight", self.angular_momentum_minimization_weight),
            ("adjustment_deadband", self.adjustment_deadband),
            ("footstep_solution_resolution", self.footstep_solution_resolution),
            ("safe_cop_distance_to_edge", self.safe_cop_distance_to_edge),
        ] {
            ensure_range(name, weight, 0.0, f64::MAX)?;
        }
        ensure_positive("feedback_parallel_gain", self.feedback_parallel_gain)?;
        ensure_positive("feedback_orthogonal_gain", self.feedback_orthogonal_gain)?;
        ensure_positive("dynamic_relaxation_weight", self.dynamic_relaxation_weight)?;
        ensure_positive(
            "dynamic_relaxation_double_support_weight_modifier",
            self.dynamic_relaxation_double_support_weight_modifier,
        )?;
        ensure_positive("minimum_footstep_weight", self.minimum_footstep_weight)?;
        ensure_positive("minimum_feedback_weight", self.minimum_feedback_weight)?;
        ensure_positive("minimum_time_remaining", self.minimum_time_remaining)?;
        ensure_positive("max_iterations", self.max_iterations as f64)?;

        self.reachability.validate()
    }
}
