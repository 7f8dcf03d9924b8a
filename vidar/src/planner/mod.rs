//! Closed form reference trajectories of the ICP and CMP.
//!
//! The CMP is planned as a piecewise polynomial over the queued footsteps. Because the ICP
//! follows `ξ̇ = ω (ξ - p)`, every segment has the closed form solution
//!
//! ```text
//! ξ(t) = q(t) + e^{ω (t - T)} (ξ_end - q(T)),    q = Σ p⁽ᵏ⁾ / ωᵏ
//! ```
//!
//! and the segment end values follow from a backward recursion that starts at the point where
//! the robot comes to rest.

mod polynomial;

use nalgebra::Isometry3;
use serde::{Deserialize, Serialize};

pub use polynomial::Polynomial;

use crate::{
    Error, GRAVITY, Result,
    config::{ensure_positive, ensure_range},
    geometry::{Point, Vector},
    types::{Feet, Footstep, FootstepTiming, Side, rotate, yaw},
};

/// Segments shorter than this are skipped.
const MIN_SEGMENT_DURATION: f64 = 1e-9;

/// Configuration of the ICP planner.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct PlannerConfig {
    /// Natural frequency of the inverted pendulum, `sqrt(g / z)`.
    pub omega: f64,
    /// Number of footsteps the planner can hold.
    pub max_number_of_footsteps: usize,
    /// Start of the entry to exit CMP spline, as a fraction of the swing duration.
    pub swing_spline_start_fraction: f64,
    /// End of the entry to exit CMP spline, as a fraction of the swing duration.
    pub swing_spline_end_fraction: f64,
    /// Duration in seconds of the transfer to standing after the last footstep.
    pub final_transfer_duration: f64,
    /// Entry CMP in the sole frame as (forward, inward).
    pub entry_offset: Vector,
    /// Exit CMP in the sole frame as (forward, inward).
    pub exit_offset: Vector,
    /// Whether the swing leg's angular momentum shifts the CMP.
    pub use_angular_momentum: bool,
    /// Mass of the robot in kg.
    pub total_mass: f64,
    /// Mass of a swing leg in kg.
    pub swing_leg_mass: f64,
    /// Height of the CoM above the swing leg's mass in meters.
    pub swing_leg_lever: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            omega: 3.4,
            max_number_of_footsteps: 8,
            swing_spline_start_fraction: 0.2,
            swing_spline_end_fraction: 0.8,
            final_transfer_duration: 0.2,
            entry_offset: Vector::new(0.0, 0.006),
            exit_offset: Vector::new(0.03, 0.012),
            use_angular_momentum: true,
            total_mass: 150.0,
            swing_leg_mass: 12.0,
            swing_leg_lever: 0.45,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("omega", self.omega)?;
        if !(0.0..=1.0).contains(&self.swing_spline_start_fraction)
            || !(self.swing_spline_start_fraction..=1.0).contains(&self.swing_spline_end_fraction)
        {
            return Err(Error::InvalidSwingSplit {
                start: self.swing_spline_start_fraction,
                end: self.swing_spline_end_fraction,
            });
        }
        ensure_range("final_transfer_duration", self.final_transfer_duration, 0.0, f64::MAX)?;
        ensure_positive("total_mass", self.total_mass)?;
        ensure_range("swing_leg_mass", self.swing_leg_mass, 0.0, self.total_mass)?;
        ensure_range("swing_leg_lever", self.swing_leg_lever, 0.0, f64::MAX)
    }
}

/// The phase the robot is in when a plan is computed.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PlanPhase {
    /// Both feet on the ground, the plan starts with the transfer of the first footstep.
    #[default]
    Transfer,
    /// The first footstep is swinging, the plan starts with its swing.
    Swing,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Transfer,
    SwingEntry,
    SwingSpline,
    SwingExit,
    FinalTransfer,
}

/// A piece of the plan with polynomial CMP.
#[derive(Serialize, Debug, Clone, Copy)]
pub struct Segment {
    pub kind: SegmentKind,
    pub start_time: f64,
    pub duration: f64,
    /// The geometric CMP, without the angular momentum correction.
    pub cop: Polynomial,
    pub cmp: Polynomial,
    pub centroidal_torque: Polynomial,
    pub angular_momentum: Polynomial,
    particular: Polynomial,
    pub icp_start: Vector,
    pub icp_end: Vector,
}

impl Segment {
    #[must_use]
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Reference values at a single instant.
#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct ReferenceState {
    pub icp: Point,
    pub icp_velocity: Vector,
    pub cmp: Point,
    pub cmp_velocity: Vector,
    /// The CMP without the angular momentum correction.
    pub cop: Point,
    pub centroidal_torque: Vector,
    pub angular_momentum: Vector,
}

impl ReferenceState {
    /// Standing still with everything at `point`.
    #[must_use]
    pub fn at_rest(point: Point) -> Self {
        Self {
            icp: point,
            icp_velocity: Vector::zeros(),
            cmp: point,
            cmp_velocity: Vector::zeros(),
            cop: point,
            centroidal_torque: Vector::zeros(),
            angular_momentum: Vector::zeros(),
        }
    }
}

impl Default for ReferenceState {
    fn default() -> Self {
        Self::at_rest(Point::origin())
    }
}

/// Horizontal placement of a foot.
#[derive(Debug, Clone, Copy)]
struct Placement {
    position: Vector,
    yaw: f64,
}

/// A footstep reduced to what shapes the plan.
#[derive(Debug, Clone, Copy)]
struct PlannedStep {
    side: Side,
    placement: Placement,
    timing: FootstepTiming,
}

/// What to include when building a plan.
#[derive(Debug, Clone, Copy)]
struct BuildOptions {
    offsets: bool,
    angular_momentum: bool,
}

/// Plans the reference ICP and CMP over the queued footsteps.
#[derive(Debug, Clone)]
pub struct IcpPlanner {
    config: PlannerConfig,
    steps: Vec<PlannedStep>,
    unit_steps: Vec<PlannedStep>,
    segments: Vec<Segment>,
    scratch: Vec<Segment>,
    recursion_multipliers: Vec<f64>,
    /// Index of the last segment of the first footstep.
    current_step_end: Option<usize>,
}

impl IcpPlanner {
    pub fn new(config: &PlannerConfig) -> Result<Self> {
        config.validate()?;
        let capacity = 4 * config.max_number_of_footsteps + 1;

        Ok(Self {
            config: config.clone(),
            steps: Vec::with_capacity(config.max_number_of_footsteps),
            unit_steps: Vec::with_capacity(config.max_number_of_footsteps),
            segments: Vec::with_capacity(capacity),
            scratch: Vec::with_capacity(capacity),
            recursion_multipliers: Vec::with_capacity(config.max_number_of_footsteps),
            current_step_end: None,
        })
    }

    #[must_use]
    pub fn omega(&self) -> f64 {
        self.config.omega
    }

    /// Plans over `footsteps`, starting from the current `feet` poses in the world frame.
    ///
    /// Time zero of the plan is the start of the current `phase`.
    pub fn compute_plan(
        &mut self,
        feet: &Feet<Isometry3<f64>>,
        footsteps: &[Footstep],
        phase: PlanPhase,
    ) -> Result<()> {
        if footsteps.len() > self.config.max_number_of_footsteps {
            return Err(Error::TooManyFootsteps {
                count: footsteps.len(),
                capacity: self.config.max_number_of_footsteps,
            });
        }

        let initial = feet.map(|_, pose| Placement {
            position: pose.translation.vector.xy(),
            yaw: yaw(pose),
        });
        self.steps.clear();
        self.steps.extend(footsteps.iter().map(|footstep| PlannedStep {
            side: footstep.side,
            placement: Placement {
                position: footstep.position_2d().coords,
                yaw: footstep.yaw(),
            },
            timing: footstep.timing,
        }));

        let options = BuildOptions {
            offsets: true,
            angular_momentum: self.config.use_angular_momentum,
        };
        let mut segments = std::mem::take(&mut self.segments);
        self.current_step_end = self.build(&initial, &self.steps, phase, options, &mut segments);
        self.segments = segments;

        self.compute_recursion_multipliers(phase);
        Ok(())
    }

    /// Sensitivity of the ICP at the end of the current step to each footstep position.
    ///
    /// The plan is linear in the footstep positions, so the multipliers follow from plans where
    /// a single footstep sits at one and everything else at zero.
    fn compute_recursion_multipliers(&mut self, phase: PlanPhase) {
        self.recursion_multipliers.clear();
        let origin = Placement {
            position: Vector::zeros(),
            yaw: 0.0,
        };
        let initial = Feet::new(origin, origin);
        let options = BuildOptions {
            offsets: false,
            angular_momentum: false,
        };

        let mut unit_steps = std::mem::take(&mut self.unit_steps);
        unit_steps.clone_from(&self.steps);
        let mut scratch = std::mem::take(&mut self.scratch);
        for index in 0..self.steps.len() {
            for (other, step) in unit_steps.iter_mut().enumerate() {
                step.placement = origin;
                if other == index {
                    step.placement.position = Vector::x();
                }
            }

            let multiplier = self
                .build(&initial, &unit_steps, phase, options, &mut scratch)
                .map_or(0.0, |end| scratch[end].icp_end.x);
            self.recursion_multipliers.push(multiplier);
        }
        self.scratch = scratch;
        self.unit_steps = unit_steps;
    }

    /// Fills `segments` and returns the index of the last segment of the first footstep.
    fn build(
        &self,
        initial: &Feet<Placement>,
        steps: &[PlannedStep],
        phase: PlanPhase,
        options: BuildOptions,
        segments: &mut Vec<Segment>,
    ) -> Option<usize> {
        segments.clear();
        let mut placements = *initial;
        let mut current_step_end = None;
        let mut time = 0.0;

        let cmp_at = |placement: &Placement, side: Side, offset: Vector| -> Vector {
            if !options.offsets {
                return placement.position;
            }
            let local = Vector::new(offset.x, -side.sign() * offset.y);
            placement.position + rotate(local, placement.yaw)
        };

        let mut previous_cmp = match steps.first() {
            // the swing foot carried the weight before the first transfer
            Some(first) => cmp_at(placements.get(first.side), first.side, self.config.exit_offset),
            None => (placements.left.position + placements.right.position) / 2.0,
        };

        let mut push = |segments: &mut Vec<Segment>, kind, duration: f64, cop: Polynomial, correction: &AngularMomentumCorrection| {
            if duration < MIN_SEGMENT_DURATION {
                return;
            }
            segments.push(Segment {
                kind,
                start_time: time,
                duration,
                cop,
                cmp: cop + correction.cmp_shift,
                centroidal_torque: correction.torque,
                angular_momentum: correction.angular_momentum,
                particular: Polynomial::zero(),
                icp_start: Vector::zeros(),
                icp_end: Vector::zeros(),
            });
            time += duration;
        };

        let none = AngularMomentumCorrection::default();
        for (index, step) in steps.iter().enumerate() {
            let stance = step.side.opposite();
            let entry = cmp_at(placements.get(stance), stance, self.config.entry_offset);
            let exit = cmp_at(placements.get(stance), stance, self.config.exit_offset);

            let transfer = step.timing.transfer_duration();
            if !(index == 0 && phase == PlanPhase::Swing) {
                push(
                    segments,
                    SegmentKind::Transfer,
                    transfer,
                    Polynomial::cubic_blend(previous_cmp, entry, transfer),
                    &none,
                );
            }

            let swing = step.timing.swing_duration();
            let spline_start = self.config.swing_spline_start_fraction * swing;
            let spline_end = self.config.swing_spline_end_fraction * swing;
            let correction = if options.angular_momentum && swing >= MIN_SEGMENT_DURATION {
                self.angular_momentum_correction(step.placement.position - placements.get(step.side).position, swing)
            } else {
                AngularMomentumCorrection::default()
            };

            push(
                segments,
                SegmentKind::SwingEntry,
                spline_start,
                Polynomial::constant(entry),
                &correction,
            );
            push(
                segments,
                SegmentKind::SwingSpline,
                spline_end - spline_start,
                Polynomial::cubic_blend(entry, exit, spline_end - spline_start),
                &correction.shifted(spline_start),
            );
            push(
                segments,
                SegmentKind::SwingExit,
                swing - spline_end,
                Polynomial::constant(exit),
                &correction.shifted(spline_end),
            );

            if index == 0 {
                current_step_end = segments.len().checked_sub(1);
            }

            *placements.get_mut(step.side) = step.placement;
            previous_cmp = exit;
        }

        let rest = (placements.left.position + placements.right.position) / 2.0;
        push(
            segments,
            SegmentKind::FinalTransfer,
            self.config.final_transfer_duration,
            Polynomial::cubic_blend(previous_cmp, rest, self.config.final_transfer_duration),
            &none,
        );
        if segments.is_empty() {
            // standing without a final transfer, hold the resting point for an instant
            push(segments, SegmentKind::FinalTransfer, MIN_SEGMENT_DURATION, Polynomial::constant(rest), &none);
        }

        self.recurse_backward(segments);
        current_step_end
    }

    /// Resolves the ICP at every segment boundary, starting from rest at the last CMP.
    fn recurse_backward(&self, segments: &mut [Segment]) {
        let omega = self.config.omega;
        let Some(last) = segments.last() else {
            return;
        };
        let mut icp_end = last.cmp.evaluate(last.duration);

        for segment in segments.iter_mut().rev() {
            segment.particular = segment.cmp.icp_particular_solution(omega);
            segment.icp_end = icp_end;
            segment.icp_start = segment.particular.evaluate(0.0)
                + (-omega * segment.duration).exp() * (icp_end - segment.particular.evaluate(segment.duration));
            icp_end = segment.icp_start;
        }
    }

    /// CMP shift, centroidal torque and angular momentum of a minimum jerk swing.
    fn angular_momentum_correction(&self, displacement: Vector, swing: f64) -> AngularMomentumCorrection {
        let lever_mass = self.config.swing_leg_mass * self.config.swing_leg_lever;
        let acceleration = Polynomial::minimum_jerk_acceleration(displacement, swing);
        let torque = acceleration.map(|a| lever_mass * Vector::new(a.y, -a.x));

        AngularMomentumCorrection {
            cmp_shift: torque.map(|t| Vector::new(t.y, -t.x) / (self.config.total_mass * GRAVITY)),
            torque,
            angular_momentum: torque.integral(),
        }
    }

    /// The reference at `time` since the start of the plan, clamped to the planned interval.
    ///
    /// Without a plan this is the origin at rest.
    #[must_use]
    pub fn compute(&self, time: f64) -> ReferenceState {
        let Some(last) = self.segments.last() else {
            return ReferenceState::default();
        };
        let time = time.clamp(0.0, last.end_time());
        let index = self
            .segments
            .partition_point(|segment| segment.end_time() < time)
            .min(self.segments.len() - 1);

        self.evaluate_segment(index, time - self.segments[index].start_time)
    }

    fn evaluate_segment(&self, index: usize, local_time: f64) -> ReferenceState {
        let omega = self.config.omega;
        let segment = &self.segments[index];
        let t = local_time.clamp(0.0, segment.duration);

        let cmp = segment.cmp.evaluate(t);
        let icp = segment.particular.evaluate(t)
            + (omega * (t - segment.duration)).exp()
                * (segment.icp_end - segment.particular.evaluate(segment.duration));

        ReferenceState {
            icp: Point::from(icp),
            icp_velocity: omega * (icp - cmp),
            cmp: Point::from(cmp),
            cmp_velocity: segment.cmp.derivative().evaluate(t),
            cop: Point::from(segment.cop.evaluate(t)),
            centroidal_torque: segment.centroidal_torque.evaluate(t),
            angular_momentum: segment.angular_momentum.evaluate(t),
        }
    }

    /// Clears the plan.
    pub fn reset(&mut self) {
        self.steps.clear();
        self.segments.clear();
        self.recursion_multipliers.clear();
        self.current_step_end = None;
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Time at which the first footstep touches down, if there is one.
    #[must_use]
    pub fn current_step_end_time(&self) -> Option<f64> {
        self.current_step_end.map(|index| self.segments[index].end_time())
    }

    #[must_use]
    pub fn time_remaining_in_current_step(&self, time: f64) -> f64 {
        self.current_step_end_time()
            .map_or(0.0, |end| (end - time).max(0.0))
    }

    #[must_use]
    pub fn icp_at_end_of_current_step(&self) -> Option<Point> {
        self.current_step_end
            .map(|index| Point::from(self.segments[index].icp_end))
    }

    /// Where the ICP comes to rest after the last footstep.
    #[must_use]
    pub fn final_icp(&self) -> Option<Point> {
        self.segments.last().map(|segment| Point::from(segment.icp_end))
    }

    /// Change of the ICP at the end of the current step per unit change of footstep `index`.
    #[must_use]
    pub fn footstep_recursion_multiplier(&self, index: usize) -> f64 {
        self.recursion_multipliers.get(index).copied().unwrap_or(0.0)
    }

    #[must_use]
    pub fn recursion_multipliers(&self) -> &[f64] {
        &self.recursion_multipliers
    }
}

/// Contribution of the swing leg to the CMP, as polynomials in swing time.
#[derive(Debug, Default, Clone, Copy)]
struct AngularMomentumCorrection {
    cmp_shift: Polynomial,
    torque: Polynomial,
    angular_momentum: Polynomial,
}

impl AngularMomentumCorrection {
    fn shifted(&self, offset: f64) -> Self {
        Self {
            cmp_shift: self.cmp_shift.shifted(offset),
            torque: self.torque.shifted(offset),
            angular_momentum: self.angular_momentum.shifted(offset),
        }
    }
}

#[cfg(test)]
mod tests;
