//! The per tick balance pipeline.

use nalgebra::{Isometry3, Vector3};
use serde::Serialize;

use crate::{
    BalanceConfig, Result,
    contact::{FootSwitchDiagnostics, WrenchFootSwitch},
    foothold::{FootholdCropper, FootholdDiagnostics, FootholdInput},
    geometry::{ConvexPolygon, Point},
    optimization::{OptimizationController, OptimizationDiagnostics, OptimizationInput},
    planner::{IcpPlanner, PlanPhase, ReferenceState},
    terrain::{SteppableRegion, TerrainConstraintHandler, TerrainDiagnostics},
    types::{ContactState, Feet, Footstep, PlaneContactState, Side, Wrench, pose_2d},
};

/// Measurements and commands for a single tick, in the world frame unless noted otherwise.
#[derive(Debug, Clone, Copy)]
pub struct BalanceInput<'a> {
    /// Force/torque measurement of each foot, in the sensor frame.
    pub wrenches: &'a Feet<Wrench>,
    /// Pose of each sole.
    pub foot_poses: &'a Feet<Isometry3<f64>>,
    /// Angular velocity of each foot, in the sole frame.
    pub foot_angular_velocities: &'a Feet<Vector3<f64>>,
    pub measured_icp: Point,
    /// The nominal footstep queue, the first footstep is the next one to touch down.
    pub footsteps: &'a [Footstep],
    pub phase: PlanPhase,
    /// Time in seconds since the start of `phase`.
    pub time_in_phase: f64,
}

/// Telemetry of the whole pipeline.
#[derive(Serialize, Debug, Clone)]
pub struct BalanceDiagnostics {
    pub contact: Feet<FootSwitchDiagnostics>,
    pub foothold: Feet<FootholdDiagnostics>,
    pub terrain: TerrainDiagnostics,
    pub optimization: OptimizationDiagnostics,
    pub reference: ReferenceState,
    pub desired_cmp: Point,
}

/// Runs contact detection, foothold cropping, terrain constraints, planning and the ICP
/// optimization, in that order, once per tick.
#[derive(Debug, Clone)]
pub struct BalanceController {
    soles: Feet<ConvexPolygon>,
    foot_switches: Feet<WrenchFootSwitch>,
    croppers: Feet<FootholdCropper>,
    contact_states: Feet<PlaneContactState>,
    terrain: TerrainConstraintHandler,
    planner: IcpPlanner,
    optimizer: OptimizationController,
    footsteps: Vec<Footstep>,
    reference: ReferenceState,
    support_polygon: Option<ConvexPolygon>,
    support_points: Vec<Point>,
    desired_cop: Point,
}

impl BalanceController {
    pub fn new(config: &BalanceConfig) -> Result<Self> {
        config.validate()?;
        let dt = config.dt();

        let soles = Feet::try_from_fn(|side| match side {
            Side::Left => config.foot.left_sole(),
            Side::Right => config.foot.right_sole(),
        })?;
        let foot_switches = Feet::try_from_fn(|side| WrenchFootSwitch::new(&config.contact, side, soles.get(side)))?;
        let croppers = Feet::try_from_fn(|side| FootholdCropper::new(&config.foothold, side, soles.get(side), dt))?;
        let contact_states = soles.map(|_, sole| PlaneContactState::new(false, sole.vertices().to_vec()));

        Ok(Self {
            terrain: TerrainConstraintHandler::new(&config.terrain, soles.clone())?,
            planner: IcpPlanner::new(&config.planner)?,
            optimizer: OptimizationController::new(&config.optimization, config.planner.omega, dt)?,
            footsteps: Vec::with_capacity(config.planner.max_number_of_footsteps),
            reference: ReferenceState::default(),
            support_polygon: None,
            support_points: Vec::with_capacity(2 * config.foot.sole_contact_points.len()),
            desired_cop: Point::origin(),
            soles,
            foot_switches,
            croppers,
            contact_states,
        })
    }

    /// Runs the complete pipeline for one tick.
    ///
    /// Fails only when the footstep queue exceeds the planner's capacity.
    pub fn tick(&mut self, input: &BalanceInput) -> Result<()> {
        self.update_contacts(input);
        self.update_footholds(input);

        self.footsteps.clear();
        self.footsteps.extend_from_slice(input.footsteps);
        if let Some(next) = self.footsteps.first_mut() {
            self.terrain.apply_constraint_to_footstep(next);
        }
        self.planner
            .compute_plan(input.foot_poses, &self.footsteps, input.phase)?;
        self.reference = self.planner.compute(input.time_in_phase);

        self.update_support_polygon(input.foot_poses);
        self.optimize(input);

        Ok(())
    }

    fn update_contacts(&mut self, input: &BalanceInput) {
        for side in [Side::Left, Side::Right] {
            let switch = self.foot_switches.get_mut(side);
            let was_in_contact = switch.contact_state().is_in_contact();
            let in_contact = switch.update(input.wrenches.get(side)).is_in_contact();

            let contact_state = self.contact_states.get_mut(side);
            if in_contact && !was_in_contact {
                // every touchdown starts a new support phase on the full sole
                let sole = self.soles.get(side);
                self.croppers.get_mut(side).initialize(sole);
                contact_state.set_contact_points(sole.vertices());
                self.optimizer.reset();
            }
            contact_state.in_contact = in_contact;
        }
    }

    fn update_footholds(&mut self, input: &BalanceInput) {
        for side in [Side::Left, Side::Right] {
            if !self.contact_states.get(side).in_contact {
                continue;
            }

            let sole_pose = pose_2d(input.foot_poses.get(side));
            let foothold_input = FootholdInput {
                measured_cop: self.foot_switches.get(side).cop(),
                desired_cop: sole_pose.inverse_transform_point(&self.desired_cop),
                angular_velocity: *input.foot_angular_velocities.get(side),
            };

            let cropper = self.croppers.get_mut(side);
            cropper.compute(&foothold_input);
            cropper.apply_shrunken_foothold(self.contact_states.get_mut(side));
        }
    }

    /// The convex hull of the contact points of all feet in contact.
    fn update_support_polygon(&mut self, foot_poses: &Feet<Isometry3<f64>>) {
        self.support_points.clear();
        for (side, contact_state) in self.contact_states.iter() {
            if !contact_state.in_contact {
                continue;
            }
            let sole_pose = pose_2d(foot_poses.get(side));
            self.support_points
                .extend(contact_state.contact_points.iter().map(|point| sole_pose * point));
        }

        self.support_polygon = ConvexPolygon::from_points(&self.support_points);
    }

    fn optimize(&mut self, input: &BalanceInput) {
        let in_contact = self.contact_states.map(|_, state| state.in_contact);
        let double_support = input.phase == PlanPhase::Transfer || (in_contact.left && in_contact.right);
        let stance = match (self.footsteps.first(), in_contact.left, in_contact.right) {
            (Some(next), _, _) => next.side.opposite(),
            (None, false, true) => Side::Right,
            (None, _, _) => Side::Left,
        };

        let status = self.optimizer.compute(&OptimizationInput {
            measured_icp: input.measured_icp,
            reference: &self.reference,
            time_remaining: self.planner.time_remaining_in_current_step(input.time_in_phase),
            recursion_multipliers: self.planner.recursion_multipliers(),
            stance_pose: pose_2d(input.foot_poses.get(stance)),
            footsteps: &self.footsteps,
            support_polygon: self.support_polygon.as_ref(),
            double_support,
        });
        tracing::trace!(?status, "ICP optimization");

        self.desired_cop = self.optimizer.desired_cop();
        if let Some(next) = self.footsteps.first_mut() {
            self.optimizer.apply_footstep_adjustment(next);
        }
    }

    /// Sets the region the next footstep has to land on, `None` removes the constraint.
    ///
    /// Returns `false` if the region was rejected.
    pub fn set_steppable_region(&mut self, region: Option<SteppableRegion>) -> bool {
        match region {
            Some(region) => self.terrain.set_steppable_region(region),
            None => {
                self.terrain.reset();
                true
            }
        }
    }

    /// Clears all state, as if the robot was just switched on.
    pub fn reset(&mut self) {
        for side in [Side::Left, Side::Right] {
            self.foot_switches.get_mut(side).reset();
            self.croppers.get_mut(side).initialize(self.soles.get(side));
            self.contact_states.get_mut(side).in_contact = false;
            self.contact_states
                .get_mut(side)
                .set_contact_points(self.soles.get(side).vertices());
        }
        self.terrain.reset();
        self.planner.reset();
        self.optimizer.reset();
        self.footsteps.clear();
        self.reference = ReferenceState::default();
        self.support_polygon = None;
        self.desired_cop = Point::origin();
    }

    /// The footstep queue after terrain constraints and step adjustment.
    #[must_use]
    pub fn footsteps(&self) -> &[Footstep] {
        &self.footsteps
    }

    #[must_use]
    pub fn contact_state(&self, side: Side) -> ContactState {
        self.foot_switches.get(side).contact_state()
    }

    #[must_use]
    pub fn load(&self, side: Side) -> f64 {
        self.foot_switches.get(side).load()
    }

    #[must_use]
    pub fn plane_contact_state(&self, side: Side) -> &PlaneContactState {
        self.contact_states.get(side)
    }

    #[must_use]
    pub fn support_polygon(&self) -> Option<&ConvexPolygon> {
        self.support_polygon.as_ref()
    }

    #[must_use]
    pub fn reference(&self) -> &ReferenceState {
        &self.reference
    }

    #[must_use]
    pub fn desired_cmp(&self) -> Point {
        self.optimizer.desired_cmp()
    }

    #[must_use]
    pub fn desired_cop(&self) -> Point {
        self.desired_cop
    }

    #[must_use]
    pub fn foot_switch(&self, side: Side) -> &WrenchFootSwitch {
        self.foot_switches.get(side)
    }

    #[must_use]
    pub fn cropper(&self, side: Side) -> &FootholdCropper {
        self.croppers.get(side)
    }

    #[must_use]
    pub fn planner(&self) -> &IcpPlanner {
        &self.planner
    }

    #[must_use]
    pub fn optimizer(&self) -> &OptimizationController {
        &self.optimizer
    }

    #[must_use]
    pub fn terrain(&self) -> &TerrainConstraintHandler {
        &self.terrain
    }

    #[must_use]
    pub fn diagnostics(&self) -> BalanceDiagnostics {
        BalanceDiagnostics {
            contact: self.foot_switches.map(|_, switch| switch.diagnostics().clone()),
            foothold: self.croppers.map(|_, cropper| cropper.diagnostics().clone()),
            terrain: self.terrain.diagnostics().clone(),
            optimization: self.optimizer.diagnostics().clone(),
            reference: self.reference,
            desired_cmp: self.optimizer.desired_cmp(),
        }
    }
}
