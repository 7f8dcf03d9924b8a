//! Constrains footsteps to steppable terrain.
//!
//! A footstep that does not fit on its steppable region is "wiggled": moved and rotated as
//! little as possible until the foot lies inside the region with some clearance. The footstep
//! is then placed on the region's plane.

mod region;
mod wiggler;

use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector2};
use serde::{Deserialize, Serialize};

pub use region::{PlaneEquation, SteppableRegion};
pub use wiggler::{MAX_FOOT_VERTICES, MAX_REGION_VERTICES, Wiggle, WiggleParameters, wiggle};

use crate::{
    Result,
    config::{ensure_positive, ensure_range},
    geometry::{ConvexPolygon, Point},
    types::{Feet, Footstep},
};

/// Changes of the footstep pose below this are not reported.
const CHANGE_THRESHOLD: f64 = 1e-5;

/// Configuration for the terrain constraint handler.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TerrainConfig {
    /// Clearance in meters between the foot and the region boundary.
    pub desired_distance_inside: f64,
    /// Whether predicted contact points replace the nominal foot polygon.
    pub use_predicted_contact_points: bool,
    /// Largest accepted ratio of convex hull area to outline area.
    pub max_concave_estimate_ratio: f64,
    /// Largest translation in meters along either axis.
    pub maximum_translation: f64,
    /// Whether the footstep may be rotated as well.
    pub wiggle_rotation: bool,
    /// Largest change of yaw in radians.
    pub max_yaw: f64,
    /// Cost of a radian of yaw relative to a meter of translation.
    pub rotation_weight: f64,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            desired_distance_inside: 0.04,
            use_predicted_contact_points: false,
            max_concave_estimate_ratio: 1.1,
            maximum_translation: 0.5,
            wiggle_rotation: true,
            max_yaw: 0.2,
            rotation_weight: 1.0,
        }
    }
}

impl TerrainConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_range("desired_distance_inside", self.desired_distance_inside, 0.0, 0.5)?;
        ensure_range("max_concave_estimate_ratio", self.max_concave_estimate_ratio, 1.0, f64::MAX)?;
        ensure_positive("maximum_translation", self.maximum_translation)?;
        ensure_range("max_yaw", self.max_yaw, 0.0, std::f64::consts::FRAC_PI_2)?;
        ensure_positive("rotation_weight", self.rotation_weight)
    }

    fn wiggle_parameters(&self) -> WiggleParameters {
        WiggleParameters {
            desired_distance_inside: self.desired_distance_inside,
            maximum_translation: self.maximum_translation,
            max_yaw: if self.wiggle_rotation { self.max_yaw } else { 0.0 },
            rotation_weight: self.rotation_weight,
        }
    }
}

/// Telemetry of the terrain constraint handler.
#[derive(Serialize, Debug, Default, Clone, PartialEq)]
pub struct TerrainDiagnostics {
    pub has_region: bool,
    pub region_rejected: bool,
    pub concavity_ratio: Option<f64>,
    pub constraint_area: Option<f64>,
    /// Whether the last footstep could be moved inside the region.
    pub wiggle_succeeded: bool,
    pub translation: Vector2<f64>,
    pub yaw: f64,
    pub footstep_changed: bool,
}

/// Moves footsteps onto the current steppable region.
#[derive(Debug, Clone)]
pub struct TerrainConstraintHandler {
    config: TerrainConfig,
    foot_polygons: Feet<ConvexPolygon>,
    region: Option<SteppableRegion>,
    reachability: Option<ConvexPolygon>,
    constraint_hull: Option<ConvexPolygon>,
    diagnostics: TerrainDiagnostics,
}

impl TerrainConstraintHandler {
    /// Creates a handler for feet with the given sole polygons.
    pub fn new(config: &TerrainConfig, foot_polygons: Feet<ConvexPolygon>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            foot_polygons,
            region: None,
            reachability: None,
            constraint_hull: None,
            diagnostics: TerrainDiagnostics::default(),
        })
    }

    /// Sets the region the next footstep has to land on.
    ///
    /// Returns `false` and clears the constraint when the region is too concave.
    pub fn set_steppable_region(&mut self, region: SteppableRegion) -> bool {
        self.diagnostics.concavity_ratio = region.concavity_ratio();
        let valid = self.validate_convexity_of_region(&region);
        self.diagnostics.region_rejected = !valid;

        self.region = valid.then_some(region);
        self.update_constraint_hull();
        valid
    }

    /// Limits the constraint to the reachable area, given in the world frame.
    pub fn set_reachability_region(&mut self, reachability: Option<ConvexPolygon>) {
        self.reachability = reachability;
        self.update_constraint_hull();
    }

    /// Checks whether the convex hull is a good enough stand-in for the region's outline.
    #[must_use]
    pub fn validate_convexity_of_region(&self, region: &SteppableRegion) -> bool {
        match region.concavity_ratio() {
            Some(ratio) if ratio > self.config.max_concave_estimate_ratio => {
                tracing::warn!(ratio, "steppable region is too concave, ignoring it");
                false
            }
            _ => true,
        }
    }

    /// Forgets the region and the reachability constraint.
    pub fn reset(&mut self) {
        self.region = None;
        self.reachability = None;
        self.constraint_hull = None;
        self.diagnostics = TerrainDiagnostics::default();
    }

    fn update_constraint_hull(&mut self) {
        // the region is projected vertically, so the reachable area clips its horizontal hull
        self.constraint_hull = self.region.as_ref().and_then(|region| match &self.reachability {
            Some(reachability) => region.convex_hull.intersection(reachability),
            None => Some(region.convex_hull.clone()),
        });

        self.diagnostics.has_region = self.region.is_some();
        self.diagnostics.constraint_area = self.constraint_hull.as_ref().map(ConvexPolygon::area);
    }

    #[must_use]
    pub fn has_constraint(&self) -> bool {
        self.constraint_hull.is_some()
    }

    #[must_use]
    pub fn region(&self) -> Option<&SteppableRegion> {
        self.region.as_ref()
    }

    /// The horizontal area footsteps are moved into.
    #[must_use]
    pub fn constraint_hull(&self) -> Option<&ConvexPolygon> {
        self.constraint_hull.as_ref()
    }

    /// The foot polygon of `footstep` in the world frame.
    fn footstep_polygon(&self, footstep: &Footstep) -> ConvexPolygon {
        let predicted = self
            .config
            .use_predicted_contact_points
            .then_some(footstep.predicted_contact_points.as_deref())
            .flatten()
            .and_then(ConvexPolygon::from_points);
        let sole = predicted.unwrap_or_else(|| self.foot_polygons.get(footstep.side).clone());

        sole.transformed(&footstep.pose_2d())
    }

    /// Moves `footstep` inside the steppable region and onto its plane.
    ///
    /// Returns whether the pose changed. Without a region, or when the footstep cannot be made
    /// to fit, the footstep is left untouched.
    pub fn apply_constraint_to_footstep(&mut self, footstep: &mut Footstep) -> bool {
        self.diagnostics.footstep_changed = false;
        self.diagnostics.wiggle_succeeded = false;
        let (Some(region), Some(hull)) = (&self.region, &self.constraint_hull) else {
            return false;
        };

        let polygon = self.footstep_polygon(footstep);
        let Some(wiggle) = wiggle(&polygon, hull, &self.config.wiggle_parameters()) else {
            tracing::debug!(side = ?footstep.side, "footstep does not fit on the steppable region");
            return false;
        };
        self.diagnostics.wiggle_succeeded = true;
        self.diagnostics.translation = wiggle.translation;
        self.diagnostics.yaw = wiggle.yaw;

        let pose_2d = wiggle.transform * footstep.pose_2d();
        let position = Point::from(pose_2d.translation.vector);
        let height = region.plane.height_at(position);
        let orientation =
            region.plane.tilt() * UnitQuaternion::from_euler_angles(0.0, 0.0, pose_2d.rotation.angle());
        let pose = Isometry3::from_parts(Translation3::new(position.x, position.y, height), orientation);

        let changed = (pose.translation.vector - footstep.pose.translation.vector).norm() > CHANGE_THRESHOLD
            || pose.rotation.angle_to(&footstep.pose.rotation) > CHANGE_THRESHOLD;
        if changed {
            footstep.pose = pose;
        }

        self.diagnostics.footstep_changed = changed;
        changed
    }

    #[must_use]
    pub fn diagnostics(&self) -> &TerrainDiagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;
    use crate::types::{FootstepTiming, Side};

    fn feet() -> Feet<ConvexPolygon> {
        let sole = ConvexPolygon::rectangle(point![-0.1, -0.05], point![0.1, 0.05]).unwrap();
        Feet::new(sole.clone(), sole)
    }

    fn config() -> TerrainConfig {
        TerrainConfig {
            desired_distance_inside: 0.02,
            ..Default::default()
        }
    }

    fn footstep(x: f64, y: f64) -> Footstep {
        Footstep::new(Side::Left, vector![x, y, 0.0], 0.0, FootstepTiming::new(0.6, 0.1).unwrap())
    }

    fn flat_region(min: Point, max: Point) -> SteppableRegion {
        SteppableRegion::new(PlaneEquation::horizontal(0.0), ConvexPolygon::rectangle(min, max).unwrap())
    }

    #[test]
    fn footstep_moves_behind_region_edge() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        assert!(handler.set_steppable_region(flat_region(point![-1.0, -1.0], point![0.25, 1.0])));

        let mut footstep = footstep(0.3, 0.1);
        assert!(handler.apply_constraint_to_footstep(&mut footstep));

        let placed = feet().left.transformed(&footstep.pose_2d());
        assert!(placed.max_x() <= 0.23 + 1e-9);
        assert!((footstep.position_2d().y - 0.1).abs() < 1e-9);
        assert!(handler.diagnostics().footstep_changed);
    }

    #[test]
    fn footstep_inside_is_unchanged() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        handler.set_steppable_region(flat_region(point![-1.0, -1.0], point![1.0, 1.0]));

        let mut footstep = footstep(0.3, 0.1);
        let original = footstep.clone();
        assert!(!handler.apply_constraint_to_footstep(&mut footstep));
        assert_eq!(footstep, original);

        // wiggling twice does not move the footstep again
        let mut constrained = self::footstep(0.95, 0.1);
        assert!(handler.apply_constraint_to_footstep(&mut constrained));
        let once = constrained.clone();
        assert!(!handler.apply_constraint_to_footstep(&mut constrained));
        assert_eq!(constrained, once);
    }

    #[test]
    fn footstep_is_placed_on_plane() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        let plane = PlaneEquation::new(vector![-0.1, 0.0, 1.0], 0.05).unwrap();
        let hull = ConvexPolygon::rectangle(point![-1.0, -1.0], point![1.0, 1.0]).unwrap();
        handler.set_steppable_region(SteppableRegion::new(plane, hull));

        let mut footstep = footstep(0.5, 0.0);
        assert!(handler.apply_constraint_to_footstep(&mut footstep));

        assert!((footstep.pose.translation.z - 0.1).abs() < 1e-9);
        assert!((footstep.pose.rotation * nalgebra::Vector3::z() - plane.normal()).norm() < 1e-9);
        assert!(footstep.yaw().abs() < 1e-9);
    }

    #[test]
    fn without_region_nothing_happens() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        let mut footstep = footstep(0.3, 0.1);

        assert!(!handler.apply_constraint_to_footstep(&mut footstep));
        assert!(!handler.has_constraint());
    }

    #[test]
    fn infeasible_footstep_is_untouched() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        handler.set_steppable_region(flat_region(point![0.0, 0.0], point![0.1, 0.1]));

        let mut footstep = footstep(0.3, 0.1);
        let original = footstep.clone();
        assert!(!handler.apply_constraint_to_footstep(&mut footstep));
        assert_eq!(footstep, original);
        assert!(!handler.diagnostics().wiggle_succeeded);
    }

    #[test]
    fn concave_region_is_rejected() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        let outline = vec![
            point![0.0, 0.0],
            point![2.0, 0.0],
            point![2.0, 1.0],
            point![1.0, 1.0],
            point![1.0, 2.0],
            point![0.0, 2.0],
        ];
        let region = SteppableRegion::from_outline(PlaneEquation::horizontal(0.0), outline).unwrap();

        assert!(!handler.set_steppable_region(region));
        assert!(!handler.has_constraint());
        assert!(handler.diagnostics().region_rejected);

        let mut footstep = footstep(3.0, 3.0);
        assert!(!handler.apply_constraint_to_footstep(&mut footstep));
    }

    #[test]
    fn reachability_clips_region() {
        let mut handler = TerrainConstraintHandler::new(&config(), feet()).unwrap();
        handler.set_steppable_region(flat_region(point![-1.0, -1.0], point![1.0, 1.0]));
        handler.set_reachability_region(ConvexPolygon::rectangle(point![0.0, -0.5], point![0.5, 0.5]));

        assert!((handler.constraint_hull().unwrap().area() - 0.5).abs() < 1e-9);

        let mut footstep = footstep(0.8, 0.0);
        assert!(handler.apply_constraint_to_footstep(&mut footstep));
        assert!((footstep.position_2d().x - 0.38).abs() < 1e-9);

        handler.reset();
        assert!(!handler.has_constraint());
    }

    #[test]
    fn predicted_contact_points_replace_sole() {
        let config = TerrainConfig {
            use_predicted_contact_points: true,
            ..config()
        };
        let mut handler = TerrainConstraintHandler::new(&config, feet()).unwrap();
        handler.set_steppable_region(flat_region(point![-1.0, -1.0], point![0.25, 1.0]));

        // only the heel half of the sole is expected to touch
        let mut footstep = footstep(0.3, 0.0);
        footstep.predicted_contact_points = Some(vec![
            point![-0.1, -0.05],
            point![0.0, -0.05],
            point![0.0, 0.05],
            point![-0.1, 0.05],
        ]);
        assert!(handler.apply_constraint_to_footstep(&mut footstep));
        assert!((footstep.position_2d().x - 0.23).abs() < 1e-9);
    }
}
