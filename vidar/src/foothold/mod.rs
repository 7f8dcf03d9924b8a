//! Detection of partial footholds and cropping of the support polygon.
//!
//! When a foot rotates about an edge, for instance because it stands half on a step, the part
//! of the sole that lifts off can no longer carry the CoP. The cropper detects the rotation,
//! estimates the edge, and removes the lifting part from the foothold for the rest of the
//! support phase.

mod detector;
mod edge;
mod verifier;

use filter::FiniteDifference;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

pub use detector::{
    KinematicDetector, KinematicDetectorConfig, RotationDetector, RotationDetectorMode, RotationInput,
    VelocityDetector, VelocityDetectorConfig,
};
pub use edge::{CopHistoryEdge, CopVelocityEdge, EdgeCalculator, EdgeConfig, RotationEdge};
pub use verifier::CropVerifier;

use crate::{
    Result,
    config::{ensure_range, ensure_window},
    geometry::{ConvexPolygon, Line, Point},
    types::{PlaneContactState, Side},
};

/// Configuration for the foothold cropper.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FootholdConfig {
    pub rotation_detector_mode: RotationDetectorMode,
    pub kinematic: KinematicDetectorConfig,
    pub velocity: VelocityDetectorConfig,
    pub edge: EdgeConfig,
    /// Distance in meters the desired CoP must keep from a crop line.
    pub crop_verifier_margin: f64,
    /// Number of desired CoP samples the crop verifier looks at.
    pub desired_cop_window: usize,
    /// Smallest remaining foothold area, as a fraction of the nominal area.
    pub minimum_area_fraction: f64,
}

impl Default for FootholdConfig {
    fn default() -> Self {
        Self {
            rotation_detector_mode: RotationDetectorMode::All,
            kinematic: KinematicDetectorConfig::default(),
            velocity: VelocityDetectorConfig::default(),
            edge: EdgeConfig::default(),
            crop_verifier_margin: 0.005,
            desired_cop_window: 10,
            minimum_area_fraction: 0.25,
        }
    }
}

impl FootholdConfig {
    pub fn validate(&self) -> Result<()> {
        self.kinematic.validate()?;
        self.velocity.validate()?;
        self.edge.validate()?;
        ensure_range("crop_verifier_margin", self.crop_verifier_margin, 0.0, 0.1)?;
        ensure_window("desired_cop_window", self.desired_cop_window)?;
        ensure_range("minimum_area_fraction", self.minimum_area_fraction, 0.0, 1.0)
    }
}

/// Measurements of a single foot for one tick, in the sole frame.
#[derive(Debug, Clone, Copy)]
pub struct FootholdInput {
    /// The measured CoP, `None` when the foot carries too little load.
    pub measured_cop: Option<Point>,
    pub desired_cop: Point,
    pub angular_velocity: Vector3<f64>,
}

/// Telemetry of a single foothold cropper.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FootholdDiagnostics {
    pub side: Side,
    pub kinematic_rotation: bool,
    pub velocity_rotation: bool,
    pub is_rotating: bool,
    pub edge_stable: bool,
    pub line_of_rotation: Option<Line>,
    /// Side of the line of rotation that lifts off.
    pub side_to_crop: Option<Side>,
    pub crop_verified: bool,
    pub cropped: bool,
    pub area: f64,
}

/// Crops the support polygon of one foot while it rotates about an edge.
#[derive(Debug, Clone)]
pub struct FootholdCropper {
    side: Side,
    config: FootholdConfig,
    dt: f64,
    kinematic: RotationDetector,
    velocity: RotationDetector,
    /// Edge calculators in order of preference.
    edge_calculators: [EdgeCalculator; 2],
    verifier: CropVerifier,
    cop_velocity: FiniteDifference<2>,
    nominal_polygon: ConvexPolygon,
    nominal_area: f64,
    shrunken_polygon: ConvexPolygon,
    is_rotating: bool,
    line_of_rotation: Option<Line>,
    cropped_this_tick: bool,
    diagnostics: FootholdDiagnostics,
}

impl FootholdCropper {
    pub fn new(config: &FootholdConfig, side: Side, foot_polygon: &ConvexPolygon, dt: f64) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            side,
            config: config.clone(),
            dt,
            kinematic: RotationDetector::Kinematic(KinematicDetector::new(&config.kinematic)?),
            velocity: RotationDetector::Velocity(VelocityDetector::new(&config.velocity)?),
            edge_calculators: [
                EdgeCalculator::CopHistory(CopHistoryEdge::new(&config.edge)),
                EdgeCalculator::CopAndVelocity(CopVelocityEdge::new(&config.edge)),
            ],
            verifier: CropVerifier::new(config.crop_verifier_margin, config.desired_cop_window),
            cop_velocity: FiniteDifference::new(dt)?,
            nominal_polygon: foot_polygon.clone(),
            nominal_area: foot_polygon.area(),
            shrunken_polygon: foot_polygon.clone(),
            is_rotating: false,
            line_of_rotation: None,
            cropped_this_tick: false,
            diagnostics: FootholdDiagnostics {
                side,
                area: foot_polygon.area(),
                ..Default::default()
            },
        })
    }

    /// Runs the detectors and, when the foot rotates about a stable edge, crops the foothold.
    pub fn compute(&mut self, input: &FootholdInput) {
        let was_rotating = self.is_rotating;
        self.cropped_this_tick = false;
        self.line_of_rotation = None;

        let angular_velocity = detector::horizontal(&input.angular_velocity);
        let cop_velocity = match input.measured_cop {
            Some(cop) => self.cop_velocity.update(cop.coords),
            None => {
                self.cop_velocity.reset();
                self.cop_velocity.rate()
            }
        };

        let rotation_input = RotationInput {
            angular_velocity,
            cop_velocity,
            dt: self.dt,
        };
        let kinematic = self.kinematic.compute_rotation_signal(&rotation_input);
        let velocity = self.velocity.compute_rotation_signal(&rotation_input);
        self.is_rotating = self.config.rotation_detector_mode.combine(kinematic, velocity);

        self.verifier.update(input.desired_cop);

        self.diagnostics = FootholdDiagnostics {
            side: self.side,
            kinematic_rotation: kinematic,
            velocity_rotation: velocity,
            is_rotating: self.is_rotating,
            area: self.shrunken_polygon.area(),
            ..Default::default()
        };

        if !self.is_rotating {
            if was_rotating {
                tracing::debug!(side = ?self.side, "foot stopped rotating");
                self.reset_edge_calculators();
            }
            return;
        }
        if !was_rotating {
            tracing::debug!(side = ?self.side, "foot started rotating");
        }

        for calculator in &mut self.edge_calculators {
            calculator.update(input.measured_cop, angular_velocity);
        }
        self.line_of_rotation = self
            .edge_calculators
            .iter()
            .find_map(EdgeCalculator::trusted_line);
        self.diagnostics.line_of_rotation = self.line_of_rotation;

        let Some(line) = self.line_of_rotation else {
            return;
        };
        self.diagnostics.edge_stable = true;

        let Some(side_to_crop) = self.side_to_crop(&line, &input.angular_velocity) else {
            return;
        };
        self.diagnostics.side_to_crop = Some(side_to_crop);

        if !self.verifier.verify_crop(&line, side_to_crop) {
            return;
        }
        self.diagnostics.crop_verified = true;

        self.crop(&line, side_to_crop);
        self.diagnostics.cropped = self.cropped_this_tick;
        self.diagnostics.area = self.shrunken_polygon.area();
    }

    /// The side of `line` that lifts off under the foot's angular velocity.
    ///
    /// A point on the left of the line at unit distance moves up with `direction · ω`.
    fn side_to_crop(&self, line: &Line, angular_velocity: &Vector3<f64>) -> Option<Side> {
        let lift_rate = line.direction.dot(&detector::horizontal(angular_velocity));
        if lift_rate.abs() < self.config.edge.min_angular_velocity {
            return None;
        }

        Some(if lift_rate > 0.0 { Side::Left } else { Side::Right })
    }

    fn crop(&mut self, line: &Line, side_to_crop: Side) {
        let kept = match side_to_crop {
            Side::Left => line.right_halfplane(),
            Side::Right => line.left_halfplane(),
        };

        let Some(cropped) = self.shrunken_polygon.clipped(&kept) else {
            return;
        };
        if cropped.area() < self.config.minimum_area_fraction * self.nominal_area {
            tracing::debug!(side = ?self.side, area = cropped.area(), "rejected crop, too little area left");
            return;
        }
        if cropped.area() >= self.shrunken_polygon.area() {
            return;
        }

        tracing::info!(side = ?self.side, area = cropped.area(), "cropped foothold");
        self.shrunken_polygon = cropped;
        self.cropped_this_tick = true;
    }

    /// Writes the cropped foothold to `contact_state` if a crop was made this tick.
    ///
    /// Returns `true` if the contact state was modified.
    pub fn apply_shrunken_foothold(&self, contact_state: &mut PlaneContactState) -> bool {
        if !self.cropped_this_tick {
            return false;
        }

        contact_state.set_contact_points(self.shrunken_polygon.vertices());
        true
    }

    /// Starts a new support phase on `foot_polygon`.
    pub fn initialize(&mut self, foot_polygon: &ConvexPolygon) {
        self.nominal_polygon = foot_polygon.clone();
        self.nominal_area = foot_polygon.area();
        self.reset();
    }

    /// Restores the nominal foothold and clears all detectors.
    pub fn reset(&mut self) {
        self.is_rotating = false;
        self.line_of_rotation = None;
        self.cropped_this_tick = false;
        self.kinematic.reset();
        self.velocity.reset();
        self.reset_edge_calculators();
        self.verifier.reset();
        self.cop_velocity.reset();
        self.shrunken_polygon = self.nominal_polygon.clone();
        self.diagnostics = FootholdDiagnostics {
            side: self.side,
            area: self.nominal_area,
            ..Default::default()
        };
    }

    fn reset_edge_calculators(&mut self) {
        for calculator in &mut self.edge_calculators {
            calculator.reset();
        }
    }

    #[must_use]
    pub fn shrunken_foot_polygon(&self) -> &ConvexPolygon {
        &self.shrunken_polygon
    }

    #[must_use]
    pub fn is_rotating(&self) -> bool {
        self.is_rotating
    }

    #[must_use]
    pub fn line_of_rotation(&self) -> Option<Line> {
        self.line_of_rotation
    }

    #[must_use]
    pub fn diagnostics(&self) -> &FootholdDiagnostics {
        &self.diagnostics
    }
}
