use filter::{AlphaFilter, GlitchFilter};
use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    config::{ensure_positive, ensure_range, ensure_window},
    geometry::Vector,
};

/// How the rotation detectors are combined into a single decision.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum RotationDetectorMode {
    /// Either detector.
    Any,
    /// Both detectors.
    #[default]
    All,
    Kinematic,
    Velocity,
}

impl RotationDetectorMode {
    #[must_use]
    pub fn combine(self, kinematic: bool, velocity: bool) -> bool {
        match self {
            RotationDetectorMode::Any => kinematic || velocity,
            RotationDetectorMode::All => kinematic && velocity,
            RotationDetectorMode::Kinematic => kinematic,
            RotationDetectorMode::Velocity => velocity,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct KinematicDetectorConfig {
    /// Horizontal foot angular velocity in rad/s above which the foot may be rotating.
    pub angular_velocity_threshold: f64,
    /// Rotation in rad since touchdown above which the foot may be rotating.
    pub rotation_angle_threshold: f64,
    /// Weight of the newest sample in the angular velocity filter.
    pub filter_alpha: f64,
    /// Number of ticks the raw signal has to agree before it switches.
    pub window: usize,
}

impl Default for KinematicDetectorConfig {
    fn default() -> Self {
        Self {
            angular_velocity_threshold: 0.5,
            rotation_angle_threshold: 0.05,
            filter_alpha: 0.5,
            window: 3,
        }
    }
}

impl KinematicDetectorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("angular_velocity_threshold", self.angular_velocity_threshold)?;
        ensure_range("rotation_angle_threshold", self.rotation_angle_threshold, 0.0, f64::MAX)?;
        ensure_range("filter_alpha", self.filter_alpha, 0.0, 1.0)?;
        ensure_window("window", self.window)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VelocityDetectorConfig {
    /// CoP speed in m/s above which the foot may be rotating.
    pub cop_velocity_threshold: f64,
    /// Weight of the newest sample in the CoP velocity filter.
    pub filter_alpha: f64,
    /// Number of ticks the raw signal has to agree before it switches.
    pub window: usize,
}

impl Default for VelocityDetectorConfig {
    fn default() -> Self {
        Self {
            cop_velocity_threshold: 0.2,
            filter_alpha: 0.3,
            window: 3,
        }
    }
}

impl VelocityDetectorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("cop_velocity_threshold", self.cop_velocity_threshold)?;
        ensure_range("filter_alpha", self.filter_alpha, 0.0, 1.0)?;
        ensure_window("window", self.window)
    }
}

/// What a rotation detector gets to see every tick, in the sole frame.
#[derive(Debug, Clone, Copy)]
pub struct RotationInput {
    /// Horizontal angular velocity of the foot.
    pub angular_velocity: Vector,
    /// Velocity of the measured CoP, zero while the CoP is unknown.
    pub cop_velocity: Vector,
    pub dt: f64,
}

/// Detects rotation from the foot's own angular velocity.
#[derive(Debug, Clone)]
pub struct KinematicDetector {
    config: KinematicDetectorConfig,
    angular_velocity: AlphaFilter<2>,
    rotation_angle: f64,
    signal: GlitchFilter,
}

impl KinematicDetector {
    pub fn new(config: &KinematicDetectorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            angular_velocity: AlphaFilter::new(config.filter_alpha)?,
            rotation_angle: 0.0,
            signal: GlitchFilter::new(config.window)?,
        })
    }

    fn compute(&mut self, input: &RotationInput) -> bool {
        let angular_velocity = self.angular_velocity.update(input.angular_velocity).norm();
        self.rotation_angle += angular_velocity * input.dt;

        self.signal.update(
            angular_velocity > self.config.angular_velocity_threshold
                && self.rotation_angle > self.config.rotation_angle_threshold,
        )
    }

    fn reset(&mut self) {
        self.angular_velocity.reset();
        self.rotation_angle = 0.0;
        self.signal.set(false);
    }
}

/// Detects rotation from the CoP moving quickly across the sole.
#[derive(Debug, Clone)]
pub struct VelocityDetector {
    config: VelocityDetectorConfig,
    cop_velocity: AlphaFilter<2>,
    signal: GlitchFilter,
}

impl VelocityDetector {
    pub fn new(config: &VelocityDetectorConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            cop_velocity: AlphaFilter::new(config.filter_alpha)?,
            signal: GlitchFilter::new(config.window)?,
        })
    }

    fn compute(&mut self, input: &RotationInput) -> bool {
        let speed = self.cop_velocity.update(input.cop_velocity).norm();
        self.signal.update(speed > self.config.cop_velocity_threshold)
    }

    fn reset(&mut self) {
        self.cop_velocity.reset();
        self.signal.set(false);
    }
}

/// A detector of foot rotation.
#[derive(Debug, Clone)]
pub enum RotationDetector {
    Kinematic(KinematicDetector),
    Velocity(VelocityDetector),
}

impl RotationDetector {
    /// Feeds a new sample and returns whether the foot is rotating.
    pub fn compute_rotation_signal(&mut self, input: &RotationInput) -> bool {
        match self {
            RotationDetector::Kinematic(detector) => detector.compute(input),
            RotationDetector::Velocity(detector) => detector.compute(input),
        }
    }

    pub fn reset(&mut self) {
        match self {
            RotationDetector::Kinematic(detector) => detector.reset(),
            RotationDetector::Velocity(detector) => detector.reset(),
        }
    }
}

/// Horizontal part of an angular velocity.
#[must_use]
pub fn horizontal(angular_velocity: &nalgebra::Vector3<f64>) -> Vector {
    Vector2::new(angular_velocity.x, angular_velocity.y)
}
