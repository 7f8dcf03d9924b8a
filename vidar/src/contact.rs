//! Wrench based foot contact detection.

use filter::{AlphaFilter, GlitchFilter};
use nalgebra::{Isometry3, Translation3, UnitQuaternion, Vector1, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    config::{ensure_positive, ensure_range, ensure_window},
    geometry::{ConvexPolygon, Point},
    types::{ContactState, Side, Wrench},
};

/// Configuration for the wrench based foot switch.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FootSwitchConfig {
    /// Normal force in newton above which the foot may be in contact, debounced.
    pub contact_force_threshold_1: f64,
    /// Normal force in newton above which the foot is immediately in contact.
    pub contact_force_threshold_2: Option<f64>,
    /// Margin from the toe and heel for the CoP test, as a fraction of the foot length.
    ///
    /// `nan` disables the CoP test.
    pub contact_cop_threshold: f64,
    /// Number of ticks the first force threshold has to agree before it switches.
    pub force_threshold_1_window: usize,
    /// Number of ticks the CoP test has to agree before it switches.
    pub cop_threshold_window: usize,
    /// Number of ticks the combined contact decision has to agree before it switches.
    pub contact_window: usize,
    /// Normal force in newton below which the CoP is not computed.
    pub min_force_to_compute_cop: f64,
    /// Weight of the robot in newton, used to normalize the load.
    pub robot_weight: f64,
    /// Weight of the previous load estimate in the load filter.
    pub load_alpha: f64,
    /// Position of the force/torque sensor in the sole frame.
    pub sensor_translation: Vector3<f64>,
    /// Roll, pitch and yaw of the force/torque sensor relative to the sole frame.
    pub sensor_rotation: Vector3<f64>,
}

impl Default for FootSwitchConfig {
    fn default() -> Self {
        Self {
            contact_force_threshold_1: 120.0,
            contact_force_threshold_2: Some(600.0),
            contact_cop_threshold: 0.02,
            force_threshold_1_window: 2,
            cop_threshold_window: 3,
            contact_window: 2,
            min_force_to_compute_cop: 5.0,
            robot_weight: 150.0 * crate::GRAVITY,
            load_alpha: 0.1,
            sensor_translation: Vector3::zeros(),
            sensor_rotation: Vector3::zeros(),
        }
    }
}

impl FootSwitchConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_positive("contact_force_threshold_1", self.contact_force_threshold_1)?;
        if let Some(threshold) = self.contact_force_threshold_2 {
            ensure_positive("contact_force_threshold_2", threshold)?;
        }
        if !self.contact_cop_threshold.is_nan() {
            ensure_range("contact_cop_threshold", self.contact_cop_threshold, 0.0, 0.5)?;
        }
        ensure_window("force_threshold_1_window", self.force_threshold_1_window)?;
        ensure_window("cop_threshold_window", self.cop_threshold_window)?;
        ensure_window("contact_window", self.contact_window)?;
        ensure_positive("min_force_to_compute_cop", self.min_force_to_compute_cop)?;
        ensure_positive("robot_weight", self.robot_weight)?;
        ensure_range("load_alpha", self.load_alpha, 0.0, 1.0)
    }

    /// Pose of the sensor frame in the sole frame.
    #[must_use]
    pub fn sensor_to_sole(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.sensor_translation),
            UnitQuaternion::from_euler_angles(
                self.sensor_rotation.x,
                self.sensor_rotation.y,
                self.sensor_rotation.z,
            ),
        )
    }
}

/// Telemetry of a single foot switch.
#[derive(Debug, Default, Clone, Serialize)]
pub struct FootSwitchDiagnostics {
    pub side: Side,
    pub normal_force: f64,
    pub force_magnitude: f64,
    pub cop: Option<Point>,
    pub normal_torque: f64,
    pub force_threshold_1: bool,
    pub force_threshold_2: bool,
    pub cop_inside: bool,
    pub hit_ground: bool,
    pub load: f64,
}

/// Decides from the measured wrench whether a foot is on the ground.
///
/// The foot has hit the ground when the normal force passes the first threshold and the CoP is
/// well inside the foot, or when the normal force passes the second threshold. Every condition
/// is debounced with its own glitch filter.
#[derive(Debug, Clone)]
pub struct WrenchFootSwitch {
    side: Side,
    config: FootSwitchConfig,
    sensor_to_sole: Isometry3<f64>,
    foot_min_x: f64,
    foot_max_x: f64,
    force_threshold_1: GlitchFilter,
    cop_inside: GlitchFilter,
    hit_ground: GlitchFilter,
    load: AlphaFilter<1>,
    sole_wrench: Wrench,
    cop: Option<Point>,
    normal_torque: f64,
    diagnostics: FootSwitchDiagnostics,
}

impl WrenchFootSwitch {
    pub fn new(config: &FootSwitchConfig, side: Side, foot_polygon: &ConvexPolygon) -> Result<Self> {
        config.validate()?;

        let mut cop_inside = GlitchFilter::new(config.cop_threshold_window)?;
        if config.contact_cop_threshold.is_nan() {
            cop_inside.set(true);
        }

        Ok(Self {
            side,
            config: config.clone(),
            sensor_to_sole: config.sensor_to_sole(),
            foot_min_x: foot_polygon.min_x(),
            foot_max_x: foot_polygon.max_x(),
            force_threshold_1: GlitchFilter::new(config.force_threshold_1_window)?,
            cop_inside,
            hit_ground: GlitchFilter::new(config.contact_window)?,
            load: AlphaFilter::new(1.0 - config.load_alpha)?,
            sole_wrench: Wrench::default(),
            cop: None,
            normal_torque: 0.0,
            diagnostics: FootSwitchDiagnostics {
                side,
                ..Default::default()
            },
        })
    }

    /// Processes a new measurement and returns the debounced contact state.
    pub fn update(&mut self, wrench: &Wrench) -> ContactState {
        let was_in_contact = self.hit_ground.value();

        self.sole_wrench = wrench.transformed(&self.sensor_to_sole);
        let force = self.sole_wrench.force;
        let torque = self.sole_wrench.torque;
        let normal_force = force.z;

        self.cop = (normal_force > self.config.min_force_to_compute_cop)
            .then(|| Point::new(-torque.y / normal_force, torque.x / normal_force));
        self.normal_torque = self
            .cop
            .map_or(0.0, |cop| torque.z - (cop.x * force.y - cop.y * force.x));

        let force_threshold_1 = self
            .force_threshold_1
            .update(normal_force > self.config.contact_force_threshold_1);
        let force_threshold_2 = self
            .config
            .contact_force_threshold_2
            .is_some_and(|threshold| normal_force > threshold);
        let cop_inside = self.update_cop_test();

        let hit_ground = self
            .hit_ground
            .update((force_threshold_1 && cop_inside) || force_threshold_2);

        let load = self
            .load
            .update(Vector1::new(normal_force.max(0.0) / self.config.robot_weight))
            .x;

        if hit_ground != was_in_contact {
            tracing::debug!(side = ?self.side, normal_force, hit_ground, "foot contact changed");
        }

        self.diagnostics = FootSwitchDiagnostics {
            side: self.side,
            normal_force,
            force_magnitude: force.norm(),
            cop: self.cop,
            normal_torque: self.normal_torque,
            force_threshold_1,
            force_threshold_2,
            cop_inside,
            hit_ground,
            load,
        };

        self.contact_state()
    }

    fn update_cop_test(&mut self) -> bool {
        let fraction = self.config.contact_cop_threshold;
        if fraction.is_nan() {
            self.cop_inside.set(true);
            return true;
        }

        let margin = fraction * (self.foot_max_x - self.foot_min_x);
        let inside = self.cop.is_some_and(|cop| {
            cop.x >= self.foot_min_x + margin && cop.x <= self.foot_max_x - margin
        });

        self.cop_inside.update(inside)
    }

    /// Clears the CoP test, so contact has to be re-established by the CoP.
    pub fn reset(&mut self) {
        let disabled = self.config.contact_cop_threshold.is_nan();
        self.cop_inside.set(disabled);
    }

    #[must_use]
    pub fn side(&self) -> Side {
        self.side
    }

    #[must_use]
    pub fn contact_state(&self) -> ContactState {
        ContactState::from(self.hit_ground.value())
    }

    #[must_use]
    pub fn has_foot_hit_ground(&self) -> bool {
        self.hit_ground.value()
    }

    /// Filtered normal force as a fraction of the robot weight.
    #[must_use]
    pub fn load(&self) -> f64 {
        self.load.state().x
    }

    /// The measured CoP in the sole frame, `None` when the normal force is too low.
    #[must_use]
    pub fn cop(&self) -> Option<Point> {
        self.cop
    }

    /// Torque around the sole normal at the CoP.
    #[must_use]
    pub fn normal_torque(&self) -> f64 {
        self.normal_torque
    }

    #[must_use]
    pub fn force_magnitude(&self) -> f64 {
        self.sole_wrench.force.norm()
    }

    /// The last measurement, expressed at the sole origin.
    #[must_use]
    pub fn sole_wrench(&self) -> &Wrench {
        &self.sole_wrench
    }

    #[must_use]
    pub fn diagnostics(&self) -> &FootSwitchDiagnostics {
        &self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};
    use rand::Rng;

    use super::*;

    const WEIGHT: f64 = 1000.0;

    fn foot() -> ConvexPolygon {
        ConvexPolygon::rectangle(point![-0.1, -0.05], point![0.1, 0.05]).unwrap()
    }

    fn config() -> FootSwitchConfig {
        FootSwitchConfig {
            robot_weight: WEIGHT,
            ..Default::default()
        }
    }

    /// A vertical force with its CoP at `cop` in the sole frame.
    fn wrench_at(cop: Point, normal_force: f64) -> Wrench {
        Wrench::new(
            vector![cop.y * normal_force, -cop.x * normal_force, 0.0],
            vector![0.0, 0.0, normal_force],
            0.0,
        )
    }

    #[test]
    fn centered_load_makes_contact() {
        let mut switch = WrenchFootSwitch::new(&config(), Side::Left, &foot()).unwrap();

        for _ in 0..10 {
            switch.update(&wrench_at(point![0.0, 0.0], 400.0));
        }

        assert_eq!(switch.contact_state(), ContactState::InContact);
        assert!((switch.load() - 400.0 / WEIGHT).abs() < 1e-6);
        assert!(switch.cop().unwrap().coords.norm() < 1e-12);
    }

    #[test]
    fn contact_needs_window() {
        let mut switch = WrenchFootSwitch::new(&config(), Side::Left, &foot()).unwrap();

        // force threshold 1 after 2 ticks, CoP test after 3, contact after 2 more
        let states: Vec<_> = (0..5)
            .map(|_| switch.update(&wrench_at(point![0.0, 0.0], 400.0)))
            .collect();

        assert!(states[..3].iter().all(|state| !state.is_in_contact()));
        assert!(states[4].is_in_contact());
    }

    #[test]
    fn cop_at_toe_is_rejected() {
        let config = FootSwitchConfig {
            contact_force_threshold_2: None,
            ..config()
        };
        let mut switch = WrenchFootSwitch::new(&config, Side::Right, &foot()).unwrap();

        for _ in 0..10 {
            switch.update(&wrench_at(point![0.099, 0.0], 400.0));
        }

        assert_eq!(switch.contact_state(), ContactState::NoContact);
        assert!(!switch.diagnostics().cop_inside);
    }

    #[test]
    fn second_threshold_overrides_cop_test() {
        let mut switch = WrenchFootSwitch::new(&config(), Side::Right, &foot()).unwrap();

        for _ in 0..3 {
            switch.update(&wrench_at(point![0.099, 0.0], 700.0));
        }

        assert!(switch.has_foot_hit_ground());
    }

    #[test]
    fn nan_threshold_disables_cop_test() {
        let config = FootSwitchConfig {
            contact_cop_threshold: f64::NAN,
            contact_force_threshold_2: None,
            ..config()
        };
        let mut switch = WrenchFootSwitch::new(&config, Side::Left, &foot()).unwrap();

        for _ in 0..4 {
            switch.update(&wrench_at(point![0.099, 0.0], 400.0));
        }

        assert!(switch.has_foot_hit_ground());
    }

    #[test]
    fn low_force_has_no_cop() {
        let mut switch = WrenchFootSwitch::new(&config(), Side::Left, &foot()).unwrap();
        switch.update(&wrench_at(point![0.0, 0.0], 2.0));

        assert!(switch.cop().is_none());
        assert!(switch.diagnostics().cop.is_none());
    }

    #[test]
    fn sensor_offset_is_resolved() {
        // sensor 4 cm above the sole, a pure vertical force on it stays centered
        let config = FootSwitchConfig {
            sensor_translation: vector![0.02, 0.0, 0.04],
            ..config()
        };
        let mut switch = WrenchFootSwitch::new(&config, Side::Left, &foot()).unwrap();
        switch.update(&Wrench::new(Vector3::zeros(), vector![0.0, 0.0, 300.0], 0.0));

        assert!((switch.cop().unwrap() - point![0.02, 0.0]).norm() < 1e-12);
    }

    #[test]
    fn contact_changes_at_most_once_per_window() {
        let mut rng = rand::rng();
        let config = config();
        let mut switch = WrenchFootSwitch::new(&config, Side::Left, &foot()).unwrap();

        let mut previous = switch.has_foot_hit_ground();
        let mut last_change: Option<usize> = None;
        for tick in 0..2000 {
            let normal_force = if rng.random_bool(0.5) { 400.0 } else { 0.0 };
            let in_contact = switch.update(&wrench_at(point![0.0, 0.0], normal_force)).is_in_contact();

            if in_contact != previous {
                if let Some(last) = last_change {
                    assert!(tick - last >= config.contact_window);
                }
                last_change = Some(tick);
            }
            previous = in_contact;
        }
    }

    #[test]
    fn reset_clears_cop_test() {
        let mut switch = WrenchFootSwitch::new(&config(), Side::Left, &foot()).unwrap();
        for _ in 0..5 {
            switch.update(&wrench_at(point![0.0, 0.0], 400.0));
        }

        assert!(switch.diagnostics().cop_inside);

        switch.reset();
        switch.update(&wrench_at(point![0.0, 0.0], 400.0));
        assert!(!switch.diagnostics().cop_inside);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = FootSwitchConfig {
            load_alpha: 2.0,
            ..config()
        };

        assert!(WrenchFootSwitch::new(&config, Side::Left, &foot()).is_err());
    }
}
