//! Configuration of the balance pipeline.

use std::time::Duration;

use odal::Config;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

use crate::{
    Error, Result,
    contact::FootSwitchConfig,
    foothold::FootholdConfig,
    geometry::{ConvexPolygon, Point},
    optimization::OptimizationConfig,
    planner::PlannerConfig,
    terrain::TerrainConfig,
};

/// Geometry of the feet.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct FootConfig {
    /// Contact points of the left sole in the sole frame, mirrored for the right sole.
    pub sole_contact_points: Vec<Point>,
}

impl Default for FootConfig {
    fn default() -> Self {
        Self {
            sole_contact_points: vec![
                Point::new(0.11, 0.055),
                Point::new(0.11, -0.055),
                Point::new(-0.11, -0.055),
                Point::new(-0.11, 0.055),
            ],
        }
    }
}

impl FootConfig {
    /// The nominal sole polygon of the left foot, in the sole frame.
    pub fn left_sole(&self) -> Result<ConvexPolygon> {
        ConvexPolygon::from_points(&self.sole_contact_points)
            .ok_or(Error::DegenerateFootPolygon(self.sole_contact_points.len()))
    }

    /// The nominal sole polygon of the right foot, mirrored from the left one.
    pub fn right_sole(&self) -> Result<ConvexPolygon> {
        let mirrored: Vec<Point> = self
            .sole_contact_points
            .iter()
            .map(|point| Point::new(point.x, -point.y))
            .collect();

        ConvexPolygon::from_points(&mirrored).ok_or(Error::DegenerateFootPolygon(mirrored.len()))
    }
}

/// Configuration of the complete balance pipeline.
#[serde_as]
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct BalanceConfig {
    /// Period of the control loop.
    #[serde_as(as = "DurationMilliSeconds")]
    pub control_period: Duration,
    pub foot: FootConfig,
    pub contact: FootSwitchConfig,
    pub foothold: FootholdConfig,
    pub terrain: TerrainConfig,
    pub planner: PlannerConfig,
    pub optimization: OptimizationConfig,
}

impl Config for BalanceConfig {
    const PATH: &'static str = "balance.toml";
}

impl BalanceConfig {
    /// Control period in seconds.
    #[must_use]
    pub fn dt(&self) -> f64 {
        self.control_period.as_secs_f64()
    }

    pub fn validate(&self) -> Result<()> {
        ensure_positive("control_period", self.dt())?;
        self.foot.left_sole()?;
        self.contact.validate()?;
        self.foothold.validate()?;
        self.terrain.validate()?;
        self.planner.validate()?;
        self.optimization.validate()
    }
}

pub(crate) fn ensure_positive(name: &'static str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::NonPositive { name, value })
    }
}

pub(crate) fn ensure_range(name: &'static str, value: f64, min: f64, max: f64) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Error::OutOfRange {
            name,
            value,
            min,
            max,
        })
    }
}

pub(crate) fn ensure_window(name: &'static str, window: usize) -> Result<()> {
    if window == 0 {
        return Err(Error::EmptyWindow { name });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    fn default_config() -> BalanceConfig {
        BalanceConfig {
            control_period: Duration::from_millis(4),
            ..Default::default()
        }
    }

    #[test]
    fn default_is_valid() {
        default_config().validate().unwrap();
    }

    #[test]
    fn zero_period_is_rejected() {
        assert!(matches!(
            BalanceConfig::default().validate(),
            Err(Error::NonPositive {
                name: "control_period",
                ..
            })
        ));
    }

    #[test]
    fn right_sole_is_mirrored() {
        let foot = FootConfig {
            sole_contact_points: vec![
                Point::new(0.1, 0.06),
                Point::new(0.1, -0.04),
                Point::new(-0.1, -0.04),
                Point::new(-0.1, 0.06),
            ],
        };

        let right = foot.right_sole().unwrap();
        assert!(right.contains(Point::new(0.0, -0.055)));
        assert!(!right.contains(Point::new(0.0, 0.055)));
    }

    #[test]
    fn load_with_overlay() {
        let main_dir = tempdir().unwrap();
        let overlay_dir = tempdir().unwrap();

        let main = toml::to_string(&default_config()).unwrap();
        fs::write(main_dir.path().join(BalanceConfig::PATH), main).unwrap();
        fs::write(
            overlay_dir.path().join(BalanceConfig::PATH),
            "control_period = 10\n\n[planner]\nomega = 3.0\n",
        )
        .unwrap();

        let config = BalanceConfig::load_with_overlay(main_dir.path(), overlay_dir.path()).unwrap();
        assert_eq!(config.control_period, Duration::from_millis(10));
        assert!((config.planner.omega - 3.0).abs() < f64::EPSILON);
        assert_eq!(config.contact, FootSwitchConfig::default());
        config.validate().unwrap();
    }

    #[test]
    fn shipped_config_is_valid() {
        let dir = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../config");
        let config = BalanceConfig::load(dir).unwrap();

        config.validate().unwrap();
    }
}
