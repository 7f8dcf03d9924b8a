//! Shared data types of the balance pipeline.

use nalgebra::{Isometry2, Isometry3, Translation3, UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::{
    Error, Result,
    geometry::{Point, Vector},
};

/// A side of the robot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[default]
    Left,
    Right,
}

impl Side {
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }

    /// `1.0` for the left side, `-1.0` for the right side.
    ///
    /// Multiplying a lateral offset with this mirrors it to the correct side.
    #[must_use]
    pub fn sign(self) -> f64 {
        match self {
            Side::Left => 1.0,
            Side::Right => -1.0,
        }
    }
}

/// A value for each foot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Feet<T> {
    pub left: T,
    pub right: T,
}

impl<T> Feet<T> {
    pub fn new(left: T, right: T) -> Self {
        Self { left, right }
    }

    /// Builds both values from a function of the side.
    pub fn from_fn(mut f: impl FnMut(Side) -> T) -> Self {
        Self {
            left: f(Side::Left),
            right: f(Side::Right),
        }
    }

    pub fn try_from_fn<E>(mut f: impl FnMut(Side) -> std::result::Result<T, E>) -> std::result::Result<Self, E> {
        Ok(Self {
            left: f(Side::Left)?,
            right: f(Side::Right)?,
        })
    }

    #[must_use]
    pub fn get(&self, side: Side) -> &T {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub fn get_mut(&mut self, side: Side) -> &mut T {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    pub fn map<U>(&self, mut f: impl FnMut(Side, &T) -> U) -> Feet<U> {
        Feet {
            left: f(Side::Left, &self.left),
            right: f(Side::Right, &self.right),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Side, &T)> {
        [(Side::Left, &self.left), (Side::Right, &self.right)].into_iter()
    }
}

/// Debounced contact state of a single foot.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContactState {
    InContact,
    #[default]
    NoContact,
}

impl ContactState {
    #[must_use]
    pub fn is_in_contact(self) -> bool {
        matches!(self, ContactState::InContact)
    }
}

impl From<bool> for ContactState {
    fn from(in_contact: bool) -> Self {
        if in_contact {
            ContactState::InContact
        } else {
            ContactState::NoContact
        }
    }
}

/// A force/torque measurement, expressed in the frame of the sensor.
#[derive(Debug, Default, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Wrench {
    pub torque: Vector3<f64>,
    pub force: Vector3<f64>,
    /// Time of the measurement in seconds.
    pub timestamp: f64,
}

impl Wrench {
    #[must_use]
    pub fn new(torque: Vector3<f64>, force: Vector3<f64>, timestamp: f64) -> Self {
        Self {
            torque,
            force,
            timestamp,
        }
    }

    /// Expresses this wrench in another frame, given the pose of this wrench's frame in it.
    ///
    /// The torque is moved to the origin of the new frame.
    #[must_use]
    pub fn transformed(&self, frame_pose: &Isometry3<f64>) -> Self {
        let force = frame_pose.rotation * self.force;
        let torque = frame_pose.rotation * self.torque + frame_pose.translation.vector.cross(&force);

        Self {
            torque,
            force,
            timestamp: self.timestamp,
        }
    }
}

/// Contact description of a single foot, owned by the caller.
///
/// Contact points are expressed in the sole frame.
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct PlaneContactState {
    pub in_contact: bool,
    pub contact_points: Vec<Point>,
}

impl PlaneContactState {
    #[must_use]
    pub fn new(in_contact: bool, contact_points: Vec<Point>) -> Self {
        Self {
            in_contact,
            contact_points,
        }
    }

    /// Replaces the contact points, reusing the existing allocation.
    pub fn set_contact_points(&mut self, points: &[Point]) {
        self.contact_points.clear();
        self.contact_points.extend_from_slice(points);
    }
}

/// Durations of the phases of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FootstepTiming {
    swing_duration: f64,
    transfer_duration: f64,
}

impl FootstepTiming {
    pub fn new(swing_duration: f64, transfer_duration: f64) -> Result<Self> {
        let valid = |duration: f64| duration.is_finite() && duration >= 0.0;
        if !valid(swing_duration) || !valid(transfer_duration) {
            return Err(Error::InvalidTiming {
                swing: swing_duration,
                transfer: transfer_duration,
            });
        }

        Ok(Self {
            swing_duration,
            transfer_duration,
        })
    }

    #[must_use]
    pub fn swing_duration(&self) -> f64 {
        self.swing_duration
    }

    #[must_use]
    pub fn transfer_duration(&self) -> f64 {
        self.transfer_duration
    }

    #[must_use]
    pub fn step_duration(&self) -> f64 {
        self.swing_duration + self.transfer_duration
    }
}

/// A planned foot placement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Footstep {
    pub side: Side,
    /// Target pose of the sole in the world frame.
    pub pose: Isometry3<f64>,
    pub timing: FootstepTiming,
    /// Expected contact points in the sole frame, when the foothold is known to be partial.
    pub predicted_contact_points: Option<Vec<Point>>,
}

impl Footstep {
    #[must_use]
    pub fn new(side: Side, position: Vector3<f64>, yaw: f64, timing: FootstepTiming) -> Self {
        Self {
            side,
            pose: Isometry3::from_parts(
                Translation3::from(position),
                UnitQuaternion::from_euler_angles(0.0, 0.0, yaw),
            ),
            timing,
            predicted_contact_points: None,
        }
    }

    #[must_use]
    pub fn position_2d(&self) -> Point {
        Point::new(self.pose.translation.x, self.pose.translation.y)
    }

    pub fn set_position_2d(&mut self, position: Point) {
        self.pose.translation.x = position.x;
        self.pose.translation.y = position.y;
    }

    #[must_use]
    pub fn yaw(&self) -> f64 {
        yaw(&self.pose)
    }

    /// The horizontal pose of the footstep.
    #[must_use]
    pub fn pose_2d(&self) -> Isometry2<f64> {
        pose_2d(&self.pose)
    }
}

/// Yaw of a 3D pose.
#[must_use]
pub fn yaw(pose: &Isometry3<f64>) -> f64 {
    pose.rotation.euler_angles().2
}

/// Projects a 3D pose onto the ground plane.
#[must_use]
pub fn pose_2d(pose: &Isometry3<f64>) -> Isometry2<f64> {
    Isometry2::new(
        Vector2::new(pose.translation.x, pose.translation.y),
        yaw(pose),
    )
}

/// Rotates a vector given in a frame with `yaw` into the world frame.
#[must_use]
pub fn rotate(vector: Vector, yaw: f64) -> Vector {
    let (sin, cos) = yaw.sin_cos();
    Vector::new(cos * vector.x - sin * vector.y, sin * vector.x + cos * vector.y)
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;

    #[test]
    fn side_sign() {
        assert_eq!(Side::Left.opposite(), Side::Right);
        assert!((Side::Right.sign() + 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn timing_rejects_invalid_durations() {
        assert!(FootstepTiming::new(0.6, 0.1).is_ok());
        assert!(FootstepTiming::new(f64::NAN, 0.1).is_err());
        assert!(FootstepTiming::new(0.6, -0.1).is_err());
        assert!(FootstepTiming::new(f64::INFINITY, 0.1).is_err());
    }

    #[test]
    fn wrench_transform_moves_torque() {
        // 100 N straight down on a sensor 0.05 m in front of the sole origin
        let wrench = Wrench::new(Vector3::zeros(), vector![0.0, 0.0, 100.0], 0.0);
        let sensor_pose = Isometry3::translation(0.05, 0.0, 0.0);

        let sole = wrench.transformed(&sensor_pose);
        assert!((sole.force - vector![0.0, 0.0, 100.0]).norm() < 1e-12);
        assert!((sole.torque - vector![0.0, -5.0, 0.0]).norm() < 1e-12);
    }

    #[test]
    fn footstep_pose() {
        let timing = FootstepTiming::new(0.6, 0.1).unwrap();
        let mut footstep = Footstep::new(Side::Left, vector![0.3, 0.1, 0.0], 0.5, timing);

        assert!((footstep.yaw() - 0.5).abs() < 1e-12);
        footstep.set_position_2d(point![0.2, 0.0]);
        assert_eq!(footstep.position_2d(), point![0.2, 0.0]);
    }
}
