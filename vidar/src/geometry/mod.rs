//! Geometric objects in the ground plane.

mod line;
mod polygon;

use nalgebra as na;

pub use line::{Halfplane, Line, LineSegment};
pub use polygon::ConvexPolygon;

pub type Point = na::Point2<f64>;
pub type Vector = na::Vector2<f64>;
pub type Isometry = na::Isometry2<f64>;

/// Distances below this are treated as zero.
pub const EPSILON: f64 = 1e-9;

/// 2D cross product, positive when `b` is counterclockwise from `a`.
#[must_use]
pub fn cross(a: Vector, b: Vector) -> f64 {
    a.x * b.y - a.y * b.x
}

/// Rotates a vector by 90° counterclockwise.
#[must_use]
pub fn perpendicular(vector: Vector) -> Vector {
    Vector::new(-vector.y, vector.x)
}
