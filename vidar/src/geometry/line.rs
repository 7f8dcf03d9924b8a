use nalgebra::Unit;
use serde::Serialize;

use super::{EPSILON, Point, Vector, cross, perpendicular};

/// A line segment from `start` to `end`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct LineSegment {
    pub start: Point,
    pub end: Point,
}

impl LineSegment {
    #[must_use]
    pub fn new(start: Point, end: Point) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn length(self) -> f64 {
        (self.end - self.start).norm()
    }

    /// Returns the point on the segment closest to `point`.
    #[must_use]
    pub fn closest_point(self, point: Point) -> Point {
        let along = self.end - self.start;
        let length_squared = along.norm_squared();
        if length_squared < EPSILON * EPSILON {
            return self.start;
        }

        let t = ((point - self.start).dot(&along) / length_squared).clamp(0.0, 1.0);
        self.start + t * along
    }
}

/// An infinite line through `point` along `direction`.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Line {
    pub point: Point,
    pub direction: Unit<Vector>,
}

impl Line {
    #[must_use]
    pub fn new(point: Point, direction: Unit<Vector>) -> Self {
        Self { point, direction }
    }

    /// Creates a line through two points, `None` if they coincide.
    #[must_use]
    pub fn through(a: Point, b: Point) -> Option<Self> {
        Unit::try_new(b - a, EPSILON).map(|direction| Self::new(a, direction))
    }

    /// Signed distance of `point` to the line, positive on the left side.
    #[must_use]
    pub fn signed_distance(&self, point: Point) -> f64 {
        cross(self.direction.into_inner(), point - self.point)
    }

    #[must_use]
    pub fn is_left(&self, point: Point) -> bool {
        self.signed_distance(point) > 0.0
    }

    /// Angle between the directions of two lines, ignoring orientation, in `[0, π/2]`.
    #[must_use]
    pub fn angle_to(&self, other: &Line) -> f64 {
        self.direction
            .dot(other.direction.as_ref())
            .abs()
            .clamp(0.0, 1.0)
            .acos()
    }

    /// The halfplane of points on the left side of the line.
    #[must_use]
    pub fn left_halfplane(&self) -> Halfplane {
        let normal = -perpendicular(self.direction.into_inner());
        Halfplane::new(normal, normal.dot(&self.point.coords))
    }

    /// The halfplane of points on the right side of the line.
    #[must_use]
    pub fn right_halfplane(&self) -> Halfplane {
        let normal = perpendicular(self.direction.into_inner());
        Halfplane::new(normal, normal.dot(&self.point.coords))
    }
}

/// The set of points `x` with `normal · x ≤ offset`.
///
/// The normal points out of the halfplane and has unit length.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Halfplane {
    pub normal: Vector,
    pub offset: f64,
}

impl Halfplane {
    #[must_use]
    pub fn new(normal: Vector, offset: f64) -> Self {
        Self { normal, offset }
    }

    /// Signed distance to the boundary, negative inside.
    #[must_use]
    pub fn signed_distance(&self, point: Point) -> f64 {
        self.normal.dot(&point.coords) - self.offset
    }

    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        self.signed_distance(point) <= EPSILON
    }

    /// Moves the boundary `distance` towards the inside.
    #[must_use]
    pub fn shrunk(self, distance: f64) -> Self {
        Self::new(self.normal, self.offset - distance)
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;

    #[test]
    fn signed_distance_sides() {
        let line = Line::through(point![0.0, 0.0], point![1.0, 0.0]).unwrap();

        assert!((line.signed_distance(point![0.5, 2.0]) - 2.0).abs() < 1e-12);
        assert!(line.is_left(point![0.0, 0.1]));
        assert!(!line.is_left(point![0.0, -0.1]));
    }

    #[test]
    fn halfplanes_of_line() {
        let line = Line::through(point![0.0, 0.0], point![0.0, 1.0]).unwrap();

        assert!(line.left_halfplane().contains(point![-1.0, 0.0]));
        assert!(!line.left_halfplane().contains(point![1.0, 0.0]));
        assert!(line.right_halfplane().contains(point![1.0, 5.0]));
    }

    #[test]
    fn angle_ignores_orientation() {
        let a = Line::new(point![0.0, 0.0], Unit::new_normalize(vector![1.0, 0.0]));
        let b = Line::new(point![3.0, 1.0], Unit::new_normalize(vector![-1.0, 0.0]));

        assert!(a.angle_to(&b) < 1e-9);
    }

    #[test]
    fn closest_point_on_segment() {
        let segment = LineSegment::new(point![0.0, 0.0], point![1.0, 0.0]);

        assert_eq!(segment.closest_point(point![2.0, 1.0]), point![1.0, 0.0]);
        assert_eq!(segment.closest_point(point![0.5, -1.0]), point![0.5, 0.0]);
    }
}
