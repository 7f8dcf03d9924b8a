use geo::{Area, Coord, LineString, Polygon};
use nalgebra::{Point3, UnitQuaternion, Vector3};
use serde::Serialize;

use crate::{
    Error, Result,
    geometry::{ConvexPolygon, EPSILON, Point},
};

/// The plane `normal · p = offset` with an upward unit normal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PlaneEquation {
    normal: Vector3<f64>,
    offset: f64,
}

impl PlaneEquation {
    /// Creates a plane from a normal of any length.
    pub fn new(normal: Vector3<f64>, offset: f64) -> Result<Self> {
        let length = normal.norm();
        if !length.is_finite() || !offset.is_finite() || length < EPSILON || normal.z / length < EPSILON {
            return Err(Error::InvalidPlane(normal.into()));
        }

        Ok(Self {
            normal: normal / length,
            offset: offset / length,
        })
    }

    /// A horizontal plane at `height`.
    #[must_use]
    pub fn horizontal(height: f64) -> Self {
        Self {
            normal: Vector3::z(),
            offset: height,
        }
    }

    /// The plane through `point` with the given normal.
    pub fn through(point: &Point3<f64>, normal: Vector3<f64>) -> Result<Self> {
        Self::new(normal, normal.dot(&point.coords))
    }

    #[must_use]
    pub fn normal(&self) -> Vector3<f64> {
        self.normal
    }

    /// Height of the plane above `point`.
    #[must_use]
    pub fn height_at(&self, point: Point) -> f64 {
        (self.offset - self.normal.x * point.x - self.normal.y * point.y) / self.normal.z
    }

    /// The rotation taking the world z axis onto the plane normal.
    #[must_use]
    pub fn tilt(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::rotation_between(&Vector3::z(), &self.normal).unwrap_or_else(UnitQuaternion::identity)
    }
}

/// A planar patch of terrain the robot may step on, in the world frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SteppableRegion {
    pub plane: PlaneEquation,
    /// Horizontal projection of the region's convex hull.
    pub convex_hull: ConvexPolygon,
    /// Horizontal projection of the region's outline, when it is known.
    pub concave_hull: Option<Vec<Point>>,
}

impl SteppableRegion {
    #[must_use]
    pub fn new(plane: PlaneEquation, convex_hull: ConvexPolygon) -> Self {
        Self {
            plane,
            convex_hull,
            concave_hull: None,
        }
    }

    /// Creates a region from its outline, the convex hull is computed from it.
    ///
    /// Returns `None` for outlines without area.
    #[must_use]
    pub fn from_outline(plane: PlaneEquation, outline: Vec<Point>) -> Option<Self> {
        Some(Self {
            plane,
            convex_hull: ConvexPolygon::from_points(&outline)?,
            concave_hull: Some(outline),
        })
    }

    /// Area of the convex hull relative to the area of the outline.
    ///
    /// `None` without an outline, infinite when the outline has no area.
    #[must_use]
    pub fn concavity_ratio(&self) -> Option<f64> {
        let outline = self.concave_hull.as_ref()?;
        let concave_area = to_geo(outline).unsigned_area();
        if concave_area < EPSILON {
            return Some(f64::INFINITY);
        }

        Some(self.convex_hull.area() / concave_area)
    }
}

fn to_geo(points: &[Point]) -> Polygon<f64> {
    let exterior: LineString<f64> = points.iter().map(|point| Coord { x: point.x, y: point.y }).collect();
    Polygon::new(exterior, Vec::new())
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;

    #[test]
    fn plane_height() {
        // rises 0.1 m per meter in x
        let plane = PlaneEquation::new(vector![-0.1, 0.0, 1.0], 0.2).unwrap();

        assert!((plane.height_at(point![0.0, 3.0]) - 0.2).abs() < 1e-12);
        assert!((plane.height_at(point![1.0, 0.0]) - 0.3).abs() < 1e-12);
        assert!((plane.tilt() * Vector3::z() - plane.normal()).norm() < 1e-12);
    }

    #[test]
    fn vertical_plane_is_rejected() {
        assert!(PlaneEquation::new(vector![1.0, 0.0, 0.0], 0.0).is_err());
        assert!(PlaneEquation::new(vector![0.0, 0.0, -1.0], 0.0).is_err());
        assert!(PlaneEquation::new(Vector3::zeros(), 0.0).is_err());
    }

    #[test]
    fn l_shape_concavity() {
        let outline = vec![
            point![0.0, 0.0],
            point![2.0, 0.0],
            point![2.0, 1.0],
            point![1.0, 1.0],
            point![1.0, 2.0],
            point![0.0, 2.0],
        ];
        let region = SteppableRegion::from_outline(PlaneEquation::horizontal(0.0), outline).unwrap();

        assert!((region.convex_hull.area() - 3.5).abs() < 1e-12);
        assert!((region.concavity_ratio().unwrap() - 3.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn convex_region_has_no_ratio() {
        let hull = ConvexPolygon::rectangle(point![0.0, 0.0], point![1.0, 1.0]).unwrap();
        assert!(SteppableRegion::new(PlaneEquation::horizontal(0.0), hull).concavity_ratio().is_none());
    }
}
