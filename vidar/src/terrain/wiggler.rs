//! Moves a foot polygon into a convex region with as little motion as possible.

use nalgebra::{Matrix3, Vector3};
use ordered_float::OrderedFloat;
use qp::{ActiveSetSolver, QuadraticProgram};
use tracing::debug;

use crate::geometry::{ConvexPolygon, Halfplane, Isometry, Point, Vector, perpendicular};

/// Foot polygons with more vertices are wiggled by translation only.
pub const MAX_FOOT_VERTICES: usize = 8;
/// Regions with more vertices are wiggled by translation only.
pub const MAX_REGION_VERTICES: usize = 16;

const MAX_CONSTRAINTS: usize = MAX_FOOT_VERTICES * MAX_REGION_VERTICES + 6;
/// Number of sampled yaws per direction when translation alone is not enough.
const YAW_SAMPLES: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WiggleParameters {
    /// Required distance between the foot and the region boundary.
    pub desired_distance_inside: f64,
    /// Largest translation along either axis.
    pub maximum_translation: f64,
    /// Largest change of yaw, zero disables rotation.
    pub max_yaw: f64,
    /// Cost of a radian of yaw relative to a meter of translation.
    pub rotation_weight: f64,
}

/// The result of a successful wiggle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Wiggle {
    pub translation: Vector,
    /// Rotation about the centroid of the foot polygon.
    pub yaw: f64,
    /// The complete transform, to be applied on the left of world frame poses.
    pub transform: Isometry,
}

impl Wiggle {
    fn new(translation: Vector, yaw: f64, pivot: Point) -> Self {
        let rotation = Isometry::rotation(yaw);
        let pivot_offset = pivot.coords - (rotation * pivot).coords;

        Self {
            translation,
            yaw,
            transform: Isometry::new(pivot_offset + translation, yaw),
        }
    }

    fn cost(&self, rotation_weight: f64) -> f64 {
        self.translation.norm_squared() + rotation_weight * self.yaw * self.yaw
    }
}

/// Finds the smallest transform that moves `foot` inside `region` by the desired distance.
///
/// Both polygons are in the same frame. Returns `None` if no transform within the limits
/// exists.
#[must_use]
pub fn wiggle(foot: &ConvexPolygon, region: &ConvexPolygon, parameters: &WiggleParameters) -> Option<Wiggle> {
    let pivot = foot.centroid();
    let weight = parameters.rotation_weight;
    let rotate_about_pivot = |yaw: f64| foot.transformed(&Wiggle::new(Vector::zeros(), yaw, pivot).transform);

    let best = yaw_samples(parameters.max_yaw)
        .filter_map(|yaw| {
            wiggle_translation(&rotate_about_pivot(yaw), region, parameters)
                .map(|translation| Wiggle::new(translation, yaw, pivot))
        })
        .min_by_key(|wiggle| OrderedFloat(wiggle.cost(weight)))?;

    if parameters.max_yaw <= 0.0 || foot.len() > MAX_FOOT_VERTICES || region.len() > MAX_REGION_VERTICES {
        return Some(best);
    }

    let Some(yaw) = refine_yaw(&rotate_about_pivot(best.yaw), region, parameters, &best) else {
        return Some(best);
    };
    let Some(correction) = wiggle_translation(&rotate_about_pivot(yaw), region, parameters) else {
        debug!(yaw, "linearized yaw is infeasible");
        return Some(best);
    };

    let refined = Wiggle::new(correction, yaw, pivot);
    if refined.cost(weight) < best.cost(weight) {
        Some(refined)
    } else {
        Some(best)
    }
}

/// Zero first, then evenly spaced yaws up to `max_yaw` in both directions.
fn yaw_samples(max_yaw: f64) -> impl Iterator<Item = f64> {
    let steps = if max_yaw > 0.0 { YAW_SAMPLES } else { 0 };
    std::iter::once(0.0).chain((1..=steps).flat_map(move |step| {
        let yaw = max_yaw * f64::from(step) / f64::from(YAW_SAMPLES);
        [yaw, -yaw]
    }))
}

/// The shortest translation moving `foot` inside `region`.
///
/// The set of feasible translations is itself a convex polygon: every region halfplane `n · x ≤ d`
/// constrains the translation `t` to `n · t ≤ d - max(n · v)` over the foot vertices `v`.
fn wiggle_translation(foot: &ConvexPolygon, region: &ConvexPolygon, parameters: &WiggleParameters) -> Option<Vector> {
    let limit = parameters.maximum_translation;
    let bounds = ConvexPolygon::rectangle(Point::new(-limit, -limit), Point::new(limit, limit))?;

    let feasible = region.halfplanes().try_fold(bounds, |feasible, halfplane| {
        let furthest = foot
            .vertices()
            .iter()
            .map(|vertex| halfplane.normal.dot(&vertex.coords))
            .fold(f64::NEG_INFINITY, f64::max);
        let offset = halfplane.offset - parameters.desired_distance_inside - furthest;

        feasible.clipped(&Halfplane::new(halfplane.normal, offset))
    })?;

    Some(feasible.closest_point(Point::origin()).coords)
}

/// Linearizes the rotation about the foot centroid and solves for translation and yaw.
///
/// `foot` is already rotated by the yaw of `start`, whose translation is feasible for the
/// linearized problem. Returns the total yaw.
fn refine_yaw(foot: &ConvexPolygon, region: &ConvexPolygon, parameters: &WiggleParameters, start: &Wiggle) -> Option<f64> {
    let pivot = foot.centroid();
    let weight = parameters.rotation_weight.max(1e-6);
    let hessian = Matrix3::from_diagonal(&Vector3::new(2.0, 2.0, 2.0 * weight));
    let gradient = Vector3::new(0.0, 0.0, 2.0 * weight * start.yaw);
    let mut program = QuadraticProgram::<3, MAX_CONSTRAINTS>::new(hessian, gradient);

    for halfplane in region.halfplanes() {
        for vertex in foot.vertices() {
            let lever = perpendicular(vertex - pivot);
            let row = Vector3::new(halfplane.normal.x, halfplane.normal.y, halfplane.normal.dot(&lever));
            let bound = halfplane.offset - parameters.desired_distance_inside - halfplane.normal.dot(&vertex.coords);
            program.add_inequality(row, bound).ok()?;
        }
    }
    let limit = parameters.maximum_translation;
    program.add_bounds(0, -limit, limit).ok()?;
    program.add_bounds(1, -limit, limit).ok()?;
    program
        .add_bounds(2, -parameters.max_yaw - start.yaw, parameters.max_yaw - start.yaw)
        .ok()?;

    let initial = Vector3::new(start.translation.x, start.translation.y, 0.0);
    match ActiveSetSolver::new(50, 1e-9).solve(&program, initial) {
        Ok(solution) => Some(start.yaw + solution.x.z),
        Err(error) => {
            debug!(%error, "yaw refinement failed");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;

    fn parameters() -> WiggleParameters {
        WiggleParameters {
            desired_distance_inside: 0.02,
            maximum_translation: 0.5,
            max_yaw: 0.2,
            rotation_weight: 1.0,
        }
    }

    fn foot_at(x: f64, y: f64) -> ConvexPolygon {
        ConvexPolygon::rectangle(point![x - 0.1, y - 0.05], point![x + 0.1, y + 0.05]).unwrap()
    }

    #[test]
    fn inside_foot_does_not_move() {
        let region = ConvexPolygon::rectangle(point![-1.0, -1.0], point![1.0, 1.0]).unwrap();
        let wiggle = wiggle(&foot_at(0.2, 0.1), &region, &parameters()).unwrap();

        assert!(wiggle.translation.norm() < 1e-9);
        assert!(wiggle.yaw.abs() < 1e-9);
    }

    #[test]
    fn moves_behind_edge() {
        let region = ConvexPolygon::rectangle(point![-1.0, -1.0], point![0.25, 1.0]).unwrap();
        let foot = foot_at(0.3, 0.1);
        let wiggle = wiggle(&foot, &region, &parameters()).unwrap();
        let moved = foot.transformed(&wiggle.transform);

        assert!(moved.max_x() <= 0.23 + 1e-9);
        assert!((wiggle.translation - vector![-0.17, 0.0]).norm() < 1e-6);
        assert!(region.contains_polygon(&moved, 0.02 - 1e-9));
    }

    #[test]
    fn too_small_region() {
        let region = ConvexPolygon::rectangle(point![0.0, 0.0], point![0.1, 0.1]).unwrap();
        assert!(wiggle(&foot_at(0.05, 0.05), &region, &parameters()).is_none());
    }

    #[test]
    fn translation_limit() {
        let region = ConvexPolygon::rectangle(point![2.0, -1.0], point![3.0, 1.0]).unwrap();
        assert!(wiggle(&foot_at(0.0, 0.0), &region, &parameters()).is_none());
    }

    #[test]
    fn rotation_helps_in_diagonal_corridor() {
        // a corridor rotated by 0.15 rad, barely wider than the foot plus clearance
        let corridor = Isometry::rotation(0.15);
        let region = ConvexPolygon::rectangle(point![-1.0, -0.075], point![1.0, 0.075])
            .unwrap()
            .transformed(&corridor);
        let foot = foot_at(0.0, 0.0);

        let rotated = wiggle(&foot, &region, &parameters()).unwrap();
        let translated = wiggle(
            &foot,
            &region,
            &WiggleParameters {
                max_yaw: 0.0,
                ..parameters()
            },
        );

        assert!(rotated.yaw > 0.0);
        assert!(region.contains_polygon(&foot.transformed(&rotated.transform), 0.02 - 1e-9));
        if let Some(translated) = translated {
            assert!(rotated.cost(1.0) <= translated.cost(1.0));
        }
    }
}
