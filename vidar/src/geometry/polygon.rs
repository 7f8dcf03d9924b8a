use geo::{ConvexHull, MultiPoint};
use itertools::Itertools;
use ordered_float::OrderedFloat;
use serde::Serialize;

use super::{EPSILON, Halfplane, Isometry, LineSegment, Point, Vector, cross};

/// Cross products below this are treated as collinear when building a hull.
const COLLINEAR_TOLERANCE: f64 = 1e-12;

/// A convex polygon with counterclockwise vertices.
///
/// A polygon always has at least three vertices and a non-zero area, operations that could
/// produce anything smaller return `None`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConvexPolygon {
    vertices: Vec<Point>,
}

impl ConvexPolygon {
    /// Creates the convex hull of `points`.
    #[must_use]
    pub fn from_points(points: &[Point]) -> Option<Self> {
        let vertices = convex_hull(points);
        if vertices.len() < 3 {
            return None;
        }

        let polygon = Self { vertices };
        (polygon.area() > COLLINEAR_TOLERANCE).then_some(polygon)
    }

    /// Creates an axis aligned rectangle.
    #[must_use]
    pub fn rectangle(min: Point, max: Point) -> Option<Self> {
        Self::from_points(&[
            min,
            Point::new(max.x, min.y),
            max,
            Point::new(min.x, max.y),
        ])
    }

    #[must_use]
    pub fn vertices(&self) -> &[Point] {
        &self.vertices
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vertices.len()
    }

    /// Always `false`, a polygon has at least three vertices.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    pub fn edges(&self) -> impl Iterator<Item = LineSegment> + '_ {
        self.vertices
            .iter()
            .circular_tuple_windows()
            .map(|(&start, &end)| LineSegment::new(start, end))
    }

    /// The halfplanes whose intersection is this polygon, one per edge.
    pub fn halfplanes(&self) -> impl Iterator<Item = Halfplane> + '_ {
        self.edges().map(|edge| {
            let direction = (edge.end - edge.start) / edge.length();
            let normal = Vector::new(direction.y, -direction.x);
            Halfplane::new(normal, normal.dot(&edge.start.coords))
        })
    }

    #[must_use]
    pub fn area(&self) -> f64 {
        0.5 * self
            .vertices
            .iter()
            .circular_tuple_windows()
            .map(|(a, b)| cross(a.coords, b.coords))
            .sum::<f64>()
    }

    #[must_use]
    pub fn centroid(&self) -> Point {
        let origin = self.vertices[0];
        let mut weighted = Vector::zeros();
        let mut area = 0.0;

        for (a, b) in self.vertices[1..].iter().tuple_windows() {
            let triangle = 0.5 * cross(a - origin, b - origin);
            weighted += triangle * ((a - origin) + (b - origin)) / 3.0;
            area += triangle;
        }

        origin + weighted / area
    }

    #[must_use]
    pub fn contains(&self, point: Point) -> bool {
        self.halfplanes().all(|halfplane| halfplane.contains(point))
    }

    /// Distance to the boundary, negative inside the polygon.
    #[must_use]
    pub fn signed_distance(&self, point: Point) -> f64 {
        if self.contains(point) {
            return self
                .halfplanes()
                .map(|halfplane| halfplane.signed_distance(point))
                .fold(f64::NEG_INFINITY, f64::max);
        }

        (self.closest_point(point) - point).norm()
    }

    /// The point of the polygon closest to `point`, which is `point` itself when inside.
    #[must_use]
    pub fn closest_point(&self, point: Point) -> Point {
        if self.contains(point) {
            return point;
        }

        self.edges()
            .map(|edge| edge.closest_point(point))
            .min_by_key(|candidate| OrderedFloat((candidate - point).norm_squared()))
            .unwrap_or(point)
    }

    /// The vertex furthest in `direction`.
    #[must_use]
    pub fn support_point(&self, direction: Vector) -> Point {
        self.vertices
            .iter()
            .copied()
            .max_by_key(|vertex| OrderedFloat(direction.dot(&vertex.coords)))
            .unwrap_or_else(|| self.vertices[0])
    }

    #[must_use]
    pub fn min_x(&self) -> f64 {
        self.support_point(-Vector::x()).x
    }

    #[must_use]
    pub fn max_x(&self) -> f64 {
        self.support_point(Vector::x()).x
    }

    #[must_use]
    pub fn transformed(&self, isometry: &Isometry) -> Self {
        Self {
            vertices: self.vertices.iter().map(|vertex| isometry * vertex).collect(),
        }
    }

    #[must_use]
    pub fn translated(&self, offset: Vector) -> Self {
        Self {
            vertices: self.vertices.iter().map(|vertex| vertex + offset).collect(),
        }
    }

    /// The part of the polygon inside `halfplane`.
    #[must_use]
    pub fn clipped(&self, halfplane: &Halfplane) -> Option<Self> {
        let mut clipped = Vec::with_capacity(self.vertices.len() + 1);

        for (&a, &b) in self.vertices.iter().circular_tuple_windows() {
            let distance_a = halfplane.signed_distance(a);
            let distance_b = halfplane.signed_distance(b);

            if distance_a <= 0.0 {
                clipped.push(a);
            }
            if (distance_a < 0.0 && distance_b > 0.0) || (distance_a > 0.0 && distance_b < 0.0) {
                let t = distance_a / (distance_a - distance_b);
                clipped.push(a + t * (b - a));
            }
        }

        Self::from_points(&clipped)
    }

    #[must_use]
    pub fn intersection(&self, other: &ConvexPolygon) -> Option<Self> {
        other
            .halfplanes()
            .try_fold(self.clone(), |polygon, halfplane| polygon.clipped(&halfplane))
    }

    /// Moves every edge `distance` towards the inside.
    #[must_use]
    pub fn shrunk(&self, distance: f64) -> Option<Self> {
        if distance <= 0.0 {
            return Some(self.clone());
        }

        self.halfplanes()
            .try_fold(self.clone(), |polygon, halfplane| {
                polygon.clipped(&halfplane.shrunk(distance))
            })
    }

    /// Checks whether every vertex of `other` is inside this polygon by at least `margin`.
    #[must_use]
    pub fn contains_polygon(&self, other: &ConvexPolygon, margin: f64) -> bool {
        self.halfplanes().all(|halfplane| {
            other
                .vertices
                .iter()
                .all(|&vertex| halfplane.signed_distance(vertex) <= -margin + EPSILON)
        })
    }
}

/// The hull counterclockwise, without collinear or repeated points.
fn convex_hull(points: &[Point]) -> Vec<Point> {
    let points: MultiPoint<f64> = points
        .iter()
        .filter(|point| point.x.is_finite() && point.y.is_finite())
        .map(|point| geo::Point::new(point.x, point.y))
        .collect();
    let hull = points.convex_hull();

    let mut ring: Vec<Point> = hull.exterior().coords().map(|coord| Point::new(coord.x, coord.y)).collect();
    ring.dedup_by(|a, b| (*a - *b).norm() < EPSILON);
    // geo closes the ring
    if matches!(ring.as_slice(), [first, .., last] if (first - last).norm() < EPSILON) {
        ring.pop();
    }
    if ring.len() < 3 {
        return ring;
    }

    let doubled_area: f64 = ring.iter().circular_tuple_windows().map(|(a, b)| cross(a.coords, b.coords)).sum();
    if doubled_area < 0.0 {
        ring.reverse();
    }

    ring.iter()
        .circular_tuple_windows()
        .filter(|&(previous, vertex, next)| cross(vertex - previous, next - vertex) > COLLINEAR_TOLERANCE)
        .map(|(_, &vertex, _)| vertex)
        .collect()
}
