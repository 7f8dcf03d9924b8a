use nalgebra::{Matrix2, SymmetricEigen, Unit};
use serde::{Deserialize, Serialize};

use crate::{
    Result,
    config::{ensure_positive, ensure_range, ensure_window},
    geometry::{Line, Point, Vector},
};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct EdgeConfig {
    /// Number of CoP samples kept for the line fit.
    pub cop_history_size: usize,
    /// Number of CoP samples needed before a line is fitted.
    pub min_history_samples: usize,
    /// Largest ratio between the spread across and along the fitted line.
    pub max_fit_thickness_ratio: f64,
    /// Smallest spread along the fitted line in meters.
    pub min_fit_extent: f64,
    /// Largest change in direction in rad between ticks for an edge to count as stable.
    pub direction_stability_threshold: f64,
    /// Number of consecutive stable ticks before an edge is trusted.
    pub stable_edge_ticks: usize,
    /// Horizontal angular velocity in rad/s below which its direction is meaningless.
    pub min_angular_velocity: f64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            cop_history_size: 40,
            min_history_samples: 8,
            max_fit_thickness_ratio: 0.2,
            min_fit_extent: 0.005,
            direction_stability_threshold: 0.15,
            stable_edge_ticks: 5,
            min_angular_velocity: 0.1,
        }
    }
}

impl EdgeConfig {
    pub fn validate(&self) -> Result<()> {
        ensure_window("cop_history_size", self.cop_history_size)?;
        ensure_range(
            "min_history_samples",
            self.min_history_samples as f64,
            2.0,
            self.cop_history_size as f64,
        )?;
        ensure_range("max_fit_thickness_ratio", self.max_fit_thickness_ratio, 0.0, 1.0)?;
        ensure_positive("min_fit_extent", self.min_fit_extent)?;
        ensure_positive("direction_stability_threshold", self.direction_stability_threshold)?;
        ensure_positive("min_angular_velocity", self.min_angular_velocity)
    }
}

/// A line the foot rotates about, in the sole frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RotationEdge {
    pub line: Line,
    pub trusted: bool,
}

/// Counts for how many consecutive ticks a line kept its direction.
#[derive(Debug, Default, Clone)]
struct Stability {
    previous: Option<Line>,
    ticks: usize,
}

impl Stability {
    fn update(&mut self, line: Line, threshold: f64) -> usize {
        self.ticks = match self.previous {
            Some(previous) if previous.angle_to(&line) < threshold => self.ticks + 1,
            _ => 0,
        };
        self.previous = Some(line);
        self.ticks
    }

    fn reset(&mut self) {
        self.previous = None;
        self.ticks = 0;
    }
}

/// Fits a line through the recent CoP trace.
#[derive(Debug, Clone)]
pub struct CopHistoryEdge {
    config: EdgeConfig,
    history: Vec<Point>,
    next: usize,
    stability: Stability,
    edge: Option<RotationEdge>,
}

impl CopHistoryEdge {
    #[must_use]
    pub fn new(config: &EdgeConfig) -> Self {
        Self {
            config: config.clone(),
            history: Vec::with_capacity(config.cop_history_size),
            next: 0,
            stability: Stability::default(),
            edge: None,
        }
    }

    fn push(&mut self, cop: Point) {
        if self.history.len() < self.config.cop_history_size {
            self.history.push(cop);
        } else {
            self.history[self.next] = cop;
        }
        self.next = (self.next + 1) % self.config.cop_history_size;
    }

    /// Total least squares fit, `None` when the trace is too short or too round.
    fn fit(&self) -> Option<Line> {
        if self.history.len() < self.config.min_history_samples {
            return None;
        }

        let count = self.history.len() as f64;
        let mean = self
            .history
            .iter()
            .fold(Vector::zeros(), |sum, point| sum + point.coords)
            / count;
        let covariance = self
            .history
            .iter()
            .map(|point| {
                let offset = point.coords - mean;
                offset * offset.transpose()
            })
            .fold(Matrix2::zeros(), |sum, outer| sum + outer)
            / count;

        let eigen = SymmetricEigen::new(covariance);
        let (major, minor) = if eigen.eigenvalues[0] >= eigen.eigenvalues[1] {
            (0, 1)
        } else {
            (1, 0)
        };

        let major_extent = eigen.eigenvalues[major].max(0.0).sqrt();
        let minor_extent = eigen.eigenvalues[minor].max(0.0).sqrt();
        if major_extent < self.config.min_fit_extent
            || minor_extent > self.config.max_fit_thickness_ratio * major_extent
        {
            return None;
        }

        let direction = Unit::try_new(eigen.eigenvectors.column(major).into_owned(), 1e-9)?;
        Some(Line::new(Point::from(mean), direction))
    }

    fn update(&mut self, cop: Option<Point>) {
        let Some(cop) = cop else {
            return;
        };
        self.push(cop);

        self.edge = self.fit().map(|line| {
            let ticks = self
                .stability
                .update(line, self.config.direction_stability_threshold);
            RotationEdge {
                line,
                trusted: ticks >= self.config.stable_edge_ticks,
            }
        });
        if self.edge.is_none() {
            self.stability.reset();
        }
    }

    fn reset(&mut self) {
        self.history.clear();
        self.next = 0;
        self.stability.reset();
        self.edge = None;
    }
}

/// Places the line through the measured CoP, along the foot's angular velocity.
#[derive(Debug, Clone)]
pub struct CopVelocityEdge {
    config: EdgeConfig,
    stability: Stability,
    edge: Option<RotationEdge>,
}

impl CopVelocityEdge {
    #[must_use]
    pub fn new(config: &EdgeConfig) -> Self {
        Self {
            config: config.clone(),
            stability: Stability::default(),
            edge: None,
        }
    }

    fn update(&mut self, cop: Option<Point>, angular_velocity: Vector) {
        let line = cop.zip(Unit::try_new(angular_velocity, self.config.min_angular_velocity))
            .map(|(cop, direction)| Line::new(cop, direction));

        self.edge = line.map(|line| {
            let ticks = self
                .stability
                .update(line, self.config.direction_stability_threshold);
            RotationEdge {
                line,
                trusted: ticks >= self.config.stable_edge_ticks,
            }
        });
        if self.edge.is_none() {
            self.stability.reset();
        }
    }

    fn reset(&mut self) {
        self.stability.reset();
        self.edge = None;
    }
}

/// A method of estimating the edge the foot rotates about.
#[derive(Debug, Clone)]
pub enum EdgeCalculator {
    CopHistory(CopHistoryEdge),
    CopAndVelocity(CopVelocityEdge),
}

impl EdgeCalculator {
    pub fn update(&mut self, cop: Option<Point>, angular_velocity: Vector) {
        match self {
            EdgeCalculator::CopHistory(calculator) => calculator.update(cop),
            EdgeCalculator::CopAndVelocity(calculator) => calculator.update(cop, angular_velocity),
        }
    }

    #[must_use]
    pub fn edge(&self) -> Option<RotationEdge> {
        match self {
            EdgeCalculator::CopHistory(calculator) => calculator.edge,
            EdgeCalculator::CopAndVelocity(calculator) => calculator.edge,
        }
    }

    /// The line of rotation, if it is trusted.
    #[must_use]
    pub fn trusted_line(&self) -> Option<Line> {
        self.edge()
            .filter(|edge| edge.trusted)
            .map(|edge| edge.line)
    }

    pub fn reset(&mut self) {
        match self {
            EdgeCalculator::CopHistory(calculator) => calculator.reset(),
            EdgeCalculator::CopAndVelocity(calculator) => calculator.reset(),
        }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{point, vector};

    use super::*;

    #[test]
    fn cop_history_fits_toe_line() {
        let config = EdgeConfig::default();
        let mut calculator = EdgeCalculator::CopHistory(CopHistoryEdge::new(&config));

        // CoP sliding along the toe at x = 0.1
        for tick in 0..30 {
            let y = -0.04 + 0.08 * f64::from(tick % 10) / 9.0;
            calculator.update(Some(point![0.1 + 1e-4 * f64::from(tick % 2), y]), Vector::zeros());
        }

        let line = calculator.trusted_line().unwrap();
        assert!((line.point.x - 0.1).abs() < 1e-3);
        assert!(line.direction.x.abs() < 0.01);
    }

    #[test]
    fn round_trace_is_not_an_edge() {
        let mut calculator = EdgeCalculator::CopHistory(CopHistoryEdge::new(&EdgeConfig::default()));

        for tick in 0..40 {
            let angle = f64::from(tick) * 0.7;
            calculator.update(Some(point![0.02 * angle.cos(), 0.02 * angle.sin()]), Vector::zeros());
        }

        assert!(calculator.edge().is_none());
    }

    #[test]
    fn cop_and_velocity_needs_stable_direction() {
        let config = EdgeConfig::default();
        let mut calculator = EdgeCalculator::CopAndVelocity(CopVelocityEdge::new(&config));

        for _ in 0..config.stable_edge_ticks {
            calculator.update(Some(point![0.1, 0.0]), vector![0.0, 1.0]);
            assert!(calculator.trusted_line().is_none());
        }
        calculator.update(Some(point![0.1, 0.0]), vector![0.0, 1.0]);
        assert!(calculator.trusted_line().is_some());

        // too slow to tell the direction
        calculator.update(Some(point![0.1, 0.0]), vector![0.0, 0.01]);
        assert!(calculator.edge().is_none());

        calculator.reset();
        assert!(calculator.edge().is_none());
    }
}
