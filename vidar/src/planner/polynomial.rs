use std::ops::Add;

use serde::Serialize;

use crate::geometry::Vector;

/// Number of coefficients of a [`Polynomial`], so at most degree five.
pub const COEFFICIENTS: usize = 6;

/// A planar polynomial `p(t) = Σ cᵢ tⁱ` in local segment time.
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Polynomial {
    coefficients: [Vector; COEFFICIENTS],
}

impl Default for Polynomial {
    fn default() -> Self {
        Self::zero()
    }
}

impl Polynomial {
    #[must_use]
    pub fn zero() -> Self {
        Self {
            coefficients: [Vector::zeros(); COEFFICIENTS],
        }
    }

    #[must_use]
    pub fn constant(value: Vector) -> Self {
        let mut polynomial = Self::zero();
        polynomial.coefficients[0] = value;
        polynomial
    }

    #[must_use]
    pub fn from_coefficients(coefficients: [Vector; COEFFICIENTS]) -> Self {
        Self { coefficients }
    }

    /// Cubic from `start` to `end` over `duration`, with zero slope at both ends.
    #[must_use]
    pub fn cubic_blend(start: Vector, end: Vector, duration: f64) -> Self {
        let delta = end - start;
        let mut polynomial = Self::constant(start);
        polynomial.coefficients[2] = 3.0 * delta / duration.powi(2);
        polynomial.coefficients[3] = -2.0 * delta / duration.powi(3);
        polynomial
    }

    /// Acceleration of a minimum jerk motion covering `displacement` in `duration`.
    #[must_use]
    pub fn minimum_jerk_acceleration(displacement: Vector, duration: f64) -> Self {
        let mut polynomial = Self::zero();
        polynomial.coefficients[1] = 60.0 * displacement / duration.powi(3);
        polynomial.coefficients[2] = -180.0 * displacement / duration.powi(4);
        polynomial.coefficients[3] = 120.0 * displacement / duration.powi(5);
        polynomial
    }

    #[must_use]
    pub fn coefficients(&self) -> &[Vector; COEFFICIENTS] {
        &self.coefficients
    }

    #[must_use]
    pub fn evaluate(&self, t: f64) -> Vector {
        self.coefficients
            .iter()
            .rev()
            .fold(Vector::zeros(), |value, coefficient| value * t + coefficient)
    }

    #[must_use]
    pub fn derivative(&self) -> Self {
        let mut derivative = Self::zero();
        for power in 1..COEFFICIENTS {
            derivative.coefficients[power - 1] = power as f64 * self.coefficients[power];
        }
        derivative
    }

    /// The antiderivative that is zero at `t = 0`.
    ///
    /// The highest coefficient must be zero.
    #[must_use]
    pub fn integral(&self) -> Self {
        debug_assert!(self.coefficients[COEFFICIENTS - 1] == Vector::zeros());

        let mut integral = Self::zero();
        for power in 0..COEFFICIENTS - 1 {
            integral.coefficients[power + 1] = self.coefficients[power] / (power + 1) as f64;
        }
        integral
    }

    /// The polynomial `t ↦ p(t + offset)`.
    #[must_use]
    pub fn shifted(&self, offset: f64) -> Self {
        let mut shifted = Self::zero();
        for (power, coefficient) in self.coefficients.iter().enumerate() {
            // binomial expansion of (t + offset)^power
            let mut binomial = 1.0;
            for target in (0..=power).rev() {
                let exponent = power - target;
                shifted.coefficients[target] += binomial * offset.powi(exponent as i32) * coefficient;
                binomial = binomial * target as f64 / (exponent + 1) as f64;
            }
        }
        shifted
    }

    #[must_use]
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            coefficients: self.coefficients.map(|coefficient| coefficient * factor),
        }
    }

    /// Applies a linear map to every coefficient.
    #[must_use]
    pub fn map(&self, f: impl Fn(Vector) -> Vector) -> Self {
        Self {
            coefficients: self.coefficients.map(f),
        }
    }

    /// The particular solution `q = Σ p⁽ᵏ⁾ / ωᵏ` of `ξ̇ = ω (ξ - p)`.
    #[must_use]
    pub fn icp_particular_solution(&self, omega: f64) -> Self {
        let mut solution = Self::zero();
        let mut derivative = *self;
        let mut scale = 1.0;

        for _ in 0..COEFFICIENTS {
            solution = solution + derivative.scaled(scale);
            derivative = derivative.derivative();
            scale /= omega;
        }

        solution
    }
}

impl Add for Polynomial {
    type Output = Polynomial;

    fn add(self, other: Polynomial) -> Polynomial {
        let mut sum = self;
        for (coefficient, other) in sum.coefficients.iter_mut().zip(other.coefficients) {
            *coefficient += other;
        }
        sum
    }
}
