use nalgebra::SVector;

use crate::{Error, Result};

/// Backward finite difference of a sampled signal with a fixed sample period.
#[derive(Copy, Clone, Debug)]
pub struct FiniteDifference<const N: usize> {
    dt: f64,
    previous: Option<SVector<f64, N>>,
    rate: SVector<f64, N>,
}

impl<const N: usize> FiniteDifference<N> {
    pub fn new(dt: f64) -> Result<Self> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(Error::InvalidPeriod(dt));
        }

        Ok(Self {
            dt,
            previous: None,
            rate: SVector::zeros(),
        })
    }

    /// Feeds a new sample, returning the rate of change since the previous sample.
    ///
    /// The first sample yields a zero rate.
    pub fn update(&mut self, x: SVector<f64, N>) -> SVector<f64, N> {
        self.rate = match self.previous {
            Some(previous) => (x - previous) / self.dt,
            None => SVector::zeros(),
        };
        self.previous = Some(x);

        self.rate
    }

    #[must_use]
    pub fn rate(&self) -> SVector<f64, N> {
        self.rate
    }

    pub fn reset(&mut self) {
        self.previous = None;
        self.rate = SVector::zeros();
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::vector;

    use super::*;

    #[test]
    fn rate_of_ramp() {
        let mut difference = FiniteDifference::<2>::new(0.01).unwrap();

        assert_eq!(difference.update(vector![0.0, 1.0]), vector![0.0, 0.0]);
        let rate = difference.update(vector![0.01, 0.98]);
        assert!((rate - vector![1.0, -2.0]).norm() < 1e-9);

        difference.reset();
        assert_eq!(difference.update(vector![5.0, 5.0]), vector![0.0, 0.0]);
    }

    #[test]
    fn rejects_non_positive_period() {
        assert!(FiniteDifference::<1>::new(0.0).is_err());
    }
}
