use nalgebra::SVector;

use crate::{Error, Result};

/// Exponential (alpha) low-pass filter.
///
/// `alpha` is the weight of the newest sample: `y = (1 - alpha) * y + alpha * x`.
/// The first sample after construction or [`AlphaFilter::reset`] initializes the state directly,
/// so the filter does not ramp up from zero.
#[derive(Copy, Clone, Debug)]
pub struct AlphaFilter<const N: usize> {
    alpha: f64,
    y: Option<SVector<f64, N>>,
}

impl<const N: usize> AlphaFilter<N> {
    pub fn new(alpha: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&alpha) {
            return Err(Error::InvalidAlpha(alpha));
        }

        Ok(Self { alpha, y: None })
    }

    pub fn update(&mut self, x: SVector<f64, N>) -> SVector<f64, N> {
        let y = match self.y {
            Some(y) => (1.0 - self.alpha) * y + self.alpha * x,
            None => x,
        };

        self.y = Some(y);
        y
    }

    /// The filtered state, zero if no sample was received yet.
    #[must_use]
    pub fn state(&self) -> SVector<f64, N> {
        self.y.unwrap_or_else(SVector::zeros)
    }

    pub fn reset(&mut self) {
        self.y = None;
    }

    #[must_use]
    pub fn alpha(&self) -> f64 {
        self.alpha
    }
}
