//! Filters for noisy boolean and continuous control signals.
//!
//! All filters are fixed size and allocation free, so they can be updated every control tick.

mod alpha;
mod difference;
mod glitch;

use thiserror::Error;

pub use alpha::AlphaFilter;
pub use difference::FiniteDifference;
pub use glitch::GlitchFilter;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("Alpha must be within [0, 1], got {0}")]
    InvalidAlpha(f64),
    #[error("Glitch window must span at least one sample")]
    EmptyWindow,
    #[error("Sample period must be positive and finite, got {0}")]
    InvalidPeriod(f64),
}

pub type Result<T> = std::result::Result<T, Error>;
