use crate::{Error, Result};

/// Debounces a boolean signal.
///
/// The filtered value only changes after the raw signal has disagreed with it for `window`
/// consecutive samples. As a consequence, the filtered value changes state at most once per
/// `window` samples, no matter how fast the raw signal oscillates.
#[derive(Debug, Clone)]
pub struct GlitchFilter {
    value: bool,
    window: usize,
    disagreeing: usize,
}

impl GlitchFilter {
    /// Creates a new filter with the initial filtered value set to `false`.
    pub fn new(window: usize) -> Result<Self> {
        if window == 0 {
            return Err(Error::EmptyWindow);
        }

        Ok(Self {
            value: false,
            window,
            disagreeing: 0,
        })
    }

    /// Feeds a raw sample into the filter and returns the filtered value.
    pub fn update(&mut self, raw: bool) -> bool {
        if raw == self.value {
            self.disagreeing = 0;
            return self.value;
        }

        self.disagreeing += 1;
        if self.disagreeing >= self.window {
            self.value = raw;
            self.disagreeing = 0;
        }

        self.value
    }

    /// Forces the filtered value, discarding any pending disagreement.
    pub fn set(&mut self, value: bool) {
        self.value = value;
        self.disagreeing = 0;
    }

    #[must_use]
    pub fn value(&self) -> bool {
        self.value
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }
}
