use crate::{
    geometry::{Line, Point},
    types::Side,
};

/// Checks that a crop does not remove the area the controller wants to put the CoP in.
///
/// The recent desired CoPs all have to lie on the kept side of the line, by at least `margin`.
#[derive(Debug, Clone)]
pub struct CropVerifier {
    margin: f64,
    window: usize,
    desired_cops: Vec<Point>,
    next: usize,
}

impl CropVerifier {
    #[must_use]
    pub fn new(margin: f64, window: usize) -> Self {
        Self {
            margin,
            window,
            desired_cops: Vec::with_capacity(window),
            next: 0,
        }
    }

    pub fn update(&mut self, desired_cop: Point) {
        if self.desired_cops.len() < self.window {
            self.desired_cops.push(desired_cop);
        } else {
            self.desired_cops[self.next] = desired_cop;
        }
        self.next = (self.next + 1) % self.window;
    }

    /// Whether cropping the `side_to_crop` of `line` keeps all recent desired CoPs.
    #[must_use]
    pub fn verify_crop(&self, line: &Line, side_to_crop: Side) -> bool {
        if self.desired_cops.is_empty() {
            return false;
        }

        self.desired_cops.iter().all(|&cop| {
            let distance_into_kept_side = match side_to_crop {
                Side::Left => -line.signed_distance(cop),
                Side::Right => line.signed_distance(cop),
            };
            distance_into_kept_side >= self.margin
        })
    }

    pub fn reset(&mut self) {
        self.desired_cops.clear();
        self.next = 0;
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{Unit, point, vector};

    use super::*;

    #[test]
    fn desired_cop_must_be_on_kept_side() {
        let line = Line::new(point![0.05, 0.0], Unit::new_normalize(vector![0.0, 1.0]));
        let mut verifier = CropVerifier::new(0.005, 3);

        assert!(!verifier.verify_crop(&line, Side::Left));

        // left of the line is x < 0.05, so cropping the right side keeps the heel
        verifier.update(point![0.0, 0.0]);
        assert!(verifier.verify_crop(&line, Side::Right));
        assert!(!verifier.verify_crop(&line, Side::Left));

        // within the margin
        verifier.update(point![0.048, 0.0]);
        assert!(!verifier.verify_crop(&line, Side::Right));

        verifier.reset();
        verifier.update(point![0.1, 0.0]);
        assert!(verifier.verify_crop(&line, Side::Left));
    }
}
