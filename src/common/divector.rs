use crate::tree::boundingbox::BoundingBox;
use crate::types::FloatingPoint;

/// A two-sided vector of nonnegative contributions, one (high, low) pair per
/// dimension. Attribution queries accumulate into these; the arithmetic is
/// kept in f64 regardless of the tree precision.
#[derive(Clone)]
pub struct DiVector {
    pub high: Vec<f64>,
    pub low: Vec<f64>,
}

impl DiVector {
    pub fn empty(dimensions: usize) -> Self {
        DiVector {
            high: vec![0.0; dimensions],
            low: vec![0.0; dimensions],
        }
    }

    /// Overwrites this vector with the per-dimension probability that a random
    /// cut of the box extended by `point` separates the point, normalised so
    /// the total equals `probability_of_cut`.
    pub fn assign_as_probability_of_cut<F: FloatingPoint>(
        &mut self,
        bounding_box: &BoundingBox<F>,
        point: &[F],
    ) {
        let minsum: f64 = self
            .low
            .iter_mut()
            .zip(bounding_box.min_values())
            .zip(point)
            .map(|((x, &y), &z)| {
                let gap = (y - z).to_f64_lossy();
                *x = if gap > 0.0 { gap } else { 0.0 };
                *x
            })
            .sum();
        let maxsum: f64 = self
            .high
            .iter_mut()
            .zip(point)
            .zip(bounding_box.max_values())
            .map(|((x, &y), &z)| {
                let gap = (y - z).to_f64_lossy();
                *x = if gap > 0.0 { gap } else { 0.0 };
                *x
            })
            .sum();

        let sum = minsum + maxsum;
        if sum != 0.0 {
            self.scale(1.0 / (bounding_box.range_sum() + sum));
        }
    }

    pub fn add_to(&self, other: &mut DiVector) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y;
        }
    }

    pub fn add_to_scaled(&self, other: &mut DiVector, factor: f64) {
        for (x, &y) in other.high.iter_mut().zip(&self.high) {
            *x += y * factor;
        }
        for (x, &y) in other.low.iter_mut().zip(&self.low) {
            *x += y * factor;
        }
    }

    pub fn divide(&mut self, trees: usize) {
        self.scale(1.0 / trees as f64)
    }

    pub fn scale(&mut self, factor: f64) {
        for x in self.high.iter_mut() {
            *x *= factor;
        }
        for x in self.low.iter_mut() {
            *x *= factor;
        }
    }

    pub fn total(&self) -> f64 {
        self.high.iter().sum::<f64>() + self.low.iter().sum::<f64>()
    }

    /// Rescales so the total equals `value`; a zero vector becomes uniform.
    pub fn normalize(&mut self, value: f64) {
        let current = self.total();
        if current <= 0.0 {
            let v = value / (2.0 * self.high.len() as f64);
            for x in self.high.iter_mut() {
                *x = v;
            }
            for x in self.low.iter_mut() {
                *x = v;
            }
        } else {
            self.scale(value / current);
        }
    }

    pub fn dimensions(&self) -> usize {
        self.high.len()
    }

    pub fn high_low_sum(&self, index: usize) -> f64 {
        self.high[index] + self.low[index]
    }
}
