use crate::errors::Result;
use crate::types::FloatingPoint;
use crate::util::check_argument;

/// An n-dimensional axis-aligned rectangle with a cached range sum. The
/// range sum is accumulated in f64 so that repeated in-place merges do not
/// drift at single precision.
#[derive(Clone)]
pub struct BoundingBox<F> {
    range_sum: f64,
    min_values: Vec<F>,
    max_values: Vec<F>,
}

impl<F: FloatingPoint> BoundingBox<F> {
    pub fn new(first_values: &[F], second_values: &[F]) -> Result<Self> {
        check_argument(
            first_values.len() == second_values.len(),
            "mismatched lengths",
        )?;
        let min_values: Vec<F> = first_values
            .iter()
            .zip(second_values)
            .map(|(&x, &y)| if x < y { x } else { y })
            .collect();
        let max_values: Vec<F> = first_values
            .iter()
            .zip(second_values)
            .map(|(&x, &y)| if x > y { x } else { y })
            .collect();
        let range_sum = Self::range_sum_of(&min_values, &max_values);
        Ok(BoundingBox {
            min_values,
            max_values,
            range_sum,
        })
    }

    pub fn singleton(point: &[F]) -> Self {
        BoundingBox {
            min_values: point.to_vec(),
            max_values: point.to_vec(),
            range_sum: 0.0,
        }
    }

    fn range_sum_of(min_values: &[F], max_values: &[F]) -> f64 {
        min_values
            .iter()
            .zip(max_values)
            .map(|(&x, &y)| (y - x).to_f64_lossy())
            .sum()
    }

    /// Extends this box to cover `point`. Returns true when the box was
    /// already large enough (the range sum did not change), which the
    /// ancestor walks use as their "resolved" signal.
    pub fn add_point(&mut self, point: &[F]) -> bool {
        self.add_two_arrays(point, point)
    }

    pub fn add_box(&mut self, other: &BoundingBox<F>) -> bool {
        self.add_two_arrays(&other.min_values, &other.max_values)
    }

    fn add_two_arrays(&mut self, min_values: &[F], max_values: &[F]) -> bool {
        debug_assert!(min_values.len() == self.min_values.len());
        let old_sum = self.range_sum;
        for (x, &y) in self.min_values.iter_mut().zip(min_values) {
            if y < *x {
                *x = y;
            }
        }
        for (x, &y) in self.max_values.iter_mut().zip(max_values) {
            if y > *x {
                *x = y;
            }
        }
        self.range_sum = Self::range_sum_of(&self.min_values, &self.max_values);
        old_sum == self.range_sum
    }

    /// Non-mutating merge with another box.
    pub fn merge(&self, other: &BoundingBox<F>) -> BoundingBox<F> {
        let mut answer = self.clone();
        answer.add_box(other);
        answer
    }

    /// Non-mutating merge with a point.
    pub fn merge_point(&self, point: &[F]) -> BoundingBox<F> {
        let mut answer = self.clone();
        answer.add_point(point);
        answer
    }

    pub fn contains(&self, point: &[F]) -> bool {
        self.min_values
            .iter()
            .zip(point)
            .zip(&self.max_values)
            .all(|((&low, &p), &high)| low <= p && p <= high)
    }

    /// The probability that a random cut of this box extended by `point`
    /// separates the point: 0 when the point is inside, 1 when the box is a
    /// singleton distinct from the point, else `r / (r + range_sum)` where
    /// `r` is the point's total overhang.
    pub fn probability_of_cut(&self, point: &[F]) -> f64 {
        let minsum: f64 = self
            .min_values
            .iter()
            .zip(point)
            .map(|(&x, &y)| {
                let gap = (x - y).to_f64_lossy();
                if gap > 0.0 {
                    gap
                } else {
                    0.0
                }
            })
            .sum();
        let maxsum: f64 = point
            .iter()
            .zip(&self.max_values)
            .map(|(&x, &y)| {
                let gap = (x - y).to_f64_lossy();
                if gap > 0.0 {
                    gap
                } else {
                    0.0
                }
            })
            .sum();
        let sum = minsum + maxsum;

        if sum == 0.0 {
            0.0
        } else if self.range_sum == 0.0 {
            1.0
        } else {
            sum / (self.range_sum + sum)
        }
    }

    pub fn range_sum(&self) -> f64 {
        self.range_sum
    }

    pub fn min_values(&self) -> &[F] {
        &self.min_values
    }

    pub fn max_values(&self) -> &[F] {
        &self.max_values
    }

    pub fn dimensions(&self) -> usize {
        self.min_values.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singleton_has_zero_range() {
        let bounding_box = BoundingBox::singleton(&[1.0f32, 2.0]);
        assert_eq!(bounding_box.range_sum(), 0.0);
        assert!(bounding_box.contains(&[1.0f32, 2.0]));
        assert!(!bounding_box.contains(&[1.0f32, 2.5]));
    }

    #[test]
    fn add_point_reports_containment() {
        let mut bounding_box = BoundingBox::new(&[0.0f32, 0.0], &[1.0, 1.0]).unwrap();
        assert!(bounding_box.add_point(&[0.5f32, 0.5]));
        assert!(!bounding_box.add_point(&[2.0f32, 0.5]));
        assert_eq!(bounding_box.max_values(), &[2.0f32, 1.0]);
        assert!((bounding_box.range_sum() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn merge_is_non_mutating() {
        let first = BoundingBox::new(&[0.0f32, 0.0], &[1.0, 1.0]).unwrap();
        let second = BoundingBox::singleton(&[3.0f32, -1.0]);
        let merged = first.merge(&second);
        assert_eq!(first.max_values(), &[1.0f32, 1.0]);
        assert_eq!(merged.max_values(), &[3.0f32, 1.0]);
        assert_eq!(merged.min_values(), &[0.0f32, -1.0]);
    }

    #[test]
    fn probability_of_cut_edges() {
        let bounding_box = BoundingBox::new(&[0.0f64, 0.0], &[1.0, 1.0]).unwrap();
        // inside, including the boundary
        assert_eq!(bounding_box.probability_of_cut(&[0.5f64, 0.5]), 0.0);
        assert_eq!(bounding_box.probability_of_cut(&[1.0f64, 1.0]), 0.0);
        // distinct point vs a singleton box
        let singleton = BoundingBox::singleton(&[0.0f64, 0.0]);
        assert_eq!(singleton.probability_of_cut(&[1.0f64, 0.0]), 1.0);
        assert_eq!(singleton.probability_of_cut(&[0.0f64, 0.0]), 0.0);
        // overhang of 1 against a range sum of 2
        let p = bounding_box.probability_of_cut(&[2.0f64, 0.5]);
        assert!((p - 1.0 / 3.0).abs() < 1e-12);
        assert!(p > 0.0 && p < 1.0);
    }

    #[test]
    fn mismatched_lengths_rejected() {
        assert!(BoundingBox::new(&[0.0f32], &[1.0, 2.0]).is_err());
    }
}
