use crate::errors::{ForestError, Result};
use crate::tree::boundingbox::BoundingBox;
use crate::types::FloatingPoint;

/// A cut plane: the split axis and the threshold. Points with
/// `point[dimension] <= value` fall on the left.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cut<F> {
    pub dimension: usize,
    pub value: F,
}

impl<F: FloatingPoint> Cut<F> {
    pub fn new(dimension: usize, value: F) -> Self {
        Cut { dimension, value }
    }

    /// Draws a random cut of `bounding_box`, choosing the dimension with
    /// probability proportional to its side length and the threshold uniform
    /// within that side. The box must have a positive range sum. The returned
    /// threshold always lies in `[min, max)` of its dimension: a draw landing
    /// on the upper edge is stepped to the representable predecessor.
    pub fn random_cut(bounding_box: &BoundingBox<F>, factor: f64) -> Result<Cut<F>> {
        if bounding_box.range_sum() <= 0.0 {
            return Err(ForestError::InvariantViolation {
                msg: "cannot cut a box with zero range sum",
            });
        }
        let mut remaining = factor * bounding_box.range_sum();
        for (dimension, (&low, &high)) in bounding_box
            .min_values()
            .iter()
            .zip(bounding_box.max_values())
            .enumerate()
        {
            let gap = (high - low).to_f64_lossy();
            if gap > 0.0 && remaining <= gap {
                return Ok(Cut::new(dimension, Self::bounded_value(low, high, remaining)));
            }
            remaining -= gap;
        }
        Err(ForestError::InvariantViolation {
            msg: "no dimension consumed the cut draw",
        })
    }

    /// The insertion primitive: draws a cut of `bounding_box` extended by
    /// `point` without materialising the merged box, and reports whether the
    /// cut separates the point from everything inside the unextended box.
    /// Returns `None` when the box already contains the point, in which case
    /// no cut at this level or above can separate it.
    pub fn random_cut_and_separation(
        bounding_box: &BoundingBox<F>,
        factor: f64,
        point: &[F],
    ) -> Result<Option<(Cut<F>, bool)>> {
        let min_values = bounding_box.min_values();
        let max_values = bounding_box.max_values();
        let extension: f64 = min_values
            .iter()
            .zip(max_values)
            .zip(point)
            .map(|((&low, &high), &p)| {
                if p < low {
                    (low - p).to_f64_lossy()
                } else if high < p {
                    (p - high).to_f64_lossy()
                } else {
                    0.0
                }
            })
            .sum();
        if extension == 0.0 {
            return Ok(None);
        }
        let mut remaining = factor * (bounding_box.range_sum() + extension);

        for dimension in 0..point.len() {
            let low = if point[dimension] < min_values[dimension] {
                point[dimension]
            } else {
                min_values[dimension]
            };
            let high = if point[dimension] > max_values[dimension] {
                point[dimension]
            } else {
                max_values[dimension]
            };
            let gap = (high - low).to_f64_lossy();
            if gap > 0.0 && remaining <= gap {
                let value = Self::bounded_value(low, high, remaining);
                let separation = (point[dimension] <= value && value < min_values[dimension])
                    || (max_values[dimension] <= value && value < point[dimension]);
                return Ok(Some((Cut::new(dimension, value), separation)));
            }
            remaining -= gap;
        }
        Err(ForestError::InvariantViolation {
            msg: "no dimension consumed the cut draw",
        })
    }

    fn bounded_value(low: F, high: F, offset: f64) -> F {
        let value = low + F::from_f64_lossy(offset);
        if value >= high {
            high.step_down()
        } else {
            value
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cut_lands_in_half_open_interval() {
        let bounding_box = BoundingBox::new(&[0.0f32, 0.0], &[1.0, 3.0]).unwrap();
        for i in 0..100 {
            let factor = i as f64 / 100.0;
            let cut = Cut::random_cut(&bounding_box, factor).unwrap();
            let low = bounding_box.min_values()[cut.dimension];
            let high = bounding_box.max_values()[cut.dimension];
            assert!(low <= cut.value && cut.value < high);
        }
    }

    #[test]
    fn upper_edge_draw_is_stepped_down() {
        let bounding_box = BoundingBox::new(&[0.0f32], &[1.0]).unwrap();
        let cut = Cut::random_cut(&bounding_box, 1.0).unwrap();
        assert_eq!(cut.dimension, 0);
        assert!(cut.value < 1.0);
        assert_eq!(cut.value, 1.0f32.step_down());
    }

    #[test]
    fn dimension_chosen_proportional_to_side() {
        // side lengths 1 and 3: draws below 0.25 cut dimension 0
        let bounding_box = BoundingBox::new(&[0.0f64, 0.0], &[1.0, 3.0]).unwrap();
        assert_eq!(Cut::random_cut(&bounding_box, 0.2).unwrap().dimension, 0);
        assert_eq!(Cut::random_cut(&bounding_box, 0.3).unwrap().dimension, 1);
        assert_eq!(Cut::random_cut(&bounding_box, 0.9).unwrap().dimension, 1);
    }

    #[test]
    fn zero_width_dimension_never_chosen() {
        let bounding_box = BoundingBox::new(&[0.0f32, 5.0], &[1.0, 5.0]).unwrap();
        for i in 0..=10 {
            let cut = Cut::random_cut(&bounding_box, i as f64 / 10.0).unwrap();
            assert_eq!(cut.dimension, 0);
        }
    }

    #[test]
    fn zero_range_box_is_rejected() {
        let singleton = BoundingBox::singleton(&[1.0f32, 1.0]);
        assert!(Cut::random_cut(&singleton, 0.5).is_err());
    }

    #[test]
    fn separation_for_outside_point() {
        let bounding_box = BoundingBox::new(&[0.0f32, 0.0], &[1.0, 1.0]).unwrap();
        // point far on the high side of dimension 0: most draws that cut in
        // the extension interval separate it
        let mut separated = 0;
        for i in 0..100 {
            let factor = i as f64 / 100.0;
            if let Some((cut, separation)) =
                Cut::random_cut_and_separation(&bounding_box, factor, &[10.0f32, 0.5]).unwrap()
            {
                if separation {
                    assert_eq!(cut.dimension, 0);
                    assert!(cut.value >= 1.0 && cut.value < 10.0);
                    separated += 1;
                }
            }
        }
        assert!(separated > 70);
    }

    #[test]
    fn contained_point_yields_none() {
        let bounding_box = BoundingBox::new(&[0.0f32, 0.0], &[1.0, 1.0]).unwrap();
        assert!(Cut::random_cut_and_separation(&bounding_box, 0.5, &[0.5f32, 0.5])
            .unwrap()
            .is_none());
    }
}
