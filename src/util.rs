use crate::errors::{ForestError, Result};
use crate::types::FloatingPoint;

/// If the test condition is false, return an `InvalidConfig` error with the
/// given message.
pub(crate) fn check_argument(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvalidConfig { msg })
    }
}

/// If the test condition is false, return an `InvariantViolation` error.
pub(crate) fn check_state(test: bool, msg: &'static str) -> Result<()> {
    if test {
        Ok(())
    } else {
        Err(ForestError::InvariantViolation { msg })
    }
}

pub fn l1_distance<F: FloatingPoint>(a: &[F], b: &[F]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(&x, &y)| (x - y).abs().to_f64_lossy())
        .sum()
}

// fold helpers for the forest's generic traversal aggregation

pub(crate) fn add_to(a: &f64, b: &mut f64) {
    *b += *a;
}

pub(crate) fn divide(a: &mut f64, trees: usize) {
    *a /= trees as f64;
}
