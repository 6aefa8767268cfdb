use crate::tree::nodeview::TraversalView;
use crate::types::FloatingPoint;
use crate::util::l1_distance;

/// The published scoring functions: the expected displacement form of the
/// anomaly score. `x` is the depth of the visited node, `y` its mass.
pub(crate) fn score_seen(x: usize, y: usize) -> f64 {
    1.0 / (x as f64 + f64::log2(1.0 + y as f64))
}

pub(crate) fn score_unseen(x: usize, _y: usize) -> f64 {
    1.0 / (x as f64 + 1.0)
}

pub(crate) fn normalizer(x: f64, y: usize) -> f64 {
    x * f64::log2(1.0 + y as f64)
}

pub(crate) fn damp(x: usize, y: usize) -> f64 {
    1.0 - (x as f64) / (2.0 * y as f64)
}

// displacement variants, used for density-flavoured queries where seen and
// unseen points carry little distinction

pub(crate) fn score_seen_displacement(_x: usize, y: usize) -> f64 {
    1.0 / (1.0 + y as f64)
}

pub(crate) fn score_unseen_displacement(_x: usize, y: usize) -> f64 {
    y as f64
}

pub(crate) fn displacement_normalizer(x: f64, y: usize) -> f64 {
    x / (1.0 + y as f64)
}

/// Function-pointer bundle parameterising the shipped visitors; queries pick
/// a bundle instead of a visitor subclass.
#[derive(Clone, Copy)]
pub struct VisitorInfo<F: 'static> {
    pub ignore_mass: usize,
    pub score_seen: fn(usize, usize) -> f64,
    pub score_unseen: fn(usize, usize) -> f64,
    pub damp: fn(usize, usize) -> f64,
    pub normalizer: fn(f64, usize) -> f64,
    pub distance: fn(&[F], &[F]) -> f64,
}

impl<F: FloatingPoint> VisitorInfo<F> {
    pub fn default() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1_distance,
        }
    }

    pub fn displacement() -> Self {
        VisitorInfo {
            ignore_mass: 0,
            score_seen: score_seen_displacement,
            score_unseen: score_unseen_displacement,
            damp: identity_damp,
            normalizer: displacement_normalizer,
            distance: l1_distance,
        }
    }

    pub fn use_score(
        ignore_mass: usize,
        score_seen: fn(usize, usize) -> f64,
        score_unseen: fn(usize, usize) -> f64,
        damp: fn(usize, usize) -> f64,
        normalizer: fn(f64, usize) -> f64,
    ) -> Self {
        VisitorInfo {
            ignore_mass,
            score_seen,
            score_unseen,
            damp,
            normalizer,
            distance: l1_distance,
        }
    }
}

fn identity_damp(_x: usize, _y: usize) -> f64 {
    1.0
}

/// Single-path visitor: `accept_leaf` fires at the leaf the cut decisions
/// reach, then `accept` fires at each ancestor bottom-up. `result` folds the
/// observations into the query answer.
pub trait Visitor<F: FloatingPoint, R> {
    fn accept_leaf(&mut self, point: &[F], view: &TraversalView<F>);

    fn accept(&mut self, point: &[F], view: &TraversalView<F>);

    /// Early-exit hint: once converged, remaining ancestors are skipped.
    fn is_converged(&self) -> bool {
        false
    }

    /// Whether the traversal should maintain the sibling-path shadow box
    /// after the leaf visit. Queried once, right after `accept_leaf`.
    fn use_shadow_box(&self) -> bool {
        false
    }

    /// Whether the traversal must thread running bounding boxes even when
    /// cached rows would do, e.g. for per-dimension attribution.
    fn needs_bounding_boxes(&self) -> bool {
        false
    }

    fn result(&self) -> R;
}

/// Multi-path visitor: at an internal node where `trigger` fires, the
/// traversal duplicates the visitor with `new_copy`, sends the copies down
/// both children, and folds the second copy back with `combine` before the
/// parent is visited.
pub trait MultiVisitor<F: FloatingPoint, R>: Visitor<F, R> + Sized {
    fn trigger(&self, point: &[F], view: &TraversalView<F>) -> bool;

    fn new_copy(&self) -> Self;

    fn combine(&mut self, other: Self, point: &[F]);
}
