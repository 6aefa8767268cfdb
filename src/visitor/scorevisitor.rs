use crate::tree::nodeview::TraversalView;
use crate::types::FloatingPoint;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// Scalar anomaly score along a single traversal path. At the leaf the score
/// is seeded from the seen/unseen functions; each ancestor then mixes in the
/// unseen score weighted by the probability that a random cut there would
/// have separated the point.
pub struct ScoreVisitor<F: 'static> {
    tree_mass: usize,
    ignore_mass: usize,
    damp: fn(usize, usize) -> f64,
    score_seen: fn(usize, usize) -> f64,
    score_unseen: fn(usize, usize) -> f64,
    normalizer: fn(f64, usize) -> f64,
    score: f64,
    converged: bool,
    shadow_box_in_use: bool,
    _marker: std::marker::PhantomData<F>,
}

impl<F: FloatingPoint> ScoreVisitor<F> {
    pub fn new(tree_mass: usize, visitor_info: &VisitorInfo<F>) -> Self {
        ScoreVisitor {
            tree_mass,
            ignore_mass: visitor_info.ignore_mass,
            damp: visitor_info.damp,
            score_seen: visitor_info.score_seen,
            score_unseen: visitor_info.score_unseen,
            normalizer: visitor_info.normalizer,
            score: 0.0,
            converged: false,
            shadow_box_in_use: false,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn create(tree_mass: usize, _parameters: &[usize], visitor_info: &VisitorInfo<F>) -> Self {
        ScoreVisitor::new(tree_mass, visitor_info)
    }
}

impl<F: FloatingPoint> Visitor<F, f64> for ScoreVisitor<F> {
    fn accept_leaf(&mut self, _point: &[F], view: &TraversalView<F>) {
        let mass = view.mass();
        if mass > self.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (self.damp)(mass, self.tree_mass) * (self.score_seen)(view.depth(), mass);
                self.converged = true;
            } else {
                self.score = (self.score_unseen)(view.depth(), mass);
            }
        } else {
            // the leaf's own mass is disregarded, so the path is scored
            // against the shadow box instead of the enclosing boxes
            self.score = (self.score_unseen)(view.depth(), mass);
            self.shadow_box_in_use = true;
        }
    }

    fn accept(&mut self, _point: &[F], view: &TraversalView<F>) {
        if self.converged {
            return;
        }
        let probability = if self.shadow_box_in_use {
            view.shadow_probability_of_separation()
        } else {
            view.probability_of_separation()
        };
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (self.score_unseen)(view.depth(), view.mass());
        }
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.shadow_box_in_use
    }

    fn result(&self) -> f64 {
        (self.normalizer)(self.score, self.tree_mass)
    }
}
