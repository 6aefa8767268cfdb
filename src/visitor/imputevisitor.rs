use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

use crate::tree::nodeview::TraversalView;
use crate::types::FloatingPoint;
use crate::visitor::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// Multi-path visitor behind imputation and conditional sampling. The
/// traversal splits wherever the cut falls on a missing coordinate, each
/// branch nominates the leaf it reaches, and branches are folded by the
/// adjusted score: `centrality` interpolates between score-driven selection
/// (1.0) and a uniform random pick (0.0).
pub struct ImputeVisitor<F: 'static> {
    tree_mass: usize,
    centrality: f64,
    missing: Vec<usize>,
    rng: ChaCha20Rng,
    score_seen: fn(usize, usize) -> f64,
    score_unseen: fn(usize, usize) -> f64,
    damp: fn(usize, usize) -> f64,
    normalizer: fn(f64, usize) -> f64,
    distance: fn(&[F], &[F]) -> f64,
    score: f64,
    random: f32,
    candidate_handle: usize,
    candidate_distance: f64,
    converged: bool,
}

impl<F: FloatingPoint> ImputeVisitor<F> {
    pub fn new(
        missing: &[usize],
        centrality: f64,
        tree_mass: usize,
        seed: u64,
        visitor_info: &VisitorInfo<F>,
    ) -> Self {
        ImputeVisitor {
            tree_mass,
            centrality,
            missing: missing.to_vec(),
            rng: ChaCha20Rng::seed_from_u64(seed),
            score_seen: visitor_info.score_seen,
            score_unseen: visitor_info.score_unseen,
            damp: visitor_info.damp,
            normalizer: visitor_info.normalizer,
            distance: visitor_info.distance,
            score: 0.0,
            random: 0.0,
            candidate_handle: usize::MAX,
            candidate_distance: f64::MAX,
            converged: false,
        }
    }

    /// The comparison key for branch folding.
    fn adjusted_score(&self) -> f64 {
        self.centrality * (self.normalizer)(self.score, self.tree_mass)
            + (1.0 - self.centrality) * self.random as f64
    }
}

impl<F: FloatingPoint> Visitor<F, (f64, usize, f64)> for ImputeVisitor<F> {
    fn accept_leaf(&mut self, point: &[F], view: &TraversalView<F>) {
        let mass = view.mass();
        let leaf_point = view.leaf_point();
        let mut imputed = point.to_vec();
        for &i in self.missing.iter() {
            imputed[i] = leaf_point[i];
        }
        if view.is_duplicate() || imputed == leaf_point {
            self.score = (self.damp)(mass, self.tree_mass) * (self.score_seen)(view.depth(), mass);
            self.converged = true;
        } else {
            self.score = (self.score_unseen)(view.depth(), mass);
        }
        self.candidate_handle = view.leaf_handle();
        self.candidate_distance = (self.distance)(&imputed, leaf_point);
        self.random = self.rng.gen::<f32>();
    }

    fn accept(&mut self, _point: &[F], view: &TraversalView<F>) {
        if self.converged {
            return;
        }
        let probability = view.probability_of_separation();
        if probability == 0.0 {
            self.converged = true;
        } else {
            self.score = (1.0 - probability) * self.score
                + probability * (self.score_unseen)(view.depth(), view.mass());
        }
    }

    fn is_converged(&self) -> bool {
        // convergence here only freezes the score; the traversal still has to
        // fold sibling branches, so the walk is not cut short
        false
    }

    fn result(&self) -> (f64, usize, f64) {
        (
            (self.normalizer)(self.score, self.tree_mass),
            self.candidate_handle,
            self.candidate_distance,
        )
    }
}

impl<F: FloatingPoint> MultiVisitor<F, (f64, usize, f64)> for ImputeVisitor<F> {
    fn trigger(&self, _point: &[F], view: &TraversalView<F>) -> bool {
        self.missing.contains(&view.cut_dimension())
    }

    fn new_copy(&self) -> Self {
        ImputeVisitor {
            tree_mass: self.tree_mass,
            centrality: self.centrality,
            missing: self.missing.clone(),
            rng: self.rng.clone(),
            score_seen: self.score_seen,
            score_unseen: self.score_unseen,
            damp: self.damp,
            normalizer: self.normalizer,
            distance: self.distance,
            score: 0.0,
            random: 0.0,
            candidate_handle: usize::MAX,
            candidate_distance: f64::MAX,
            converged: false,
        }
    }

    fn combine(&mut self, other: Self, _point: &[F]) {
        if other.candidate_handle != usize::MAX
            && (self.candidate_handle == usize::MAX
                || other.adjusted_score() < self.adjusted_score())
        {
            self.score = other.score;
            self.random = other.random;
            self.candidate_handle = other.candidate_handle;
            self.candidate_distance = other.candidate_distance;
            self.converged = other.converged;
        }
    }
}
