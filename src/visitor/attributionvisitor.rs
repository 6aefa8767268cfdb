use crate::common::divector::DiVector;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::nodeview::TraversalView;
use crate::types::FloatingPoint;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// Attributes the anomaly score across dimensions and directions. The update
/// rule mirrors the scalar score visitor, except the separation probability
/// is kept per (dimension, side) so the result records whether a coordinate
/// was unusually high or unusually low.
pub struct AttributionVisitor<F: 'static> {
    tree_mass: usize,
    ignore_mass: usize,
    damp: fn(usize, usize) -> f64,
    score_seen: fn(usize, usize) -> f64,
    score_unseen: fn(usize, usize) -> f64,
    normalizer: fn(f64, usize) -> f64,
    attribution: DiVector,
    probability: DiVector,
    score: f64,
    hit_duplicate: bool,
    converged: bool,
    shadow_box_in_use: bool,
    _marker: std::marker::PhantomData<F>,
}

impl<F: FloatingPoint> AttributionVisitor<F> {
    pub fn new(tree_mass: usize, dimensions: usize, visitor_info: &VisitorInfo<F>) -> Self {
        AttributionVisitor {
            tree_mass,
            ignore_mass: visitor_info.ignore_mass,
            damp: visitor_info.damp,
            score_seen: visitor_info.score_seen,
            score_unseen: visitor_info.score_unseen,
            normalizer: visitor_info.normalizer,
            attribution: DiVector::empty(dimensions),
            probability: DiVector::empty(dimensions),
            score: 0.0,
            hit_duplicate: false,
            converged: false,
            shadow_box_in_use: false,
            _marker: std::marker::PhantomData,
        }
    }

    /// `parameters[0]` carries the dimensions, as in the other factories.
    pub fn create(tree_mass: usize, parameters: &[usize], visitor_info: &VisitorInfo<F>) -> Self {
        AttributionVisitor::new(tree_mass, parameters[0], visitor_info)
    }
}

impl<F: FloatingPoint> Visitor<F, DiVector> for AttributionVisitor<F> {
    fn accept_leaf(&mut self, point: &[F], view: &TraversalView<F>) {
        let mass = view.mass();
        if mass > self.ignore_mass {
            if view.is_duplicate() {
                self.score =
                    (self.damp)(mass, self.tree_mass) * (self.score_seen)(view.depth(), mass);
                self.hit_duplicate = true;
                self.shadow_box_in_use = true;
            } else {
                self.score = (self.score_unseen)(view.depth(), mass);
                let leaf_box = BoundingBox::singleton(view.leaf_point());
                self.probability.assign_as_probability_of_cut(&leaf_box, point);
                self.probability.add_to_scaled(&mut self.attribution, self.score);
            }
        } else {
            self.score = (self.score_unseen)(view.depth(), mass);
            self.shadow_box_in_use = true;
        }
    }

    fn accept(&mut self, point: &[F], view: &TraversalView<F>) {
        if self.converged {
            return;
        }
        if self.shadow_box_in_use {
            view.assign_shadow_probability_of_separation(point, &mut self.probability);
        } else {
            view.assign_probability_of_separation(point, &mut self.probability);
        }
        let probability = self.probability.total();
        if probability == 0.0 {
            self.converged = true;
        } else {
            let new_value = (self.score_unseen)(view.depth(), view.mass());
            if !self.hit_duplicate {
                self.score = (1.0 - probability) * self.score + probability * new_value;
            }
            self.attribution.scale(1.0 - probability);
            self.probability.add_to_scaled(&mut self.attribution, new_value);
        }
    }

    fn is_converged(&self) -> bool {
        self.converged
    }

    fn use_shadow_box(&self) -> bool {
        self.shadow_box_in_use
    }

    fn needs_bounding_boxes(&self) -> bool {
        true
    }

    fn result(&self) -> DiVector {
        let target = (self.normalizer)(self.score, self.tree_mass);
        let mut answer = self.attribution.clone();
        answer.normalize(target);
        answer
    }
}
