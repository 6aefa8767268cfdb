use crate::common::divector::DiVector;
use crate::errors::Result;
use crate::pointstore::PointAccess;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::nodestore::NodeStore;
use crate::types::{FloatingPoint, SlotIndex};

/// The node view handed to visitors. The traversal updates it while walking
/// to the leaf and back; visitors only read.
///
/// Depending on the cache regime the view either threads a running bounding
/// box up the path (sparse caches) or reads probabilities straight off the
/// node store's cached rows (dense caches). A visitor that asks for the
/// shadow box additionally gets the box of everything on the path except the
/// leaf's own subtree, which is what ignore-mass scoring needs.
#[derive(Clone)]
pub struct TraversalView<F> {
    current_node: usize,
    depth: usize,
    mass: usize,
    cut_dimension: usize,
    cut_value: F,
    probability_of_separation: f64,
    shadow_probability: f64,
    leaf_handle: usize,
    leaf_point: Vec<F>,
    leaf_duplicate: bool,
    use_shadow_box: bool,
    maintain_box: bool,
    current_box: Option<BoundingBox<F>>,
    shadow_box: Option<BoundingBox<F>>,
    sequence_indexes: Option<Vec<(u64, usize)>>,
}

impl<F: FloatingPoint> TraversalView<F> {
    pub fn new<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        root: usize,
        node_store: &NodeStore<F, C, P, N>,
    ) -> Self {
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(root);
        TraversalView {
            current_node: root,
            depth: 0,
            mass: node_store.mass(root),
            cut_dimension,
            cut_value,
            probability_of_separation: f64::MAX,
            shadow_probability: f64::MAX,
            leaf_handle: usize::MAX,
            leaf_point: Vec::new(),
            leaf_duplicate: false,
            use_shadow_box: false,
            maintain_box: node_store.use_path_for_box(),
            current_box: None,
            shadow_box: None,
            sequence_indexes: None,
        }
    }

    /// A fresh view positioned at `node`, used for the branches of a
    /// multi-visitor split.
    pub fn branch<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &self,
        node: usize,
        node_store: &NodeStore<F, C, P, N>,
    ) -> Self {
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(node);
        TraversalView {
            current_node: node,
            depth: self.depth + 1,
            mass: node_store.mass(node),
            cut_dimension,
            cut_value,
            probability_of_separation: f64::MAX,
            shadow_probability: f64::MAX,
            leaf_handle: usize::MAX,
            leaf_point: Vec::new(),
            leaf_duplicate: false,
            use_shadow_box: false,
            maintain_box: self.maintain_box,
            current_box: None,
            shadow_box: None,
            sequence_indexes: None,
        }
    }

    // read surface for visitors

    pub fn current_node(&self) -> usize {
        self.current_node
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn mass(&self) -> usize {
        self.mass
    }

    pub fn cut_dimension(&self) -> usize {
        self.cut_dimension
    }

    pub fn cut_value(&self) -> F {
        self.cut_value
    }

    /// Probability that a random cut at the current node separates the
    /// traversal's point from the subtree.
    pub fn probability_of_separation(&self) -> f64 {
        self.probability_of_separation
    }

    pub fn shadow_probability_of_separation(&self) -> f64 {
        self.shadow_probability
    }

    pub fn leaf_handle(&self) -> usize {
        self.leaf_handle
    }

    pub fn leaf_point(&self) -> &[F] {
        &self.leaf_point
    }

    /// True when the traversal's point equals the leaf point.
    pub fn is_duplicate(&self) -> bool {
        self.leaf_duplicate
    }

    /// Sequence indexes recorded at the leaf, present only when the tree
    /// stores them.
    pub fn sequence_indexes(&self) -> Option<&[(u64, usize)]> {
        self.sequence_indexes.as_deref()
    }

    pub fn bounding_box(&self) -> Option<&BoundingBox<F>> {
        self.current_box.as_ref()
    }

    /// Per-dimension separation contributions at the current node, for
    /// attribution visitors. Requires box maintenance, which the traversal
    /// turns on for visitors that report `needs_bounding_boxes`.
    pub fn assign_probability_of_separation(&self, point: &[F], di_vector: &mut DiVector) {
        let current_box = self
            .current_box
            .as_ref()
            .expect("visitor did not request box maintenance");
        di_vector.assign_as_probability_of_cut(current_box, point);
    }

    pub fn assign_shadow_probability_of_separation(&self, point: &[F], di_vector: &mut DiVector) {
        let shadow = self.shadow_box.as_ref().expect("shadow box in use");
        di_vector.assign_as_probability_of_cut(shadow, point);
    }

    /// Forces running-box maintenance for this traversal regardless of the
    /// cache regime.
    pub fn require_box_maintenance(&mut self) {
        self.maintain_box = true;
    }

    // traversal updates

    pub fn descend<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        point: &[F],
        node_store: &NodeStore<F, C, P, N>,
    ) {
        self.current_node = if node_store.is_left_of(self.current_node, point) {
            node_store.left(self.current_node)
        } else {
            node_store.right(self.current_node)
        };
        self.depth += 1;
    }

    pub fn update_at_leaf<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        point: &[F],
        node_store: &NodeStore<F, C, P, N>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        let leaf = self.current_node;
        self.leaf_handle = node_store.point_handle(leaf);
        self.leaf_point = point_store.point(self.leaf_handle)?.to_vec();
        self.mass = node_store.mass(leaf);
        self.leaf_duplicate = self.leaf_point == point;
        self.probability_of_separation = if self.leaf_duplicate { 0.0 } else { 1.0 };
        if node_store.stores_sequence_indexes() {
            self.sequence_indexes = node_store.sequences_of(self.leaf_handle);
        }
        if self.maintain_box {
            self.current_box = Some(BoundingBox::singleton(&self.leaf_point));
        }
        Ok(())
    }

    /// Requests sibling-path ("shadow") box maintenance from this point of
    /// the walk upward. Called by the traversal right after `accept_leaf`
    /// when the visitor asks for it.
    pub fn enable_shadow_box<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        node_store: &NodeStore<F, C, P, N>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        self.use_shadow_box = true;
        // the running box becomes mandatory: the shadow box is grown from the
        // sibling boxes collected on the way up
        if self.current_box.is_none() {
            self.current_box = Some(node_store.bounding_box(self.current_node, point_store)?);
        }
        Ok(())
    }

    /// Moves the view to `parent` on the way back up, refreshing the
    /// separation probabilities and the cut fields.
    pub fn ascend<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        point: &[F],
        parent: usize,
        node_store: &NodeStore<F, C, P, N>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        let sibling = node_store.sibling(self.current_node, parent);
        self.probability_of_separation = match self.current_box.as_mut() {
            Some(current_box) => {
                if self.use_shadow_box {
                    let sibling_box = node_store.bounding_box(sibling, point_store)?;
                    current_box.add_box(&sibling_box);
                    match self.shadow_box.as_mut() {
                        Some(shadow) => {
                            shadow.add_box(&sibling_box);
                        }
                        None => self.shadow_box = Some(sibling_box),
                    }
                    self.shadow_probability = self
                        .shadow_box
                        .as_ref()
                        .expect("just set")
                        .probability_of_cut(point);
                } else {
                    node_store.grow_node_box(current_box, point_store, sibling)?;
                }
                current_box.probability_of_cut(point)
            }
            None => node_store.probability_of_cut(parent, point, point_store)?,
        };
        self.current_node = parent;
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(parent);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.mass = node_store.mass(parent);
        self.depth -= 1;
        Ok(())
    }

    /// Refreshes the cut fields without moving, so a multi-visitor can
    /// evaluate its trigger at an internal node on the way down.
    pub fn load_cut<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        node_store: &NodeStore<F, C, P, N>,
    ) {
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(self.current_node);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.mass = node_store.mass(self.current_node);
    }

    /// Rebuilds the view at `parent` after a multi-visitor split: the two
    /// branch views cover the children, and their boxes merge into the
    /// parent's.
    pub fn merge_branches<C: SlotIndex, P: SlotIndex, N: SlotIndex>(
        &mut self,
        point: &[F],
        parent: usize,
        left: TraversalView<F>,
        right: TraversalView<F>,
        node_store: &NodeStore<F, C, P, N>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        self.probability_of_separation = match (left.current_box, right.current_box) {
            (Some(mut merged), Some(other)) => {
                merged.add_box(&other);
                let probability = merged.probability_of_cut(point);
                self.current_box = Some(merged);
                probability
            }
            _ => {
                self.current_box = None;
                node_store.probability_of_cut(parent, point, point_store)?
            }
        };
        self.current_node = parent;
        let (cut_dimension, cut_value, _, _) = node_store.cut_and_children(parent);
        self.cut_dimension = cut_dimension;
        self.cut_value = cut_value;
        self.mass = node_store.mass(parent);
        Ok(())
    }
}
