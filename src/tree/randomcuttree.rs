use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::{ForestError, Result};
use crate::pointstore::PointAccess;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::tree::nodestore::{NodeColumns, NodeStore};
use crate::tree::nodeview::TraversalView;
use crate::types::{FloatingPoint, SlotIndex};
use crate::util::check_state;
use crate::visitor::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// A compact random cut tree over points held in an external store. The tree
/// owns its node store and two PRNG streams: the structure stream drives cut
/// generation, the cache stream drives bounding-box install decisions, so
/// changing the cache fraction never perturbs the topology. Both streams
/// advance by reseeding per operation, which keeps the whole tree state in a
/// pair of `u64` seeds.
pub struct RandomCutTree<F, C: SlotIndex, P: SlotIndex, N: SlotIndex> {
    dimensions: usize,
    capacity: usize,
    node_store: NodeStore<F, C, P, N>,
    random_seed: u64,
    cache_random_seed: u64,
    root: usize,
    tree_mass: usize,
    output_after: usize,
}

impl<F, C, P, N> RandomCutTree<F, C, P, N>
where
    F: FloatingPoint,
    C: SlotIndex,
    P: SlotIndex,
    N: SlotIndex,
{
    pub fn new(
        dimensions: usize,
        capacity: usize,
        max_point_handles: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        store_center_of_mass: bool,
        output_after: usize,
        random_seed: u64,
    ) -> Result<Self> {
        let node_store = NodeStore::new(
            capacity,
            dimensions,
            max_point_handles,
            bounding_box_cache_fraction,
            store_sequence_indexes,
            store_center_of_mass,
        )?;
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let structure_seed = rng.next_u64();
        let cache_seed = rng.next_u64();
        let root = node_store.null_node();
        Ok(RandomCutTree {
            dimensions,
            capacity,
            node_store,
            random_seed: structure_seed,
            cache_random_seed: cache_seed,
            root,
            tree_mass: 0,
            output_after,
        })
    }

    pub fn mass(&self) -> usize {
        self.tree_mass
    }

    pub fn is_empty(&self) -> bool {
        self.root == self.node_store.null_node()
    }

    pub fn is_output_ready(&self) -> bool {
        self.tree_mass >= self.output_after
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn node_store(&self) -> &NodeStore<F, C, P, N> {
        &self.node_store
    }

    pub fn root(&self) -> usize {
        self.root
    }

    /// Inserts the point behind `point_handle` observed at `sequence` and
    /// returns the handle of the leaf that represents it. When the vector
    /// equals an existing leaf the existing handle is returned and no
    /// internal-node slot is consumed.
    pub fn insert(
        &mut self,
        point_handle: usize,
        sequence: u64,
        point_store: &dyn PointAccess<F>,
    ) -> Result<usize> {
        let null = self.node_store.null_node();
        if self.root == null {
            self.root = self.node_store.leaf_index(point_handle);
            self.tree_mass = 1;
            self.node_store.record_sequence(point_handle, sequence);
            return Ok(point_handle);
        }

        let point = point_store.point(point_handle)?.to_vec();
        let mut path_to_root: Vec<(usize, usize)> = Vec::new();
        self.node_store.set_path(&mut path_to_root, self.root, &point);
        let (mut node, mut sibling) = path_to_root.pop().expect("path contains the root");

        let leaf_handle = self.node_store.point_handle(node);
        let old_point = point_store.point(leaf_handle)?.to_vec();

        if point == old_point {
            self.tree_mass += 1;
            self.node_store.increase_leaf_mass(node);
            self.node_store.record_sequence(leaf_handle, sequence);
            self.node_store
                .manage_ancestors_add(&mut path_to_root, &point, true);
            return Ok(leaf_handle);
        }

        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();

        let mut parent = path_to_root.last().map_or(null, |e| e.0);
        let mut saved_parent = parent;
        let mut saved_node = node;
        let mut current_box = BoundingBox::singleton(&old_point);
        let mut saved_box = current_box.clone();
        let mut saved_cut: Option<Cut<F>> = None;
        // levels between the saved split position and the current one; they
        // return to `path_to_root` before the ancestor walk
        let mut ancestors_of_saved: Vec<(usize, usize)> = Vec::new();

        loop {
            let factor: f64 = rng.gen();
            match Cut::random_cut_and_separation(&current_box, factor, &point)? {
                Some((cut, separation)) => {
                    if separation {
                        saved_cut = Some(cut);
                        saved_parent = parent;
                        saved_node = node;
                        saved_box = current_box.clone();
                        ancestors_of_saved.clear();
                    } else {
                        ancestors_of_saved.push((node, sibling));
                    }
                }
                None => {
                    // the running box contains the point: no level above can
                    // separate it, so the saved cut is final
                    ancestors_of_saved.push((node, sibling));
                    break;
                }
            }
            check_state(saved_cut.is_some(), "no candidate cut after a level")?;

            if parent == null {
                break;
            }
            self.node_store
                .grow_node_box(&mut current_box, point_store, sibling)?;
            let (next_node, next_sibling) = path_to_root.pop().expect("parent recorded on path");
            node = next_node;
            sibling = next_sibling;
            parent = path_to_root.last().map_or(null, |e| e.0);
        }

        let saved_cut = saved_cut.ok_or(ForestError::InvariantViolation {
            msg: "insertion found no separating cut",
        })?;
        while let Some(entry) = ancestors_of_saved.pop() {
            path_to_root.push(entry);
        }
        if saved_parent != null {
            check_state(
                path_to_root.last().map_or(false, |e| e.0 == saved_parent),
                "restored path does not end at the split position",
            )?;
        } else {
            check_state(path_to_root.is_empty(), "split at the root leaves no ancestors")?;
        }

        let mut cache_rng = ChaCha20Rng::seed_from_u64(self.cache_random_seed);
        self.cache_random_seed = cache_rng.next_u64();
        let cache_fraction = self.node_store.cache_fraction();
        let install_box = cache_fraction > 0.0 && cache_rng.gen::<f64>() < cache_fraction;

        let merged_node = self.node_store.add_node(
            saved_parent,
            &point,
            saved_node,
            point_handle,
            saved_cut,
            &saved_box,
            install_box,
        )?;
        self.tree_mass += 1;
        self.node_store.record_sequence(point_handle, sequence);
        if self.node_store.stores_center_of_mass() {
            self.node_store
                .recompute_point_sum_from_children(merged_node, point_store)?;
        }
        if saved_parent != null {
            self.node_store
                .manage_ancestors_add(&mut path_to_root, &point, false);
        } else {
            self.root = merged_node;
        }
        Ok(point_handle)
    }

    /// Removes one occurrence of (`point_handle`, `sequence`). A leaf whose
    /// mass reaches zero is spliced out by promoting its sibling.
    pub fn delete(
        &mut self,
        point_handle: usize,
        sequence: u64,
        point_store: &dyn PointAccess<F>,
    ) -> Result<usize> {
        let null = self.node_store.null_node();
        if self.root == null {
            return Err(ForestError::TreeInconsistency {
                msg: "delete from an empty tree",
            });
        }
        let point = point_store.point(point_handle)?.to_vec();
        let mut leaf_path: Vec<(usize, usize)> = Vec::new();
        self.node_store.set_path(&mut leaf_path, self.root, &point);
        let (leaf_node, leaf_sibling) = leaf_path.pop().expect("path contains the root");

        let leaf_handle = self.node_store.point_handle(leaf_node);
        if leaf_handle != point_handle && !point_store.matches(&point, leaf_handle)? {
            return Err(ForestError::TreeInconsistency {
                msg: "delete reached a leaf holding a different point",
            });
        }
        self.node_store.remove_sequence(leaf_handle, sequence)?;
        self.tree_mass -= 1;

        if self.node_store.decrease_leaf_mass(leaf_node) == 0 {
            if leaf_path.is_empty() {
                self.root = null;
            } else {
                let (parent, _) = leaf_path.pop().expect("non-root leaf has a parent");
                let grand_parent = leaf_path.last().map_or(null, |e| e.0);
                if grand_parent == null {
                    self.root = leaf_sibling;
                    self.node_store.set_root(leaf_sibling);
                } else {
                    self.node_store
                        .replace_parent_by_sibling(grand_parent, parent, leaf_sibling);
                    self.node_store.manage_ancestors_delete(
                        &mut leaf_path,
                        &point,
                        point_store,
                        false,
                    )?;
                }
                self.node_store.delete_internal_node(parent);
            }
        } else {
            self.node_store
                .manage_ancestors_delete(&mut leaf_path, &point, point_store, true)?;
        }
        Ok(leaf_handle)
    }

    /// Single-path traversal: walks to the leaf selected by the cut
    /// decisions, then visits ancestors bottom-up.
    pub fn traverse<V, R>(
        &self,
        point: &[F],
        parameters: &[usize],
        visitor_factory: fn(usize, &[usize], &VisitorInfo<F>) -> V,
        visitor_info: &VisitorInfo<F>,
        point_store: &dyn PointAccess<F>,
        default: &R,
    ) -> Result<R>
    where
        V: Visitor<F, R>,
        R: Clone,
    {
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = visitor_factory(self.tree_mass, parameters, visitor_info);
        let mut view = TraversalView::new(self.root, &self.node_store);
        if visitor.needs_bounding_boxes() {
            view.require_box_maintenance();
        }
        self.traverse_recursive(point, &mut view, &mut visitor, point_store)?;
        Ok(visitor.result())
    }

    fn traverse_recursive<V, R>(
        &self,
        point: &[F],
        view: &mut TraversalView<F>,
        visitor: &mut V,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()>
    where
        V: Visitor<F, R>,
    {
        let current = view.current_node();
        if self.node_store.is_leaf(current) {
            view.update_at_leaf(point, &self.node_store, point_store)?;
            visitor.accept_leaf(point, view);
            if visitor.use_shadow_box() {
                view.enable_shadow_box(&self.node_store, point_store)?;
            }
        } else {
            view.descend(point, &self.node_store);
            self.traverse_recursive(point, view, visitor, point_store)?;
            if !visitor.is_converged() {
                view.ascend(point, current, &self.node_store, point_store)?;
                visitor.accept(point, view);
            }
        }
        Ok(())
    }

    /// Multi-path traversal: wherever the visitor's trigger fires at an
    /// internal node, the visitor is duplicated, the copies walk the two
    /// children independently, and the results are combined before the
    /// parent is visited.
    pub fn traverse_multi<V, R>(
        &self,
        point: &[F],
        parameters: &[usize],
        visitor_factory: fn(usize, &[usize], u64, &VisitorInfo<F>) -> V,
        seed: u64,
        visitor_info: &VisitorInfo<F>,
        point_store: &dyn PointAccess<F>,
        default: &R,
    ) -> Result<R>
    where
        V: MultiVisitor<F, R>,
        R: Clone,
    {
        if self.is_empty() {
            return Ok(default.clone());
        }
        let mut visitor = visitor_factory(self.tree_mass, parameters, seed, visitor_info);
        let mut view = TraversalView::new(self.root, &self.node_store);
        if visitor.needs_bounding_boxes() {
            view.require_box_maintenance();
        }
        self.traverse_multi_recursive(point, &mut view, &mut visitor, point_store)?;
        Ok(visitor.result())
    }

    fn traverse_multi_recursive<V, R>(
        &self,
        point: &[F],
        view: &mut TraversalView<F>,
        visitor: &mut V,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()>
    where
        V: MultiVisitor<F, R>,
    {
        let current = view.current_node();
        if self.node_store.is_leaf(current) {
            view.update_at_leaf(point, &self.node_store, point_store)?;
            visitor.accept_leaf(point, view);
            return Ok(());
        }
        view.load_cut(&self.node_store);
        if visitor.trigger(point, view) {
            let left = self.node_store.left(current);
            let right = self.node_store.right(current);
            let mut left_view = view.branch(left, &self.node_store);
            let mut right_view = view.branch(right, &self.node_store);
            self.traverse_multi_recursive(point, &mut left_view, visitor, point_store)?;
            let mut right_visitor = visitor.new_copy();
            self.traverse_multi_recursive(point, &mut right_view, &mut right_visitor, point_store)?;
            visitor.combine(right_visitor, point);
            view.merge_branches(
                point,
                current,
                left_view,
                right_view,
                &self.node_store,
                point_store,
            )?;
        } else {
            view.descend(point, &self.node_store);
            self.traverse_multi_recursive(point, view, visitor, point_store)?;
            view.ascend(point, current, &self.node_store, point_store)?;
        }
        if !visitor.is_converged() {
            visitor.accept(point, view);
        }
        Ok(())
    }

    /// Changes the cache regime in place. Cached boxes are discarded and
    /// rebuilt on demand; topology and PRNG streams are untouched.
    pub fn set_cache_fraction(&mut self, cache_fraction: f64) -> Result<()> {
        self.node_store.set_cache_fraction(cache_fraction, self.root)
    }

    /// Recomputes every derived quantity from the leaves and checks it
    /// against the stored columns: child-mass sums, cut-side containment,
    /// cached-box exactness, parent pointers, and the tree mass counter.
    pub fn verify_integrity(&self, point_store: &dyn PointAccess<F>) -> Result<()> {
        if self.is_empty() {
            return check_state(self.tree_mass == 0, "empty tree with nonzero mass");
        }
        let (mass, _) = self.verify_node(self.root, self.node_store.null_node(), point_store)?;
        check_state(mass == self.tree_mass, "leaf masses disagree with the tree mass")
    }

    fn verify_node(
        &self,
        index: usize,
        parent: usize,
        point_store: &dyn PointAccess<F>,
    ) -> Result<(usize, BoundingBox<F>)> {
        if self.node_store.is_leaf(index) {
            let point = point_store.point(self.node_store.point_handle(index))?;
            return Ok((self.node_store.mass(index), BoundingBox::singleton(point)));
        }
        let left = self.node_store.left(index);
        let right = self.node_store.right(index);
        let (left_mass, left_box) = self.verify_node(left, index, point_store)?;
        let (right_mass, right_box) = self.verify_node(right, index, point_store)?;
        check_state(
            self.node_store.mass(index) == left_mass + right_mass,
            "child masses do not sum to the parent mass",
        )?;
        let dimension = self.node_store.cut_dimension(index);
        let value = self.node_store.cut_value(index);
        check_state(
            left_box.max_values()[dimension] <= value,
            "left subtree crosses the cut",
        )?;
        check_state(
            right_box.min_values()[dimension] > value,
            "right subtree crosses the cut",
        )?;
        if self.node_store.cache_fraction() > 0.0 {
            if index != self.root {
                check_state(
                    self.node_store.parent(index) == parent,
                    "parent pointer disagrees with the structure",
                )?;
            }
            if let Some(cached) = self.node_store.cached_box(index) {
                let expected = left_box.merge(&right_box);
                check_state(
                    cached.min_values() == expected.min_values()
                        && cached.max_values() == expected.max_values(),
                    "cached box is not exact",
                )?;
            }
        }
        Ok((left_mass + right_mass, left_box.merge(&right_box)))
    }

    // state capture

    pub fn columns(&self) -> NodeColumns<F> {
        self.node_store.column_snapshot()
    }

    pub fn seeds(&self) -> (u64, u64) {
        (self.random_seed, self.cache_random_seed)
    }

    pub fn output_after(&self) -> usize {
        self.output_after
    }

    pub fn from_columns(
        dimensions: usize,
        capacity: usize,
        max_point_handles: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        store_center_of_mass: bool,
        output_after: usize,
        seeds: (u64, u64),
        root: usize,
        tree_mass: usize,
        columns: &NodeColumns<F>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<Self> {
        let mut node_store = NodeStore::new(
            capacity,
            dimensions,
            max_point_handles,
            bounding_box_cache_fraction,
            store_sequence_indexes,
            store_center_of_mass,
        )?;
        node_store.restore_columns(columns, point_store)?;
        Ok(RandomCutTree {
            dimensions,
            capacity,
            node_store,
            random_seed: seeds.0,
            cache_random_seed: seeds.1,
            root,
            tree_mass,
            output_after,
        })
    }

    pub fn byte_size(&self) -> usize {
        self.node_store.byte_size() + std::mem::size_of::<RandomCutTree<F, C, P, N>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pointstore::PointStore;

    type TestTree = RandomCutTree<f32, u8, u16, u8>;

    fn tree_and_store(capacity: usize, cache_fraction: f64) -> (TestTree, PointStore<f32, u32>) {
        let store = PointStore::new(2, 64, 8, false).unwrap();
        let tree =
            TestTree::new(2, capacity, 64, cache_fraction, false, false, 1, 0).unwrap();
        (tree, store)
    }

    #[test]
    fn single_point_tree() {
        let (mut tree, mut store) = tree_and_store(4, 1.0);
        let h = store.add(&[1.0, 1.0]).unwrap();
        tree.insert(h, 1, &store).unwrap();
        assert_eq!(tree.mass(), 1);
        assert!(tree.node_store().is_leaf(tree.root()));
        assert_eq!(tree.node_store().internal_nodes_in_use(), 0);
        let gated = TestTree::new(2, 4, 64, 1.0, false, false, 2, 0).unwrap();
        assert!(!gated.is_output_ready());
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn two_distinct_points() {
        let (mut tree, mut store) = tree_and_store(4, 1.0);
        let a = store.add(&[1.0, 1.0]).unwrap();
        let b = store.add(&[2.0, 2.0]).unwrap();
        tree.insert(a, 1, &store).unwrap();
        tree.insert(b, 2, &store).unwrap();
        assert_eq!(tree.mass(), 2);
        let nodes = tree.node_store();
        assert_eq!(nodes.internal_nodes_in_use(), 1);
        let root = tree.root();
        assert!(nodes.is_internal(root));
        let dimension = nodes.cut_dimension(root);
        let value = nodes.cut_value(root);
        assert!(dimension < 2);
        assert!((1.0..2.0).contains(&value));
        // the smaller point sits on the left of the cut
        assert!(nodes.is_left_of(root, &[1.0, 1.0]));
        assert_eq!(nodes.left(root), nodes.leaf_index(a));
        assert_eq!(nodes.right(root), nodes.leaf_index(b));
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn duplicate_point_adds_mass_only() {
        let (mut tree, mut store) = tree_and_store(4, 1.0);
        let a = store.add(&[1.0, 1.0]).unwrap();
        let b = store.add(&[1.0, 1.0]).unwrap();
        let first = tree.insert(a, 1, &store).unwrap();
        let second = tree.insert(b, 2, &store).unwrap();
        assert_eq!(first, a);
        assert_eq!(second, a);
        assert_eq!(tree.mass(), 2);
        assert_eq!(tree.node_store().internal_nodes_in_use(), 0);
        assert_eq!(tree.node_store().mass(tree.root()), 2);
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn delete_and_reinsert_restores_root_box() {
        let (mut tree, mut store) = tree_and_store(4, 1.0);
        let points = [[1.0f32, 1.0], [2.0, 2.0], [3.0, 3.0]];
        let handles: Vec<usize> = points.iter().map(|p| store.add(p).unwrap()).collect();
        for (i, &h) in handles.iter().enumerate() {
            tree.insert(h, i as u64 + 1, &store).unwrap();
        }
        let recorded = tree
            .node_store()
            .cached_box(tree.root())
            .expect("full cache keeps the root box");
        tree.delete(handles[2], 3, &store).unwrap();
        tree.verify_integrity(&store).unwrap();
        tree.insert(handles[2], 4, &store).unwrap();
        let restored = tree
            .node_store()
            .cached_box(tree.root())
            .expect("full cache keeps the root box");
        assert_eq!(recorded.min_values(), restored.min_values());
        assert_eq!(recorded.max_values(), restored.max_values());
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn insert_then_delete_restores_structure() {
        let (mut tree, mut store) = tree_and_store(8, 1.0);
        let mut handles = Vec::new();
        let coords = [[0.0f32, 0.0], [1.0, 4.0], [5.0, 2.0], [3.0, 3.0]];
        for (i, p) in coords.iter().enumerate() {
            let h = store.add(p).unwrap();
            tree.insert(h, i as u64, &store).unwrap();
            handles.push(h);
        }
        let before = tree.columns();
        let root_before = tree.root();
        let extra = store.add(&[9.0, 9.0]).unwrap();
        tree.insert(extra, 10, &store).unwrap();
        tree.delete(extra, 10, &store).unwrap();
        assert_eq!(tree.columns(), before);
        assert_eq!(tree.root(), root_before);
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn cache_fraction_does_not_change_topology() {
        let mut store: PointStore<f32, u32> = PointStore::new(2, 256, 8, false).unwrap();
        let mut cached = TestTree::new(2, 32, 256, 1.0, false, false, 1, 7).unwrap();
        let mut uncached = TestTree::new(2, 32, 256, 0.0, false, false, 1, 7).unwrap();
        let mut partial = TestTree::new(2, 32, 256, 0.3, false, false, 1, 7).unwrap();
        let stream = crate::common::datagen::MixtureStream::<f32>::uniform(32, 2, 0.0, 1.0, 99);
        for (i, point) in stream.data.iter().enumerate() {
            let h = store.add(point).unwrap();
            store.inc_ref(h).unwrap();
            store.inc_ref(h).unwrap();
            cached.insert(h, i as u64, &store).unwrap();
            uncached.insert(h, i as u64, &store).unwrap();
            partial.insert(h, i as u64, &store).unwrap();
        }
        let a = cached.columns();
        let b = uncached.columns();
        let c = partial.columns();
        assert_eq!(a.left, b.left);
        assert_eq!(a.right, b.right);
        assert_eq!(a.cut_dimension, b.cut_dimension);
        assert_eq!(a.cut_value, b.cut_value);
        assert_eq!(a.mass, b.mass);
        assert_eq!(a.occupied, b.occupied);
        assert_eq!(a.left, c.left);
        assert_eq!(a.cut_value, c.cut_value);
        assert_eq!(cached.root(), uncached.root());
        assert_eq!(cached.root(), partial.root());
        cached.verify_integrity(&store).unwrap();
        uncached.verify_integrity(&store).unwrap();
        partial.verify_integrity(&store).unwrap();
    }

    #[test]
    fn invariants_hold_under_churn() {
        for cache_fraction in [0.0, 0.3, 1.0] {
            let mut store: PointStore<f32, u32> = PointStore::new(2, 256, 8, false).unwrap();
            let mut tree: RandomCutTree<f32, u8, u16, u8> =
                RandomCutTree::new(2, 16, 256, cache_fraction, true, true, 1, 13).unwrap();
            let stream =
                crate::common::datagen::MixtureStream::<f32>::uniform(200, 2, 0.0, 10.0, 5);
            let mut live: Vec<(usize, u64)> = Vec::new();
            for (i, point) in stream.data.iter().enumerate() {
                let seq = i as u64;
                let h = store.add(point).unwrap();
                let kept = tree.insert(h, seq, &store).unwrap();
                if kept != h {
                    store.dec_ref(h).unwrap();
                    store.inc_ref(kept).unwrap();
                }
                live.push((kept, seq));
                if live.len() > 16 {
                    let (old, old_seq) = live.remove(0);
                    tree.delete(old, old_seq, &store).unwrap();
                    store.dec_ref(old).unwrap();
                }
                tree.verify_integrity(&store).unwrap();
                assert_eq!(tree.mass(), live.len());
            }
        }
    }

    #[test]
    fn sequence_bookkeeping_is_checked() {
        let mut store: PointStore<f32, u32> = PointStore::new(2, 64, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 4, 64, 1.0, true, false, 1, 0).unwrap();
        let h = store.add(&[1.0, 2.0]).unwrap();
        tree.insert(h, 17, &store).unwrap();
        assert_eq!(
            tree.delete(h, 99, &store),
            Err(ForestError::SequenceNotFound {
                handle: h,
                sequence: 99
            })
        );
        // the failed delete must not have changed anything
        assert_eq!(tree.mass(), 1);
        tree.delete(h, 17, &store).unwrap();
        assert_eq!(tree.mass(), 0);
        assert!(tree.is_empty());
    }

    #[test]
    fn mispaired_delete_is_detected() {
        let (mut tree, mut store) = tree_and_store(4, 1.0);
        let a = store.add(&[1.0, 1.0]).unwrap();
        let b = store.add(&[1.5, 1.5]).unwrap();
        tree.insert(a, 1, &store).unwrap();
        let result = tree.delete(b, 1, &store);
        assert!(matches!(result, Err(ForestError::TreeInconsistency { .. })));
    }

    #[test]
    fn slot_exhaustion_is_fatal_but_clean() {
        let mut store: PointStore<f32, u32> = PointStore::new(2, 64, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 4, 64, 1.0, false, false, 1, 0).unwrap();
        for i in 0..5 {
            let h = store.add(&[i as f32, i as f32]).unwrap();
            tree.insert(h, i as u64, &store).unwrap();
        }
        let mass_before = tree.mass();
        let h = store.add(&[42.0, 42.0]).unwrap();
        assert_eq!(
            tree.insert(h, 6, &store),
            Err(ForestError::OutOfCapacity { capacity: 4 })
        );
        assert_eq!(tree.mass(), mass_before);
        tree.verify_integrity(&store).unwrap();
    }

    #[test]
    fn center_of_mass_tracks_leaf_sums() {
        let mut store: PointStore<f32, u32> = PointStore::new(2, 64, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 8, 64, 1.0, false, true, 1, 3).unwrap();
        let coords = [[1.0f32, 0.0], [2.0, 1.0], [4.0, -1.0], [1.0, 0.0]];
        let mut handles = Vec::new();
        for (i, p) in coords.iter().enumerate() {
            let h = store.add(p).unwrap();
            handles.push(tree.insert(h, i as u64, &store).unwrap());
        }
        let sum = tree
            .node_store()
            .point_sum(tree.root(), &store)
            .unwrap();
        // (1,0) occurs twice by duplicate collapse
        assert_eq!(sum, vec![8.0, 0.0]);
        tree.delete(handles[1], 1, &store).unwrap();
        let sum = tree
            .node_store()
            .point_sum(tree.root(), &store)
            .unwrap();
        assert_eq!(sum, vec![6.0, -1.0]);
    }

    #[test]
    fn score_traversal_reads_the_view() {
        use crate::visitor::scorevisitor::ScoreVisitor;
        use crate::visitor::visitor::VisitorInfo;

        let mut store: PointStore<f32, u32> = PointStore::new(2, 256, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 32, 256, 1.0, false, false, 1, 19).unwrap();
        let stream = crate::common::datagen::MixtureStream::<f32>::uniform(30, 2, 0.0, 1.0, 2);
        for (i, point) in stream.data.iter().enumerate() {
            let h = store.add(point).unwrap();
            tree.insert(h, i as u64, &store).unwrap();
        }
        let info = VisitorInfo::default();
        let score = |point: &[f32], t: &TestTree| {
            t.traverse(point, &[], ScoreVisitor::create, &info, &store, &0.0)
                .unwrap()
        };
        let inlier = score(&stream.data[0], &tree);
        let outlier = score(&[25.0, 25.0], &tree);
        assert!(inlier > 0.0 && outlier > 0.0);
        assert!(outlier > inlier);

        // a known duplicate converges at the leaf: damp * score_seen
        let dup = stream.data[5].clone();
        let duplicate_score = score(&dup, &tree);
        assert!(duplicate_score < outlier);
    }

    #[test]
    fn sequence_indexes_surface_through_the_view() {
        use crate::visitor::visitor::{Visitor, VisitorInfo};

        struct SequenceProbe {
            seen: Vec<(u64, usize)>,
        }
        impl Visitor<f32, Vec<(u64, usize)>> for SequenceProbe {
            fn accept_leaf(&mut self, _point: &[f32], view: &crate::tree::nodeview::TraversalView<f32>) {
                if let Some(entries) = view.sequence_indexes() {
                    self.seen = entries.to_vec();
                }
            }
            fn accept(&mut self, _point: &[f32], _view: &crate::tree::nodeview::TraversalView<f32>) {}
            fn result(&self) -> Vec<(u64, usize)> {
                self.seen.clone()
            }
        }
        fn probe_factory(
            _tree_mass: usize,
            _parameters: &[usize],
            _info: &VisitorInfo<f32>,
        ) -> SequenceProbe {
            SequenceProbe { seen: Vec::new() }
        }

        let mut store: PointStore<f32, u32> = PointStore::new(2, 64, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 8, 64, 1.0, true, false, 1, 0).unwrap();
        let a = store.add(&[1.0, 1.0]).unwrap();
        let b = store.add(&[1.0, 1.0]).unwrap();
        tree.insert(a, 7, &store).unwrap();
        tree.insert(b, 9, &store).unwrap();
        let info = VisitorInfo::default();
        let seen = tree
            .traverse(&[1.0f32, 1.0], &[], probe_factory, &info, &store, &Vec::new())
            .unwrap();
        assert_eq!(seen, vec![(7, 1), (9, 1)]);
    }

    #[test]
    fn changing_cache_fraction_preserves_behavior() {
        let mut store: PointStore<f32, u32> = PointStore::new(2, 256, 8, false).unwrap();
        let mut tree: TestTree = RandomCutTree::new(2, 16, 256, 0.0, false, false, 1, 21).unwrap();
        let stream = crate::common::datagen::MixtureStream::<f32>::uniform(16, 2, 0.0, 1.0, 3);
        for (i, point) in stream.data.iter().enumerate() {
            let h = store.add(point).unwrap();
            tree.insert(h, i as u64, &store).unwrap();
        }
        let before = tree.columns();
        tree.set_cache_fraction(1.0).unwrap();
        tree.verify_integrity(&store).unwrap();
        let after = tree.columns();
        assert_eq!(before.left, after.left);
        assert_eq!(before.cut_value, after.cut_value);
        // inserts keep working in the new regime
        let h = store.add(&[0.5, 0.5]).unwrap();
        tree.insert(h, 100, &store).unwrap();
        tree.verify_integrity(&store).unwrap();
    }
}
