use std::collections::HashMap;

use crate::common::divector::DiVector;
use crate::common::intervalmanager::IndexIntervalManager;
use crate::errors::{ForestError, Result};
use crate::pointstore::PointAccess;
use crate::tree::boundingbox::BoundingBox;
use crate::tree::cut::Cut;
use crate::types::{FloatingPoint, SlotIndex};
use crate::util::{check_argument, check_state};

/// Below this cache fraction the store keeps a sparse node-to-slot map and
/// traversals thread a running box instead of reading cached boxes.
pub(crate) const CACHE_SWITCH_THRESHOLD: f64 = 0.5;

/// Column-oriented storage for the internal nodes of one tree.
///
/// Node identifiers pack internal nodes and leaves into a single dense range:
/// ids in `[0, capacity)` are internal slots, the value `capacity` is the
/// null sentinel, and `capacity + 1 + h` is the leaf holding point handle
/// `h`. Leaves consume no slots; their mass (beyond the implicit 1) and
/// sequence indices live in side maps.
///
/// Masses are stored minus one, so a `u8` column covers the small tier and a
/// live node always reads back a positive mass.
///
/// The bounding-box cache holds min/max rows of `dimensions` values plus a
/// range sum per slot; a range sum of zero marks an absent slot, which is
/// sound because an internal node always covers two distinct points. At
/// cache fractions of `CACHE_SWITCH_THRESHOLD` and above every internal node
/// has a dedicated slot; below it, a bounded pool of slots is assigned
/// through a sparse map.
pub struct NodeStore<F, C: SlotIndex, P: SlotIndex, N: SlotIndex> {
    capacity: usize,
    dimensions: usize,
    bounding_box_cache_fraction: f64,
    store_center_of_mass: bool,
    cut_dimension: Vec<C>,
    cut_value: Vec<F>,
    left_index: Vec<P>,
    right_index: Vec<P>,
    parent_index: Vec<P>,
    mass: Vec<N>,
    bounding_box_data: Vec<F>,
    range_sum_data: Vec<f64>,
    cache_map: HashMap<usize, usize>,
    cache_slot_manager: Option<IndexIntervalManager<usize>>,
    point_sum_data: Vec<F>,
    leaf_mass: HashMap<usize, usize>,
    sequence_map: Option<HashMap<usize, HashMap<u64, usize>>>,
    internal_node_manager: IndexIntervalManager<P>,
}

impl<F, C, P, N> NodeStore<F, C, P, N>
where
    F: FloatingPoint,
    C: SlotIndex,
    P: SlotIndex,
    N: SlotIndex,
{
    pub fn new(
        capacity: usize,
        dimensions: usize,
        max_point_handles: usize,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        store_center_of_mass: bool,
    ) -> Result<Self> {
        check_argument(capacity > 0, "capacity must be positive")?;
        check_argument(dimensions > 0, "dimensions must be positive")?;
        check_argument(
            (0.0..=1.0).contains(&bounding_box_cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        check_argument(
            dimensions - 1 <= C::MAX.to_usize(),
            "cut dimension width too narrow for dimensions",
        )?;
        check_argument(
            capacity - 1 <= N::MAX.to_usize(),
            "mass width too narrow for capacity",
        )?;
        // the highest node id is the leaf of the last point handle
        check_argument(
            capacity + 1 + max_point_handles <= P::MAX.to_usize(),
            "pointer width too narrow for capacity and point store size",
        )?;

        let dense = bounding_box_cache_fraction >= CACHE_SWITCH_THRESHOLD;
        let cache_slots = if bounding_box_cache_fraction == 0.0 {
            0
        } else if dense {
            capacity
        } else {
            ((bounding_box_cache_fraction * capacity as f64).ceil() as usize).max(1)
        };
        let null_node = P::from_usize(capacity);
        Ok(NodeStore {
            capacity,
            dimensions,
            bounding_box_cache_fraction,
            store_center_of_mass,
            cut_dimension: vec![C::MAX; capacity],
            cut_value: vec![F::zero(); capacity],
            left_index: vec![null_node; capacity],
            right_index: vec![null_node; capacity],
            parent_index: if bounding_box_cache_fraction > 0.0 {
                vec![null_node; capacity]
            } else {
                Vec::new()
            },
            mass: vec![N::from_usize(0); capacity],
            bounding_box_data: vec![F::zero(); 2 * dimensions * cache_slots],
            range_sum_data: vec![0.0; cache_slots],
            cache_map: HashMap::new(),
            cache_slot_manager: if cache_slots > 0 && !dense {
                Some(IndexIntervalManager::new(cache_slots))
            } else {
                None
            },
            point_sum_data: if store_center_of_mass {
                vec![F::zero(); dimensions * capacity]
            } else {
                Vec::new()
            },
            leaf_mass: HashMap::new(),
            sequence_map: if store_sequence_indexes {
                Some(HashMap::new())
            } else {
                None
            },
            internal_node_manager: IndexIntervalManager::new(capacity),
        })
    }

    // node id arithmetic

    pub fn null_node(&self) -> usize {
        self.capacity
    }

    pub fn is_leaf(&self, index: usize) -> bool {
        index > self.capacity
    }

    pub fn is_internal(&self, index: usize) -> bool {
        index < self.capacity
    }

    pub fn leaf_index(&self, point_handle: usize) -> usize {
        self.capacity + 1 + point_handle
    }

    pub fn point_handle(&self, index: usize) -> usize {
        debug_assert!(self.is_leaf(index));
        index - self.capacity - 1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn internal_nodes_in_use(&self) -> usize {
        self.internal_node_manager.size()
    }

    pub fn cache_fraction(&self) -> f64 {
        self.bounding_box_cache_fraction
    }

    /// True when traversals should thread a running box instead of relying
    /// on cached rows.
    pub fn use_path_for_box(&self) -> bool {
        self.bounding_box_cache_fraction < CACHE_SWITCH_THRESHOLD
    }

    pub fn stores_center_of_mass(&self) -> bool {
        self.store_center_of_mass
    }

    pub fn stores_sequence_indexes(&self) -> bool {
        self.sequence_map.is_some()
    }

    // column accessors

    pub fn left(&self, index: usize) -> usize {
        self.left_index[index].to_usize()
    }

    pub fn right(&self, index: usize) -> usize {
        self.right_index[index].to_usize()
    }

    pub fn parent(&self, index: usize) -> usize {
        if self.parent_index.is_empty() {
            self.null_node()
        } else {
            self.parent_index[index].to_usize()
        }
    }

    pub fn cut_dimension(&self, index: usize) -> usize {
        self.cut_dimension[index].to_usize()
    }

    pub fn cut_value(&self, index: usize) -> F {
        self.cut_value[index]
    }

    pub fn mass(&self, index: usize) -> usize {
        if self.is_leaf(index) {
            let handle = self.point_handle(index);
            return self.leaf_mass.get(&handle).map_or(1, |extra| extra + 1);
        }
        self.mass[index].to_usize() + 1
    }

    pub fn is_left_of(&self, index: usize, point: &[F]) -> bool {
        point[self.cut_dimension(index)] <= self.cut_value[index]
    }

    pub fn sibling(&self, node: usize, parent: usize) -> usize {
        let left = self.left(parent);
        if node == left {
            self.right(parent)
        } else {
            left
        }
    }

    pub fn cut_and_children(&self, index: usize) -> (usize, F, usize, usize) {
        if self.is_internal(index) {
            (
                self.cut_dimension(index),
                self.cut_value[index],
                self.left(index),
                self.right(index),
            )
        } else {
            (usize::MAX, F::max_value(), usize::MAX, usize::MAX)
        }
    }

    /// Records the root-to-leaf path for `point` as (node, sibling) pairs,
    /// root first.
    pub fn set_path(&self, answer: &mut Vec<(usize, usize)>, root: usize, point: &[F]) {
        let mut node = root;
        answer.push((root, self.null_node()));
        while !self.is_leaf(node) {
            if self.is_left_of(node, point) {
                answer.push((self.left(node), self.right(node)));
                node = self.left(node);
            } else {
                answer.push((self.right(node), self.left(node)));
                node = self.right(node);
            }
        }
    }

    // bounding-box cache

    fn translate(&self, index: usize) -> Option<usize> {
        if self.range_sum_data.is_empty() {
            return None;
        }
        if self.cache_slot_manager.is_some() {
            self.cache_map.get(&index).copied()
        } else if index < self.range_sum_data.len() {
            Some(index)
        } else {
            None
        }
    }

    /// Slot of a present cached box, if any.
    fn cached_slot(&self, index: usize) -> Option<usize> {
        self.translate(index)
            .filter(|&idx| self.range_sum_data[idx] > 0.0)
    }

    fn copy_box_to_slot(&mut self, idx: usize, bounding_box: &BoundingBox<F>) {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        self.bounding_box_data[base..mid].copy_from_slice(bounding_box.min_values());
        self.bounding_box_data[mid..mid + self.dimensions]
            .copy_from_slice(bounding_box.max_values());
        self.range_sum_data[idx] = bounding_box.range_sum();
    }

    fn box_from_slot(&self, idx: usize) -> BoundingBox<F> {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        BoundingBox::new(
            &self.bounding_box_data[base..mid],
            &self.bounding_box_data[mid..mid + self.dimensions],
        )
        .expect("cache rows have equal lengths")
    }

    /// Installs a cached box for a freshly created node, assigning a sparse
    /// slot when the regime calls for one. A node whose install draw failed
    /// keeps an absent slot.
    fn install_box(&mut self, index: usize, bounding_box: &BoundingBox<F>) {
        if self.range_sum_data.is_empty() {
            return;
        }
        if let Some(manager) = self.cache_slot_manager.as_mut() {
            match manager.take() {
                Ok(slot) => {
                    self.cache_map.insert(index, slot);
                }
                // the bounded slot pool is full; this node stays uncached
                Err(_) => return,
            }
        }
        if let Some(idx) = self.translate(index) {
            self.copy_box_to_slot(idx, bounding_box);
        }
    }

    fn clear_box(&mut self, index: usize) {
        if let Some(idx) = self.translate(index) {
            self.range_sum_data[idx] = 0.0;
            if let Some(manager) = self.cache_slot_manager.as_mut() {
                manager.release(idx);
                self.cache_map.remove(&index);
            }
        }
    }

    /// The cached box of `index` when one is present; never rebuilds.
    pub fn cached_box(&self, index: usize) -> Option<BoundingBox<F>> {
        self.cached_slot(index).map(|idx| self.box_from_slot(idx))
    }

    /// Extends the cached box of `index` (when present) to cover `point`.
    /// Returns true when the box already covered it, which resolves the
    /// ancestor walk.
    pub fn check_contains_and_add_point(&mut self, index: usize, point: &[F]) -> bool {
        if let Some(idx) = self.cached_slot(index) {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            for (x, &y) in self.bounding_box_data[base..mid].iter_mut().zip(point) {
                if y < *x {
                    *x = y;
                }
            }
            for (x, &y) in self.bounding_box_data[mid..mid + self.dimensions]
                .iter_mut()
                .zip(point)
            {
                if y > *x {
                    *x = y;
                }
            }
            let new_sum: f64 = self.bounding_box_data[base..mid]
                .iter()
                .zip(&self.bounding_box_data[mid..mid + self.dimensions])
                .map(|(&low, &high)| (high - low).to_f64_lossy())
                .sum();
            let unchanged = self.range_sum_data[idx] == new_sum;
            self.range_sum_data[idx] = new_sum;
            unchanged
        } else {
            false
        }
    }

    fn check_strictly_contains(&self, idx: usize, point: &[F]) -> bool {
        let base = 2 * idx * self.dimensions;
        let mid = base + self.dimensions;
        !self.bounding_box_data[base..mid]
            .iter()
            .zip(point)
            .zip(&self.bounding_box_data[mid..mid + self.dimensions])
            .any(|((&low, &p), &high)| low >= p || p >= high)
    }

    /// Delete-walk maintenance: when the cached box of `index` strictly
    /// contains the removed point nothing changes and the walk resolves;
    /// otherwise the box is recomputed from the children. Absent slots do not
    /// resolve the walk.
    pub fn check_contains_and_rebuild_box(
        &mut self,
        index: usize,
        point: &[F],
        point_store: &dyn PointAccess<F>,
    ) -> Result<bool> {
        if let Some(idx) = self.cached_slot(index) {
            if self.check_strictly_contains(idx, point) {
                Ok(true)
            } else {
                let rebuilt = self.reconstruct_box(index, point_store)?;
                self.copy_box_to_slot(idx, &rebuilt);
                Ok(false)
            }
        } else {
            Ok(false)
        }
    }

    fn reconstruct_box(
        &self,
        index: usize,
        point_store: &dyn PointAccess<F>,
    ) -> Result<BoundingBox<F>> {
        let mut bounding_box = self.bounding_box(self.left(index), point_store)?;
        self.grow_node_box(&mut bounding_box, point_store, self.right(index))?;
        Ok(bounding_box)
    }

    /// The exact bounding box of the subtree rooted at `index`, read from the
    /// cache when present and otherwise rebuilt by recursion.
    pub fn bounding_box(
        &self,
        index: usize,
        point_store: &dyn PointAccess<F>,
    ) -> Result<BoundingBox<F>> {
        if self.is_leaf(index) {
            let point = point_store.point(self.point_handle(index))?;
            return Ok(BoundingBox::singleton(point));
        }
        if let Some(idx) = self.cached_slot(index) {
            return Ok(self.box_from_slot(idx));
        }
        self.reconstruct_box(index, point_store)
    }

    /// Merges the bounding box of the subtree at `sibling` into a running
    /// box, short-circuiting through cached boxes.
    pub fn grow_node_box(
        &self,
        bounding_box: &mut BoundingBox<F>,
        point_store: &dyn PointAccess<F>,
        sibling: usize,
    ) -> Result<()> {
        if self.is_leaf(sibling) {
            let point = point_store.point(self.point_handle(sibling))?;
            bounding_box.add_point(point);
            return Ok(());
        }
        if let Some(idx) = self.cached_slot(sibling) {
            let base = 2 * idx * self.dimensions;
            bounding_box.add_point(&self.bounding_box_data[base..base + self.dimensions]);
            bounding_box.add_point(
                &self.bounding_box_data[base + self.dimensions..base + 2 * self.dimensions],
            );
            return Ok(());
        }
        self.grow_node_box(bounding_box, point_store, self.left(sibling))?;
        self.grow_node_box(bounding_box, point_store, self.right(sibling))
    }

    /// Probability that a random cut of the subtree box extended by `point`
    /// separates the point, computed against the cached rows when possible.
    pub fn probability_of_cut(
        &self,
        index: usize,
        point: &[F],
        point_store: &dyn PointAccess<F>,
    ) -> Result<f64> {
        if let Some(idx) = self.cached_slot(index) {
            let base = 2 * idx * self.dimensions;
            let mid = base + self.dimensions;
            let minsum: f64 = self.bounding_box_data[base..mid]
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
                .zip(&self.bounding_box_data[mid..mid + self.dimensions])
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
                return Ok(0.0);
            }
            return Ok(sum / (self.range_sum_data[idx] + sum));
        }
        Ok(self.bounding_box(index, point_store)?.probability_of_cut(point))
    }

    /// Per-dimension probability-of-cut contributions for attribution.
    pub fn probability_of_cut_di_vector(
        &self,
        index: usize,
        point: &[F],
        point_store: &dyn PointAccess<F>,
        di_vector: &mut DiVector,
    ) -> Result<()> {
        let bounding_box = self.bounding_box(index, point_store)?;
        di_vector.assign_as_probability_of_cut(&bounding_box, point);
        Ok(())
    }

    // structural edits

    /// Creates an internal node over a fresh leaf for `point_handle` and the
    /// subtree at `child`, splicing it into `parent`'s child slot (`parent`
    /// may be null for a new root). `saved_box` is the box of the `child`
    /// subtree; `install_box` is the cache install decision for the new node.
    pub fn add_node(
        &mut self,
        parent: usize,
        point: &[F],
        child: usize,
        point_handle: usize,
        cut: Cut<F>,
        saved_box: &BoundingBox<F>,
        install_box: bool,
    ) -> Result<usize> {
        let index = self.internal_node_manager.take()?;
        self.cut_value[index] = cut.value;
        self.cut_dimension[index] = C::from_usize(cut.dimension);
        let leaf = self.leaf_index(point_handle);
        if point[cut.dimension] <= cut.value {
            self.left_index[index] = P::from_usize(leaf);
            self.right_index[index] = P::from_usize(child);
        } else {
            self.left_index[index] = P::from_usize(child);
            self.right_index[index] = P::from_usize(leaf);
        }
        // stored mass is mass - 1, and the new leaf contributes exactly 1
        self.mass[index] = N::from_usize(self.mass(child));

        if self.bounding_box_cache_fraction > 0.0 {
            if install_box {
                let mut node_box = saved_box.clone();
                node_box.add_point(point);
                self.install_box(index, &node_box);
            } else {
                self.clear_box(index);
            }
            self.parent_index[index] = P::from_usize(parent);
            if self.is_internal(child) {
                self.parent_index[child] = P::from_usize(index);
            }
        }

        if parent != self.null_node() {
            self.replace_child(parent, child, index);
        }
        Ok(index)
    }

    pub fn replace_child(&mut self, grand_parent: usize, old_child: usize, new_child: usize) {
        if old_child == self.left(grand_parent) {
            self.left_index[grand_parent] = P::from_usize(new_child);
        } else {
            self.right_index[grand_parent] = P::from_usize(new_child);
        }
        if self.is_internal(new_child) && self.bounding_box_cache_fraction > 0.0 {
            self.parent_index[new_child] = P::from_usize(grand_parent);
        }
    }

    /// The delete splice: the sibling takes the parent's place under the
    /// grandparent.
    pub fn replace_parent_by_sibling(
        &mut self,
        grand_parent: usize,
        parent: usize,
        sibling: usize,
    ) {
        self.replace_child(grand_parent, parent, sibling);
    }

    pub fn set_root(&mut self, index: usize) {
        if self.is_internal(index) && self.bounding_box_cache_fraction > 0.0 {
            self.parent_index[index] = P::from_usize(self.null_node());
        }
    }

    pub fn delete_internal_node(&mut self, index: usize) {
        let null_node = P::from_usize(self.null_node());
        self.left_index[index] = null_node;
        self.right_index[index] = null_node;
        self.mass[index] = N::from_usize(0);
        self.cut_dimension[index] = C::MAX;
        self.cut_value[index] = F::zero();
        if self.bounding_box_cache_fraction > 0.0 {
            self.parent_index[index] = null_node;
            self.clear_box(index);
        }
        if self.store_center_of_mass {
            let base = index * self.dimensions;
            for x in self.point_sum_data[base..base + self.dimensions].iter_mut() {
                *x = F::zero();
            }
        }
        self.internal_node_manager.release(index);
    }

    // ancestor walks

    /// Pops the recorded path and applies the insert bookkeeping: mass
    /// increments, cached-box extension until one box already covered the
    /// point, and center-of-mass accumulation.
    pub fn manage_ancestors_add(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[F],
        box_resolved: bool,
    ) {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            self.mass[index] = N::from_usize(self.mass[index].to_usize() + 1);
            if self.bounding_box_cache_fraction > 0.0 && !resolved {
                resolved = self.check_contains_and_add_point(index, point);
            }
            if self.store_center_of_mass {
                self.add_to_point_sum(index, point, true);
            }
        }
    }

    /// The delete counterpart: mass decrements, cached-box rebuilds until one
    /// still contains the point, center-of-mass subtraction.
    pub fn manage_ancestors_delete(
        &mut self,
        path: &mut Vec<(usize, usize)>,
        point: &[F],
        point_store: &dyn PointAccess<F>,
        box_resolved: bool,
    ) -> Result<()> {
        let mut resolved = box_resolved;
        while let Some((index, _)) = path.pop() {
            self.mass[index] = N::from_usize(self.mass[index].to_usize() - 1);
            if self.bounding_box_cache_fraction > 0.0 && !resolved {
                resolved = self.check_contains_and_rebuild_box(index, point, point_store)?;
            }
            if self.store_center_of_mass {
                self.add_to_point_sum(index, point, false);
            }
        }
        Ok(())
    }

    // leaf mass

    pub fn increase_leaf_mass(&mut self, leaf: usize) {
        let handle = self.point_handle(leaf);
        *self.leaf_mass.entry(handle).or_insert(0) += 1;
    }

    /// Decrements a leaf's mass and returns the remaining mass; zero means
    /// the leaf must be removed from the tree.
    pub fn decrease_leaf_mass(&mut self, leaf: usize) -> usize {
        let handle = self.point_handle(leaf);
        if let Some(extra) = self.leaf_mass.remove(&handle) {
            if extra > 1 {
                self.leaf_mass.insert(handle, extra - 1);
            }
            extra
        } else {
            0
        }
    }

    // sequence indexes

    pub fn record_sequence(&mut self, point_handle: usize, sequence: u64) {
        if let Some(map) = self.sequence_map.as_mut() {
            *map.entry(point_handle)
                .or_default()
                .entry(sequence)
                .or_insert(0) += 1;
        }
    }

    pub fn remove_sequence(&mut self, point_handle: usize, sequence: u64) -> Result<()> {
        let Some(map) = self.sequence_map.as_mut() else {
            return Ok(());
        };
        let entry = map
            .get_mut(&point_handle)
            .and_then(|per_leaf| per_leaf.get_mut(&sequence));
        match entry {
            Some(count) if *count > 1 => {
                *count -= 1;
                Ok(())
            }
            Some(_) => {
                let per_leaf = map.get_mut(&point_handle).expect("present above");
                per_leaf.remove(&sequence);
                if per_leaf.is_empty() {
                    map.remove(&point_handle);
                }
                Ok(())
            }
            None => Err(ForestError::SequenceNotFound {
                handle: point_handle,
                sequence,
            }),
        }
    }

    pub fn sequences_of(&self, point_handle: usize) -> Option<Vec<(u64, usize)>> {
        self.sequence_map.as_ref().map(|map| {
            let mut entries: Vec<(u64, usize)> = map
                .get(&point_handle)
                .map(|per_leaf| per_leaf.iter().map(|(&s, &c)| (s, c)).collect())
                .unwrap_or_default();
            entries.sort_unstable();
            entries
        })
    }

    // center of mass

    fn add_to_point_sum(&mut self, index: usize, point: &[F], add: bool) {
        let base = index * self.dimensions;
        for (x, &y) in self.point_sum_data[base..base + self.dimensions]
            .iter_mut()
            .zip(point)
        {
            if add {
                *x += y;
            } else {
                *x -= y;
            }
        }
    }

    fn subtree_point_sum(&self, index: usize, point_store: &dyn PointAccess<F>) -> Result<Vec<F>> {
        if self.is_leaf(index) {
            let handle = self.point_handle(index);
            let point = point_store.point(handle)?;
            let mass = F::from_usize(self.mass(index)).expect("mass fits the float type");
            return Ok(point.iter().map(|&x| x * mass).collect());
        }
        let base = index * self.dimensions;
        Ok(self.point_sum_data[base..base + self.dimensions].to_vec())
    }

    /// Sets a fresh node's point sum from its children.
    pub fn recompute_point_sum_from_children(
        &mut self,
        index: usize,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        check_state(self.store_center_of_mass, "center of mass not enabled")?;
        let left_sum = self.subtree_point_sum(self.left(index), point_store)?;
        let right_sum = self.subtree_point_sum(self.right(index), point_store)?;
        let base = index * self.dimensions;
        for (i, x) in self.point_sum_data[base..base + self.dimensions]
            .iter_mut()
            .enumerate()
        {
            *x = left_sum[i] + right_sum[i];
        }
        Ok(())
    }

    /// The component-wise sum of all leaf points under `index`, each counted
    /// by its mass. Dividing by the node's mass yields the center of mass.
    pub fn point_sum(&self, index: usize, point_store: &dyn PointAccess<F>) -> Result<Vec<F>> {
        check_state(self.store_center_of_mass, "center of mass not enabled")?;
        self.subtree_point_sum(index, point_store)
    }

    /// Switches the cache regime in place. All cached boxes are dropped;
    /// parent pointers are rebuilt from the structure when they become
    /// required. Correctness does not depend on cached boxes, so the change
    /// affects performance only.
    pub fn set_cache_fraction(&mut self, cache_fraction: f64, root: usize) -> Result<()> {
        check_argument(
            (0.0..=1.0).contains(&cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        let had_parents = !self.parent_index.is_empty();
        self.bounding_box_cache_fraction = cache_fraction;
        let dense = cache_fraction >= CACHE_SWITCH_THRESHOLD;
        let cache_slots = if cache_fraction == 0.0 {
            0
        } else if dense {
            self.capacity
        } else {
            ((cache_fraction * self.capacity as f64).ceil() as usize).max(1)
        };
        self.bounding_box_data = vec![F::zero(); 2 * self.dimensions * cache_slots];
        self.range_sum_data = vec![0.0; cache_slots];
        self.cache_map.clear();
        self.cache_slot_manager = if cache_slots > 0 && !dense {
            Some(IndexIntervalManager::new(cache_slots))
        } else {
            None
        };
        if cache_fraction > 0.0 {
            if self.parent_index.is_empty() {
                self.parent_index = vec![P::from_usize(self.null_node()); self.capacity];
            }
            if !had_parents {
                self.rebuild_parents(root, self.null_node());
            }
        } else {
            self.parent_index = Vec::new();
        }
        Ok(())
    }

    fn rebuild_parents(&mut self, index: usize, parent: usize) {
        if self.is_internal(index) {
            self.parent_index[index] = P::from_usize(parent);
            let left = self.left(index);
            let right = self.right(index);
            self.rebuild_parents(left, index);
            self.rebuild_parents(right, index);
        }
    }

    // state capture

    pub fn occupied_internal_nodes(&self) -> Vec<bool> {
        (0..self.capacity)
            .map(|i| self.internal_node_manager.occupied(i))
            .collect()
    }

    pub(crate) fn column_snapshot(&self) -> NodeColumns<F> {
        NodeColumns {
            cut_dimension: self.cut_dimension.iter().map(|c| c.to_usize() as u32).collect(),
            cut_value: self.cut_value.clone(),
            left: self.left_index.iter().map(|p| p.to_usize() as u32).collect(),
            right: self.right_index.iter().map(|p| p.to_usize() as u32).collect(),
            parent: self.parent_index.iter().map(|p| p.to_usize() as u32).collect(),
            mass: self.mass.iter().map(|n| n.to_usize() as u32).collect(),
            occupied: self.occupied_internal_nodes(),
            leaf_mass: {
                let mut entries: Vec<(usize, usize)> =
                    self.leaf_mass.iter().map(|(&h, &m)| (h, m)).collect();
                entries.sort_unstable();
                entries
            },
            sequences: self.sequence_map.as_ref().map(|map| {
                let mut per_handle: Vec<(usize, Vec<(u64, usize)>)> = map
                    .iter()
                    .map(|(&h, per_leaf)| {
                        let mut entries: Vec<(u64, usize)> =
                            per_leaf.iter().map(|(&s, &c)| (s, c)).collect();
                        entries.sort_unstable();
                        (h, entries)
                    })
                    .collect();
                per_handle.sort_unstable_by_key(|(h, _)| *h);
                per_handle
            }),
        }
    }

    pub(crate) fn restore_columns(
        &mut self,
        columns: &NodeColumns<F>,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        check_argument(
            columns.cut_value.len() == self.capacity,
            "column length disagrees with capacity",
        )?;
        for i in 0..self.capacity {
            if !columns.occupied[i] {
                continue;
            }
            self.cut_dimension[i] = C::from_usize(columns.cut_dimension[i] as usize);
            self.cut_value[i] = columns.cut_value[i];
            self.left_index[i] = P::from_usize(columns.left[i] as usize);
            self.right_index[i] = P::from_usize(columns.right[i] as usize);
            if !self.parent_index.is_empty() && !columns.parent.is_empty() {
                self.parent_index[i] = P::from_usize(columns.parent[i] as usize);
            }
            self.mass[i] = N::from_usize(columns.mass[i] as usize);
        }
        self.internal_node_manager =
            IndexIntervalManager::from_taken(self.capacity, &columns.occupied);
        self.leaf_mass = columns.leaf_mass.iter().copied().collect();
        if let (Some(map), Some(persisted)) = (self.sequence_map.as_mut(), columns.sequences.as_ref())
        {
            map.clear();
            for (handle, entries) in persisted {
                map.insert(*handle, entries.iter().copied().collect());
            }
        }
        // cached boxes are rebuilt on demand rather than persisted
        if self.store_center_of_mass {
            for i in 0..self.capacity {
                if columns.occupied[i] {
                    self.rebuild_point_sum_recursive(i, point_store)?;
                }
            }
        }
        Ok(())
    }

    fn rebuild_point_sum_recursive(
        &mut self,
        index: usize,
        point_store: &dyn PointAccess<F>,
    ) -> Result<()> {
        let mut sum = vec![F::zero(); self.dimensions];
        self.accumulate_leaf_sum(index, point_store, &mut sum)?;
        let base = index * self.dimensions;
        self.point_sum_data[base..base + self.dimensions].copy_from_slice(&sum);
        Ok(())
    }

    fn accumulate_leaf_sum(
        &self,
        index: usize,
        point_store: &dyn PointAccess<F>,
        sum: &mut [F],
    ) -> Result<()> {
        if self.is_leaf(index) {
            let point = point_store.point(self.point_handle(index))?;
            let mass = F::from_usize(self.mass(index)).expect("mass fits the float type");
            for (x, &y) in sum.iter_mut().zip(point) {
                *x += y * mass;
            }
            return Ok(());
        }
        self.accumulate_leaf_sum(self.left(index), point_store, sum)?;
        self.accumulate_leaf_sum(self.right(index), point_store, sum)
    }

    pub fn byte_size(&self) -> usize {
        (self.left_index.len() + self.right_index.len() + self.parent_index.len())
            * std::mem::size_of::<P>()
            + self.mass.len() * std::mem::size_of::<N>()
            + self.cut_dimension.len() * std::mem::size_of::<C>()
            + self.cut_value.len() * std::mem::size_of::<F>()
            + self.bounding_box_data.len() * std::mem::size_of::<F>()
            + self.range_sum_data.len() * std::mem::size_of::<f64>()
            + self.point_sum_data.len() * std::mem::size_of::<F>()
            + self.internal_node_manager.byte_size()
            + std::mem::size_of::<NodeStore<F, C, P, N>>()
    }
}

/// Width-independent snapshot of the internal-node columns, used by state
/// capture and the structural-equality assertions in tests.
#[derive(Clone, PartialEq, Debug, serde::Serialize, serde::Deserialize)]
pub struct NodeColumns<F> {
    pub cut_dimension: Vec<u32>,
    pub cut_value: Vec<F>,
    pub left: Vec<u32>,
    pub right: Vec<u32>,
    pub parent: Vec<u32>,
    pub mass: Vec<u32>,
    pub occupied: Vec<bool>,
    pub leaf_mass: Vec<(usize, usize)>,
    pub sequences: Option<Vec<(usize, Vec<(u64, usize)>)>>,
}
