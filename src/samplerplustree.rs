use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::errors::Result;
use crate::pointstore::PointAccess;
use crate::sampler::Sampler;
use crate::tree::randomcuttree::RandomCutTree;
use crate::types::{FloatingPoint, SlotIndex};
use crate::visitor::visitor::{MultiVisitor, Visitor, VisitorInfo};

/// One sampler fused to one tree. This pairing is the only correct way to
/// drive tree updates: the sampler decides acceptance and eviction, and the
/// eviction is applied to the tree before the insertion, which keeps the
/// sampler size equal to the tree mass at every step.
pub struct SamplerPlusTree<F, C: SlotIndex, P: SlotIndex, N: SlotIndex> {
    tree: RandomCutTree<F, C, P, N>,
    sampler: Sampler<P>,
}

impl<F, C, P, N> SamplerPlusTree<F, C, P, N>
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
        random_seed: u64,
        time_decay: f64,
        initial_accept_fraction: f64,
        bounding_box_cache_fraction: f64,
        store_sequence_indexes: bool,
        store_center_of_mass: bool,
        output_after: usize,
    ) -> Result<Self> {
        let mut rng = ChaCha20Rng::seed_from_u64(random_seed);
        let sampler_seed = rng.next_u64();
        let tree_seed = rng.next_u64();
        Ok(SamplerPlusTree {
            tree: RandomCutTree::new(
                dimensions,
                capacity,
                max_point_handles,
                bounding_box_cache_fraction,
                store_sequence_indexes,
                store_center_of_mass,
                output_after,
                tree_seed,
            )?,
            sampler: Sampler::new(capacity, time_decay, initial_accept_fraction, sampler_seed),
        })
    }

    /// Offers (`point_handle`, `seq`) to the sampler and applies the
    /// resulting tree changes. Returns `(accepted, evicted)` handles with
    /// `usize::MAX` marking absence; the caller owns the reference-count
    /// deltas. The accepted handle may differ from the offered one when the
    /// tree collapsed the insert onto an existing duplicate leaf.
    pub fn update(
        &mut self,
        point_handle: usize,
        seq: u64,
        point_store: &dyn PointAccess<F>,
    ) -> Result<(usize, usize)> {
        let Some(weight) = self.sampler.propose(seq) else {
            return Ok((usize::MAX, usize::MAX));
        };
        let mut evicted_handle = usize::MAX;
        if let Some((handle, _weight, evicted_seq)) = self.sampler.evicted() {
            self.tree.delete(handle, evicted_seq, point_store)?;
            evicted_handle = handle;
        }
        let kept = self.tree.insert(point_handle, seq, point_store)?;
        self.sampler.accept(kept, weight, seq);
        debug_assert!(self.sampler.size() == self.tree.mass());
        Ok((kept, evicted_handle))
    }

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
        self.tree.traverse(
            point,
            parameters,
            visitor_factory,
            visitor_info,
            point_store,
            default,
        )
    }

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
        self.tree.traverse_multi(
            point,
            parameters,
            visitor_factory,
            seed,
            visitor_info,
            point_store,
            default,
        )
    }

    pub fn mass(&self) -> usize {
        self.tree.mass()
    }

    pub fn is_output_ready(&self) -> bool {
        self.tree.is_output_ready()
    }

    pub fn set_cache_fraction(&mut self, cache_fraction: f64) -> Result<()> {
        self.tree.set_cache_fraction(cache_fraction)
    }

    pub fn tree(&self) -> &RandomCutTree<F, C, P, N> {
        &self.tree
    }

    pub fn sampler(&self) -> &Sampler<P> {
        &self.sampler
    }

    pub(crate) fn parts(&self) -> (&RandomCutTree<F, C, P, N>, &Sampler<P>) {
        (&self.tree, &self.sampler)
    }

    pub(crate) fn from_parts(tree: RandomCutTree<F, C, P, N>, sampler: Sampler<P>) -> Self {
        SamplerPlusTree { tree, sampler }
    }

    pub fn byte_size(&self) -> usize {
        self.tree.byte_size()
            + self.sampler.byte_size()
            + std::mem::size_of::<SamplerPlusTree<F, C, P, N>>()
    }

    pub fn verify_integrity(&self, point_store: &dyn PointAccess<F>) -> Result<()> {
        self.tree.verify_integrity(point_store)
    }
}
