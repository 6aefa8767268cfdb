use serde::{Deserialize, Serialize};

use crate::config::ForestConfig;
use crate::errors::Result;
use crate::tree::nodestore::NodeColumns;
use crate::types::FloatingPoint;
use crate::util::check_argument;

/// Format version of the captured state.
pub const STATE_VERSION: u32 = 1;

/// Everything needed to reconstruct a forest: scalar configuration, the live
/// point-store records, and per-tree columns, sampler entries, and PRNG
/// seeds. Indices are stored directly, widened to `u32`; the restoring side
/// narrows them back to the tier the configuration selects.
#[derive(Clone, Serialize, Deserialize)]
pub struct ForestState<F> {
    pub version: u32,
    /// Byte width of the float type the state was captured with.
    pub precision_bytes: u8,
    pub config: ForestConfig,
    pub entries_seen: u64,
    pub last_sequence: u64,
    /// (handle, reference count, vector) per live point-store slot.
    pub point_store_entries: Vec<(usize, usize, Vec<F>)>,
    pub trees: Vec<TreeState<F>>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct TreeState<F> {
    pub root: u32,
    pub mass: u64,
    /// (structure seed, cache seed).
    pub seeds: (u64, u64),
    pub columns: NodeColumns<F>,
    pub sampler: SamplerState,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SamplerState {
    pub random_seed: u64,
    /// Heap-order (handle, weight, sequence) triples.
    pub entries: Vec<(usize, f32, u64)>,
}

impl<F: FloatingPoint> ForestState<F> {
    pub(crate) fn new(
        config: ForestConfig,
        entries_seen: u64,
        last_sequence: u64,
        point_store_entries: Vec<(usize, usize, Vec<F>)>,
        trees: Vec<TreeState<F>>,
    ) -> Self {
        ForestState {
            version: STATE_VERSION,
            precision_bytes: std::mem::size_of::<F>() as u8,
            config,
            entries_seen,
            last_sequence,
            point_store_entries,
            trees,
        }
    }

    pub(crate) fn check_compatible<Target: FloatingPoint>(&self) -> Result<()> {
        check_argument(self.version == STATE_VERSION, "unsupported state version")?;
        check_argument(
            self.precision_bytes as usize == std::mem::size_of::<Target>(),
            "state precision disagrees with the requested float type",
        )?;
        check_argument(
            self.trees.len() == self.config.number_of_trees,
            "tree count disagrees with the configuration",
        )?;
        Ok(())
    }
}
