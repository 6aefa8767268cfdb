use log::{debug, warn};
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;
use rayon::prelude::*;

use crate::common::divector::DiVector;
use crate::config::ForestConfig;
use crate::errors::Result;
use crate::pointstore::PointStore;
use crate::sampler::Sampler;
use crate::samplerplustree::SamplerPlusTree;
use crate::state::{ForestState, SamplerState, TreeState};
use crate::tree::randomcuttree::RandomCutTree;
use crate::types::{FloatingPoint, SlotIndex};
use crate::util::{add_to, check_argument, divide};
use crate::visitor::attributionvisitor::AttributionVisitor;
use crate::visitor::imputevisitor::ImputeVisitor;
use crate::visitor::scorevisitor::ScoreVisitor;
use crate::visitor::visitor::{Visitor, VisitorInfo};

/// The query and update surface of a forest, object-safe so callers hold a
/// `Box<dyn RandomCutForest<F>>` independent of the width tier underneath.
pub trait RandomCutForest<F: FloatingPoint>: Send + Sync {
    /// Feeds one observation. Sequence numbers must be non-decreasing.
    fn update(&mut self, point: &[F], sequence: u64) -> Result<()>;

    /// Expected-displacement anomaly score, averaged over trees. Zero until
    /// `output_after` observations have been seen.
    fn score(&self, point: &[F]) -> Result<f64>;

    /// Density-flavoured variant of the score using the displacement bundle.
    fn displacement_score(&self, point: &[F]) -> Result<f64>;

    /// Per-dimension, two-sided attribution of the anomaly score.
    fn attribution(&self, point: &[F]) -> Result<DiVector>;

    /// Fills the listed positions of `point` with values conditioned on the
    /// remaining coordinates, via the multi-visitor machinery.
    fn impute_missing_values(&self, positions: &[usize], point: &[F]) -> Result<Vec<F>>;

    fn is_output_ready(&self) -> bool;
    fn entries_seen(&self) -> u64;
    /// Total mass across trees.
    fn mass(&self) -> usize;
    fn dimensions(&self) -> usize;
    fn sample_size(&self) -> usize;
    fn number_of_trees(&self) -> usize;
    fn set_cache_fraction(&mut self, cache_fraction: f64) -> Result<()>;
    fn state(&self) -> Result<ForestState<F>>;
    fn byte_size(&self) -> usize;
    fn point_store_byte_size(&self) -> usize;
}

/// Forest implementation for one width tier: `L` is the point-store location
/// width, `C`/`P`/`N` the node-store column widths.
pub struct ForestCore<F, L: SlotIndex, C: SlotIndex, P: SlotIndex, N: SlotIndex> {
    config: ForestConfig,
    sampler_plus_trees: Vec<SamplerPlusTree<F, C, P, N>>,
    point_store: PointStore<F, L>,
    entries_seen: u64,
    last_sequence: u64,
}

impl<F, L, C, P, N> ForestCore<F, L, C, P, N>
where
    F: FloatingPoint,
    L: SlotIndex,
    C: SlotIndex,
    P: SlotIndex,
    N: SlotIndex,
{
    pub fn new(config: ForestConfig) -> Result<Self> {
        config.validate()?;
        let point_store_capacity = config.point_store_capacity();
        let mut rng = ChaCha20Rng::seed_from_u64(config.random_seed);
        let mut sampler_plus_trees = Vec::with_capacity(config.number_of_trees);
        for _ in 0..config.number_of_trees {
            sampler_plus_trees.push(SamplerPlusTree::new(
                config.dimensions,
                config.sample_size,
                point_store_capacity,
                rng.next_u64(),
                config.time_decay,
                config.initial_accept_fraction,
                config.bounding_box_cache_fraction,
                config.store_sequence_indexes,
                config.center_of_mass,
                config.output_after,
            )?);
        }
        let point_store = PointStore::new(
            config.dimensions,
            point_store_capacity,
            2 * config.sample_size,
            config.dedup_points,
        )?;
        Ok(ForestCore {
            config,
            sampler_plus_trees,
            point_store,
            entries_seen: 0,
            last_sequence: 0,
        })
    }

    pub(crate) fn from_state(state: &ForestState<F>) -> Result<Self> {
        let config = state.config.clone();
        config.validate()?;
        let point_store_capacity = config.point_store_capacity();
        let point_store = PointStore::from_entries(
            config.dimensions,
            point_store_capacity,
            config.dedup_points,
            &state.point_store_entries,
        )?;
        let mut sampler_plus_trees = Vec::with_capacity(state.trees.len());
        for tree_state in &state.trees {
            let tree = RandomCutTree::from_columns(
                config.dimensions,
                config.sample_size,
                point_store_capacity,
                config.bounding_box_cache_fraction,
                config.store_sequence_indexes,
                config.center_of_mass,
                config.output_after,
                tree_state.seeds,
                tree_state.root as usize,
                tree_state.mass as usize,
                &tree_state.columns,
                &point_store,
            )?;
            let sampler = Sampler::from_entries(
                config.sample_size,
                config.time_decay,
                config.initial_accept_fraction,
                tree_state.sampler.random_seed,
                &tree_state.sampler.entries,
            );
            sampler_plus_trees.push(SamplerPlusTree::from_parts(tree, sampler));
        }
        Ok(ForestCore {
            config,
            sampler_plus_trees,
            point_store,
            entries_seen: state.entries_seen,
            last_sequence: state.last_sequence,
        })
    }

    /// Fans a single-path visitor out over the trees and folds the per-tree
    /// results. A tree that fails the query is skipped with a warning; the
    /// fold divisor counts the trees that answered.
    fn traverse_all<V, R, S>(
        &self,
        point: &[F],
        parameters: &[usize],
        visitor_info: &VisitorInfo<F>,
        visitor_factory: fn(usize, &[usize], &VisitorInfo<F>) -> V,
        default: &R,
        initial: &S,
        collect_to: fn(&R, &mut S),
        finish: fn(&mut S, usize),
    ) -> Result<S>
    where
        V: Visitor<F, R>,
        R: Clone + Send + Sync,
        S: Clone,
    {
        check_argument(point.len() == self.config.dimensions, "invalid input length")?;
        let results: Vec<Result<R>> = if self.config.parallel_enabled {
            self.sampler_plus_trees
                .par_iter()
                .map(|model| {
                    model.traverse(
                        point,
                        parameters,
                        visitor_factory,
                        visitor_info,
                        &self.point_store,
                        default,
                    )
                })
                .collect()
        } else {
            self.sampler_plus_trees
                .iter()
                .map(|model| {
                    model.traverse(
                        point,
                        parameters,
                        visitor_factory,
                        visitor_info,
                        &self.point_store,
                        default,
                    )
                })
                .collect()
        };
        let mut answer = initial.clone();
        let mut answered = 0;
        for result in &results {
            match result {
                Ok(value) => {
                    collect_to(value, &mut answer);
                    answered += 1;
                }
                Err(error) => warn!("skipping a tree that failed a query: {}", error),
            }
        }
        check_argument(answered > 0, "no tree answered the query")?;
        finish(&mut answer, answered);
        Ok(answer)
    }

    fn impute_candidates(
        &self,
        positions: &[usize],
        point: &[F],
    ) -> Result<Vec<(f64, usize, f64)>> {
        let visitor_info = VisitorInfo::default();
        let default = (0.0f64, usize::MAX, f64::MAX);
        let tree_seed = |i: usize| {
            self.config
                .random_seed
                .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                .wrapping_add(i as u64)
        };
        let results: Vec<Result<(f64, usize, f64)>> = if self.config.parallel_enabled {
            self.sampler_plus_trees
                .par_iter()
                .enumerate()
                .map(|(i, model)| {
                    model.traverse_multi(
                        point,
                        positions,
                        impute_factory::<F>,
                        tree_seed(i),
                        &visitor_info,
                        &self.point_store,
                        &default,
                    )
                })
                .collect()
        } else {
            self.sampler_plus_trees
                .iter()
                .enumerate()
                .map(|(i, model)| {
                    model.traverse_multi(
                        point,
                        positions,
                        impute_factory::<F>,
                        tree_seed(i),
                        &visitor_info,
                        &self.point_store,
                        &default,
                    )
                })
                .collect()
        };
        let mut candidates = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(candidate) if candidate.1 != usize::MAX => candidates.push(candidate),
                Ok(_) => {}
                Err(error) => warn!("skipping a tree that failed imputation: {}", error),
            }
        }
        candidates.sort_by(|a, b| a.2.partial_cmp(&b.2).expect("distances are not NaN"));
        Ok(candidates)
    }
}

impl<F, L, C, P, N> RandomCutForest<F> for ForestCore<F, L, C, P, N>
where
    F: FloatingPoint,
    L: SlotIndex,
    C: SlotIndex,
    P: SlotIndex,
    N: SlotIndex,
{
    fn update(&mut self, point: &[F], sequence: u64) -> Result<()> {
        check_argument(point.len() == self.config.dimensions, "invalid input length")?;
        check_argument(
            self.entries_seen == 0 || sequence >= self.last_sequence,
            "sequence numbers must be non-decreasing",
        )?;
        let handle = self.point_store.add(point)?;
        let point_store = &self.point_store;
        let deltas: Vec<Result<(usize, usize)>> = if self.config.parallel_enabled {
            self.sampler_plus_trees
                .par_iter_mut()
                .map(|model| model.update(handle, sequence, point_store))
                .collect()
        } else {
            self.sampler_plus_trees
                .iter_mut()
                .map(|model| model.update(handle, sequence, point_store))
                .collect()
        };
        let deltas: Result<Vec<(usize, usize)>> = deltas.into_iter().collect();
        self.point_store.adjust_ref_counts(&deltas?)?;
        self.point_store.dec_ref(handle)?;
        self.entries_seen += 1;
        self.last_sequence = sequence;
        Ok(())
    }

    fn score(&self, point: &[F]) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        self.traverse_all(
            point,
            &[],
            &VisitorInfo::default(),
            ScoreVisitor::create,
            &0.0,
            &0.0,
            add_to,
            divide,
        )
    }

    fn displacement_score(&self, point: &[F]) -> Result<f64> {
        if !self.is_output_ready() {
            return Ok(0.0);
        }
        self.traverse_all(
            point,
            &[],
            &VisitorInfo::displacement(),
            ScoreVisitor::create,
            &0.0,
            &0.0,
            add_to,
            divide,
        )
    }

    fn attribution(&self, point: &[F]) -> Result<DiVector> {
        if !self.is_output_ready() {
            return Ok(DiVector::empty(self.config.dimensions));
        }
        let parameters = [self.config.dimensions];
        self.traverse_all(
            point,
            &parameters,
            &VisitorInfo::default(),
            AttributionVisitor::create,
            &DiVector::empty(self.config.dimensions),
            &DiVector::empty(self.config.dimensions),
            |a: &DiVector, b: &mut DiVector| a.add_to(b),
            DiVector::divide,
        )
    }

    fn impute_missing_values(&self, positions: &[usize], point: &[F]) -> Result<Vec<F>> {
        check_argument(!positions.is_empty(), "nothing to impute")?;
        check_argument(point.len() == self.config.dimensions, "invalid input length")?;
        check_argument(self.is_output_ready(), "forest is not ready for queries")?;
        for &position in positions {
            check_argument(position < self.config.dimensions, "position out of range")?;
        }
        let candidates = self.impute_candidates(positions, point)?;
        check_argument(!candidates.is_empty(), "no tree produced a candidate")?;
        // median of the candidate leaves, coordinate by coordinate
        let mut answer = point.to_vec();
        for &position in positions {
            let mut values: Vec<f64> = candidates
                .iter()
                .map(|&(_, handle, _)| {
                    self.point_store
                        .get(handle)
                        .map(|leaf| leaf[position].to_f64_lossy())
                })
                .collect::<Result<_>>()?;
            values.sort_by(|a, b| a.partial_cmp(b).expect("coordinates are not NaN"));
            answer[position] = F::from_f64_lossy(values[values.len() / 2]);
        }
        Ok(answer)
    }

    fn is_output_ready(&self) -> bool {
        self.entries_seen >= self.config.output_after as u64
    }

    fn entries_seen(&self) -> u64 {
        self.entries_seen
    }

    fn mass(&self) -> usize {
        self.sampler_plus_trees.iter().map(|m| m.mass()).sum()
    }

    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    fn sample_size(&self) -> usize {
        self.config.sample_size
    }

    fn number_of_trees(&self) -> usize {
        self.config.number_of_trees
    }

    fn set_cache_fraction(&mut self, cache_fraction: f64) -> Result<()> {
        check_argument(
            (0.0..=1.0).contains(&cache_fraction),
            "cache fraction must lie in [0, 1]",
        )?;
        for model in self.sampler_plus_trees.iter_mut() {
            model.set_cache_fraction(cache_fraction)?;
        }
        self.config.bounding_box_cache_fraction = cache_fraction;
        Ok(())
    }

    fn state(&self) -> Result<ForestState<F>> {
        let point_store_entries = self
            .point_store
            .live_entries()
            .into_iter()
            .map(|(handle, count)| Ok((handle, count, self.point_store.copy(handle)?)))
            .collect::<Result<Vec<_>>>()?;
        let trees = self
            .sampler_plus_trees
            .iter()
            .map(|model| {
                let (tree, sampler) = model.parts();
                TreeState {
                    root: tree.root() as u32,
                    mass: tree.mass() as u64,
                    seeds: tree.seeds(),
                    columns: tree.columns(),
                    sampler: SamplerState {
                        random_seed: sampler.random_seed(),
                        entries: sampler.entries(),
                    },
                }
            })
            .collect();
        Ok(ForestState::new(
            self.config.clone(),
            self.entries_seen,
            self.last_sequence,
            point_store_entries,
            trees,
        ))
    }

    fn byte_size(&self) -> usize {
        self.sampler_plus_trees
            .iter()
            .map(|m| m.byte_size())
            .sum::<usize>()
            + self.point_store.byte_size()
            + std::mem::size_of::<ForestCore<F, L, C, P, N>>()
    }

    fn point_store_byte_size(&self) -> usize {
        self.point_store.byte_size()
    }
}

fn impute_factory<F: FloatingPoint>(
    tree_mass: usize,
    positions: &[usize],
    seed: u64,
    visitor_info: &VisitorInfo<F>,
) -> ImputeVisitor<F> {
    ImputeVisitor::new(positions, 1.0, tree_mass, seed, visitor_info)
}

/// Builds a forest, selecting the width tier once from the configuration.
/// The `P` column must represent the highest leaf id, which depends on the
/// shared point store's capacity and not just the sample size.
pub fn forest<F: FloatingPoint>(config: ForestConfig) -> Result<Box<dyn RandomCutForest<F>>> {
    config.validate()?;
    let max_node_id = config.sample_size + 1 + config.point_store_capacity();
    if config.sample_size <= 128
        && config.dimensions <= 256
        && max_node_id <= u16::MAX as usize
    {
        debug!("choosing the small width tier");
        Ok(Box::new(ForestCore::<F, u32, u8, u16, u8>::new(config)?))
    } else if config.sample_size <= 32_000 && config.dimensions <= 65_535 {
        debug!("choosing the medium width tier");
        Ok(Box::new(ForestCore::<F, u32, u16, u32, u16>::new(config)?))
    } else {
        debug!("choosing the large width tier");
        Ok(Box::new(ForestCore::<F, u32, u32, u32, u32>::new(config)?))
    }
}

/// Restores a forest captured by [`RandomCutForest::state`], picking the same
/// tier the original construction would.
pub fn forest_from_state<F: FloatingPoint>(
    state: &ForestState<F>,
) -> Result<Box<dyn RandomCutForest<F>>> {
    state.check_compatible::<F>()?;
    let config = &state.config;
    let max_node_id = config.sample_size + 1 + config.point_store_capacity();
    if config.sample_size <= 128
        && config.dimensions <= 256
        && max_node_id <= u16::MAX as usize
    {
        Ok(Box::new(ForestCore::<F, u32, u8, u16, u8>::from_state(state)?))
    } else if config.sample_size <= 32_000 && config.dimensions <= 65_535 {
        Ok(Box::new(ForestCore::<F, u32, u16, u32, u16>::from_state(state)?))
    } else {
        Ok(Box::new(ForestCore::<F, u32, u32, u32, u32>::from_state(state)?))
    }
}

