use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::Hasher;

use log::trace;

use crate::common::intervalmanager::IndexIntervalManager;
use crate::errors::{ForestError, Result};
use crate::types::{FloatingPoint, SlotIndex};
use crate::util::check_argument;

/// Read-only view of stored points, the seam between the trees and the
/// arena that owns the vectors.
pub trait PointAccess<F> {
    fn point(&self, handle: usize) -> Result<&[F]>;
    fn matches(&self, point: &[F], handle: usize) -> Result<bool>;
}

impl<F: FloatingPoint, L: SlotIndex> PointAccess<F> for PointStore<F, L> {
    fn point(&self, handle: usize) -> Result<&[F]> {
        self.get(handle)
    }

    fn matches(&self, point: &[F], handle: usize) -> Result<bool> {
        self.is_equal(point, handle)
    }
}

/// Content-addressed vector arena shared by the trees of a forest. Handles
/// are dense integers, stable from `add` until the reference count returns to
/// zero; the backing storage grows in steps towards a fixed capacity and is
/// compacted in place when the tail region runs out.
///
/// Reference counts live in a `u8` column; counts beyond `u8::MAX` spill into
/// an overflow map keyed by handle.
pub struct PointStore<F, L: SlotIndex> {
    dimensions: usize,
    capacity: usize,
    dedup_points: bool,
    store: Vec<F>,
    location: Vec<L>,
    reference_count: Vec<u8>,
    overflow_counts: HashMap<usize, usize>,
    dedup_index: HashMap<u64, Vec<usize>>,
    start_free_region: usize,
    index_manager: IndexIntervalManager<usize>,
}

impl<F: FloatingPoint, L: SlotIndex> PointStore<F, L> {
    pub fn new(
        dimensions: usize,
        capacity: usize,
        initial_capacity: usize,
        dedup_points: bool,
    ) -> Result<Self> {
        check_argument(dimensions > 0, "dimensions must be positive")?;
        check_argument(
            0 < initial_capacity && initial_capacity <= capacity,
            "initial capacity must be in (0, capacity]",
        )?;
        Ok(PointStore {
            dimensions,
            capacity,
            dedup_points,
            store: vec![F::zero(); initial_capacity * dimensions],
            location: vec![L::MAX; initial_capacity],
            reference_count: vec![0; initial_capacity],
            overflow_counts: HashMap::new(),
            dedup_index: HashMap::new(),
            start_free_region: 0,
            index_manager: IndexIntervalManager::new(initial_capacity),
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live handles.
    pub fn live_points(&self) -> usize {
        self.index_manager.size()
    }

    fn is_live(&self, handle: usize) -> bool {
        handle < self.reference_count.len() && self.reference_count[handle] != 0
    }

    /// Stores a copy of `point` and returns its handle with a reference count
    /// of one. With deduplication on, an equal live vector is reused and its
    /// count incremented instead.
    pub fn add(&mut self, point: &[F]) -> Result<usize> {
        check_argument(point.len() == self.dimensions, "incorrect point length")?;
        let content_key = if self.dedup_points {
            let key = Self::content_hash(point);
            let mut existing = None;
            if let Some(candidates) = self.dedup_index.get(&key) {
                for &candidate in candidates {
                    if self.is_equal(point, candidate)? {
                        existing = Some(candidate);
                        break;
                    }
                }
            }
            if let Some(handle) = existing {
                self.inc_ref(handle)?;
                return Ok(handle);
            }
            Some(key)
        } else {
            None
        };

        if self.start_free_region + self.dimensions > self.store.len() {
            self.compact();
            if self.start_free_region + self.dimensions > self.store.len() {
                let mut new_size = self.store.len() + self.store.len() / 5 + self.dimensions;
                if new_size > self.capacity * self.dimensions {
                    new_size = self.capacity * self.dimensions;
                }
                self.store.resize(new_size, F::zero());
            }
        }

        if self.start_free_region + self.dimensions > self.store.len() {
            return Err(ForestError::OutOfCapacity {
                capacity: self.capacity,
            });
        }

        if self.index_manager.is_exhausted() && self.location.len() < self.capacity {
            let mut new_size = self.location.len() + self.location.len() / 5 + 1;
            if new_size > self.capacity {
                new_size = self.capacity;
            }
            self.location.resize(new_size, L::MAX);
            self.reference_count.resize(new_size, 0);
            self.index_manager.change_capacity(new_size);
        }
        let handle = self.index_manager.take()?;
        debug_assert!(self.reference_count[handle] == 0);

        let offset = self.start_free_region;
        self.store[offset..offset + self.dimensions].copy_from_slice(point);
        self.location[handle] = L::from_usize(offset / self.dimensions);
        self.reference_count[handle] = 1;
        self.start_free_region += self.dimensions;

        if let Some(key) = content_key {
            self.dedup_index.entry(key).or_default().push(handle);
        }
        Ok(handle)
    }

    pub fn get(&self, handle: usize) -> Result<&[F]> {
        if !self.is_live(handle) {
            return Err(ForestError::DeadHandle { handle });
        }
        let offset = self.location[handle].to_usize() * self.dimensions;
        Ok(&self.store[offset..offset + self.dimensions])
    }

    pub fn copy(&self, handle: usize) -> Result<Vec<F>> {
        self.get(handle).map(|slice| slice.to_vec())
    }

    pub fn is_equal(&self, point: &[F], handle: usize) -> Result<bool> {
        Ok(self.get(handle)? == point)
    }

    pub fn inc_ref(&mut self, handle: usize) -> Result<()> {
        if !self.is_live(handle) {
            return Err(ForestError::DeadHandle { handle });
        }
        if self.reference_count[handle] == u8::MAX {
            *self.overflow_counts.entry(handle).or_insert(0) += 1;
        } else {
            self.reference_count[handle] += 1;
        }
        Ok(())
    }

    /// Decrements the count; at zero the slot is freed and the handle becomes
    /// reusable.
    pub fn dec_ref(&mut self, handle: usize) -> Result<()> {
        if !self.is_live(handle) {
            return Err(ForestError::DeadHandle { handle });
        }
        if let Some(excess) = self.overflow_counts.get_mut(&handle) {
            *excess -= 1;
            if *excess == 0 {
                self.overflow_counts.remove(&handle);
            }
            return Ok(());
        }
        self.reference_count[handle] -= 1;
        if self.reference_count[handle] == 0 {
            if self.dedup_points {
                let key = Self::content_hash(self.get_unchecked(handle));
                if let Some(candidates) = self.dedup_index.get_mut(&key) {
                    candidates.retain(|&h| h != handle);
                    if candidates.is_empty() {
                        self.dedup_index.remove(&key);
                    }
                }
            }
            self.location[handle] = L::MAX;
            self.index_manager.release(handle);
        }
        Ok(())
    }

    fn get_unchecked(&self, handle: usize) -> &[F] {
        let offset = self.location[handle].to_usize() * self.dimensions;
        &self.store[offset..offset + self.dimensions]
    }

    /// Applies the per-tree deltas collected by a forest update: each entry is
    /// (accepted handle, evicted handle) with `usize::MAX` as the absent
    /// marker.
    pub fn adjust_ref_counts(&mut self, deltas: &[(usize, usize)]) -> Result<()> {
        for &(added, deleted) in deltas {
            if added != usize::MAX {
                self.inc_ref(added)?;
                if deleted != usize::MAX {
                    self.dec_ref(deleted)?;
                }
            }
        }
        Ok(())
    }

    /// Moves live vectors to the front of the arena, preserving handle values.
    fn compact(&mut self) {
        let mut live: Vec<(usize, usize)> = self
            .location
            .iter()
            .enumerate()
            .filter(|(_, &locn)| locn != L::MAX)
            .map(|(handle, &locn)| (locn.to_usize(), handle))
            .collect();
        live.sort_unstable();
        let mut fresh_start = 0;
        for (locn, handle) in live {
            let offset = locn * self.dimensions;
            if offset != fresh_start {
                self.store.copy_within(offset..offset + self.dimensions, fresh_start);
            }
            self.location[handle] = L::from_usize(fresh_start / self.dimensions);
            fresh_start += self.dimensions;
        }
        trace!(
            "point store compaction: {} values retained of {}",
            fresh_start,
            self.start_free_region
        );
        self.start_free_region = fresh_start;
    }

    fn content_hash(point: &[F]) -> u64 {
        let mut hasher = DefaultHasher::new();
        for &x in point {
            // fold -0.0 into +0.0 so bitwise hashing agrees with `==`
            let canonical = if x == F::zero() { F::zero() } else { x };
            hasher.write_u64(canonical.to_f64_lossy().to_bits());
        }
        hasher.finish()
    }

    /// Live handles with their reference counts, in handle order. Used by
    /// state capture.
    pub fn live_entries(&self) -> Vec<(usize, usize)> {
        let mut entries = Vec::new();
        for handle in 0..self.reference_count.len() {
            if self.reference_count[handle] != 0 {
                let count = self.reference_count[handle] as usize
                    + self.overflow_counts.get(&handle).copied().unwrap_or(0);
                entries.push((handle, count));
            }
        }
        entries
    }

    /// Restores a store from (handle, refcount, vector) records.
    pub fn from_entries(
        dimensions: usize,
        capacity: usize,
        dedup_points: bool,
        entries: &[(usize, usize, Vec<F>)],
    ) -> Result<Self> {
        let highest = entries.iter().map(|e| e.0 + 1).max().unwrap_or(1);
        let mut store = PointStore::new(dimensions, capacity, highest.max(1), dedup_points)?;
        let mut taken = vec![false; store.location.len()];
        for (handle, count, point) in entries {
            check_argument(point.len() == dimensions, "incorrect point length")?;
            check_argument(*count > 0, "persisted refcount must be positive")?;
            check_argument(!taken[*handle], "duplicate handle in persisted state")?;
            taken[*handle] = true;
            let offset = store.start_free_region;
            store.store[offset..offset + dimensions].copy_from_slice(point);
            store.location[*handle] = L::from_usize(offset / dimensions);
            store.start_free_region += dimensions;
            if *count > u8::MAX as usize {
                store.reference_count[*handle] = u8::MAX;
                store
                    .overflow_counts
                    .insert(*handle, count - u8::MAX as usize);
            } else {
                store.reference_count[*handle] = *count as u8;
            }
            if dedup_points {
                let key = Self::content_hash(point);
                store.dedup_index.entry(key).or_default().push(*handle);
            }
        }
        store.index_manager = IndexIntervalManager::from_taken(store.location.len(), &taken);
        Ok(store)
    }

    pub fn byte_size(&self) -> usize {
        self.store.len() * std::mem::size_of::<F>()
            + self.location.len() * std::mem::size_of::<L>()
            + self.reference_count.len()
            + self.index_manager.byte_size()
            + std::mem::size_of::<PointStore<F, L>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> PointStore<f32, u32> {
        PointStore::new(2, 64, 4, false).unwrap()
    }

    #[test]
    fn add_get_round_trip() {
        let mut points = store();
        let a = points.add(&[1.0, 2.0]).unwrap();
        let b = points.add(&[3.0, 4.0]).unwrap();
        assert_ne!(a, b);
        assert_eq!(points.get(a).unwrap(), &[1.0, 2.0]);
        assert_eq!(points.get(b).unwrap(), &[3.0, 4.0]);
        assert_eq!(points.live_points(), 2);
    }

    #[test]
    fn dec_to_zero_frees_and_reuses_handle() {
        let mut points = store();
        let a = points.add(&[1.0, 2.0]).unwrap();
        points.inc_ref(a).unwrap();
        points.dec_ref(a).unwrap();
        assert!(points.get(a).is_ok());
        points.dec_ref(a).unwrap();
        assert_eq!(
            points.get(a),
            Err(ForestError::DeadHandle { handle: a })
        );
        assert_eq!(points.dec_ref(a), Err(ForestError::DeadHandle { handle: a }));
        let b = points.add(&[9.0, 9.0]).unwrap();
        assert_eq!(b, a);
        assert_eq!(points.get(b).unwrap(), &[9.0, 9.0]);
    }

    #[test]
    fn dedup_shares_handles() {
        let mut points: PointStore<f32, u32> = PointStore::new(2, 64, 4, true).unwrap();
        let a = points.add(&[1.0, 2.0]).unwrap();
        let b = points.add(&[1.0, 2.0]).unwrap();
        assert_eq!(a, b);
        assert_eq!(points.live_points(), 1);
        points.dec_ref(a).unwrap();
        assert!(points.get(a).is_ok());
        points.dec_ref(a).unwrap();
        assert!(points.get(a).is_err());
        // a fresh equal vector gets a fresh slot once the old one died
        let c = points.add(&[1.0, 2.0]).unwrap();
        assert!(points.get(c).is_ok());
    }

    #[test]
    fn growth_and_compaction_keep_handles_stable() {
        let mut points: PointStore<f32, u32> = PointStore::new(2, 256, 2, false).unwrap();
        let mut handles = Vec::new();
        for i in 0..100 {
            handles.push(points.add(&[i as f32, -(i as f32)]).unwrap());
        }
        // free every other handle, then keep adding to force compaction
        for chunk in handles.chunks(2) {
            points.dec_ref(chunk[0]).unwrap();
        }
        for i in 100..160 {
            handles.push(points.add(&[i as f32, -(i as f32)]).unwrap());
        }
        for (i, &handle) in handles.iter().enumerate() {
            if i < 100 && i % 2 == 0 {
                continue;
            }
            assert_eq!(points.get(handle).unwrap(), &[i as f32, -(i as f32)]);
        }
    }

    #[test]
    fn refcount_overflow_spills_to_map() {
        let mut points = store();
        let a = points.add(&[5.0, 5.0]).unwrap();
        for _ in 0..300 {
            points.inc_ref(a).unwrap();
        }
        for _ in 0..300 {
            points.dec_ref(a).unwrap();
        }
        assert!(points.get(a).is_ok());
        points.dec_ref(a).unwrap();
        assert!(points.get(a).is_err());
    }

    #[test]
    fn entries_round_trip() {
        let mut points: PointStore<f32, u32> = PointStore::new(2, 64, 4, false).unwrap();
        let a = points.add(&[1.0, 2.0]).unwrap();
        let _b = points.add(&[3.0, 4.0]).unwrap();
        points.inc_ref(a).unwrap();
        let records: Vec<(usize, usize, Vec<f32>)> = points
            .live_entries()
            .into_iter()
            .map(|(h, c)| (h, c, points.copy(h).unwrap()))
            .collect();
        let rebuilt: PointStore<f32, u32> =
            PointStore::from_entries(2, 64, false, &records).unwrap();
        assert_eq!(rebuilt.live_points(), points.live_points());
        for (h, _c) in points.live_entries() {
            assert_eq!(rebuilt.get(h).unwrap(), points.get(h).unwrap());
        }
        // refcount of `a` survived: two decs to kill
        let mut rebuilt = rebuilt;
        rebuilt.dec_ref(a).unwrap();
        assert!(rebuilt.get(a).is_ok());
        rebuilt.dec_ref(a).unwrap();
        assert!(rebuilt.get(a).is_err());
    }
}
