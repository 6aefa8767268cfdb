use crate::errors::{ForestError, Result};
use crate::types::SlotIndex;

/// Free set over `[0, capacity)` kept as a stack of run-length intervals.
/// Adjacent releases extend the top interval, so a store that frees slots in
/// roughly the order it took them keeps the stack depth near one.
#[derive(Clone)]
pub struct IndexIntervalManager<T: SlotIndex> {
    capacity: usize,
    intervals_in_use: usize,
    free_starts: Vec<T>,
    free_ends: Vec<T>,
}

impl<T: SlotIndex> IndexIntervalManager<T> {
    pub fn new(capacity: usize) -> Self {
        IndexIntervalManager {
            capacity,
            intervals_in_use: 1,
            free_starts: vec![T::from_usize(0)],
            free_ends: vec![T::from_usize(capacity - 1)],
        }
    }

    /// Rebuilds a manager from a liveness bitmap, used when restoring
    /// persisted state. `taken[i]` marks slot `i` as handed out.
    pub fn from_taken(capacity: usize, taken: &[bool]) -> Self {
        let mut manager = IndexIntervalManager {
            capacity,
            intervals_in_use: 0,
            free_starts: Vec::new(),
            free_ends: Vec::new(),
        };
        let mut i = 0;
        while i < capacity {
            if taken.get(i).copied().unwrap_or(false) {
                i += 1;
                continue;
            }
            let start = i;
            while i < capacity && !taken.get(i).copied().unwrap_or(false) {
                i += 1;
            }
            manager.free_starts.push(T::from_usize(start));
            manager.free_ends.push(T::from_usize(i - 1));
            manager.intervals_in_use += 1;
        }
        manager
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_exhausted(&self) -> bool {
        self.intervals_in_use == 0
    }

    pub fn change_capacity(&mut self, new_capacity: usize) {
        if new_capacity > self.capacity {
            let start = T::from_usize(self.capacity);
            let end = T::from_usize(new_capacity - 1);
            if self.free_starts.len() == self.intervals_in_use {
                self.free_starts.push(start);
                self.free_ends.push(end);
            } else {
                self.free_starts[self.intervals_in_use] = start;
                self.free_ends[self.intervals_in_use] = end;
            }
            self.intervals_in_use += 1;
            self.capacity = new_capacity;
        }
    }

    /// Hands out an unused index, or fails with `OutOfCapacity` when every
    /// slot is taken.
    pub fn take(&mut self) -> Result<usize> {
        if self.is_exhausted() {
            return Err(ForestError::OutOfCapacity {
                capacity: self.capacity,
            });
        }
        let top = self.intervals_in_use - 1;
        let answer = self.free_starts[top].to_usize();
        if self.free_starts[top] == self.free_ends[top] {
            self.intervals_in_use -= 1;
        } else {
            self.free_starts[top] = T::from_usize(answer + 1);
        }
        Ok(answer)
    }

    /// Returns `index` to the free set. Extends the top interval when the
    /// index is adjacent to it.
    pub fn release(&mut self, index: usize) {
        debug_assert!(index < self.capacity);
        let val = T::from_usize(index);
        if self.intervals_in_use != 0 {
            let top = self.intervals_in_use - 1;
            let start = self.free_starts[top].to_usize();
            let end = self.free_ends[top].to_usize();
            if start == index + 1 {
                self.free_starts[top] = val;
                return;
            } else if end + 1 == index {
                self.free_ends[top] = val;
                return;
            }
        }
        if self.intervals_in_use < self.free_starts.len() {
            self.free_starts[self.intervals_in_use] = val;
            self.free_ends[self.intervals_in_use] = val;
        } else {
            self.free_starts.push(val);
            self.free_ends.push(val);
        }
        self.intervals_in_use += 1;
    }

    /// The number of currently taken indices.
    pub fn size(&self) -> usize {
        let mut free = 0;
        for i in 0..self.intervals_in_use {
            free += self.free_ends[i].to_usize() - self.free_starts[i].to_usize() + 1;
        }
        self.capacity - free
    }

    /// True when `index` is currently handed out.
    pub fn occupied(&self, index: usize) -> bool {
        if index >= self.capacity {
            return false;
        }
        for i in 0..self.intervals_in_use {
            if self.free_starts[i].to_usize() <= index && index <= self.free_ends[i].to_usize() {
                return false;
            }
        }
        true
    }

    pub fn byte_size(&self) -> usize {
        self.free_starts.len() * 2 * std::mem::size_of::<T>()
            + std::mem::size_of::<IndexIntervalManager<T>>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_release_cycle() {
        let mut manager: IndexIntervalManager<u16> = IndexIntervalManager::new(4);
        assert_eq!(manager.size(), 0);
        let a = manager.take().unwrap();
        let b = manager.take().unwrap();
        assert_ne!(a, b);
        assert!(manager.occupied(a) && manager.occupied(b));
        assert_eq!(manager.size(), 2);
        manager.release(a);
        assert!(!manager.occupied(a));
        assert_eq!(manager.size(), 1);
        let c = manager.take().unwrap();
        let d = manager.take().unwrap();
        let e = manager.take().unwrap();
        assert_eq!(manager.size(), 4);
        assert!(manager.take().is_err());
        manager.release(c);
        manager.release(d);
        manager.release(e);
        manager.release(b);
        assert_eq!(manager.size(), 0);
    }

    #[test]
    fn exhaustion_reports_out_of_capacity() {
        let mut manager: IndexIntervalManager<u8> = IndexIntervalManager::new(2);
        manager.take().unwrap();
        manager.take().unwrap();
        assert_eq!(
            manager.take(),
            Err(ForestError::OutOfCapacity { capacity: 2 })
        );
    }

    #[test]
    fn from_taken_round_trip() {
        let mut manager: IndexIntervalManager<u16> = IndexIntervalManager::new(8);
        let kept: Vec<usize> = (0..5).map(|_| manager.take().unwrap()).collect();
        manager.release(kept[1]);
        manager.release(kept[3]);
        let taken: Vec<bool> = (0..8).map(|i| manager.occupied(i)).collect();
        let rebuilt: IndexIntervalManager<u16> = IndexIntervalManager::from_taken(8, &taken);
        assert_eq!(rebuilt.size(), manager.size());
        for i in 0..8 {
            assert_eq!(rebuilt.occupied(i), manager.occupied(i));
        }
    }

    #[test]
    fn adjacent_release_extends_interval() {
        let mut manager: IndexIntervalManager<u16> = IndexIntervalManager::new(16);
        let taken: Vec<usize> = (0..16).map(|_| manager.take().unwrap()).collect();
        for &i in taken.iter().rev() {
            manager.release(i);
        }
        assert_eq!(manager.size(), 0);
        // all sixteen indices must be reusable again
        for _ in 0..16 {
            manager.take().unwrap();
        }
        assert!(manager.take().is_err());
    }
}
