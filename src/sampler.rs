use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use rand_core::RngCore;

use crate::types::SlotIndex;

/// Time-decayed weighted reservoir of fixed size, kept as a max-heap over
/// parallel (weight, handle, sequence) arrays; the greatest weight is the
/// eviction candidate. Weights are `ln(-ln(u)) - seq * time_decay`, so a
/// smaller weight wins and retention probabilities follow time-decayed
/// reservoir sampling.
///
/// Protocol: `propose(seq)` decides acceptance and, on a full reservoir,
/// performs the eviction; the caller is then bound to delete the point
/// returned by `evicted()` from the paired tree, insert the new point, and
/// hand the resulting handle back via `accept`.
pub struct Sampler<P: SlotIndex> {
    capacity: usize,
    time_decay: f64,
    initial_accept_fraction: f64,
    random_seed: u64,
    weights: Vec<f32>,
    handles: Vec<P>,
    sequences: Vec<u64>,
    current_size: usize,
    pending_eviction: Option<(usize, f32, u64)>,
}

impl<P: SlotIndex> Sampler<P> {
    pub fn new(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
    ) -> Self {
        Sampler {
            capacity,
            time_decay,
            initial_accept_fraction,
            random_seed,
            weights: vec![0.0; capacity],
            handles: vec![P::MAX; capacity],
            sequences: vec![0; capacity],
            current_size: 0,
            pending_eviction: None,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn size(&self) -> usize {
        self.current_size
    }

    pub fn is_full(&self) -> bool {
        self.current_size == self.capacity
    }

    pub fn fill_fraction(&self) -> f64 {
        if self.is_full() {
            return 1.0;
        }
        self.current_size as f64 / self.capacity as f64
    }

    pub fn time_decay(&self) -> f64 {
        self.time_decay
    }

    /// Decides whether the observation at `seq` enters the sample. On
    /// acceptance the weight is returned and, if the reservoir was full, the
    /// displaced entry becomes available from `evicted()`.
    pub fn propose(&mut self, seq: u64) -> Option<f32> {
        let mut rng = ChaCha20Rng::seed_from_u64(self.random_seed);
        self.random_seed = rng.next_u64();
        let draw: f64 = rng.gen();
        let weight = (f64::ln(-f64::ln(draw)) - seq as f64 * self.time_decay) as f32;

        let initial = if !self.is_full() {
            let ramp: f64 = rng.gen();
            ramp < self.initial_accept_probability(self.fill_fraction())
        } else {
            false
        };
        let accepted = initial || (self.current_size > 0 && weight < self.weights[0]);
        if !accepted {
            return None;
        }
        if !initial {
            self.pending_eviction = Some(self.evict_max());
        }
        Some(weight)
    }

    /// The entry displaced by the latest accepted proposal, if any. Taking it
    /// clears the slot.
    pub fn evicted(&mut self) -> Option<(usize, f32, u64)> {
        self.pending_eviction.take()
    }

    /// Records an accepted point. `handle` may differ from the handle the
    /// caller proposed with when the tree collapsed the insert onto an
    /// existing duplicate leaf.
    pub fn accept(&mut self, handle: usize, weight: f32, seq: u64) {
        debug_assert!(self.current_size < self.capacity, "sampler full");
        let mut current = self.current_size;
        self.weights[current] = weight;
        self.handles[current] = P::from_usize(handle);
        self.sequences[current] = seq;
        self.current_size += 1;

        while current > 0 {
            let parent = (current - 1) / 2;
            if self.weights[parent] < self.weights[current] {
                self.swap(current, parent);
                current = parent;
            } else {
                break;
            }
        }
    }

    fn evict_max(&mut self) -> (usize, f32, u64) {
        debug_assert!(self.current_size > 0);
        let evicted = (
            self.handles[0].to_usize(),
            self.weights[0],
            self.sequences[0],
        );
        self.current_size -= 1;
        let last = self.current_size;
        self.weights[0] = self.weights[last];
        self.handles[0] = self.handles[last];
        self.sequences[0] = self.sequences[last];
        self.swap_down(0);
        evicted
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.weights.swap(a, b);
        self.handles.swap(a, b);
        self.sequences.swap(a, b);
    }

    fn swap_down(&mut self, start: usize) {
        let mut current = start;
        while 2 * current + 1 < self.current_size {
            let mut max_index = 2 * current + 1;
            if 2 * current + 2 < self.current_size
                && self.weights[2 * current + 2] > self.weights[max_index]
            {
                max_index = 2 * current + 2;
            }
            if self.weights[max_index] > self.weights[current] {
                self.swap(current, max_index);
                current = max_index;
            } else {
                break;
            }
        }
    }

    fn initial_accept_probability(&self, fill_fraction: f64) -> f64 {
        if fill_fraction < self.initial_accept_fraction {
            1.0
        } else if self.initial_accept_fraction >= 1.0 {
            0.0
        } else {
            1.0 - (fill_fraction - self.initial_accept_fraction)
                / (1.0 - self.initial_accept_fraction)
        }
    }

    /// Heap-order (handle, weight, sequence) triples, used by state capture.
    pub fn entries(&self) -> Vec<(usize, f32, u64)> {
        (0..self.current_size)
            .map(|i| {
                (
                    self.handles[i].to_usize(),
                    self.weights[i],
                    self.sequences[i],
                )
            })
            .collect()
    }

    pub fn random_seed(&self) -> u64 {
        self.random_seed
    }

    /// Restores a sampler from captured heap-order entries.
    pub fn from_entries(
        capacity: usize,
        time_decay: f64,
        initial_accept_fraction: f64,
        random_seed: u64,
        entries: &[(usize, f32, u64)],
    ) -> Self {
        let mut sampler = Sampler::new(capacity, time_decay, initial_accept_fraction, random_seed);
        for (i, &(handle, weight, seq)) in entries.iter().enumerate() {
            sampler.handles[i] = P::from_usize(handle);
            sampler.weights[i] = weight;
            sampler.sequences[i] = seq;
        }
        sampler.current_size = entries.len();
        sampler
    }

    pub fn byte_size(&self) -> usize {
        self.weights.len() * std::mem::size_of::<f32>()
            + self.handles.len() * std::mem::size_of::<P>()
            + self.sequences.len() * std::mem::size_of::<u64>()
            + std::mem::size_of::<Sampler<P>>()
    }
}
