//! Lock-free tap of the most recent master samples
//!
//! The mixer writes every block it produces; analysis code copies out the
//! latest window whenever it wants one. The writer never waits: when the
//! ring is full the oldest samples are overwritten.
//!
//! Performance characteristics:
//! - Wait-free for the single writer
//! - Readers never block the writer (a reader racing a write may see a
//!   window that mixes two blocks, which is fine for visualization)
//! - No allocations after construction

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

/// Single-writer, many-reader overwrite ring of `f32` samples
///
/// Samples are stored as raw bits in `AtomicU32` cells so no `unsafe` is
/// needed to share the storage between threads.
pub struct SampleTap {
    cells: Box<[AtomicU32]>,

    /// Total samples ever written (cache-padded to prevent false sharing)
    written: CachePadded<AtomicUsize>,

    /// Mask for fast modulo operation (capacity - 1)
    mask: usize,
}

impl SampleTap {
    /// Create a tap holding at least `capacity` samples
    ///
    /// Capacity will be rounded up to the next power of 2.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1).next_power_of_two();
        let cells = (0..capacity).map(|_| AtomicU32::new(0)).collect();

        Self {
            cells,
            written: CachePadded::new(AtomicUsize::new(0)),
            mask: capacity - 1,
        }
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// Total number of samples pushed so far
    pub fn total_written(&self) -> usize {
        self.written.load(Ordering::Acquire)
    }

    /// Append samples, overwriting the oldest ones (writer side)
    pub fn push(&self, samples: &[f32]) {
        let start = self.written.load(Ordering::Relaxed);

        // Only the tail can survive a block larger than the ring
        let skip = samples.len().saturating_sub(self.cells.len());
        for (i, sample) in samples.iter().enumerate().skip(skip) {
            self.cells[(start + i) & self.mask].store(sample.to_bits(), Ordering::Relaxed);
        }

        // Release makes the cell stores visible before the new count
        self.written
            .store(start.wrapping_add(samples.len()), Ordering::Release);
    }

    /// Copy the most recent samples into `out`, oldest first
    ///
    /// Returns how many samples were available (at most `out.len()`). When
    /// fewer were available they are right-aligned and the front is zeroed.
    pub fn latest(&self, out: &mut [f32]) -> usize {
        let written = self.written.load(Ordering::Acquire);
        let available = written.min(self.cells.len()).min(out.len());
        let pad = out.len() - available;

        out[..pad].fill(0.0);
        let first = written.wrapping_sub(available);
        for (i, slot) in out[pad..].iter_mut().enumerate() {
            let bits = self.cells[(first.wrapping_add(i)) & self.mask].load(Ordering::Relaxed);
            *slot = f32::from_bits(bits);
        }

        available
    }

    pub fn clear(&self) {
        for cell in self.cells.iter() {
            cell.store(0, Ordering::Relaxed);
        }
        self.written.store(0, Ordering::Release);
    }
}

impl std::fmt::Debug for SampleTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleTap")
            .field("capacity", &self.capacity())
            .field("written", &self.total_written())
            .finish()
    }
}
