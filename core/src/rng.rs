//! Seeded randomness for the risk pipeline.
//!
//! Isolation trees, the train/test split, bootstrap samples and boosting
//! all draw from a `StageRng`. The run's seed plus a fixed slot number
//! picks the stream, so two runs with the same seed and input make the
//! same draws, and a new slot leaves the existing streams untouched.
//! No platform RNG is used anywhere.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

/// One reproducible stream, labelled with the slot it came from.
pub struct StageRng {
    pub name: &'static str,
    inner: Pcg64Mcg,
}

impl StageRng {
    /// Stream for `slot_index` under `master_seed`. Slot numbers are
    /// part of the reproducibility contract; never renumber one.
    pub fn new(master_seed: u64, slot_index: u64) -> Self {
        let derived_seed = master_seed ^ (slot_index.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            name: "unnamed",
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    pub fn with_name(self, name: &'static str) -> Self {
        Self { name, ..self }
    }

    /// Split off an independent child stream, e.g. one per tree.
    /// The child seed is drawn from this stream, so the parent advances.
    pub fn fork(&mut self) -> StageRng {
        let seed = self.next_u64();
        Self {
            name: self.name,
            inner: Pcg64Mcg::seed_from_u64(seed),
        }
    }

    /// Uniform in [0, 1) from the top 53 bits of one draw.
    pub fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_u64(&mut self) -> u64 {
        rand::RngCore::next_u64(&mut self.inner)
    }

    /// Roll a usize in [0, n).
    pub fn next_below(&mut self, n: usize) -> usize {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        (self.inner.next_u64() % n as u64) as usize
    }

    /// Roll a float uniformly in [lo, hi).
    pub fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i + 1);
            items.swap(i, j);
        }
    }

    /// Draw `k` distinct indices from [0, n) without replacement.
    pub fn sample_indices(&mut self, n: usize, k: usize) -> Vec<usize> {
        let mut pool: Vec<usize> = (0..n).collect();
        let k = k.min(n);
        for i in 0..k {
            let j = i + self.next_below(n - i);
            pool.swap(i, j);
        }
        pool.truncate(k);
        pool
    }
}

/// All stage RNGs for a single run, indexed by stable slot.
pub struct RngBank {
    master_seed: u64,
}

impl RngBank {
    pub fn new(master_seed: u64) -> Self {
        Self { master_seed }
    }

    pub fn master_seed(&self) -> u64 {
        self.master_seed
    }

    pub fn for_stage(&self, slot: StageSlot) -> StageRng {
        StageRng::new(self.master_seed, slot as u64).with_name(slot.name())
    }
}

/// Stable stage slot assignments.
/// NEVER reorder or remove entries; only append.
/// Reordering changes every stage's seed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum StageSlot {
    Anomaly = 0,
    Split = 1,
    Linear = 2,
    Bagged = 3,
    Boosted = 4,
    // Add new slots here, append only.
}

impl StageSlot {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Anomaly => "anomaly",
            Self::Split => "split",
            Self::Linear => "linear",
            Self::Bagged => "bagged",
            Self::Boosted => "boosted",
        }
    }
}
