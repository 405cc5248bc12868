use rand::{rngs::SmallRng, Rng, SeedableRng};
use std::sync::atomic::{AtomicU32, Ordering};

///////////////////////////
// Pseudo-random source //
///////////////////////////

/// Three-word Tausworthe generator used for negative-sample selection
///
/// The state is owned by the caller for the duration of a run and advanced in
/// place by [`TauRng::next_u32`]. The words are relaxed atomics so the
/// parallel kernel can advance the state from any worker thread without a
/// lock: interleaved updates may skip or repeat draws, which is accepted
/// non-determinism in parallel mode. Sequential mode sees a fully
/// deterministic stream.
#[derive(Debug)]
pub struct TauRng {
    state: [AtomicU32; 3],
}

impl TauRng {
    /// Build from three raw state words
    ///
    /// Each word is forced out of the degenerate region of the generator
    /// (the low bits masked off by the update would otherwise allow an
    /// all-zero word that never recovers).
    pub fn new(s0: u32, s1: u32, s2: u32) -> Self {
        Self {
            state: [
                AtomicU32::new(s0 | 0x80),
                AtomicU32::new(s1 | 0x80),
                AtomicU32::new(s2 | 0x80),
            ],
        }
    }

    /// Seed the three state words from a single integer seed
    pub fn from_seed(seed: u64) -> Self {
        let mut rng = SmallRng::seed_from_u64(seed);
        Self::new(rng.random::<u32>(), rng.random::<u32>(), rng.random::<u32>())
    }

    /// Advance the state and return the next unsigned 32-bit integer
    #[inline]
    pub fn next_u32(&self) -> u32 {
        let s0 = self.state[0].load(Ordering::Relaxed);
        let s0 = ((s0 & 0xFFFF_FFFE) << 12) ^ (((s0 << 13) ^ s0) >> 19);
        self.state[0].store(s0, Ordering::Relaxed);

        let s1 = self.state[1].load(Ordering::Relaxed);
        let s1 = ((s1 & 0xFFFF_FFF8) << 4) ^ (((s1 << 2) ^ s1) >> 25);
        self.state[1].store(s1, Ordering::Relaxed);

        let s2 = self.state[2].load(Ordering::Relaxed);
        let s2 = ((s2 & 0xFFFF_FFF0) << 17) ^ (((s2 << 3) ^ s2) >> 11);
        self.state[2].store(s2, Ordering::Relaxed);

        s0 ^ s1 ^ s2
    }

    /// Uniform draw in `0..n` via modulo reduction
    #[inline]
    pub fn next_below(&self, n: usize) -> usize {
        self.next_u32() as usize % n
    }
}

///////////
// Tests //
///////////
