//! Seeded random stream with snapshot/restore
//!
//! Each sampler owns its stream explicitly; nothing here touches process-wide
//! random state.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use train_core::RandomState;

/// Deterministic random stream whose position can be saved and restored
#[derive(Debug, Clone)]
pub struct RandomStream {
    rng: ChaCha8Rng,
}

impl RandomStream {
    /// Create a stream from a seed
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Recreate a stream from a snapshot
    pub fn from_state(state: &RandomState) -> Self {
        let mut stream = Self {
            rng: ChaCha8Rng::from_seed(state.seed),
        };
        stream.restore(state);
        stream
    }

    /// Capture the current position of the stream
    pub fn snapshot(&self) -> RandomState {
        let word_pos = self.rng.get_word_pos();
        RandomState {
            seed: self.rng.get_seed(),
            stream: self.rng.get_stream(),
            word_pos_hi: (word_pos >> 64) as u64,
            word_pos_lo: word_pos as u64,
        }
    }

    /// Move the stream to a previously captured position
    pub fn restore(&mut self, state: &RandomState) {
        let mut rng = ChaCha8Rng::from_seed(state.seed);
        rng.set_stream(state.stream);
        rng.set_word_pos(state.word_pos());
        self.rng = rng;
    }

    /// Uniform draw in `[0, 1)`
    pub fn next_f64(&mut self) -> f64 {
        self.rng.gen::<f64>()
    }

    /// Uniform index in `0..n`; `n` must be positive
    pub fn below(&mut self, n: usize) -> usize {
        self.rng.gen_range(0..n)
    }

    /// Derive an independent child stream, advancing this one
    pub fn fork(&mut self) -> RandomStream {
        RandomStream::from_seed(self.rng.gen::<u64>())
    }

    /// Pick `count` distinct indices out of `0..len`, in draw order
    pub fn sample_indices(&mut self, len: usize, count: usize) -> Vec<usize> {
        let count = count.min(len);
        let mut indices: Vec<usize> = (0..len).collect();
        for i in 0..count {
            let j = i + self.below(len - i);
            indices.swap(i, j);
        }
        indices.truncate(count);
        indices
    }
}
