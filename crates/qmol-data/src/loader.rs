//! Synchronous mini-batch index driver.
//!
//! Training loops pull one epoch of index batches, feed each through
//! [`Qm9Dataset::get`](crate::dataset::Qm9Dataset::get), and hand the
//! samples to a collate function. Shuffling is seeded so epochs are
//! reproducible; workers wanting distinct streams pick distinct seeds.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

/// Yields `Vec<usize>` index batches over `0..len`.
#[derive(Debug)]
pub struct BatchLoader {
    len: usize,
    batch_size: usize,
    shuffle: bool,
    drop_last: bool,
    rng: XorShiftRng,
}

impl BatchLoader {
    /// Sequential batches of `batch_size`, last batch possibly short.
    pub fn new(len: usize, batch_size: usize) -> BatchLoader {
        BatchLoader {
            len,
            batch_size: batch_size.max(1),
            shuffle: false,
            drop_last: false,
            rng: XorShiftRng::seed_from_u64(0),
        }
    }

    /// Shuffle each epoch, seeded.
    pub fn with_shuffle(mut self, seed: u64) -> BatchLoader {
        self.shuffle = true;
        self.rng = XorShiftRng::seed_from_u64(seed);
        self
    }

    /// Discard a trailing batch smaller than `batch_size`.
    pub fn with_drop_last(mut self) -> BatchLoader {
        self.drop_last = true;
        self
    }

    /// One epoch of index batches. Successive calls advance the RNG, so
    /// shuffled epochs differ while the whole run stays reproducible.
    pub fn epoch(&mut self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.len).collect();
        if self.shuffle {
            order.shuffle(&mut self.rng);
        }
        let mut batches: Vec<Vec<usize>> = order
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
        if self.drop_last {
            if let Some(last) = batches.last() {
                if last.len() < self.batch_size {
                    batches.pop();
                }
            }
        }
        batches
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_batches() {
        let mut loader = BatchLoader::new(7, 3);
        let batches = loader.epoch();
        assert_eq!(batches, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6]]);
    }

    #[test]
    fn test_drop_last() {
        let mut loader = BatchLoader::new(7, 3).with_drop_last();
        let batches = loader.epoch();
        assert_eq!(batches.len(), 2);
        assert!(batches.iter().all(|b| b.len() == 3));
    }

    #[test]
    fn test_shuffle_covers_everything() {
        let mut loader = BatchLoader::new(100, 16).with_shuffle(42);
        let mut seen: Vec<usize> = loader.epoch().into_iter().flatten().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let a: Vec<_> = BatchLoader::new(50, 8).with_shuffle(7).epoch();
        let b: Vec<_> = BatchLoader::new(50, 8).with_shuffle(7).epoch();
        assert_eq!(a, b);
        let c: Vec<_> = BatchLoader::new(50, 8).with_shuffle(8).epoch();
        assert_ne!(a, c);
    }

    #[test]
    fn test_epochs_differ_under_one_seed() {
        let mut loader = BatchLoader::new(64, 64).with_shuffle(3);
        let first = loader.epoch();
        let second = loader.epoch();
        assert_ne!(first, second);
    }
}
