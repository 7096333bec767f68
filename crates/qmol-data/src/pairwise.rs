//! Memoized all-pairs edge indices for complete graphs.
//!
//! Complete-graph topologies regenerate the same `(src, dst)` index pair
//! for every molecule of a given size, so the cache keys on atom count and
//! hands out shared buffers. Interior mutability via `RefCell` keeps the
//! lookup ergonomic behind `&self`; the cache (and any dataset holding it)
//! is deliberately not `Sync` — each loader worker owns its own dataset.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Directed all-pairs indices for an `n`-atom molecule, self-loops
/// excluded. `src[k]` pairs with `dst[k]`; both have length `n * (n - 1)`.
#[derive(Debug, PartialEq, Eq)]
pub struct PairIndices {
    pub src: Vec<u32>,
    pub dst: Vec<u32>,
}

impl PairIndices {
    fn build(n: usize) -> PairIndices {
        let len = n.saturating_sub(1) * n;
        let mut src = Vec::with_capacity(len);
        let mut dst = Vec::with_capacity(len);
        for s in 0..n as u32 {
            for d in 0..n as u32 {
                if s != d {
                    src.push(s);
                    dst.push(d);
                }
            }
        }
        PairIndices { src, dst }
    }

    pub fn num_edges(&self) -> usize {
        self.src.len()
    }

    /// Position of directed pair `(s, d)` within the index, `s != d`.
    pub fn position(n: usize, s: usize, d: usize) -> usize {
        s * (n - 1) + if d < s { d } else { d - 1 }
    }
}

/// Cache of [`PairIndices`] keyed on atom count.
#[derive(Debug, Default)]
pub struct PairwiseIndexCache {
    entries: RefCell<HashMap<usize, Rc<PairIndices>>>,
}

impl PairwiseIndexCache {
    pub fn new() -> PairwiseIndexCache {
        PairwiseIndexCache::default()
    }

    /// Indices for an `n`-atom complete graph, built on first use.
    pub fn pairs(&self, n: usize) -> Rc<PairIndices> {
        Rc::clone(
            self.entries
                .borrow_mut()
                .entry(n)
                .or_insert_with(|| Rc::new(PairIndices::build(n))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_atoms() {
        let cache = PairwiseIndexCache::new();
        let p = cache.pairs(3);
        assert_eq!(p.src, vec![0, 0, 1, 1, 2, 2]);
        assert_eq!(p.dst, vec![1, 2, 0, 2, 0, 1]);
        assert_eq!(p.num_edges(), 6);
    }

    #[test]
    fn test_memoized() {
        let cache = PairwiseIndexCache::new();
        let a = cache.pairs(5);
        let b = cache.pairs(5);
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_position_matches_layout() {
        let cache = PairwiseIndexCache::new();
        let n = 4;
        let p = cache.pairs(n);
        for s in 0..n {
            for d in 0..n {
                if s == d {
                    continue;
                }
                let k = PairIndices::position(n, s, d);
                assert_eq!(p.src[k] as usize, s);
                assert_eq!(p.dst[k] as usize, d);
            }
        }
    }

    #[test]
    fn test_degenerate_sizes() {
        let cache = PairwiseIndexCache::new();
        assert_eq!(cache.pairs(0).num_edges(), 0);
        assert_eq!(cache.pairs(1).num_edges(), 0);
    }
}
