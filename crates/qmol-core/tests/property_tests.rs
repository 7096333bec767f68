//! Property-based tests for the structural graph invariants:
//! - Disjoint-union batching preserves node/edge counts and index ranges
//! - Node removal keeps surviving endpoints in the compacted index space

use std::collections::HashSet;

use proptest::prelude::*;

use qmol_core::{EdgeStore, MolGraph};

fn arb_graph() -> impl Strategy<Value = MolGraph> {
    (1usize..10).prop_flat_map(|n| {
        prop::collection::vec((0..n as u32, 0..n as u32), 0..20).prop_map(move |pairs| {
            let (src, dst): (Vec<u32>, Vec<u32>) = pairs.into_iter().unzip();
            MolGraph::new(n, EdgeStore::from_pairs(src, dst)).unwrap()
        })
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn batch_sums_counts_and_offsets_stay_in_range(
        graphs in prop::collection::vec(arb_graph(), 1..6),
    ) {
        let merged = MolGraph::batch(&graphs).unwrap();
        let nodes: usize = graphs.iter().map(|g| g.num_nodes()).sum();
        let edges: usize = graphs.iter().map(|g| g.num_edges()).sum();
        prop_assert_eq!(merged.num_nodes(), nodes);
        prop_assert_eq!(merged.num_edges(), edges);
        prop_assert_eq!(merged.batch_size(), graphs.len());
        for (s, d) in merged.edges().iter() {
            prop_assert!((s as usize) < nodes);
            prop_assert!((d as usize) < nodes);
        }
    }

    #[test]
    fn batch_never_crosses_source_graphs(
        a in arb_graph(),
        b in arb_graph(),
    ) {
        let n_a = a.num_nodes() as u32;
        let merged = MolGraph::batch(&[a, b]).unwrap();
        for (s, d) in merged.edges().iter() {
            prop_assert_eq!(s < n_a, d < n_a);
        }
    }

    #[test]
    fn remove_nodes_compacts_the_index_space(
        g in arb_graph(),
        drop in prop::collection::vec(0u32..10, 0..5),
    ) {
        let mut g = g;
        let n = g.num_nodes() as u32;
        let drop: Vec<u32> = drop.into_iter().filter(|&v| v < n).collect();
        let unique = drop.iter().copied().collect::<HashSet<_>>().len();
        g.remove_nodes(&drop).unwrap();
        prop_assert_eq!(g.num_nodes(), n as usize - unique);
        for (s, d) in g.edges().iter() {
            prop_assert!((s as usize) < g.num_nodes());
            prop_assert!((d as usize) < g.num_nodes());
        }
    }
}
