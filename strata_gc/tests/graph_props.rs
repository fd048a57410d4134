//! Property tests over random object graphs.

use proptest::prelude::*;
use std::collections::{BTreeSet, VecDeque};
use strata_gc::{GcConfig, Heap, SeriesId, Value};

/// A random graph: `nodes` arrays, directed edges between them and a set
/// of root indices.
#[derive(Debug, Clone)]
struct Graph {
    nodes: usize,
    edges: Vec<(usize, usize)>,
    roots: Vec<usize>,
}

fn graph() -> impl Strategy<Value = Graph> {
    (1usize..48).prop_flat_map(|nodes| {
        (
            Just(nodes),
            prop::collection::vec((0..nodes, 0..nodes), 0..nodes * 3),
            prop::collection::vec(0..nodes, 0..4),
        )
            .prop_map(|(nodes, edges, roots)| Graph {
                nodes,
                edges,
                roots,
            })
    })
}

impl Graph {
    fn reachable(&self) -> BTreeSet<usize> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<usize> = self.roots.iter().copied().collect();
        while let Some(node) = queue.pop_front() {
            if !seen.insert(node) {
                continue;
            }
            queue.extend(
                self.edges
                    .iter()
                    .filter(|(from, _)| *from == node)
                    .map(|(_, to)| *to),
            );
        }
        seen
    }

    /// Build every node as a managed array; roots become globals.
    fn build(&self, heap: &mut Heap) -> Vec<SeriesId> {
        let ids: Vec<SeriesId> = (0..self.nodes).map(|_| heap.make_array(2)).collect();
        for &(from, to) in &self.edges {
            heap.append_value(ids[from], Value::block(ids[to]));
        }
        for &id in &ids {
            heap.manage(id);
        }
        for &root in &self.roots {
            heap.add_global(Value::block(ids[root]));
        }
        ids
    }
}

fn checked_heap() -> Heap {
    Heap::new(GcConfig {
        verify_heap: true,
        ..GcConfig::default()
    })
    .unwrap()
}

proptest! {
    #[test]
    fn reachable_nodes_survive_and_the_rest_are_freed(graph in graph()) {
        let mut heap = checked_heap();
        let ids = graph.build(&mut heap);
        let before: Vec<Vec<Value>> = ids.iter().map(|&id| heap.array_values(id)).collect();
        let reachable = graph.reachable();

        let freed = heap.recycle(false);
        prop_assert_eq!(freed, graph.nodes - reachable.len());

        for (n, &id) in ids.iter().enumerate() {
            if reachable.contains(&n) {
                prop_assert!(heap.is_series_live(id));
                prop_assert!(!heap.is_marked(id));
                prop_assert_eq!(&heap.array_values(id), &before[n]);
            } else {
                prop_assert!(!heap.is_series_live(id));
            }
        }
    }

    #[test]
    fn collection_reaches_a_fixed_point(graph in graph()) {
        let mut heap = checked_heap();
        graph.build(&mut heap);

        heap.recycle(false);
        let live = heap.live_series();
        prop_assert_eq!(heap.recycle(false), 0);
        prop_assert_eq!(heap.live_series(), live);
    }

    #[test]
    fn guarded_nodes_survive_like_roots(graph in graph(), guard in 0usize..48) {
        let mut heap = checked_heap();
        let ids = graph.build(&mut heap);
        let guard = guard % graph.nodes;

        let mut rooted = graph.clone();
        rooted.roots.push(guard);
        let reachable = rooted.reachable();

        heap.guard_series(ids[guard]);
        let freed = heap.recycle(false);
        heap.unguard_series(ids[guard]);

        prop_assert_eq!(freed, graph.nodes - reachable.len());
        prop_assert!(heap.is_series_live(ids[guard]));
        prop_assert_eq!(heap.guards().outstanding(), 0);
    }

    #[test]
    fn shutdown_frees_every_managed_node(graph in graph()) {
        let mut heap = checked_heap();
        graph.build(&mut heap);

        prop_assert_eq!(heap.shutdown(), graph.nodes);
        prop_assert_eq!(heap.live_series(), 0);
    }
}
