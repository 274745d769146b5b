//! In-memory adjacency index over knowledge nodes, used by the graph
//! constructor (§4.7) to find neighbors of a touched-node set and by
//! cluster reassignment (§4.11) to expand a node's edges.

use std::collections::{HashMap, HashSet, VecDeque};
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct AdjacencyGraph {
    adjacency: HashMap<Uuid, Vec<Uuid>>,
}

impl AdjacencyGraph {
    pub fn new() -> Self {
        Self {
            adjacency: HashMap::new(),
        }
    }

    /// Undirected: records both directions so neighbor lookups work from
    /// either endpoint of a co-mention/co-location edge.
    pub fn add_edge(&mut self, a: Uuid, b: Uuid) {
        self.adjacency.entry(a).or_default().push(b);
        self.adjacency.entry(b).or_default().push(a);
    }

    pub fn remove_node(&mut self, id: Uuid) {
        self.adjacency.remove(&id);
        for neighbors in self.adjacency.values_mut() {
            neighbors.retain(|n| *n != id);
        }
    }

    /// Drops a single undirected edge, leaving both endpoints' other edges
    /// intact.
    pub fn remove_edge(&mut self, a: Uuid, b: Uuid) {
        if let Some(neighbors) = self.adjacency.get_mut(&a) {
            neighbors.retain(|n| *n != b);
        }
        if let Some(neighbors) = self.adjacency.get_mut(&b) {
            neighbors.retain(|n| *n != a);
        }
    }

    pub fn neighbors(&self, id: Uuid) -> Vec<Uuid> {
        self.adjacency.get(&id).cloned().unwrap_or_default()
    }

    /// BFS expansion up to `max_hops`, excluding the start node.
    pub fn expand(&self, start: Uuid, max_hops: u8) -> Vec<(Uuid, u8)> {
        if max_hops == 0 {
            return vec![];
        }
        let mut visited: HashSet<Uuid> = HashSet::from([start]);
        let mut queue = VecDeque::from([(start, 0u8)]);
        let mut result = Vec::new();

        while let Some((current, dist)) = queue.pop_front() {
            if dist >= max_hops {
                continue;
            }
            for neighbor in self.adjacency.get(&current).into_iter().flatten() {
                if visited.insert(*neighbor) {
                    result.push((*neighbor, dist + 1));
                    queue.push_back((*neighbor, dist + 1));
                }
            }
        }
        result
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }
}

impl Default for AdjacencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u8) -> Uuid {
        Uuid::from_bytes([n; 16])
    }

    #[test]
    fn expand_finds_multi_hop_neighbors() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(id(1), id(2));
        graph.add_edge(id(2), id(3));

        let result = graph.expand(id(1), 2);
        let ids: HashSet<_> = result.iter().map(|(n, _)| *n).collect();
        assert_eq!(ids, HashSet::from([id(2), id(3)]));
    }

    #[test]
    fn remove_node_clears_both_directions() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(id(1), id(2));
        graph.remove_node(id(2));
        assert!(graph.neighbors(id(1)).is_empty());
    }

    #[test]
    fn remove_edge_preserves_other_edges_of_both_endpoints() {
        let mut graph = AdjacencyGraph::new();
        graph.add_edge(id(1), id(2));
        graph.add_edge(id(1), id(3));
        graph.remove_edge(id(1), id(2));
        assert_eq!(graph.neighbors(id(1)), vec![id(3)]);
        assert!(graph.neighbors(id(2)).is_empty());
    }
}
