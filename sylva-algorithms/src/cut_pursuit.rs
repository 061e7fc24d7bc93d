//! L0 cut pursuit: piecewise constant approximation of a signal on a weighted graph.
//!
//! Minimizes `Σ_i ‖x_i − y_i‖² + λ · Σ_{(i,j) ∈ E, x_i ≠ x_j} w_ij` over signals `x` that are constant on each
//! segment. The solver alternates between splitting every segment with a binary min-cut and greedily merging
//! adjacent segments when that lowers the energy. Segments are always connected in the graph.
//!
//! See Landrieu & Obozinski, *Cut Pursuit: fast algorithms to learn piecewise constant functions on general weighted
//! graphs*, SIAM Journal on Imaging Sciences, 2017.

use std::collections::{BTreeMap, BinaryHeap};

use anyhow::{ensure, Result};
use float_ord::FloatOrd;
use sylva_core::nalgebra::SVector;

use crate::maxflow::FlowNetwork;

/// Undirected edge of a [WeightedGraph]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Edge {
    pub source: usize,
    pub target: usize,
    pub weight: f64,
}

/// Undirected graph with non-negative edge weights and no self-loops. Parallel edges are allowed, their weights add up
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightedGraph {
    node_count: usize,
    edges: Vec<Edge>,
}

impl WeightedGraph {
    pub fn new(node_count: usize) -> Self {
        Self {
            node_count,
            edges: vec![],
        }
    }

    /// Adds an edge. Fails on self-loops, unknown nodes and weights that are negative or not finite
    pub fn add_edge(&mut self, source: usize, target: usize, weight: f64) -> Result<()> {
        ensure!(
            source < self.node_count && target < self.node_count,
            "Edge ({}, {}) references a node outside of the graph with {} nodes",
            source,
            target,
            self.node_count
        );
        ensure!(source != target, "Self-loop at node {}", source);
        ensure!(
            weight.is_finite() && weight >= 0.0,
            "Edge weights must be non-negative, got {}",
            weight
        );
        self.edges.push(Edge {
            source,
            target,
            weight,
        });
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.node_count
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Neighbours of every node, with the weight of the connecting edge
    fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        let mut adjacency = vec![vec![]; self.node_count];
        for edge in &self.edges {
            adjacency[edge.source].push((edge.target, edge.weight));
            adjacency[edge.target].push((edge.source, edge.weight));
        }
        adjacency
    }
}

/// Parameters of the cut pursuit solver
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CutPursuitParams {
    /// Regularization strength λ. Larger values give fewer, larger segments
    pub lambda: f64,
    /// Maximum number of split-and-merge rounds
    pub max_iterations: usize,
    /// Number of alternations between min-cut and re-estimating the two values of a binary split
    pub split_iterations: usize,
}

impl Default for CutPursuitParams {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            max_iterations: 20,
            split_iterations: 3,
        }
    }
}

impl CutPursuitParams {
    pub fn with_lambda(lambda: f64) -> Self {
        Self {
            lambda,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.lambda.is_finite() && self.lambda >= 0.0,
            "Regularization strength must be non-negative, got {}",
            self.lambda
        );
        ensure!(
            self.split_iterations > 0,
            "Cut pursuit needs at least one split iteration"
        );
        Ok(())
    }
}

/// Piecewise constant solution of [cut_pursuit]
#[derive(Debug, Clone, PartialEq)]
pub struct CutPursuitSolution<const D: usize> {
    /// Segment of every node. Segments are numbered `0..values.len()` in order of their lowest node index
    pub segments: Vec<usize>,
    /// Value (mean observation) of every segment
    pub values: Vec<SVector<f64, D>>,
    pub energy: f64,
    /// Number of split-and-merge rounds that were run
    pub iterations: usize,
}

impl<const D: usize> CutPursuitSolution<D> {
    pub fn segment_count(&self) -> usize {
        self.values.len()
    }
}

/// Solves the L0 segmentation problem on `graph` for the given per-node `observations`.
///
/// Starts from the connected components of the graph. Each round tries to split every segment in two with a binary
/// min-cut (two candidate values, re-estimated `split_iterations` times) and keeps a split only if it lowers the
/// energy. The accepted halves are broken into their connected parts. Afterwards adjacent segments `A`, `B` are merged
/// greedily, best first, while `λ·w(A, B) > |A|·|B| / (|A| + |B|) · ‖m_A − m_B‖²`. Stops when no segment could be
/// split or after `max_iterations` rounds.
///
/// # Errors
///
/// If the number of observations does not match the number of nodes or the parameters are invalid
pub fn cut_pursuit<const D: usize>(
    graph: &WeightedGraph,
    observations: &[SVector<f64, D>],
    params: &CutPursuitParams,
) -> Result<CutPursuitSolution<D>> {
    params.validate()?;
    ensure!(
        observations.len() == graph.node_count(),
        "Got {} observations for a graph with {} nodes",
        observations.len(),
        graph.node_count()
    );

    let adjacency = graph.adjacency();
    let mut solver = Solver {
        adjacency: &adjacency,
        observations,
        lambda: params.lambda,
        local_index: vec![usize::MAX; graph.node_count()],
    };

    let all_nodes: Vec<usize> = (0..graph.node_count()).collect();
    let mut segments = solver.connected_parts(&all_nodes, |_, _| true);
    let mut iterations = 0;
    for _ in 0..params.max_iterations {
        iterations += 1;
        let mut split_any = false;
        let mut next_segments = Vec::with_capacity(segments.len());
        for segment in segments {
            match solver.split(&segment, params.split_iterations) {
                Some(parts) => {
                    split_any = true;
                    next_segments.extend(parts);
                }
                None => next_segments.push(segment),
            }
        }
        segments = solver.merge(next_segments);
        log::debug!(
            "Cut pursuit round {}: {} segments",
            iterations,
            segments.len()
        );
        if !split_any {
            break;
        }
    }

    Ok(solver.solution(segments, iterations))
}

struct Solver<'a, const D: usize> {
    adjacency: &'a [Vec<(usize, f64)>],
    observations: &'a [SVector<f64, D>],
    lambda: f64,
    /// Scratch mapping from node to position within the segment that is currently processed
    local_index: Vec<usize>,
}

impl<'a, const D: usize> Solver<'a, D> {
    fn mean(&self, nodes: &[usize]) -> SVector<f64, D> {
        let sum: SVector<f64, D> = nodes.iter().map(|&n| self.observations[n]).sum();
        sum / nodes.len().max(1) as f64
    }

    fn fidelity(&self, nodes: &[usize], value: &SVector<f64, D>) -> f64 {
        nodes
            .iter()
            .map(|&n| (self.observations[n] - value).norm_squared())
            .sum()
    }

    /// Connected parts of `nodes`, following only edges between two nodes of `nodes` for which `connects` holds.
    /// Arguments of `connects` are local positions within `nodes`
    fn connected_parts<F: Fn(usize, usize) -> bool>(
        &mut self,
        nodes: &[usize],
        connects: F,
    ) -> Vec<Vec<usize>> {
        for (local, &node) in nodes.iter().enumerate() {
            self.local_index[node] = local;
        }
        let mut part_of = vec![usize::MAX; nodes.len()];
        let mut parts = vec![];
        let mut stack = vec![];
        for start in 0..nodes.len() {
            if part_of[start] != usize::MAX {
                continue;
            }
            let part_id = parts.len();
            let mut part = vec![];
            part_of[start] = part_id;
            stack.push(start);
            while let Some(local) = stack.pop() {
                part.push(nodes[local]);
                for &(neighbour, _) in &self.adjacency[nodes[local]] {
                    let other = self.local_index[neighbour];
                    if other == usize::MAX || part_of[other] != usize::MAX || !connects(local, other)
                    {
                        continue;
                    }
                    part_of[other] = part_id;
                    stack.push(other);
                }
            }
            part.sort_unstable();
            parts.push(part);
        }
        for &node in nodes {
            self.local_index[node] = usize::MAX;
        }
        parts
    }

    /// Tries to split `nodes` in two with a binary min-cut. Returns the connected parts of the split if it lowers
    /// the energy
    fn split(&mut self, nodes: &[usize], split_iterations: usize) -> Option<Vec<Vec<usize>>> {
        if nodes.len() < 2 {
            return None;
        }
        let mean = self.mean(nodes);
        let current_energy = self.fidelity(nodes, &mean);
        if current_energy <= f64::EPSILON {
            return None;
        }

        // two far apart observations as initial values
        let far = |from: &SVector<f64, D>| {
            nodes
                .iter()
                .copied()
                .max_by_key(|&n| FloatOrd((self.observations[n] - from).norm_squared()))
        };
        let first = far(&mean)?;
        let second = far(&self.observations[first])?;
        let mut values = [self.observations[first], self.observations[second]];

        for (local, &node) in nodes.iter().enumerate() {
            self.local_index[node] = local;
        }
        let mut labels = vec![false; nodes.len()];
        for _ in 0..split_iterations {
            labels = self.binary_cut(nodes, &values);
            let side = |wanted: bool| -> Vec<usize> {
                nodes
                    .iter()
                    .zip(&labels)
                    .filter(|(_, &one)| one == wanted)
                    .map(|(&n, _)| n)
                    .collect()
            };
            let (zeros, ones) = (side(false), side(true));
            if ones.is_empty() || zeros.is_empty() {
                break;
            }
            values = [self.mean(&zeros), self.mean(&ones)];
        }

        let mut split_energy = 0.0;
        let mut count = [0usize; 2];
        for (local, &node) in nodes.iter().enumerate() {
            let side = labels[local] as usize;
            count[side] += 1;
            split_energy += (self.observations[node] - values[side]).norm_squared();
            for &(neighbour, weight) in &self.adjacency[node] {
                let other = self.local_index[neighbour];
                // every cut edge is seen from both ends
                if other != usize::MAX && labels[other] != labels[local] {
                    split_energy += 0.5 * self.lambda * weight;
                }
            }
        }
        for &node in nodes {
            self.local_index[node] = usize::MAX;
        }

        if count[0] == 0 || count[1] == 0 || split_energy >= current_energy * (1.0 - 1e-9) {
            return None;
        }
        Some(self.connected_parts(nodes, |a, b| labels[a] == labels[b]))
    }

    /// Binary labeling of `nodes` (true = closer to `values[1]`) that minimizes fidelity plus the boundary penalty of
    /// edges inside the segment. Expects `local_index` to be set up for `nodes`
    fn binary_cut(&self, nodes: &[usize], values: &[SVector<f64, D>; 2]) -> Vec<bool> {
        let source = nodes.len();
        let sink = nodes.len() + 1;
        let mut network = FlowNetwork::new(nodes.len() + 2);
        for (local, &node) in nodes.iter().enumerate() {
            let cost_zero = (self.observations[node] - values[0]).norm_squared();
            let cost_one = (self.observations[node] - values[1]).norm_squared();
            // source side means label zero: cutting source->node pays for label one, node->sink for label zero
            if cost_one > cost_zero {
                network.add_edge(source, local, cost_one - cost_zero, 0.0);
            } else if cost_zero > cost_one {
                network.add_edge(local, sink, cost_zero - cost_one, 0.0);
            }
            for &(neighbour, weight) in &self.adjacency[node] {
                let other = self.local_index[neighbour];
                if other != usize::MAX && local < other && weight > 0.0 {
                    let capacity = self.lambda * weight;
                    network.add_edge(local, other, capacity, capacity);
                }
            }
        }
        network.max_flow(source, sink);
        let source_side = network.source_side(source);
        (0..nodes.len()).map(|local| !source_side[local]).collect()
    }

    /// Greedily merges adjacent segments while that lowers the energy, best merge first
    fn merge(&mut self, segments: Vec<Vec<usize>>) -> Vec<Vec<usize>> {
        let mut segment_of = vec![usize::MAX; self.observations.len()];
        for (id, segment) in segments.iter().enumerate() {
            for &node in segment {
                segment_of[node] = id;
            }
        }

        let mut sizes: Vec<f64> = segments.iter().map(|s| s.len() as f64).collect();
        let mut sums: Vec<SVector<f64, D>> = segments
            .iter()
            .map(|s| s.iter().map(|&n| self.observations[n]).sum())
            .collect();
        let mut boundaries: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); segments.len()];
        for (node, neighbours) in self.adjacency.iter().enumerate() {
            for &(neighbour, weight) in neighbours {
                let (a, b) = (segment_of[node], segment_of[neighbour]);
                if a != b {
                    // every edge is seen from both ends
                    *boundaries[a].entry(b).or_insert(0.0) += 0.5 * weight;
                }
            }
        }

        let gain = |sizes: &[f64], sums: &[SVector<f64, D>], a: usize, b: usize, weight: f64| {
            let difference = sums[a] / sizes[a] - sums[b] / sizes[b];
            self.lambda * weight
                - sizes[a] * sizes[b] / (sizes[a] + sizes[b]) * difference.norm_squared()
        };

        let mut version = vec![0usize; segments.len()];
        let mut alive = vec![true; segments.len()];
        let mut heap = BinaryHeap::new();
        for a in 0..segments.len() {
            for (&b, &weight) in &boundaries[a] {
                if a < b {
                    let g = gain(&sizes, &sums, a, b, weight);
                    if g > 0.0 {
                        heap.push((FloatOrd(g), a, b, 0usize, 0usize));
                    }
                }
            }
        }

        let mut merged_into: Vec<usize> = (0..segments.len()).collect();
        let mut merges = 0;
        while let Some((_, a, b, version_a, version_b)) = heap.pop() {
            if !alive[a] || !alive[b] || version[a] != version_a || version[b] != version_b {
                continue;
            }
            // merge b into a
            alive[b] = false;
            merged_into[b] = a;
            sizes[a] += sizes[b];
            let sum_b = sums[b];
            sums[a] += sum_b;
            let boundary_b = std::mem::take(&mut boundaries[b]);
            for (other, weight) in boundary_b {
                boundaries[other].remove(&b);
                if other == a {
                    continue;
                }
                *boundaries[a].entry(other).or_insert(0.0) += weight;
                *boundaries[other].entry(a).or_insert(0.0) += weight;
            }
            boundaries[a].remove(&b);
            version[a] += 1;
            version[b] += 1;
            merges += 1;
            for (&other, &weight) in &boundaries[a] {
                let g = gain(&sizes, &sums, a, other, weight);
                if g > 0.0 {
                    let (first, second) = if a < other { (a, other) } else { (other, a) };
                    heap.push((FloatOrd(g), first, second, version[first], version[second]));
                }
            }
        }

        if merges == 0 {
            return segments;
        }
        let root = |mut id: usize| {
            while merged_into[id] != id {
                id = merged_into[id];
            }
            id
        };
        let mut merged: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (id, segment) in segments.into_iter().enumerate() {
            merged.entry(root(id)).or_default().extend(segment);
        }
        merged
            .into_values()
            .map(|mut segment| {
                segment.sort_unstable();
                segment
            })
            .collect()
    }

    fn solution(&self, mut segments: Vec<Vec<usize>>, iterations: usize) -> CutPursuitSolution<D> {
        segments.sort_by_key(|segment| segment.first().copied().unwrap_or(usize::MAX));
        let mut assignment = vec![0; self.observations.len()];
        let mut values = Vec::with_capacity(segments.len());
        let mut energy = 0.0;
        for (id, segment) in segments.iter().enumerate() {
            let value = self.mean(segment);
            energy += self.fidelity(segment, &value);
            for &node in segment {
                assignment[node] = id;
            }
            values.push(value);
        }
        for (node, neighbours) in self.adjacency.iter().enumerate() {
            for &(neighbour, weight) in neighbours {
                if assignment[node] != assignment[neighbour] {
                    energy += 0.5 * self.lambda * weight;
                }
            }
        }
        CutPursuitSolution {
            segments: assignment,
            values,
            energy,
            iterations,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use sylva_core::nalgebra::{Vector1, Vector2};

    use super::*;

    /// Path graph 0 - 1 - ... - (n-1) with unit weights
    fn path_graph(n: usize) -> WeightedGraph {
        let mut graph = WeightedGraph::new(n);
        for i in 1..n {
            graph.add_edge(i - 1, i, 1.0).unwrap();
        }
        graph
    }

    fn step_signal() -> Vec<Vector1<f64>> {
        (0..20)
            .map(|i| Vector1::new(if i < 10 { 0.0 } else { 5.0 }))
            .collect()
    }

    #[test]
    fn test_step_signal_is_split_once() {
        let solution = cut_pursuit(
            &path_graph(20),
            &step_signal(),
            &CutPursuitParams::with_lambda(1.0),
        )
        .unwrap();
        assert_eq!(solution.segment_count(), 2);
        assert!(solution.segments[..10].iter().all(|&s| s == 0));
        assert!(solution.segments[10..].iter().all(|&s| s == 1));
        assert_approx_eq!(solution.values[1].x, 5.0);
        assert_approx_eq!(solution.energy, 1.0);
    }

    #[test]
    fn test_strong_regularization_keeps_one_segment() {
        // a split would save 125 in fidelity but cost 200
        let solution = cut_pursuit(
            &path_graph(20),
            &step_signal(),
            &CutPursuitParams::with_lambda(200.0),
        )
        .unwrap();
        assert_eq!(solution.segment_count(), 1);
        assert_approx_eq!(solution.values[0].x, 2.5);
    }

    #[test]
    fn test_disconnected_nodes_are_separate_segments() {
        let mut graph = WeightedGraph::new(4);
        graph.add_edge(0, 1, 1.0).unwrap();
        graph.add_edge(2, 3, 1.0).unwrap();
        let observations = vec![Vector2::new(0.0, 0.0); 4];
        let solution =
            cut_pursuit(&graph, &observations, &CutPursuitParams::with_lambda(10.0)).unwrap();
        assert_eq!(solution.segments, vec![0, 0, 1, 1]);
    }

    #[test]
    fn test_small_variation_is_not_split() {
        // cutting the ring costs at least two edges, far more than the fidelity it saves
        let mut graph = path_graph(6);
        graph.add_edge(0, 5, 1.0).unwrap();
        let observations: Vec<_> = [0.0, 0.1, 0.0, 0.1, 0.0, 0.1]
            .iter()
            .map(|&v| Vector1::new(v))
            .collect();
        let solution =
            cut_pursuit(&graph, &observations, &CutPursuitParams::with_lambda(1.0)).unwrap();
        assert_eq!(solution.segment_count(), 1);
    }

    #[test]
    fn test_rejects_invalid_graphs() {
        let mut graph = WeightedGraph::new(2);
        assert!(graph.add_edge(0, 0, 1.0).is_err());
        assert!(graph.add_edge(0, 2, 1.0).is_err());
        assert!(graph.add_edge(0, 1, -1.0).is_err());
        let result = cut_pursuit(
            &graph,
            &[Vector1::new(0.0)],
            &CutPursuitParams::default(),
        );
        assert!(result.is_err());
    }
}
