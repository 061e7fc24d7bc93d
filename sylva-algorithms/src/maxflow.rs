use std::collections::VecDeque;

/// Residual capacities at or below this value count as saturated
const SATURATED: f64 = 1e-12;

/// Flow network with real-valued capacities, solved with Dinic's algorithm. Used for the binary min-cuts of the
/// cut-pursuit solver.
///
/// Arcs are stored in pairs: arc `2i` is the forward arc of the `i`-th edge and `2i + 1` its reverse arc, so the
/// reverse of arc `a` is always `a ^ 1`.
#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    adjacency: Vec<Vec<usize>>,
    head: Vec<usize>,
    residual: Vec<f64>,
    level: Vec<usize>,
    next_arc: Vec<usize>,
}

impl FlowNetwork {
    pub fn new(node_count: usize) -> Self {
        Self {
            adjacency: vec![vec![]; node_count],
            ..Default::default()
        }
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Adds an edge `from -> to` with `capacity` and a reverse edge `to -> from` with `reverse_capacity`
    pub fn add_edge(&mut self, from: usize, to: usize, capacity: f64, reverse_capacity: f64) {
        let arc = self.head.len();
        self.adjacency[from].push(arc);
        self.head.push(to);
        self.residual.push(capacity.max(0.0));
        self.adjacency[to].push(arc + 1);
        self.head.push(from);
        self.residual.push(reverse_capacity.max(0.0));
    }

    /// Computes a maximum flow from `source` to `sink` and returns its value. The network keeps the residual
    /// capacities afterwards, see [source_side](FlowNetwork::source_side)
    pub fn max_flow(&mut self, source: usize, sink: usize) -> f64 {
        if source == sink {
            return 0.0;
        }
        let mut flow = 0.0;
        while self.build_levels(source, sink) {
            self.next_arc = vec![0; self.node_count()];
            loop {
                let pushed = self.augment(source, sink);
                if pushed <= 0.0 {
                    break;
                }
                flow += pushed;
            }
        }
        flow
    }

    /// After [max_flow](FlowNetwork::max_flow): `true` for every node that is still reachable from `source` in the
    /// residual network, i.e. the source side of a minimum cut
    pub fn source_side(&self, source: usize) -> Vec<bool> {
        let mut reachable = vec![false; self.node_count()];
        let mut queue = VecDeque::from([source]);
        reachable[source] = true;
        while let Some(node) = queue.pop_front() {
            for &arc in &self.adjacency[node] {
                let next = self.head[arc];
                if !reachable[next] && self.residual[arc] > SATURATED {
                    reachable[next] = true;
                    queue.push_back(next);
                }
            }
        }
        reachable
    }

    /// BFS levels on the residual network. Returns false if the sink is unreachable
    fn build_levels(&mut self, source: usize, sink: usize) -> bool {
        self.level = vec![usize::MAX; self.node_count()];
        self.level[source] = 0;
        let mut queue = VecDeque::from([source]);
        while let Some(node) = queue.pop_front() {
            for &arc in &self.adjacency[node] {
                let next = self.head[arc];
                if self.level[next] == usize::MAX && self.residual[arc] > SATURATED {
                    self.level[next] = self.level[node] + 1;
                    queue.push_back(next);
                }
            }
        }
        self.level[sink] != usize::MAX
    }

    /// Finds one augmenting path in the level graph with an iterative depth-first search and pushes its bottleneck
    /// capacity. Returns 0 if there is no such path left
    fn augment(&mut self, source: usize, sink: usize) -> f64 {
        let mut path: Vec<usize> = vec![];
        let mut node = source;
        loop {
            if node == sink {
                let bottleneck = path
                    .iter()
                    .map(|&arc| self.residual[arc])
                    .fold(f64::INFINITY, f64::min);
                for &arc in &path {
                    self.residual[arc] -= bottleneck;
                    self.residual[arc ^ 1] += bottleneck;
                }
                return bottleneck;
            }

            let mut advanced = false;
            while self.next_arc[node] < self.adjacency[node].len() {
                let arc = self.adjacency[node][self.next_arc[node]];
                let next = self.head[arc];
                if self.residual[arc] > SATURATED
                    && self.level[next] != usize::MAX
                    && self.level[next] == self.level[node] + 1
                {
                    path.push(arc);
                    node = next;
                    advanced = true;
                    break;
                }
                self.next_arc[node] += 1;
            }

            if !advanced {
                // dead end, never enter this node again in the current phase
                self.level[node] = usize::MAX;
                match path.pop() {
                    Some(arc) => {
                        node = self.head[arc ^ 1];
                        self.next_arc[node] += 1;
                    }
                    None => return 0.0,
                }
            }
        }
    }
}
