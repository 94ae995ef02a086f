//! Execution graphs.
//!
//! Vertices are concrete-feature occurrences, identified by label; edges are
//! ordered vertex pairs, identified by the pair of vertex ids. Both are kept
//! in arenas and addressed by index, with adjacency lists on the side.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use log::warn;

/// Index of a vertex in its graph's arena.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct VertexId(usize);

impl VertexId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Soft cost of choosing the owning vertex together with `target`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ConditionalWeight {
    pub target: VertexId,
    pub cost: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vertex {
    /// SAT variable index of the feature.
    pub id: u32,
    pub label: String,
    /// Label of the abstract parent.
    pub service: String,
    /// Longest distance from the start vertex.
    pub stage: usize,
    pub application_index: usize,
    pub approximation_index: usize,
    /// Incoming edges come from more than one service.
    pub decision_making: bool,
    pub conditional_weights: Vec<ConditionalWeight>,
    pub weights: BTreeMap<String, i64>,
}

impl Vertex {
    pub fn new(id: u32, label: impl Into<String>, service: impl Into<String>) -> Self {
        Vertex {
            id,
            label: label.into(),
            service: service.into(),
            stage: 0,
            application_index: 0,
            approximation_index: 0,
            decision_making: false,
            conditional_weights: Vec::new(),
            weights: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge {
    pub id: u64,
    pub source: VertexId,
    pub destination: VertexId,
    pub weights: BTreeMap<String, i64>,
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    vertices: Vec<Vertex>,
    edges: Vec<Edge>,
    by_label: HashMap<String, VertexId>,
    edge_keys: HashSet<(u32, u32)>,
    outgoing: Vec<Vec<usize>>,
    incoming: Vec<Vec<usize>>,
    start: Option<VertexId>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.is_empty()
    }

    /// Adds `vertex` unless a vertex with the same label exists; returns the vertex's id either way.
    pub fn add_vertex(&mut self, vertex: Vertex) -> VertexId {
        if let Some(&existing) = self.by_label.get(&vertex.label) {
            return existing;
        }
        let id = VertexId(self.vertices.len());
        self.by_label.insert(vertex.label.clone(), id);
        self.vertices.push(vertex);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    pub fn vertex(&self, id: VertexId) -> &Vertex {
        &self.vertices[id.0]
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        &mut self.vertices[id.0]
    }

    pub fn vertex_by_label(&self, label: &str) -> Option<VertexId> {
        self.by_label.get(label).copied()
    }

    pub fn vertices(&self) -> impl Iterator<Item = (VertexId, &Vertex)> + '_ {
        self.vertices.iter().enumerate().map(|(i, v)| (VertexId(i), v))
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn edge_mut(&mut self, index: usize) -> &mut Edge {
        &mut self.edges[index]
    }

    /// Adds an edge unless one already connects the same vertex ids. Returns true if added.
    pub fn add_edge(&mut self, source: VertexId, destination: VertexId, id: u64) -> bool {
        let key = (self.vertices[source.0].id, self.vertices[destination.0].id);
        if !self.edge_keys.insert(key) {
            return false;
        }
        let index = self.edges.len();
        self.edges.push(Edge {
            id,
            source,
            destination,
            weights: BTreeMap::new(),
        });
        self.outgoing[source.0].push(index);
        self.incoming[destination.0].push(index);
        true
    }

    pub fn has_edge(&self, source: VertexId, destination: VertexId) -> bool {
        self.edge_keys
            .contains(&(self.vertices[source.0].id, self.vertices[destination.0].id))
    }

    pub fn successors(&self, vertex: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.outgoing[vertex.0].iter().map(|&e| self.edges[e].destination)
    }

    pub fn predecessors(&self, vertex: VertexId) -> impl Iterator<Item = VertexId> + '_ {
        self.incoming[vertex.0].iter().map(|&e| self.edges[e].source)
    }

    pub fn start(&self) -> Option<VertexId> {
        self.start
    }

    pub fn set_start(&mut self, vertex: VertexId) {
        self.start = Some(vertex);
    }

    /// First vertex without outgoing edges.
    pub fn end(&self) -> Option<VertexId> {
        (0..self.vertices.len()).find(|&i| self.outgoing[i].is_empty()).map(VertexId)
    }

    /// Records a conditional weight from `from` to `to`; repeated pairs are ignored.
    pub fn add_conditional_weight(&mut self, from: VertexId, to: VertexId, cost: i64) {
        let weights = &mut self.vertices[from.0].conditional_weights;
        if !weights.iter().any(|w| w.target == to) {
            weights.push(ConditionalWeight { target: to, cost });
        }
    }

    /// Merges `other` into this graph, de-duplicating vertices by label and edges by vertex ids.
    pub fn unite(&mut self, other: &Graph) {
        // Conditional weights are re-added below with remapped targets.
        let mapping: Vec<VertexId> = other
            .vertices
            .iter()
            .map(|v| {
                self.add_vertex(Vertex {
                    conditional_weights: Vec::new(),
                    ..v.clone()
                })
            })
            .collect();
        for edge in &other.edges {
            let (source, destination) = (mapping[edge.source.0], mapping[edge.destination.0]);
            if self.add_edge(source, destination, edge.id) {
                let index = self.edges.len() - 1;
                self.edges[index].weights = edge.weights.clone();
            }
        }
        for (i, vertex) in other.vertices.iter().enumerate() {
            for weight in &vertex.conditional_weights {
                self.add_conditional_weight(mapping[i], mapping[weight.target.0], weight.cost);
            }
        }
        if self.start.is_none() {
            self.start = other.start.map(|s| mapping[s.0]);
        }
    }

    /// Assigns stages as longest distances from the start vertex and flags decision-making vertices.
    ///
    /// Without a designated start, the first vertex with no incoming edge is used.
    /// Vertices unreachable from the start keep stage 0. Cycles are reported
    /// and their vertices are left partially staged.
    pub fn recalculate_graph_stages(&mut self) {
        for vertex in &mut self.vertices {
            vertex.stage = 0;
            vertex.decision_making = false;
        }
        let start = self
            .start
            .or_else(|| (0..self.vertices.len()).find(|&i| self.incoming[i].is_empty()).map(VertexId));
        let Some(start) = start else {
            return;
        };

        let mut reachable = vec![false; self.vertices.len()];
        let mut stack = vec![start];
        while let Some(v) = stack.pop() {
            if std::mem::replace(&mut reachable[v.0], true) {
                continue;
            }
            stack.extend(self.successors(v).filter(|s| !reachable[s.0]));
        }

        let mut pending: Vec<usize> = (0..self.vertices.len())
            .map(|i| self.predecessors(VertexId(i)).filter(|p| reachable[p.0]).count())
            .collect();
        pending[start.0] = 0;
        let mut queue = VecDeque::from([start]);
        let mut processed = 0;
        while let Some(v) = queue.pop_front() {
            processed += 1;
            let stage = self.vertices[v.0].stage;
            for &e in &self.outgoing[v.0] {
                let next = self.edges[e].destination;
                if pending[next.0] == 0 {
                    // Back edge into the start or an already staged vertex.
                    continue;
                }
                let target = &mut self.vertices[next.0];
                target.stage = target.stage.max(stage + 1);
                pending[next.0] -= 1;
                if pending[next.0] == 0 {
                    queue.push_back(next);
                }
            }
        }
        let reached = reachable.iter().filter(|&&r| r).count();
        if processed < reached {
            warn!("execution graph has a cycle; {} vertices have no stage", reached - processed);
        }

        let decisions: Vec<bool> = (0..self.vertices.len())
            .map(|i| {
                let mut services = self.predecessors(VertexId(i)).map(|p| self.vertices[p.0].service.as_str());
                match services.next() {
                    Some(first) => services.any(|s| s != first),
                    None => false,
                }
            })
            .collect();
        for (vertex, decision) in self.vertices.iter_mut().zip(decisions) {
            vertex.decision_making = decision;
        }
    }

    /// Within each stage, numbers services by first appearance and vertices within a service.
    pub fn recalculate_indices(&mut self) {
        let mut stages: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (i, vertex) in self.vertices.iter().enumerate() {
            stages.entry(vertex.stage).or_default().push(i);
        }
        for members in stages.values() {
            let mut services: Vec<(String, usize)> = Vec::new();
            for &i in members {
                let service = &self.vertices[i].service;
                let application = match services.iter().position(|(s, _)| s == service) {
                    Some(position) => position,
                    None => {
                        services.push((service.clone(), 0));
                        services.len() - 1
                    }
                };
                let approximation = services[application].1;
                services[application].1 += 1;
                let vertex = &mut self.vertices[i];
                vertex.application_index = application;
                vertex.approximation_index = approximation;
            }
        }
    }

    /// All simple paths from `from` to `to`.
    pub fn find_all_paths(&self, from: VertexId, to: VertexId) -> Vec<Vec<VertexId>> {
        struct Frame {
            vertex: VertexId,
            next_edge: usize,
        }

        let mut paths = Vec::new();
        let mut on_path = vec![false; self.vertices.len()];
        let mut stack = vec![Frame { vertex: from, next_edge: 0 }];
        on_path[from.0] = true;

        while let Some(frame) = stack.last_mut() {
            let vertex = frame.vertex;
            if vertex == to {
                paths.push(stack.iter().map(|f| f.vertex).collect());
                on_path[vertex.0] = false;
                stack.pop();
                continue;
            }
            match self.outgoing[vertex.0].get(frame.next_edge) {
                Some(&e) => {
                    frame.next_edge += 1;
                    let next = self.edges[e].destination;
                    if !on_path[next.0] {
                        on_path[next.0] = true;
                        stack.push(Frame { vertex: next, next_edge: 0 });
                    }
                }
                None => {
                    on_path[vertex.0] = false;
                    stack.pop();
                }
            }
        }
        paths
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use test_log::test;

    fn diamond() -> (Graph, [VertexId; 4]) {
        let mut graph = Graph::new();
        let s = graph.add_vertex(Vertex::new(2, "s", "S"));
        let a = graph.add_vertex(Vertex::new(3, "a", "A"));
        let b = graph.add_vertex(Vertex::new(4, "b", "B"));
        let e = graph.add_vertex(Vertex::new(5, "e", "E"));
        graph.add_edge(s, a, 0);
        graph.add_edge(s, b, 1);
        graph.add_edge(a, e, 2);
        graph.add_edge(b, e, 3);
        (graph, [s, a, b, e])
    }

    #[test]
    fn test_vertices_deduplicate_by_label() {
        let mut graph = Graph::new();
        let first = graph.add_vertex(Vertex::new(2, "x", "X"));
        let second = graph.add_vertex(Vertex::new(2, "x", "X"));
        assert_eq!(first, second);
        assert_eq!(graph.vertex_count(), 1);
    }

    #[test]
    fn test_edges_deduplicate_by_vertex_ids() {
        let (mut graph, [s, a, _, _]) = diamond();
        assert!(!graph.add_edge(s, a, 99));
        assert_eq!(graph.edge_count(), 4);
        assert!(graph.has_edge(s, a));
        assert!(!graph.has_edge(a, s));
    }

    #[test]
    fn test_stages_use_longest_path() {
        let (mut graph, [s, a, b, e]) = diamond();
        let c = graph.add_vertex(Vertex::new(6, "c", "B"));
        graph.add_edge(b, c, 4);
        graph.add_edge(c, e, 5);
        graph.set_start(s);
        graph.recalculate_graph_stages();
        assert_eq!(graph.vertex(s).stage, 0);
        assert_eq!(graph.vertex(a).stage, 1);
        assert_eq!(graph.vertex(c).stage, 2);
        assert_eq!(graph.vertex(e).stage, 3);
    }

    #[test]
    fn test_decision_making_flag() {
        let (mut graph, [s, a, _, e]) = diamond();
        graph.recalculate_graph_stages();
        assert!(graph.vertex(e).decision_making);
        assert!(!graph.vertex(a).decision_making);
        assert!(!graph.vertex(s).decision_making);
    }

    #[test]
    fn test_same_service_sources_are_not_decisions() {
        let mut graph = Graph::new();
        let b1 = graph.add_vertex(Vertex::new(2, "b1", "B"));
        let b2 = graph.add_vertex(Vertex::new(3, "b2", "B"));
        let e = graph.add_vertex(Vertex::new(4, "e", "E"));
        graph.add_edge(b1, e, 0);
        graph.add_edge(b2, e, 1);
        graph.recalculate_graph_stages();
        assert!(!graph.vertex(e).decision_making);
    }

    #[test]
    fn test_indices_per_stage() {
        let mut graph = Graph::new();
        let s = graph.add_vertex(Vertex::new(2, "s", "S"));
        let b1 = graph.add_vertex(Vertex::new(3, "b1", "B"));
        let b2 = graph.add_vertex(Vertex::new(4, "b2", "B"));
        let a = graph.add_vertex(Vertex::new(5, "a", "A"));
        for (i, v) in [b1, b2, a].into_iter().enumerate() {
            graph.add_edge(s, v, i as u64);
        }
        graph.recalculate_graph_stages();
        graph.recalculate_indices();
        assert_eq!(graph.vertex(b1).application_index, 0);
        assert_eq!(graph.vertex(b2).approximation_index, 1);
        assert_eq!(graph.vertex(a).application_index, 1);
        assert_eq!(graph.vertex(a).approximation_index, 0);
    }

    #[test]
    fn test_unite() {
        let (mut graph, [s, ..]) = diamond();
        let mut other = Graph::new();
        let e = other.add_vertex(Vertex::new(5, "e", "E"));
        let f = other.add_vertex(Vertex::new(7, "f", "F"));
        other.add_edge(e, f, 10);
        other.add_conditional_weight(f, e, 1);
        graph.set_start(s);
        graph.unite(&other);
        assert_eq!(graph.vertex_count(), 5);
        assert_eq!(graph.edge_count(), 5);
        let f = graph.vertex_by_label("f").unwrap();
        assert_eq!(graph.vertex(f).conditional_weights.len(), 1);
        assert_eq!(graph.end(), Some(f));
        assert_eq!(graph.start(), Some(s));
    }

    #[test]
    fn test_unite_remaps_conditional_weights() {
        let (mut graph, [s, ..]) = diamond();
        let mut other = Graph::new();
        let e = other.add_vertex(Vertex::new(5, "e", "E"));
        let f = other.add_vertex(Vertex::new(7, "f", "F"));
        other.add_conditional_weight(f, e, 1);
        graph.unite(&other);

        // `e` is index 0 in `other` but index 3 here; index 0 here is `s`.
        let e = graph.vertex_by_label("e").unwrap();
        let f = graph.vertex_by_label("f").unwrap();
        assert_ne!(e, s);
        assert_eq!(graph.vertex(f).conditional_weights, vec![ConditionalWeight { target: e, cost: 1 }]);
    }

    #[test]
    fn test_find_all_paths() {
        let (graph, [s, _, _, e]) = diamond();
        let paths = graph.find_all_paths(s, e);
        assert_eq!(paths.len(), 2);
        assert!(paths.iter().all(|p| p.first() == Some(&s) && p.last() == Some(&e)));
    }

    #[test]
    fn test_cycle_does_not_hang() {
        let (mut graph, [s, _, _, e]) = diamond();
        graph.add_edge(e, s, 9);
        graph.set_start(s);
        graph.recalculate_graph_stages();
        assert_eq!(graph.find_all_paths(s, e).len(), 2);
    }
}
