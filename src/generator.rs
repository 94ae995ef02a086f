//! Building execution-graph fragments from partial configurations.

use crate::calculator::PartialConfiguration;
use crate::graph::{Graph, Vertex, VertexId};
use crate::model::{Connectivity, FeatureId, FeatureModel};

/// Creates the vertex for a concrete feature: id = SAT variable, service = parent name.
pub fn vertex_for(model: &FeatureModel, feature: FeatureId) -> Vertex {
    let service = model
        .feature(feature)
        .parent()
        .map(|p| model.name(p).to_string())
        .unwrap_or_default();
    Vertex::new(feature.var().id(), model.name(feature), service)
}

/// Generates graph fragments with edge ids unique across calls.
#[derive(Debug, Default)]
pub struct GraphGenerator {
    next_edge_id: u64,
}

impl GraphGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph of `configurations`.
    ///
    /// Features of one configuration are chained in order. The last feature of
    /// a configuration is linked to the first feature of every configuration
    /// whose abstract parent succeeds the former's parent in `connectivity`.
    pub fn generate(
        &mut self,
        model: &FeatureModel,
        connectivity: &Connectivity,
        configurations: &[&PartialConfiguration],
    ) -> Graph {
        let mut graph = Graph::new();
        for configuration in configurations {
            let mut previous: Option<VertexId> = None;
            for &feature in &configuration.features {
                let vertex = graph.add_vertex(vertex_for(model, feature));
                if let Some(previous) = previous {
                    self.connect(&mut graph, previous, vertex);
                }
                previous = Some(vertex);
            }
        }

        for from in configurations {
            let Some(last) = from.last() else {
                continue;
            };
            let Some(service) = model.feature(last).parent() else {
                continue;
            };
            let successors = connectivity.successors(service);
            for to in configurations {
                let Some(first) = to.first() else {
                    continue;
                };
                let reachable = model
                    .feature(first)
                    .parent()
                    .is_some_and(|p| successors.contains(&p));
                if reachable {
                    let (Some(source), Some(destination)) = (
                        graph.vertex_by_label(model.name(last)),
                        graph.vertex_by_label(model.name(first)),
                    ) else {
                        continue;
                    };
                    self.connect(&mut graph, source, destination);
                }
            }
        }
        graph
    }

    fn connect(&mut self, graph: &mut Graph, source: VertexId, destination: VertexId) {
        if graph.add_edge(source, destination, self.next_edge_id) {
            self.next_edge_id += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FeatureModelBuilder, Relation};

    use test_log::test;

    fn model() -> FeatureModel {
        let mut builder = FeatureModelBuilder::new();
        builder
            .feature("S", "root", Relation::Mandatory)
            .feature("s1", "S", Relation::Mandatory)
            .feature("A", "root", Relation::Mandatory)
            .feature("a1", "A", Relation::Alternative)
            .feature("a2", "A", Relation::Alternative)
            .feature("B", "root", Relation::Mandatory)
            .feature("b1", "B", Relation::Mandatory)
            .successors("S", ["A", "B"])
            .successors("A", Vec::<String>::new())
            .successors("B", Vec::<String>::new());
        builder.build().unwrap()
    }

    fn configuration(model: &FeatureModel, features: &[&str], parent: &str) -> PartialConfiguration {
        PartialConfiguration::new(
            features.iter().map(|n| model.get(n).unwrap()).collect(),
            vec![model.get(parent).unwrap()],
        )
    }

    #[test]
    fn test_fan_out_edges() {
        let model = model();
        let s = configuration(&model, &["s1"], "S");
        let a = configuration(&model, &["a1"], "A");
        let b = configuration(&model, &["b1"], "B");
        let mut generator = GraphGenerator::new();
        let graph = generator.generate(&model, model.connectivity(), &[&s, &a, &b]);

        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(graph.edge_count(), 2);
        let s1 = graph.vertex_by_label("s1").unwrap();
        assert_eq!(graph.successors(s1).count(), 2);
        assert_eq!(graph.vertex(s1).service, "S");
        assert_eq!(graph.vertex(s1).id, model.get("s1").unwrap().var().id());
    }

    #[test]
    fn test_edge_ids_continue_across_fragments() {
        let model = model();
        let s = configuration(&model, &["s1"], "S");
        let a1 = configuration(&model, &["a1"], "A");
        let a2 = configuration(&model, &["a2"], "A");
        let mut generator = GraphGenerator::new();
        let first = generator.generate(&model, model.connectivity(), &[&s, &a1]);
        let second = generator.generate(&model, model.connectivity(), &[&s, &a2]);
        assert_eq!(first.edges()[0].id, 0);
        assert_eq!(second.edges()[0].id, 1);
    }
}
