//! Execution graph to DOT (Graphviz) conversion.
//!
//! # DOT Format
//!
//! The generated output is a `digraph` with these conventions:
//! - **Vertices** are labelled with the feature name and its service; vertices
//!   of one stage share a rank, so stages read left to right
//! - **Decision-making vertices** (incoming edges from several services) use a
//!   distinct shape
//! - **Start vertex** is drawn with a double border
//! - **Edges**:
//!   - Solid arrows are execution edges
//!   - Dashed arrows without heads are conditional weights, labelled with their cost
//!
//! # Examples
//!
//! ```
//! use fmconf::graph::{Graph, Vertex};
//!
//! let mut graph = Graph::new();
//! let s = graph.add_vertex(Vertex::new(2, "s", "Start"));
//! let e = graph.add_vertex(Vertex::new(3, "e", "End"));
//! graph.add_edge(s, e, 0);
//! graph.set_start(s);
//! graph.recalculate_graph_stages();
//!
//! let dot = graph.to_dot().unwrap();
//! // Render with: dot -Tpng graph.dot -o graph.png
//! assert!(dot.contains("v0 -> v1"));
//! ```

use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::graph::Graph;

/// Configuration options for DOT output generation.
///
/// ```
/// use fmconf::dot::DotConfig;
///
/// let config = DotConfig {
///     rank_by_stage: false,
///     ..DotConfig::default()
/// };
/// assert_eq!(config.vertex_shape, "box");
/// ```
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Shape for ordinary vertices (default: "box")
    pub vertex_shape: &'static str,
    /// Shape for decision-making vertices (default: "diamond")
    pub decision_shape: &'static str,
    /// Style for execution edges (default: "solid")
    pub edge_style: &'static str,
    /// Style for conditional weights (default: "dashed")
    pub conditional_style: &'static str,
    /// Group vertices of the same stage into one rank (default: true)
    pub rank_by_stage: bool,
    /// Show edge ids as labels (default: false)
    pub edge_labels: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            vertex_shape: "box",
            decision_shape: "diamond",
            edge_style: "solid",
            conditional_style: "dashed",
            rank_by_stage: true,
            edge_labels: false,
        }
    }
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}

impl Graph {
    /// Converts the graph to DOT format with the default configuration.
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(&DotConfig::default())
    }

    /// Converts the graph to DOT format.
    ///
    /// Stages are taken as stored; call
    /// [`recalculate_graph_stages`](Graph::recalculate_graph_stages) first if
    /// the graph changed since.
    pub fn to_dot_with_config(&self, config: &DotConfig) -> Result<String, std::fmt::Error> {
        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "rankdir=LR;")?;
        writeln!(dot, "node [shape={}];", config.vertex_shape)?;

        let mut stages = BTreeMap::<usize, Vec<usize>>::new();
        for (id, vertex) in self.vertices() {
            let shape = if vertex.decision_making {
                format!(", shape={}", config.decision_shape)
            } else {
                String::new()
            };
            let peripheries = if self.start() == Some(id) { ", peripheries=2" } else { "" };
            writeln!(
                dot,
                "v{} [label=\"{}\\n{}\"{}{}];",
                id.index(),
                escape(&vertex.label),
                escape(&vertex.service),
                shape,
                peripheries
            )?;
            stages.entry(vertex.stage).or_default().push(id.index());
        }

        if config.rank_by_stage {
            for members in stages.values() {
                write!(dot, "{{ rank=same;")?;
                for i in members {
                    write!(dot, " v{};", i)?;
                }
                writeln!(dot, " }}")?;
            }
        }

        for edge in self.edges() {
            write!(
                dot,
                "v{} -> v{} [style={}",
                edge.source.index(),
                edge.destination.index(),
                config.edge_style
            )?;
            if config.edge_labels {
                write!(dot, ", label=\"{}\"", edge.id)?;
            }
            writeln!(dot, "];")?;
        }

        for (id, vertex) in self.vertices() {
            for weight in &vertex.conditional_weights {
                writeln!(
                    dot,
                    "v{} -> v{} [style={}, arrowhead=none, constraint=false, label=\"{}\"];",
                    id.index(),
                    weight.target.index(),
                    config.conditional_style,
                    weight.cost
                )?;
            }
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}
