//! Combining per-slice configurations into one execution graph.
//!
//! A merge run works on its own view of the calculated model: the slice
//! lists are filtered into vectors of references and the connectivity map is
//! cloned before pruning. The calculated model is only read, so any number
//! of runs may share it across threads.
//!
//! The combination search is a depth-first backtracking over slices with an
//! explicit stack. Each complete, consistent combination contributes a graph
//! fragment covering the configurations chosen since the previous accepted
//! combination and their direct predecessors; fragments are united into one
//! graph. Residual constraints then become conditional weights.

use log::{debug, info, warn};
use num_bigint::BigUint;

use crate::bitset::FeatureSet;
use crate::calculator::{CalculatedModel, PartialConfiguration};
use crate::generator::GraphGenerator;
use crate::graph::Graph;
use crate::hardware::{self, AvailableEdgeHardware};
use crate::model::{Connectivity, CrossTreeConstraint, CtcRelation, FeatureId, FeatureModel};
use crate::solver::Interrupt;

/// Cost attached to every conditional weight.
pub const CONDITIONAL_WEIGHT_COST: i64 = 1;

/// Configurations chosen so far in a merge attempt, with the union of their features.
#[derive(Debug, Clone, Default)]
pub struct MergedConfiguration<'c> {
    configurations: Vec<&'c PartialConfiguration>,
    features: FeatureSet,
}

impl<'c> MergedConfiguration<'c> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, configuration: &'c PartialConfiguration) {
        self.features.extend(configuration.features.iter().copied());
        self.configurations.push(configuration);
    }

    pub fn pop(&mut self) -> Option<&'c PartialConfiguration> {
        let configuration = self.configurations.pop()?;
        for &feature in &configuration.features {
            self.features.remove(feature);
        }
        Some(configuration)
    }

    pub fn configurations(&self) -> &[&'c PartialConfiguration] {
        &self.configurations
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn len(&self) -> usize {
        self.configurations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configurations.is_empty()
    }
}

/// Result of one merge run.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// The united execution graph, if any combination was valid.
    pub graph: Option<Graph>,
    pub valid_combinations: u64,
    /// Connectivity after removing infeasible abstract features.
    pub connectivity: Connectivity,
    /// Abstract features removed from the connectivity map.
    pub pruned: Vec<FeatureId>,
    /// Slices left after hardware filtering.
    pub slices: usize,
    /// Features the edge cannot host.
    pub non_available: FeatureSet,
    /// False if the run was interrupted.
    pub complete: bool,
}

/// A REQUIRES constraint that becomes checkable once a given slice is decided.
#[derive(Debug, Clone)]
struct PendingRequires {
    constraint: CrossTreeConstraint,
    /// Features whose selection satisfies the constraint.
    satisfying: Vec<FeatureId>,
    decided_at: usize,
}

struct Frame {
    slice: usize,
    next: usize,
}

/// Merges the slices of a calculated model for one edge node.
#[derive(Debug)]
pub struct Merger<'a, 'm> {
    calculated: &'a CalculatedModel<'m>,
    interrupt: Interrupt,
}

impl<'a, 'm> Merger<'a, 'm> {
    pub fn new(calculated: &'a CalculatedModel<'m>) -> Self {
        Merger {
            calculated,
            interrupt: Interrupt::none(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Filters by `edge` (checking the first `classes` hardware classes), then merges.
    pub fn merge(&self, edge: &AvailableEdgeHardware, classes: usize) -> MergeOutcome {
        let model = self.calculated.model();
        let non_available = hardware::non_available_features(model, edge, classes);
        let mut connectivity = self.calculated.connectivity.clone();
        let mut pruned = Vec::new();

        let mut slices: Vec<Vec<&PartialConfiguration>> = Vec::with_capacity(self.calculated.slices.len());
        for (index, slice) in self.calculated.slices.iter().enumerate() {
            let kept: Vec<&PartialConfiguration> = slice
                .iter()
                .filter(|configuration| !non_available.contains_any(&configuration.features))
                .collect();
            if kept.is_empty() {
                // Unsatisfiable slices arrive empty; the others lost everything to the filter.
                debug!("slice {} has no feasible configuration", index);
                pruned.extend(connectivity.prune(self.calculated.parents_of_slice(index)));
            } else {
                slices.push(kept);
            }
        }
        if !pruned.is_empty() {
            info!("pruned {} abstract features without feasible configurations", pruned.len());
        }

        let bound: BigUint = slices.iter().map(|s| BigUint::from(s.len())).product();
        debug!("merging {} slices, at most {} combinations", slices.len(), bound);

        let (graph, valid_combinations, complete) = self.combine(model, &connectivity, &slices);
        let graph = graph.map(|mut graph| {
            self.add_conditional_weights(model, &mut graph);
            let start = model
                .start()
                .and_then(|s| graph.vertex_by_label(model.name(s)))
                .or_else(|| graph.vertices().map(|(id, _)| id).find(|&v| graph.predecessors(v).next().is_none()));
            if let Some(start) = start {
                graph.set_start(start);
            }
            graph.recalculate_graph_stages();
            graph.recalculate_indices();
            graph
        });

        info!(
            "merge found {} valid combinations; graph has {} vertices",
            valid_combinations,
            graph.as_ref().map_or(0, Graph::vertex_count)
        );
        MergeOutcome {
            graph,
            valid_combinations,
            connectivity,
            pruned,
            slices: slices.len(),
            non_available,
            complete,
        }
    }

    fn combine(
        &self,
        model: &FeatureModel,
        connectivity: &Connectivity,
        slices: &[Vec<&PartialConfiguration>],
    ) -> (Option<Graph>, u64, bool) {
        if slices.is_empty() {
            return (None, 0, true);
        }
        let last = slices.len() - 1;
        let requires = self.pending_requires(slices);

        let mut generator = GraphGenerator::new();
        let mut combined: Option<Graph> = None;
        let mut valid = 0u64;
        let mut current = MergedConfiguration::new();
        let mut changes: Vec<&PartialConfiguration> = Vec::new();
        let mut stack = vec![Frame { slice: 0, next: 0 }];

        while let Some(frame) = stack.last_mut() {
            if self.interrupt.is_triggered() {
                warn!("merge interrupted after {} valid combinations", valid);
                return (combined, valid, false);
            }
            let level = frame.slice;
            let Some(&candidate) = slices[level].get(frame.next) else {
                stack.pop();
                if let Some(done) = current.pop() {
                    if let Some(pos) = changes.iter().position(|c| std::ptr::eq(*c, done)) {
                        changes.remove(pos);
                    }
                }
                continue;
            };
            frame.next += 1;

            current.push(candidate);
            if !self.consistent(current.features(), level, &requires) {
                current.pop();
                continue;
            }

            for predecessor in predecessor_configurations(connectivity, current.configurations(), candidate) {
                if !changes.iter().any(|c| std::ptr::eq(*c, predecessor)) {
                    changes.push(predecessor);
                }
            }
            changes.push(candidate);

            if level < last {
                stack.push(Frame {
                    slice: level + 1,
                    next: 0,
                });
            } else {
                valid += 1;
                let fragment = generator.generate(model, connectivity, &changes);
                match combined.as_mut() {
                    Some(graph) => graph.unite(&fragment),
                    None => combined = Some(fragment),
                }
                changes.clear();
                current.pop();
            }
        }
        (combined, valid, true)
    }

    /// REQUIRES constraints tagged with the slice deciding their target.
    ///
    /// A concrete target is satisfied by itself; an abstract target by any of
    /// its children. Targets that no remaining slice contains are decided at
    /// the last slice.
    fn pending_requires(&self, slices: &[Vec<&PartialConfiguration>]) -> Vec<PendingRequires> {
        let model = self.calculated.model();
        let last = slices.len().saturating_sub(1);
        self.calculated
            .constraints
            .iter()
            .filter(|c| c.relation == CtcRelation::Requires)
            .map(|&constraint| {
                let satisfying = model.concrete_descendants(constraint.target);
                let decided_at = slices
                    .iter()
                    .position(|s| s.iter().any(|c| satisfying.iter().any(|&f| c.contains(f))))
                    .unwrap_or(last);
                PendingRequires {
                    constraint,
                    satisfying,
                    decided_at,
                }
            })
            .collect()
    }

    fn consistent(&self, union: &FeatureSet, level: usize, requires: &[PendingRequires]) -> bool {
        let excluded = self.calculated.constraints.iter().any(|c| {
            c.relation == CtcRelation::Excludes && union.contains(c.source) && union.contains(c.target)
        });
        if excluded {
            return false;
        }
        requires.iter().all(|r| {
            level < r.decided_at || !union.contains(r.constraint.source) || union.contains_any(&r.satisfying)
        })
    }

    fn add_conditional_weights(&self, model: &FeatureModel, graph: &mut Graph) {
        for ctc in &self.calculated.constraints {
            let Some(source) = graph.vertex_by_label(model.name(ctc.source)) else {
                continue;
            };
            match ctc.relation {
                CtcRelation::Excludes => {
                    if let Some(target) = graph.vertex_by_label(model.name(ctc.target)) {
                        graph.add_conditional_weight(source, target, CONDITIONAL_WEIGHT_COST);
                    }
                }
                CtcRelation::Requires => {
                    let Some(parent) = model.feature(ctc.target).parent() else {
                        continue;
                    };
                    for &sibling in model.feature(parent).children() {
                        if sibling == ctc.target {
                            continue;
                        }
                        if let Some(target) = graph.vertex_by_label(model.name(sibling)) {
                            graph.add_conditional_weight(source, target, CONDITIONAL_WEIGHT_COST);
                        }
                    }
                }
            }
        }
    }
}

/// Chosen configurations whose parents directly precede one of `candidate`'s parents.
fn predecessor_configurations<'c>(
    connectivity: &Connectivity,
    chosen: &[&'c PartialConfiguration],
    candidate: &PartialConfiguration,
) -> Vec<&'c PartialConfiguration> {
    let predecessors: Vec<FeatureId> = connectivity
        .iter()
        .filter(|(key, successors)| {
            !candidate.parents.contains(key) && successors.iter().any(|s| candidate.parents.contains(s))
        })
        .map(|(key, _)| key)
        .collect();
    chosen
        .iter()
        .copied()
        .filter(|c| !std::ptr::eq(*c, candidate) && c.parents.iter().any(|p| predecessors.contains(p)))
        .collect()
}
