//! Enumerating valid configurations of a (sliced) feature model.
//!
//! In sliced mode the calculator first enumerates the abstract layer, then
//! pushes cross-tree constraints with abstract endpoints down to concrete
//! features, and finally enumerates each slice's partial feature model on
//! its own. Constraints that no clause set could embed are kept in the
//! result as residual constraints for the merger.

use std::collections::{HashSet, VecDeque};

use log::{debug, error, info};
use num_bigint::BigUint;

use crate::cnf::{self, ClauseSet};
use crate::model::{Connectivity, CrossTreeConstraint, CtcRelation, FeatureId, FeatureModel};
use crate::slicer::SlicedModel;
use crate::solver::{enumerate_models, Dpll, Enumeration, Interrupt, Solver};
use crate::types::Var;

/// One valid assignment of a slice's concrete layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct PartialConfiguration {
    /// Selected concrete features in execution order.
    pub features: Vec<FeatureId>,
    /// Abstract parents this configuration realizes.
    pub parents: Vec<FeatureId>,
}

impl PartialConfiguration {
    pub fn new(features: Vec<FeatureId>, parents: Vec<FeatureId>) -> Self {
        PartialConfiguration { features, parents }
    }

    pub fn contains(&self, feature: FeatureId) -> bool {
        self.features.contains(&feature)
    }

    pub fn first(&self) -> Option<FeatureId> {
        self.features.first().copied()
    }

    pub fn last(&self) -> Option<FeatureId> {
        self.features.last().copied()
    }
}

/// A feature model with every slice's configurations enumerated.
///
/// The constraint list and the connectivity map are owned copies, so the
/// underlying model stays untouched and can be shared between runs.
#[derive(Debug, Clone)]
pub struct CalculatedModel<'m> {
    model: &'m FeatureModel,
    /// Constraints not embedded in any clause set.
    pub constraints: Vec<CrossTreeConstraint>,
    pub connectivity: Connectivity,
    /// Configurations per slice, in slice order.
    pub slices: Vec<Vec<PartialConfiguration>>,
    /// Abstract parents of each slice, parallel to `slices`.
    pub slice_parents: Vec<Vec<FeatureId>>,
    /// Selected abstract features of every valid abstract configuration.
    pub abstract_configurations: Vec<Vec<FeatureId>>,
    /// False if any enumeration was interrupted.
    pub complete: bool,
}

impl<'m> CalculatedModel<'m> {
    pub fn new(model: &'m FeatureModel) -> Self {
        CalculatedModel {
            model,
            constraints: Vec::new(),
            connectivity: model.connectivity().clone(),
            slices: Vec::new(),
            slice_parents: Vec::new(),
            abstract_configurations: Vec::new(),
            complete: true,
        }
    }

    pub fn model(&self) -> &'m FeatureModel {
        self.model
    }

    /// Appends a slice with its abstract parents.
    pub fn push_slice(&mut self, parents: Vec<FeatureId>, configurations: Vec<PartialConfiguration>) {
        self.slice_parents.resize(self.slices.len(), Vec::new());
        self.slice_parents.push(parents);
        self.slices.push(configurations);
    }

    /// Abstract parents of slice `index`.
    ///
    /// Slices pushed without recorded parents fall back to the parents named by their configurations.
    pub fn parents_of_slice(&self, index: usize) -> Vec<FeatureId> {
        match self.slice_parents.get(index) {
            Some(parents) if !parents.is_empty() => parents.clone(),
            _ => {
                let mut parents: Vec<FeatureId> = self
                    .slices
                    .get(index)
                    .into_iter()
                    .flatten()
                    .flat_map(|c| c.parents.iter().copied())
                    .collect();
                parents.sort_unstable();
                parents.dedup();
                parents
            }
        }
    }

    /// Total number of partial configurations over all slices.
    pub fn configuration_count(&self) -> usize {
        self.slices.iter().map(Vec::len).sum()
    }

    /// Number of slice combinations before any consistency check.
    pub fn combination_bound(&self) -> BigUint {
        self.slices.iter().map(|s| BigUint::from(s.len())).product()
    }
}

/// Drives clause generation and model enumeration with one reusable solver.
#[derive(Debug)]
pub struct ConfigurationCalculator<S: Solver = Dpll> {
    solver: S,
    interrupt: Interrupt,
}

impl Default for ConfigurationCalculator<Dpll> {
    fn default() -> Self {
        Self::with_solver(Dpll::new())
    }
}

impl ConfigurationCalculator<Dpll> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<S: Solver> ConfigurationCalculator<S> {
    pub fn with_solver(solver: S) -> Self {
        ConfigurationCalculator {
            solver,
            interrupt: Interrupt::none(),
        }
    }

    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Enumerates the abstract layer and every slice of `sliced`.
    pub fn calculate_sliced<'m>(&mut self, model: &'m FeatureModel, sliced: &SlicedModel) -> CalculatedModel<'m> {
        let mut result = CalculatedModel::new(model);
        let mut constraints = model.constraints().to_vec();

        let abstract_clauses = cnf::abstract_layer_clauses(model, &mut constraints);
        let projection: Vec<Var> = model.abstract_layer().into_iter().map(FeatureId::var).collect();
        let enumeration = self.enumerate(&abstract_clauses, &projection, "abstract layer");
        result.complete &= enumeration.complete;
        result.abstract_configurations = enumeration
            .selections()
            .map(|vars| vars.into_iter().map(FeatureId::from_var).collect())
            .collect();

        let mut constraints = pass_constraints_to_children(model, &constraints);

        for (index, parents) in sliced.slices.iter().enumerate() {
            let clauses = cnf::slice_clauses(model, parents, &mut constraints);
            let mut projection: Vec<Var> = parents
                .iter()
                .flat_map(|&p| model.feature(p).children().iter().map(|c| c.var()))
                .collect();
            projection.sort_unstable();

            let enumeration = self.enumerate(&clauses, &projection, &format!("slice {}", index));
            result.complete &= enumeration.complete;
            let configurations: Vec<PartialConfiguration> = enumeration
                .selections()
                .map(|vars| {
                    let mut configuration =
                        PartialConfiguration::new(vars.into_iter().map(FeatureId::from_var).collect(), parents.clone());
                    sort_configuration(model, &result.connectivity, &mut configuration);
                    configuration
                })
                .collect();
            if configurations.is_empty() {
                debug!("slice {} has no valid configuration", index);
            } else {
                debug!("slice {} has {} configurations", index, configurations.len());
            }
            result.push_slice(parents.clone(), configurations);
        }

        result.constraints = constraints;
        info!(
            "calculated {} abstract configurations and {} partial configurations in {} slices ({} residual constraints)",
            result.abstract_configurations.len(),
            result.configuration_count(),
            result.slices.len(),
            result.constraints.len()
        );
        result
    }

    /// Enumerates the whole model as one clause set.
    ///
    /// Every model becomes one partial configuration in a single slice; its
    /// abstract part is recorded as an abstract configuration.
    pub fn calculate_unsliced<'m>(&mut self, model: &'m FeatureModel) -> CalculatedModel<'m> {
        let mut result = CalculatedModel::new(model);
        let mut constraints = model.constraints().to_vec();
        let clauses = cnf::model_clauses(model, &mut constraints);
        let projection: Vec<Var> = clauses.variables().into_iter().filter(|&v| v != Var::ROOT).collect();

        let enumeration = self.enumerate(&clauses, &projection, "model");
        result.complete &= enumeration.complete;

        let mut seen = HashSet::new();
        let mut configurations = Vec::with_capacity(enumeration.models.len());
        for vars in enumeration.selections() {
            let selected: Vec<FeatureId> = vars.into_iter().map(FeatureId::from_var).collect();
            let (abstract_part, concrete): (Vec<FeatureId>, Vec<FeatureId>) =
                selected.into_iter().partition(|&f| model.is_abstract(f));
            // Intermediate abstract features are not part of the abstract layer.
            let parents: Vec<FeatureId> = abstract_part.into_iter().filter(|&f| model.is_concrete_parent(f)).collect();
            if seen.insert(parents.clone()) {
                result.abstract_configurations.push(parents.clone());
            }
            let mut configuration = PartialConfiguration::new(concrete, parents);
            sort_configuration(model, &result.connectivity, &mut configuration);
            configurations.push(configuration);
        }
        result.push_slice(model.abstract_layer(), configurations);
        result.constraints = constraints;
        info!(
            "calculated {} configurations without slicing ({} abstract configurations)",
            result.configuration_count(),
            result.abstract_configurations.len()
        );
        result
    }

    /// Solver failures are logged; the clause set then yields no models.
    fn enumerate(&mut self, clauses: &ClauseSet, projection: &[Var], what: &str) -> Enumeration {
        debug!("{}: {} clauses, projecting onto {} variables", what, clauses.len(), projection.len());
        match enumerate_models(&mut self.solver, clauses, projection, &self.interrupt) {
            Ok(enumeration) => enumeration,
            Err(err) => {
                error!("{}: enumeration failed: {}", what, err);
                Enumeration::default()
            }
        }
    }
}

/// Rewrites constraints so that no source is abstract and no EXCLUDES target is abstract.
///
/// An abstract endpoint is replaced by one copy of the constraint per child,
/// repeated until nothing changes. REQUIRES targets stay as they are.
pub fn pass_constraints_to_children(model: &FeatureModel, constraints: &[CrossTreeConstraint]) -> Vec<CrossTreeConstraint> {
    let mut result = constraints.to_vec();

    while let Some(pos) = result.iter().position(|c| model.is_abstract(c.source)) {
        let ctc = result.remove(pos);
        result.extend(
            model
                .feature(ctc.source)
                .children()
                .iter()
                .map(|&child| CrossTreeConstraint { source: child, ..ctc }),
        );
    }

    while let Some(pos) = result
        .iter()
        .position(|c| c.relation == CtcRelation::Excludes && model.is_abstract(c.target))
    {
        let ctc = result.remove(pos);
        result.extend(
            model
                .feature(ctc.target)
                .children()
                .iter()
                .map(|&child| CrossTreeConstraint { target: child, ..ctc }),
        );
    }

    result
}

/// Orders a configuration's parents breadth-first along the connectivity map
/// and groups its features by parent in that order.
///
/// The walk starts at the first parent without an incoming edge from another
/// parent of the configuration; parents it cannot reach keep their relative
/// order at the end.
pub fn sort_configuration(model: &FeatureModel, connectivity: &Connectivity, configuration: &mut PartialConfiguration) {
    let parents = &configuration.parents;
    let has_incoming = |p: FeatureId| parents.iter().any(|&q| q != p && connectivity.successors(q).contains(&p));
    let Some(start) = parents.iter().copied().find(|&p| !has_incoming(p)).or(parents.first().copied()) else {
        return;
    };

    let mut order = Vec::with_capacity(parents.len());
    let mut queue = VecDeque::from([start]);
    while let Some(current) = queue.pop_front() {
        if order.contains(&current) {
            continue;
        }
        order.push(current);
        for &next in connectivity.successors(current) {
            if parents.contains(&next) && !order.contains(&next) {
                queue.push_back(next);
            }
        }
    }
    for &p in parents {
        if !order.contains(&p) {
            order.push(p);
        }
    }

    let mut features = Vec::with_capacity(configuration.features.len());
    for &parent in &order {
        features.extend(
            configuration
                .features
                .iter()
                .copied()
                .filter(|&f| model.feature(f).parent() == Some(parent)),
        );
    }
    for &f in &configuration.features {
        if !features.contains(&f) {
            features.push(f);
        }
    }

    configuration.features = features;
    configuration.parents = order;
}
