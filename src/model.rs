//! Feature models: an arena of features, cross-tree constraints, and the
//! connectivity map between abstract features.
//!
//! Features are stored in a `Vec` and addressed by [`FeatureId`]. The root
//! feature is always at position 0; a feature's SAT variable is its arena
//! position plus one, so the root is variable 1.
//!
//! Models are created through [`FeatureModelBuilder`], which enforces the
//! structural invariants:
//!
//! - every non-root feature has a parent, and parent links form a tree;
//! - a feature's children are all concrete or all abstract, never mixed;
//! - a sibling group with any ALTERNATIVE or OR member has at least two
//!   members, all with the same relation;
//! - a single concrete child is MANDATORY.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use log::warn;

use crate::error::ModelError;
use crate::hardware::{HardwareClass, HardwareVector};
use crate::serialize;
use crate::types::Var;

/// Index of a feature in its model's arena.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FeatureId(usize);

impl FeatureId {
    pub const ROOT: FeatureId = FeatureId(0);

    pub fn new(index: usize) -> Self {
        FeatureId(index)
    }

    pub fn index(self) -> usize {
        self.0
    }

    /// The SAT variable of this feature.
    pub fn var(self) -> Var {
        Var::new(self.0 as u32 + 1)
    }

    pub fn from_var(var: Var) -> Self {
        FeatureId(var.index())
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a feature relates to its parent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Relation {
    Mandatory,
    Optional,
    Alternative,
    Or,
}

impl Relation {
    /// ALTERNATIVE and OR members form a sibling group.
    pub fn is_group(self) -> bool {
        matches!(self, Relation::Alternative | Relation::Or)
    }
}

impl FromStr for Relation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mandatory" => Ok(Relation::Mandatory),
            "optional" => Ok(Relation::Optional),
            "alternative" => Ok(Relation::Alternative),
            "or" => Ok(Relation::Or),
            _ => Err(ModelError::UnknownRelation(s.to_string())),
        }
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Relation::Mandatory => "MANDATORY",
            Relation::Optional => "OPTIONAL",
            Relation::Alternative => "ALTERNATIVE",
            Relation::Or => "OR",
        };
        f.write_str(s)
    }
}

/// A node of the feature tree.
#[derive(Debug, Clone)]
pub struct Feature {
    name: String,
    relation: Relation,
    parent: Option<FeatureId>,
    children: Vec<FeatureId>,
    hardware: HardwareVector,
    successors: Vec<FeatureId>,
}

impl Feature {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn relation(&self) -> Relation {
        self.relation
    }

    /// Parent feature; `None` only for the root.
    pub fn parent(&self) -> Option<FeatureId> {
        self.parent
    }

    pub fn children(&self) -> &[FeatureId] {
        &self.children
    }

    pub fn hardware(&self) -> &HardwareVector {
        &self.hardware
    }

    /// Raw successor list as declared for this feature.
    pub fn successors(&self) -> &[FeatureId] {
        &self.successors
    }

    pub fn is_abstract(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn is_concrete(&self) -> bool {
        self.children.is_empty()
    }
}

/// Relation of a cross-tree constraint.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum CtcRelation {
    Requires,
    Excludes,
}

impl FromStr for CtcRelation {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "requires" => Ok(CtcRelation::Requires),
            "excludes" => Ok(CtcRelation::Excludes),
            _ => Err(ModelError::UnknownConstraintRelation(s.to_string())),
        }
    }
}

impl fmt::Display for CtcRelation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CtcRelation::Requires => f.write_str("requires"),
            CtcRelation::Excludes => f.write_str("excludes"),
        }
    }
}

/// A directional REQUIRES or EXCLUDES constraint between two features.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CrossTreeConstraint {
    pub source: FeatureId,
    pub target: FeatureId,
    pub relation: CtcRelation,
}

impl CrossTreeConstraint {
    pub fn requires(source: FeatureId, target: FeatureId) -> Self {
        CrossTreeConstraint {
            source,
            target,
            relation: CtcRelation::Requires,
        }
    }

    pub fn excludes(source: FeatureId, target: FeatureId) -> Self {
        CrossTreeConstraint {
            source,
            target,
            relation: CtcRelation::Excludes,
        }
    }
}

/// Execution precedence between abstract features.
///
/// Keys are the features that declared a successor list (possibly empty).
/// Successor lists are kept in arena order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Connectivity {
    map: BTreeMap<FeatureId, Vec<FeatureId>>,
}

impl Connectivity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, feature: FeatureId, mut successors: Vec<FeatureId>) {
        successors.sort_unstable();
        successors.dedup();
        self.map.insert(feature, successors);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn contains(&self, feature: FeatureId) -> bool {
        self.map.contains_key(&feature)
    }

    /// Successors of `feature`; empty when it is not a key.
    pub fn successors(&self, feature: FeatureId) -> &[FeatureId] {
        self.map.get(&feature).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &[FeatureId])> + '_ {
        self.map.iter().map(|(&k, v)| (k, v.as_slice()))
    }

    /// Keys whose successor list contains `feature`.
    pub fn predecessors(&self, feature: FeatureId) -> impl Iterator<Item = FeatureId> + '_ {
        self.map
            .iter()
            .filter(move |(_, succ)| succ.contains(&feature))
            .map(|(&k, _)| k)
    }

    pub fn has_multiple_predecessors(&self, feature: FeatureId) -> bool {
        self.predecessors(feature).nth(1).is_some()
    }

    /// First key (in arena order) that no other key lists as a successor.
    pub fn start(&self) -> Option<FeatureId> {
        self.map.keys().copied().find(|&k| self.predecessors(k).next().is_none())
    }

    /// Removes `features` and, transitively, every key whose successor list
    /// becomes empty because of a removal. Returns every removed feature.
    pub fn prune(&mut self, features: impl IntoIterator<Item = FeatureId>) -> Vec<FeatureId> {
        let mut worklist: Vec<FeatureId> = features.into_iter().collect();
        let mut removed = Vec::new();
        while let Some(feature) = worklist.pop() {
            if removed.contains(&feature) {
                continue;
            }
            removed.push(feature);
            self.map.remove(&feature);
            for (&key, successors) in self.map.iter_mut() {
                let before = successors.len();
                successors.retain(|&s| s != feature);
                if successors.len() < before && successors.is_empty() {
                    worklist.push(key);
                }
            }
        }
        removed
    }
}

/// A validated feature model.
#[derive(Debug, Clone)]
pub struct FeatureModel {
    features: Vec<Feature>,
    by_name: HashMap<String, FeatureId>,
    constraints: Vec<CrossTreeConstraint>,
    connectivity: Connectivity,
}

impl FeatureModel {
    /// Name of the implicit root feature.
    pub const ROOT_NAME: &'static str = "root";

    pub fn root(&self) -> FeatureId {
        FeatureId::ROOT
    }

    /// Number of features, root included.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.len() <= 1
    }

    /// # Panics
    ///
    /// Panics if `id` does not belong to this model.
    pub fn feature(&self, id: FeatureId) -> &Feature {
        &self.features[id.0]
    }

    pub fn name(&self, id: FeatureId) -> &str {
        &self.features[id.0].name
    }

    pub fn get(&self, name: &str) -> Option<FeatureId> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (FeatureId, &Feature)> + '_ {
        self.features.iter().enumerate().map(|(i, f)| (FeatureId(i), f))
    }

    pub fn ids(&self) -> impl Iterator<Item = FeatureId> {
        (0..self.features.len()).map(FeatureId)
    }

    pub fn constraints(&self) -> &[CrossTreeConstraint] {
        &self.constraints
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn is_abstract(&self, id: FeatureId) -> bool {
        self.feature(id).is_abstract()
    }

    /// The abstract feature where execution begins.
    pub fn abstract_start(&self) -> Option<FeatureId> {
        self.connectivity.start()
    }

    /// First child of the abstract start feature.
    pub fn start(&self) -> Option<FeatureId> {
        let start = self.abstract_start()?;
        self.feature(start).children.first().copied()
    }

    /// True if `id` has children and all of them are concrete.
    pub fn is_concrete_parent(&self, id: FeatureId) -> bool {
        let children = &self.feature(id).children;
        !children.is_empty() && children.iter().all(|&c| self.feature(c).is_concrete())
    }

    /// Features whose children are all concrete, in arena order.
    pub fn abstract_layer(&self) -> Vec<FeatureId> {
        self.ids().filter(|&id| self.is_concrete_parent(id)).collect()
    }

    /// Concrete features below `id` (or `id` itself if concrete), in depth-first order.
    pub fn concrete_descendants(&self, id: FeatureId) -> Vec<FeatureId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let feature = self.feature(current);
            if feature.is_concrete() {
                result.push(current);
            } else {
                stack.extend(feature.children.iter().rev());
            }
        }
        result
    }
}

#[derive(Debug)]
struct PendingFeature {
    name: String,
    parent: String,
    relation: Relation,
}

/// Collects feature declarations and validates them into a [`FeatureModel`].
///
/// Declaration order is arena order; parents may be declared after their children.
#[derive(Debug, Default)]
pub struct FeatureModelBuilder {
    features: Vec<PendingFeature>,
    requirements: Vec<(String, HardwareClass, u32)>,
    successors: Vec<(String, Vec<String>)>,
    constraints: Vec<(String, String, CtcRelation)>,
}

impl FeatureModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a feature under `parent` (use `"root"` for top-level features).
    pub fn feature(&mut self, name: impl Into<String>, parent: impl Into<String>, relation: Relation) -> &mut Self {
        self.features.push(PendingFeature {
            name: name.into(),
            parent: parent.into(),
            relation,
        });
        self
    }

    pub fn requirement(&mut self, name: impl Into<String>, class: HardwareClass, amount: u32) -> &mut Self {
        self.requirements.push((name.into(), class, amount));
        self
    }

    /// Declares the successor list of an abstract feature.
    pub fn successors<S: Into<String>>(
        &mut self,
        name: impl Into<String>,
        successors: impl IntoIterator<Item = S>,
    ) -> &mut Self {
        self.successors
            .push((name.into(), successors.into_iter().map(Into::into).collect()));
        self
    }

    pub fn constraint(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        relation: CtcRelation,
    ) -> &mut Self {
        self.constraints.push((source.into(), target.into(), relation));
        self
    }

    pub fn build(&self) -> Result<FeatureModel, ModelError> {
        let mut features = Vec::with_capacity(self.features.len() + 1);
        let mut by_name = HashMap::with_capacity(self.features.len() + 1);
        features.push(Feature {
            name: FeatureModel::ROOT_NAME.to_string(),
            relation: Relation::Mandatory,
            parent: None,
            children: Vec::new(),
            hardware: HardwareVector::default(),
            successors: Vec::new(),
        });
        by_name.insert(FeatureModel::ROOT_NAME.to_string(), FeatureId::ROOT);

        for pending in &self.features {
            if pending.name == FeatureModel::ROOT_NAME {
                return Err(ModelError::RootRedefined);
            }
            if serialize::is_reserved_name(&pending.name) {
                return Err(ModelError::ReservedName(pending.name.clone()));
            }
            let id = FeatureId(features.len());
            if by_name.insert(pending.name.clone(), id).is_some() {
                return Err(ModelError::DuplicateFeature(pending.name.clone()));
            }
            features.push(Feature {
                name: pending.name.clone(),
                relation: pending.relation,
                parent: None,
                children: Vec::new(),
                hardware: HardwareVector::default(),
                successors: Vec::new(),
            });
        }

        for (offset, pending) in self.features.iter().enumerate() {
            let id = offset + 1;
            let parent = *by_name.get(&pending.parent).ok_or_else(|| ModelError::MissingParent {
                feature: pending.name.clone(),
                parent: pending.parent.clone(),
            })?;
            features[id].parent = Some(parent);
            features[parent.0].children.push(FeatureId(id));
        }

        check_acyclic(&features)?;
        for feature in &features {
            check_children(feature, &features)?;
        }

        let lookup = |name: &str| by_name.get(name).copied().ok_or_else(|| ModelError::UnknownFeature(name.to_string()));

        for (name, class, amount) in &self.requirements {
            let id = lookup(name)?;
            features[id.0].hardware.set(*class, *amount);
        }

        let mut connectivity = Connectivity::new();
        for (name, successors) in &self.successors {
            let id = lookup(name)?;
            let mut resolved = Vec::with_capacity(successors.len());
            for successor in successors {
                match by_name.get(successor) {
                    Some(&s) => resolved.push(s),
                    None => warn!("dropping unknown successor `{}` of `{}`", successor, name),
                }
            }
            connectivity.insert(id, resolved);
            features[id.0].successors = connectivity.successors(id).to_vec();
        }

        let constraints = self
            .constraints
            .iter()
            .map(|(source, target, relation)| {
                Ok(CrossTreeConstraint {
                    source: lookup(source)?,
                    target: lookup(target)?,
                    relation: *relation,
                })
            })
            .collect::<Result<Vec<_>, ModelError>>()?;

        Ok(FeatureModel {
            features,
            by_name,
            constraints,
            connectivity,
        })
    }
}

fn check_acyclic(features: &[Feature]) -> Result<(), ModelError> {
    for feature in features {
        let mut current = feature.parent;
        let mut steps = 0;
        while let Some(parent) = current {
            steps += 1;
            if steps > features.len() {
                return Err(ModelError::ParentCycle(feature.name.clone()));
            }
            current = features[parent.0].parent;
        }
    }
    Ok(())
}

fn check_children(feature: &Feature, features: &[Feature]) -> Result<(), ModelError> {
    let children: Vec<&Feature> = feature.children.iter().map(|c| &features[c.0]).collect();
    let Some(first) = children.first() else {
        return Ok(());
    };
    let concrete = children.iter().filter(|c| c.is_concrete()).count();
    if concrete != 0 && concrete != children.len() {
        return Err(ModelError::MixedChildren(feature.name.clone()));
    }
    if children.iter().any(|c| c.relation.is_group()) {
        if children.iter().any(|c| c.relation != first.relation) {
            return Err(ModelError::MixedGroup(feature.name.clone()));
        }
        if children.len() < 2 {
            return Err(ModelError::UndersizedGroup(feature.name.clone()));
        }
    }
    if children.len() == 1 && concrete == 1 && first.relation != Relation::Mandatory {
        return Err(ModelError::ConcreteChildArity(feature.name.clone()));
    }
    Ok(())
}
