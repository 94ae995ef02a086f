//! Cutting the abstract execution chain into independently solvable slices.
//!
//! The walk starts at the abstract start feature and follows the connectivity
//! map depth-first. A running estimate of the slice's configuration count is
//! multiplied by the child count of every feature whose children form an
//! ALTERNATIVE group. The current slice is closed when the feature has no
//! successor, fans out to several successors (each starts a new slice), feeds
//! into a join point, or when the next feature would push the estimate above
//! the threshold.

use std::fmt;

use log::{debug, warn};
use num_bigint::BigUint;

use crate::bitset::FeatureSet;
use crate::model::{FeatureId, FeatureModel, Relation};

/// Upper bound on the estimated configuration count of one slice.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Threshold {
    Limit(u64),
    /// Never cut on size; slices end only at branches and joins.
    Unbounded,
}

impl Threshold {
    fn exceeded_by(self, estimate: &BigUint) -> bool {
        match self {
            Threshold::Limit(limit) => *estimate > BigUint::from(limit),
            Threshold::Unbounded => false,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::Limit(limit) => write!(f, "{}", limit),
            Threshold::Unbounded => f.write_str("unbounded"),
        }
    }
}

/// The result of slicing a feature model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlicedModel {
    /// Features whose children are all concrete.
    pub abstract_layer: Vec<FeatureId>,
    /// Sequential chains of abstract-layer features; each feature appears once.
    pub slices: Vec<Vec<FeatureId>>,
}

/// Estimated configuration count after adding `feature` to a slice.
pub fn estimate(model: &FeatureModel, current: &BigUint, feature: FeatureId) -> BigUint {
    let children = model.feature(feature).children();
    match children.first() {
        Some(&first) if model.feature(first).relation() == Relation::Alternative => current * BigUint::from(children.len()),
        _ => current.clone(),
    }
}

/// Slices `model` along its connectivity map.
///
/// Abstract-layer features that the walk never reaches end up in singleton
/// slices, appended in arena order.
pub fn slice_model(model: &FeatureModel, threshold: Threshold) -> SlicedModel {
    let abstract_layer = model.abstract_layer();
    let in_layer: FeatureSet = abstract_layer.iter().copied().collect();
    let connectivity = model.connectivity();

    let mut visited = FeatureSet::with_capacity(model.len());
    let mut slices = Vec::new();
    let mut pending: Vec<FeatureId> = model.abstract_start().into_iter().collect();

    while let Some(first) = pending.pop() {
        if visited.contains(first) {
            continue;
        }
        let mut slice = Vec::new();
        let mut running = BigUint::from(1u32);
        let mut current = first;
        loop {
            visited.insert(current);
            if in_layer.contains(current) {
                slice.push(current);
            } else {
                warn!("connectivity feature {} has no concrete children", model.name(current));
            }
            running = estimate(model, &running, current);

            match connectivity.successors(current) {
                [] => break,
                &[next] => {
                    if visited.contains(next) {
                        break;
                    }
                    if connectivity.has_multiple_predecessors(next) || threshold.exceeded_by(&estimate(model, &running, next)) {
                        pending.push(next);
                        break;
                    }
                    current = next;
                }
                fan_out => {
                    pending.extend(fan_out.iter().rev());
                    break;
                }
            }
        }
        if !slice.is_empty() {
            slices.push(slice);
        }
    }

    let unreached: Vec<FeatureId> = abstract_layer.iter().copied().filter(|&f| !visited.contains(f)).collect();
    if !unreached.is_empty() {
        warn!("{} abstract features are not reachable from the start feature", unreached.len());
        slices.extend(unreached.into_iter().map(|f| vec![f]));
    }

    debug!("sliced {} abstract features into {} slices (threshold {})", abstract_layer.len(), slices.len(), threshold);
    SlicedModel { abstract_layer, slices }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FeatureModelBuilder;

    use test_log::test;

    /// T1 -> T2 -> T3, each with two alternative children.
    fn chain() -> FeatureModel {
        let mut builder = FeatureModelBuilder::new();
        for (task, next) in [("T1", Some("T2")), ("T2", Some("T3")), ("T3", None)] {
            builder
                .feature(task, "root", Relation::Mandatory)
                .feature(format!("{task}a"), task, Relation::Alternative)
                .feature(format!("{task}b"), task, Relation::Alternative)
                .successors(task, next);
        }
        builder.build().unwrap()
    }

    fn names(model: &FeatureModel, sliced: &SlicedModel) -> Vec<Vec<String>> {
        sliced
            .slices
            .iter()
            .map(|s| s.iter().map(|&f| model.name(f).to_string()).collect())
            .collect()
    }

    #[test]
    fn test_threshold_zero_cuts_every_feature() {
        let model = chain();
        let sliced = slice_model(&model, Threshold::Limit(0));
        assert_eq!(names(&model, &sliced), vec![vec!["T1"], vec!["T2"], vec!["T3"]]);
    }

    #[test]
    fn test_unbounded_keeps_chain() {
        let model = chain();
        let sliced = slice_model(&model, Threshold::Unbounded);
        assert_eq!(names(&model, &sliced), vec![vec!["T1", "T2", "T3"]]);
    }

    #[test]
    fn test_threshold_limits_estimate() {
        let model = chain();
        // 2 * 2 = 4 fits, 8 does not.
        let sliced = slice_model(&model, Threshold::Limit(4));
        assert_eq!(names(&model, &sliced), vec![vec!["T1", "T2"], vec!["T3"]]);
    }

    #[test]
    fn test_fan_out_and_join() {
        let mut builder = FeatureModelBuilder::new();
        for task in ["S", "A", "B", "E"] {
            builder
                .feature(task, "root", Relation::Mandatory)
                .feature(task.to_lowercase(), task, Relation::Mandatory);
        }
        builder
            .successors("S", ["A", "B"])
            .successors("A", ["E"])
            .successors("B", ["E"])
            .successors("E", Vec::<String>::new());
        let model = builder.build().unwrap();

        let sliced = slice_model(&model, Threshold::Unbounded);
        assert_eq!(names(&model, &sliced), vec![vec!["S"], vec!["A"], vec!["E"], vec!["B"]]);
        assert_eq!(sliced.abstract_layer.len(), 4);
    }

    #[test]
    fn test_unreachable_features_get_own_slice() {
        let mut builder = FeatureModelBuilder::new();
        builder
            .feature("A", "root", Relation::Mandatory)
            .feature("a", "A", Relation::Mandatory)
            .feature("Lost", "root", Relation::Mandatory)
            .feature("l", "Lost", Relation::Mandatory)
            .successors("A", Vec::<String>::new());
        let model = builder.build().unwrap();
        let sliced = slice_model(&model, Threshold::Unbounded);
        assert_eq!(names(&model, &sliced), vec![vec!["A"], vec!["Lost"]]);
    }

    #[test]
    fn test_estimate_ignores_or_groups() {
        let mut builder = FeatureModelBuilder::new();
        builder
            .feature("A", "root", Relation::Mandatory)
            .feature("a1", "A", Relation::Or)
            .feature("a2", "A", Relation::Or)
            .feature("a3", "A", Relation::Or);
        let model = builder.build().unwrap();
        let one = BigUint::from(1u32);
        assert_eq!(estimate(&model, &one, model.get("A").unwrap()), one);
    }
}
