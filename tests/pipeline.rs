//! End-to-end tests: loading, slicing, enumeration, serialization and merging.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use fmconf::calculator::{CalculatedModel, ConfigurationCalculator};
use fmconf::cnf::{self, ClauseSet};
use fmconf::hardware::{self, AvailableEdgeHardware, HardwareClass};
use fmconf::loader;
use fmconf::merger::Merger;
use fmconf::model::{FeatureModel, FeatureModelBuilder, Relation};
use fmconf::serialize;
use fmconf::slicer::{slice_model, Threshold};
use fmconf::solver::Interrupt;

use test_log::test;

const SAMPLE: &str = include_str!("../demos/sample.json");

/// startTask -> {A, B} -> endTask; A is optional, b1 requires A, b2 excludes A.
const PROPAGATION: &str = r#"{
    "features": [
        { "name": "startTask", "relation": "MANDATORY", "reachableAbstractFeatures": ["A", "B"] },
        { "name": "tsv1", "parentName": "startTask", "relation": "MANDATORY" },
        { "name": "A", "relation": "OPTIONAL", "reachableAbstractFeatures": ["endTask"] },
        { "name": "a", "parentName": "A", "relation": "MANDATORY" },
        { "name": "B", "relation": "MANDATORY", "reachableAbstractFeatures": ["endTask"] },
        { "name": "b1", "parentName": "B", "relation": "ALTERNATIVE" },
        { "name": "b2", "parentName": "B", "relation": "ALTERNATIVE" },
        { "name": "endTask", "relation": "MANDATORY", "reachableAbstractFeatures": [] },
        { "name": "tev1", "parentName": "endTask", "relation": "MANDATORY" }
    ],
    "crossTreeConstraints": [
        { "sourceName": "b1", "targetName": "A", "relation": "requires" },
        { "sourceName": "b2", "targetName": "A", "relation": "excludes" }
    ]
}"#;

fn calculate(model: &FeatureModel, threshold: Threshold) -> CalculatedModel<'_> {
    let sliced = slice_model(model, threshold);
    ConfigurationCalculator::new().calculate_sliced(model, &sliced)
}

fn names(model: &FeatureModel, ids: &[fmconf::model::FeatureId]) -> Vec<String> {
    ids.iter().map(|&f| model.name(f).to_string()).collect()
}

/// T1 -> T2 -> T3 without constraints.
fn chain() -> FeatureModel {
    let mut builder = FeatureModelBuilder::new();
    for (task, next) in [("T1", Some("T2")), ("T2", Some("T3")), ("T3", None)] {
        builder
            .feature(task, "root", Relation::Mandatory)
            .feature(format!("{task}x"), task, Relation::Alternative)
            .feature(format!("{task}y"), task, Relation::Alternative)
            .successors(task, next);
    }
    builder.build().unwrap()
}

// ─── Slicing ───────────────────────────────────────────────────────────────────

#[test]
fn chain_threshold_zero_cuts_every_task() {
    let model = chain();
    let sliced = slice_model(&model, Threshold::Limit(0));
    assert_eq!(sliced.slices.len(), 3);
    assert!(sliced.slices.iter().all(|s| s.len() == 1));
}

#[test]
fn chain_unbounded_threshold_keeps_one_slice() {
    let model = chain();
    let sliced = slice_model(&model, Threshold::Unbounded);
    assert_eq!(sliced.slices.len(), 1);
    assert_eq!(names(&model, &sliced.slices[0]), vec!["T1", "T2", "T3"]);
}

#[test]
fn slices_cover_the_abstract_layer_once() {
    let model = loader::from_json(SAMPLE).unwrap();
    for threshold in [Threshold::Limit(0), Threshold::Limit(3), Threshold::Unbounded] {
        let sliced = slice_model(&model, threshold);
        let mut covered: Vec<_> = sliced.slices.iter().flatten().copied().collect();
        covered.sort_unstable();
        let mut layer = sliced.abstract_layer.clone();
        layer.sort_unstable();
        assert_eq!(covered, layer, "threshold {}", threshold);
    }
}

// ─── Clauses and enumeration ───────────────────────────────────────────────────

#[test]
fn header_matches_clauses() {
    let model = loader::from_json(SAMPLE).unwrap();
    let mut constraints = model.constraints().to_vec();
    let clauses = cnf::model_clauses(&model, &mut constraints);
    let header = clauses.header();
    assert_eq!(header.clause_count, clauses.len());
    let max = clauses.clauses().iter().flatten().map(|l| l.var().id()).max().unwrap();
    assert_eq!(header.max_literal, max);

    let text = clauses.to_dimacs();
    assert!(text.starts_with(&format!("p cnf {} {}", header.max_literal, header.clause_count)));
    assert_eq!(ClauseSet::from_dimacs(&text).unwrap(), clauses);
}

#[test]
fn alternative_group_has_one_model_per_child() {
    let mut builder = FeatureModelBuilder::new();
    builder
        .feature("T", "root", Relation::Mandatory)
        .feature("x", "T", Relation::Alternative)
        .feature("y", "T", Relation::Alternative)
        .feature("z", "T", Relation::Alternative);
    let model = builder.build().unwrap();
    let calculated = ConfigurationCalculator::new().calculate_unsliced(&model);
    assert_eq!(calculated.slices[0].len(), 3);
    assert!(calculated.slices[0].iter().all(|c| c.features.len() == 1));
}

#[test]
fn abstract_configurations_multiply_over_independent_groups() {
    let mut builder = FeatureModelBuilder::new();
    builder
        .feature("O", "root", Relation::Optional)
        .feature("o", "O", Relation::Mandatory)
        .feature("G", "root", Relation::Mandatory)
        .feature("H", "root", Relation::Mandatory);
    for i in 1..=3 {
        builder
            .feature(format!("G{i}"), "G", Relation::Or)
            .feature(format!("g{i}"), format!("G{i}"), Relation::Mandatory)
            .feature(format!("H{i}"), "H", Relation::Alternative)
            .feature(format!("h{i}"), format!("H{i}"), Relation::Mandatory);
    }
    let model = builder.build().unwrap();
    let calculated = calculate(&model, Threshold::Unbounded);
    // 2 (optional) * 7 (non-empty OR subsets) * 3 (alternatives)
    assert_eq!(calculated.abstract_configurations.len(), 42);
}

#[test]
fn constraint_propagation_fixture() {
    let model = loader::from_json(PROPAGATION).unwrap();
    let calculated = calculate(&model, Threshold::Limit(1));
    assert_eq!(calculated.abstract_configurations.len(), 2);
    let sizes: Vec<usize> = calculated.slices.iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![1, 1, 1, 2]);

    let residual: Vec<(String, String)> = calculated
        .constraints
        .iter()
        .map(|c| (model.name(c.source).to_string(), model.name(c.target).to_string()))
        .collect();
    assert_eq!(
        residual,
        vec![("b1".to_string(), "A".to_string()), ("b2".to_string(), "a".to_string())]
    );
}

#[test]
fn cancelled_enumeration_is_incomplete() {
    let model = loader::from_json(SAMPLE).unwrap();
    let flag = Arc::new(AtomicBool::new(true));
    let sliced = slice_model(&model, Threshold::Unbounded);
    let calculated = ConfigurationCalculator::new()
        .with_interrupt(Interrupt::none().with_flag(flag))
        .calculate_sliced(&model, &sliced);
    assert!(!calculated.complete);
    assert_eq!(calculated.configuration_count(), 0);
}

// ─── Serialization ─────────────────────────────────────────────────────────────

#[test]
fn csv_round_trip_is_stable() {
    let model = loader::from_json(SAMPLE).unwrap();
    let calculated = calculate(&model, Threshold::Limit(2));
    let text = serialize::to_csv(&calculated).unwrap();
    let restored = serialize::from_csv(&model, &text).unwrap();

    assert_eq!(restored.constraints, calculated.constraints);
    assert_eq!(restored.abstract_configurations, calculated.abstract_configurations);
    assert_eq!(restored.slices, calculated.slices);
    assert_eq!(restored.slice_parents, calculated.slice_parents);
    assert_eq!(serialize::to_csv(&restored).unwrap(), text);
}

// ─── Merging ───────────────────────────────────────────────────────────────────

#[test]
fn merge_propagation_fixture() {
    let model = loader::from_json(PROPAGATION).unwrap();
    let calculated = calculate(&model, Threshold::Limit(1));
    let outcome = Merger::new(&calculated).merge(&AvailableEdgeHardware::uniform(1), HardwareClass::COUNT);

    // a is always selected inside its slice, so b2 never combines.
    assert_eq!(outcome.valid_combinations, 1);
    let graph = outcome.graph.unwrap();
    assert_eq!(graph.vertex_count(), 4);
    assert!(graph.vertex_by_label("b2").is_none());

    let start = graph.vertex_by_label("tsv1").unwrap();
    let end = graph.vertex_by_label("tev1").unwrap();
    assert_eq!(graph.start(), Some(start));
    assert_eq!(graph.end(), Some(end));
    assert_eq!(graph.vertex(end).stage, 2);
    assert!(graph.vertex(end).decision_making);
    assert_eq!(graph.find_all_paths(start, end).len(), 2);
}

#[test]
fn more_capacity_never_removes_features() {
    let model = loader::from_json(SAMPLE).unwrap();
    let calculated = calculate(&model, Threshold::Unbounded);
    let mut previous_missing = usize::MAX;
    let mut previous_valid = 0;
    for capacity in 0..=5 {
        let edge = AvailableEdgeHardware::uniform(capacity);
        let non_available = hardware::non_available_features(&model, &edge, HardwareClass::COUNT);
        let outcome = Merger::new(&calculated).merge(&edge, HardwareClass::COUNT);
        assert_eq!(outcome.non_available, non_available);
        assert!(non_available.len() <= previous_missing);
        previous_missing = non_available.len();

        // Dropping a whole slice changes what a combination is; compare full merges only.
        if outcome.slices == calculated.slices.len() {
            assert!(outcome.valid_combinations >= previous_valid);
            previous_valid = outcome.valid_combinations;
        }
    }
    assert!(previous_valid > 0);
}

#[test]
fn fewer_classes_check_less() {
    let model = loader::from_json(SAMPLE).unwrap();
    let edge = AvailableEdgeHardware::uniform(0);
    // DISPLAY alone: nothing in the sample needs a display.
    assert!(hardware::non_available_features(&model, &edge, 1).is_empty());
    // DISPLAY and PROCESSOR.
    let two = hardware::non_available_features(&model, &edge, 2);
    assert_eq!(two.len(), 5);
    let all = hardware::non_available_features(&model, &edge, HardwareClass::COUNT);
    assert!(two.iter().all(|f| all.contains(f)));
    assert_eq!(all.len(), 7);
}

#[test]
fn concurrent_merges_share_one_calculated_model() {
    let model = loader::from_json(SAMPLE).unwrap();
    let calculated = calculate(&model, Threshold::Unbounded);
    let sequential: Vec<u64> = (1..=4)
        .map(|c| {
            Merger::new(&calculated)
                .merge(&AvailableEdgeHardware::uniform(c), HardwareClass::COUNT)
                .valid_combinations
        })
        .collect();

    let parallel: Vec<u64> = std::thread::scope(|scope| {
        let handles: Vec<_> = (1..=4)
            .map(|c| {
                let calculated = &calculated;
                scope.spawn(move || {
                    Merger::new(calculated)
                        .merge(&AvailableEdgeHardware::uniform(c), HardwareClass::COUNT)
                        .valid_combinations
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(parallel, sequential);
    assert_eq!(calculated.connectivity, *model.connectivity());
}

#[test]
fn sample_graph_renders_to_dot() {
    let model = loader::from_json(SAMPLE).unwrap();
    let calculated = calculate(&model, Threshold::Unbounded);
    let outcome = Merger::new(&calculated).merge(&AvailableEdgeHardware::uniform(4), HardwareClass::COUNT);
    let graph = outcome.graph.unwrap();
    // yolo needs 4 processors and a tensor unit; both fit.
    assert!(graph.vertex_by_label("yolo").is_some());
    // haar excludes every tracking configuration.
    assert!(graph.vertex_by_label("haar").is_none());
    let dot = graph.to_dot().unwrap();
    assert!(dot.starts_with("digraph {"));
    assert!(dot.contains("yolo"));
}
