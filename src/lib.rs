//! # fmconf: Feature-Model Configuration for Edge Deployments
//!
//! **`fmconf`** computes the valid configurations of a feature model that
//! describes a service-based application, and turns the configurations that
//! fit a given edge node into a single execution graph.
//!
//! ## What is a Feature Model?
//!
//! A feature model is a tree of features. **Abstract** features stand for
//! services; their **concrete** children are the implementations (or
//! approximations) of that service. Children are attached through MANDATORY,
//! OPTIONAL, ALTERNATIVE (exactly one) or OR (at least one) relations, and
//! cross-tree constraints (REQUIRES, EXCLUDES) relate features across
//! branches. Abstract features also declare which abstract features execute
//! after them, which gives the model its execution order.
//!
//! ## Key Features
//!
//! - **Slicing**: The abstract layer is split into slices whose estimated number of configurations stays under a threshold, so each slice is enumerated on its own.
//! - **All-SAT Enumeration**: Configurations are enumerated with blocking clauses on top of a small DPLL solver behind the [`Solver`][crate::solver::Solver] trait.
//! - **Shared, Read-Only Models**: A [`CalculatedModel`][crate::calculator::CalculatedModel] is never mutated by a merge, so merges for different edge nodes can run in parallel.
//! - **Cancellable**: Enumeration and merging check an [`Interrupt`][crate::solver::Interrupt] (flag or deadline) and report partial results.
//! - **1-Based Variables**: Feature `i` in the arena is SAT variable `i + 1`, matching DIMACS.
//!
//! ## Quick Start
//!
//! ```rust
//! use fmconf::calculator::ConfigurationCalculator;
//! use fmconf::hardware::{AvailableEdgeHardware, HardwareClass};
//! use fmconf::merger::Merger;
//! use fmconf::model::{FeatureModelBuilder, Relation};
//! use fmconf::slicer::{slice_model, Threshold};
//!
//! // 1. Describe the application
//! let mut builder = FeatureModelBuilder::new();
//! builder
//!     .feature("Capture", "root", Relation::Mandatory)
//!     .feature("camera", "Capture", Relation::Mandatory)
//!     .feature("Detect", "root", Relation::Mandatory)
//!     .feature("precise", "Detect", Relation::Alternative)
//!     .feature("fast", "Detect", Relation::Alternative)
//!     .requirement("precise", HardwareClass::Tensor, 1)
//!     .successors("Capture", ["Detect"])
//!     .successors("Detect", Vec::<String>::new());
//! let model = builder.build().unwrap();
//!
//! // 2. Slice and enumerate
//! let sliced = slice_model(&model, Threshold::Limit(10));
//! let calculated = ConfigurationCalculator::new().calculate_sliced(&model, &sliced);
//! assert_eq!(calculated.configuration_count(), 2);
//!
//! // 3. Merge for an edge node without a tensor unit
//! let edge = AvailableEdgeHardware::uniform(4).with(HardwareClass::Tensor, 0);
//! let outcome = Merger::new(&calculated).merge(&edge, HardwareClass::COUNT);
//! let graph = outcome.graph.unwrap();
//! assert!(graph.vertex_by_label("precise").is_none());
//! assert!(graph.vertex_by_label("fast").is_some());
//! ```
//!
//! ## Core Components
//!
//! - **[`model`]**: Feature arena, validation ([`FeatureModelBuilder`][crate::model::FeatureModelBuilder]) and connectivity.
//! - **[`loader`]**: JSON input.
//! - **[`slicer`]**: Threshold-driven slicing of the abstract layer.
//! - **[`cnf`]**: Clause generation; **[`solver`]**: all-SAT enumeration.
//! - **[`calculator`]**: Per-slice enumeration and constraint propagation.
//! - **[`merger`]**: Hardware filtering, combination search and graph assembly.
//! - **[`graph`]**, **[`generator`]**, **[`dot`]**: Execution graphs and their Graphviz output.
//! - **[`serialize`]**: CSV interchange of calculated configurations.

pub mod bitset;
pub mod calculator;
pub mod cnf;
pub mod dot;
pub mod error;
pub mod generator;
pub mod graph;
pub mod hardware;
pub mod loader;
pub mod merger;
pub mod model;
pub mod serialize;
pub mod slicer;
pub mod solver;
pub mod types;
