//! JSON feature-model loader.
//!
//! ```json
//! {
//!   "features": [
//!     { "name": "Task", "parentName": "root", "relation": "MANDATORY",
//!       "reachableAbstractFeatures": ["Next"] },
//!     { "name": "t", "parentName": "Task", "relation": "MANDATORY",
//!       "hardwareRequirements": [{ "hardwareType": "PROCESSOR", "requirement": 2 }] }
//!   ],
//!   "crossTreeConstraints": [
//!     { "sourceName": "t", "targetName": "u", "relation": "requires" }
//!   ]
//! }
//! ```

use std::path::Path;

use log::debug;
use serde::Deserialize;

use crate::error::ModelError;
use crate::model::{FeatureModel, FeatureModelBuilder};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawModel {
    features: Vec<RawFeature>,
    #[serde(default)]
    cross_tree_constraints: Vec<RawConstraint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawFeature {
    name: String,
    #[serde(default)]
    parent_name: Option<String>,
    relation: String,
    #[serde(default)]
    reachable_abstract_features: Option<Vec<String>>,
    #[serde(default)]
    hardware_requirements: Vec<RawRequirement>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawRequirement {
    hardware_type: String,
    requirement: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConstraint {
    source_name: String,
    target_name: String,
    relation: String,
}

/// Parses and validates a feature model from JSON text.
pub fn from_json(json: &str) -> Result<FeatureModel, ModelError> {
    let raw: RawModel = serde_json::from_str(json)?;
    let mut builder = FeatureModelBuilder::new();

    for feature in &raw.features {
        let parent = feature.parent_name.as_deref().unwrap_or(FeatureModel::ROOT_NAME);
        builder.feature(&feature.name, parent, feature.relation.parse()?);
        for requirement in &feature.hardware_requirements {
            builder.requirement(&feature.name, requirement.hardware_type.parse()?, requirement.requirement);
        }
        if let Some(successors) = &feature.reachable_abstract_features {
            builder.successors(&feature.name, successors);
        }
    }
    for constraint in &raw.cross_tree_constraints {
        builder.constraint(
            &constraint.source_name,
            &constraint.target_name,
            constraint.relation.parse()?,
        );
    }

    let model = builder.build()?;
    debug!(
        "loaded feature model with {} features and {} constraints",
        model.len(),
        model.constraints().len()
    );
    Ok(model)
}

/// Reads a feature model from a JSON file.
pub fn from_path(path: impl AsRef<Path>) -> Result<FeatureModel, ModelError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    from_json(&text)
}
