//! CSV interchange of calculated configurations.
//!
//! ```text
//! CTC;requires;b1;A
//! slice;0;startTask
//! conf;0;tsv1;parents;startTask
//! slice;3;B
//! conf;3;b1;parents;B
//! abstract;0;startTask;B;endTask
//! ```
//!
//! A `slice` line declares a slice and its abstract parents, so slices
//! without configurations survive a round trip. `conf` lines carry the slice
//! id; loading groups them by id in order of first appearance, and a `conf`
//! line for an undeclared id declares the slice on the fly.

use std::fmt::{self, Write as _};

use crate::calculator::{CalculatedModel, PartialConfiguration};
use crate::error::FormatError;
use crate::model::{CrossTreeConstraint, CtcRelation, FeatureId, FeatureModel};

const SEPARATOR: char = ';';
const PARENTS_MARKER: &str = "parents";

/// True for feature names that would make a `conf` line ambiguous.
pub fn is_reserved_name(name: &str) -> bool {
    name == PARENTS_MARKER || name.contains(SEPARATOR)
}

/// Writes residual constraints, slices with their configurations, and abstract configurations.
pub fn to_csv(calculated: &CalculatedModel<'_>) -> Result<String, fmt::Error> {
    let model = calculated.model();
    let mut out = String::new();
    let names = |ids: &[FeatureId]| ids.iter().map(|&f| model.name(f)).collect::<Vec<_>>().join(";");

    for ctc in &calculated.constraints {
        writeln!(
            out,
            "CTC;{};{};{}",
            ctc.relation,
            model.name(ctc.source),
            model.name(ctc.target)
        )?;
    }
    for (id, slice) in calculated.slices.iter().enumerate() {
        writeln!(out, "slice;{};{}", id, names(&calculated.parents_of_slice(id)))?;
        for configuration in slice {
            writeln!(
                out,
                "conf;{};{};{};{}",
                id,
                names(&configuration.features),
                PARENTS_MARKER,
                names(&configuration.parents)
            )?;
        }
    }
    for (id, selection) in calculated.abstract_configurations.iter().enumerate() {
        writeln!(out, "abstract;{};{}", id, names(selection))?;
    }
    Ok(out)
}

/// Reads configurations written by [`to_csv`] against `model`.
pub fn from_csv<'m>(model: &'m FeatureModel, text: &str) -> Result<CalculatedModel<'m>, FormatError> {
    let mut calculated = CalculatedModel::new(model);
    let mut slice_ids: Vec<String> = Vec::new();

    for (index, line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(SEPARATOR).collect();
        let resolve = |name: &str| {
            model.get(name).ok_or_else(|| FormatError::UnknownFeature {
                line: line_no,
                name: name.to_string(),
            })
        };
        let resolve_all = |names: &[&str]| {
            names
                .iter()
                .filter(|n| !n.is_empty())
                .map(|&name| resolve(name))
                .collect::<Result<Vec<_>, _>>()
        };
        let malformed = |message: &str| FormatError::Malformed {
            line: line_no,
            message: message.to_string(),
        };

        match fields[0] {
            "CTC" => {
                let [_, relation, source, target] = fields[..] else {
                    return Err(malformed("constraint lines have four fields"));
                };
                let relation: CtcRelation = relation.parse().map_err(|_| malformed("unknown constraint relation"))?;
                calculated.constraints.push(CrossTreeConstraint {
                    source: resolve(source)?,
                    target: resolve(target)?,
                    relation,
                });
            }
            "slice" => {
                let [_, id, parents @ ..] = &fields[..] else {
                    return Err(malformed("slice lines need an id"));
                };
                if slice_ids.iter().any(|s| s == id) {
                    return Err(malformed("slice declared twice"));
                }
                let parents = resolve_all(parents)?;
                slice_ids.push(id.to_string());
                calculated.push_slice(parents, Vec::new());
            }
            "conf" => {
                let [_, id, rest @ ..] = &fields[..] else {
                    return Err(malformed("configuration lines need an id"));
                };
                let Some(marker) = rest.iter().position(|&f| f == PARENTS_MARKER) else {
                    return Err(malformed("configuration line without parents"));
                };
                let features = resolve_all(&rest[..marker])?;
                let parents = resolve_all(&rest[marker + 1..])?;
                let slot = match slice_ids.iter().position(|s| s == id) {
                    Some(slot) => slot,
                    None => {
                        slice_ids.push(id.to_string());
                        calculated.push_slice(parents.clone(), Vec::new());
                        slice_ids.len() - 1
                    }
                };
                calculated.slices[slot].push(PartialConfiguration::new(features, parents));
            }
            "abstract" => {
                if fields.len() < 2 {
                    return Err(malformed("abstract lines need an id"));
                }
                let selection = resolve_all(&fields[2..])?;
                calculated.abstract_configurations.push(selection);
            }
            other => return Err(malformed(&format!("unknown line kind `{}`", other))),
        }
    }
    Ok(calculated)
}
