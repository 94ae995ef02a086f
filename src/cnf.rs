//! Translation of feature-model relations into CNF clause sets.
//!
//! | Relation | Clauses |
//! |---|---|
//! | root | `(r)` |
//! | MANDATORY child `c` of `p` | `(c ∨ ¬p)`, `(¬c ∨ p)` |
//! | OPTIONAL child | `(¬c ∨ p)` |
//! | ALTERNATIVE group | `(c1 ∨ … ∨ cn ∨ ¬p)`, `(¬ci ∨ ¬cj)` per pair, `(¬ci ∨ p)` per child |
//! | OR group | `(c1 ∨ … ∨ cn ∨ ¬p)`, `(¬ci ∨ p)` per child |
//! | REQUIRES(s, t) | `(¬s ∨ t)` |
//! | EXCLUDES(s, t) | `(¬s ∨ ¬t)` |
//!
//! Cross-tree constraints whose endpoints both lie in the encoded feature set
//! are embedded and removed from the caller's working list.

use std::fmt;

use log::debug;

use crate::bitset::FeatureSet;
use crate::error::FormatError;
use crate::model::{CrossTreeConstraint, CtcRelation, FeatureId, FeatureModel, Relation};
use crate::types::{Lit, Var};

/// DIMACS header: largest variable used and number of clauses.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct Header {
    pub max_literal: u32,
    pub clause_count: usize,
}

/// A list of clauses with a header kept in sync on every insertion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseSet {
    header: Header,
    clauses: Vec<Vec<Lit>>,
}

impl ClauseSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, clause: Vec<Lit>) {
        if let Some(max) = clause.iter().map(|l| l.var().id()).max() {
            self.header.max_literal = self.header.max_literal.max(max);
        }
        self.clauses.push(clause);
        self.header.clause_count = self.clauses.len();
    }

    pub fn header(&self) -> Header {
        self.header
    }

    pub fn clauses(&self) -> &[Vec<Lit>] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Variables occurring in any clause, ascending.
    pub fn variables(&self) -> Vec<Var> {
        let mut vars: Vec<Var> = self.clauses.iter().flatten().map(|l| l.var()).collect();
        vars.sort_unstable();
        vars.dedup();
        vars
    }

    /// Renders the clause set in DIMACS CNF format.
    pub fn to_dimacs(&self) -> String {
        self.to_string()
    }

    /// Parses DIMACS CNF text. Comment lines (`c ...`) are skipped.
    pub fn from_dimacs(text: &str) -> Result<Self, FormatError> {
        let mut set = ClauseSet::new();
        let mut declared = None;
        let mut current = Vec::new();
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('c') {
                continue;
            }
            let malformed = |message: &str| FormatError::Malformed {
                line: i + 1,
                message: message.to_string(),
            };
            if let Some(rest) = line.strip_prefix("p cnf") {
                let fields: Vec<usize> = rest
                    .split_whitespace()
                    .map(str::parse)
                    .collect::<Result<_, _>>()
                    .map_err(|_| malformed("invalid header"))?;
                match fields[..] {
                    [_, clauses] => declared = Some(clauses),
                    _ => return Err(malformed("header needs two fields")),
                }
                continue;
            }
            for token in line.split_whitespace() {
                let value: i32 = token.parse().map_err(|_| malformed("invalid literal"))?;
                match Lit::from_dimacs(value) {
                    Some(lit) => current.push(lit),
                    None => set.push(std::mem::take(&mut current)),
                }
            }
        }
        if !current.is_empty() {
            set.push(current);
        }
        if let Some(count) = declared {
            if count != set.len() {
                return Err(FormatError::Malformed {
                    line: 0,
                    message: format!("header declares {} clauses, found {}", count, set.len()),
                });
            }
        }
        Ok(set)
    }
}

impl fmt::Display for ClauseSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "p cnf {} {}", self.header.max_literal, self.header.clause_count)?;
        for clause in &self.clauses {
            for lit in clause {
                write!(f, "{} ", lit.to_dimacs())?;
            }
            writeln!(f, "0")?;
        }
        Ok(())
    }
}

/// Clauses linking `parent` to its children.
fn push_children(clauses: &mut ClauseSet, model: &FeatureModel, parent: FeatureId) {
    let children = model.feature(parent).children();
    let Some(&first) = children.first() else {
        return;
    };
    let p = parent.var();
    let group = model.feature(first).relation();

    if children.len() > 1 && group.is_group() {
        let mut at_least_one: Vec<Lit> = children.iter().map(|c| c.var().pos()).collect();
        at_least_one.push(p.neg());
        clauses.push(at_least_one);
        if group == Relation::Alternative {
            for (i, a) in children.iter().enumerate() {
                for b in &children[i + 1..] {
                    clauses.push(vec![a.var().neg(), b.var().neg()]);
                }
            }
        }
        for child in children {
            clauses.push(vec![child.var().neg(), p.pos()]);
        }
        return;
    }

    for &child in children {
        let c = child.var();
        match model.feature(child).relation() {
            Relation::Optional => clauses.push(vec![c.neg(), p.pos()]),
            // A one-member group behaves like a mandatory child.
            Relation::Mandatory | Relation::Alternative | Relation::Or => {
                clauses.push(vec![c.pos(), p.neg()]);
                clauses.push(vec![c.neg(), p.pos()]);
            }
        }
    }
}

/// Embeds constraints with both endpoints in `features`, removing them from `constraints`.
fn embed_local_constraints(clauses: &mut ClauseSet, features: &FeatureSet, constraints: &mut Vec<CrossTreeConstraint>) {
    constraints.retain(|ctc| {
        if !(features.contains(ctc.source) && features.contains(ctc.target)) {
            return true;
        }
        let s = ctc.source.var();
        let t = ctc.target.var();
        match ctc.relation {
            CtcRelation::Requires => clauses.push(vec![s.neg(), t.pos()]),
            CtcRelation::Excludes => clauses.push(vec![s.neg(), t.neg()]),
        }
        false
    });
}

/// Clause set of the abstract layer: the root plus every group of abstract children.
pub fn abstract_layer_clauses(model: &FeatureModel, constraints: &mut Vec<CrossTreeConstraint>) -> ClauseSet {
    let mut clauses = ClauseSet::new();
    clauses.push(vec![model.root().var().pos()]);

    let mut abstract_features = FeatureSet::with_capacity(model.len());
    for (id, feature) in model.iter() {
        if feature.is_concrete() {
            continue;
        }
        abstract_features.insert(id);
        if feature.children().iter().all(|&c| model.is_abstract(c)) {
            push_children(&mut clauses, model, id);
        }
    }
    embed_local_constraints(&mut clauses, &abstract_features, constraints);
    debug!("abstract layer: {} clauses over {} variables", clauses.len(), clauses.header().max_literal);
    clauses
}

/// Clause set of one partial feature model: each parent forced true plus its concrete children.
pub fn slice_clauses(
    model: &FeatureModel,
    parents: &[FeatureId],
    constraints: &mut Vec<CrossTreeConstraint>,
) -> ClauseSet {
    let mut clauses = ClauseSet::new();
    let mut features = FeatureSet::with_capacity(model.len());
    for &parent in parents {
        clauses.push(vec![parent.var().pos()]);
        push_children(&mut clauses, model, parent);
        features.insert(parent);
        features.extend(model.feature(parent).children().iter().copied());
    }
    embed_local_constraints(&mut clauses, &features, constraints);
    clauses
}

/// Clause set of the whole model with every constraint embedded.
pub fn model_clauses(model: &FeatureModel, constraints: &mut Vec<CrossTreeConstraint>) -> ClauseSet {
    let mut clauses = ClauseSet::new();
    clauses.push(vec![model.root().var().pos()]);
    for id in model.ids() {
        push_children(&mut clauses, model, id);
    }
    let everything: FeatureSet = model.ids().collect();
    embed_local_constraints(&mut clauses, &everything, constraints);
    clauses
}
